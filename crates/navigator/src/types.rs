//! Payload types exchanged with the backend.
//!
//! Field names follow the backend's PascalCase wire convention so that
//! emitted events decode without an adapter layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file-system entry snapshot as emitted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileEntry {
    pub name: String,
    pub file_path: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
}

impl FileEntry {
    pub fn new(file_path: impl Into<String>, is_directory: bool) -> Self {
        let file_path = file_path.into();
        let name = file_path
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            file_path,
            is_directory,
            score: None,
            metadata: None,
        }
    }
}

/// Extended metadata the backend fills in lazily.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
}

/// Event payload carrying data plus the tag of the request that produced it.
///
/// Listing events tag the directory id, search batches tag the query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Emitted<T> {
    pub data: T,
    pub metadata: String,
}

impl<T> Emitted<T> {
    pub fn new(data: T, metadata: impl Into<String>) -> Self {
        Self {
            data,
            metadata: metadata.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Options forwarded verbatim to the backend's listing call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingParams {
    #[serde(default)]
    pub show_hidden: bool,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified_range: Option<DateRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    Exact,
    #[default]
    Fuzzy,
}

/// Search payload sent to the backend index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "QueryType")]
    pub query_kind: QueryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_results: Option<usize>,
}

impl SearchParams {
    pub fn fuzzy_path(text: impl Into<String>) -> Self {
        Self {
            file_path: Some(text.into()),
            query_kind: QueryKind::Fuzzy,
            ..Self::default()
        }
    }

    pub fn exact_path(text: impl Into<String>) -> Self {
        Self {
            file_path: Some(text.into()),
            query_kind: QueryKind::Exact,
            ..Self::default()
        }
    }

    /// The text batches are tagged with: the path text, or the name text
    /// when no path was given.
    pub fn query_text(&self) -> &str {
        self.file_path
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }
}

/// Search payload plus the identifier embedded in its result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamingSearchParams {
    pub stream_identifier: String,
    pub params: SearchParams,
}
