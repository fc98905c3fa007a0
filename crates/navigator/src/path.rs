//! Directory identifiers used as registry keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized directory identifier (backslashes folded to forward slashes).
///
/// Nothing else is rewritten: case, trailing slashes and drive letters are
/// kept exactly as the backend canonicalized them, so the id matches the tag
/// the backend stamps on its listing events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryId(String);

impl DirectoryId {
    pub fn new(raw: &str) -> Self {
        Self(normalize_directory(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DirectoryId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for DirectoryId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl AsRef<str> for DirectoryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Folds backslashes into forward slashes.
pub fn normalize_directory(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Returns the drive prefix (`"C:"`) of a Windows-style path, uppercased.
pub fn drive_prefix(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some(format!("{}:", (bytes[0] as char).to_ascii_uppercase()))
    } else {
        None
    }
}
