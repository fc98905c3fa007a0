//! Contract of the native backend this core orchestrates.
//!
//! The backend owns the file-system walk, the search index and the crawler.
//! The core only issues these calls and consumes what the backend pushes
//! through the [`EventBridge`](crate::bridge::EventBridge):
//! - listing results on [`FILE_EVENT_CHANNEL`](crate::registry::FILE_EVENT_CHANNEL),
//!   one `Emitted<FileEntry>` per file tagged with the directory id
//! - streaming search batches on the channel passed to
//!   [`Backend::search_streaming`], as `Emitted<Vec<FileEntry>>` tagged with
//!   the query text

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FileEntry, ListingParams, SearchParams, StreamingSearchParams};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Lists `directory`, emitting each file as it is found. Resolves once
    /// the listing finished or failed.
    async fn list_directory(&self, directory: &str, params: &ListingParams) -> Result<()>;

    /// Best-effort cancellation of the listing in flight, if any.
    async fn cancel_pending_listing(&self) -> Result<()>;

    async fn search(&self, params: &SearchParams) -> Result<Vec<FileEntry>>;

    /// Runs a search, emitting result batches on `channel`. Resolves once the
    /// last batch was emitted.
    async fn search_streaming(&self, params: &StreamingSearchParams, channel: &str) -> Result<()>;

    /// Turns a path (possibly a file) into the directory form used as the
    /// listing tag.
    async fn canonicalize_directory(&self, path: &str) -> Result<String>;

    async fn check_directory_accessible(&self, directory: &str) -> Result<bool>;

    async fn validate_file_exists(&self, path: &str) -> Result<bool>;

    async fn parent_directory(&self, path: &str) -> Result<String>;

    async fn root_directory(&self, path: &str) -> Result<String>;

    async fn is_path_a_file(&self, path: &str) -> Result<bool>;
}

pub type SharedBackend = Arc<dyn Backend>;
