//! Directory navigation and streaming search core for the file browser.
//!
//! This crate turns the asynchronous event firehose of the native backend
//! into consistent per-directory and per-query views:
//! - Event bridge fanning backend events out to in-process subscribers
//! - Session registry holding one live session per directory
//! - Directory navigator owning the current directory and its file list
//! - Streaming search engine with correlated, supersedable queries

pub mod backend;
pub mod bridge;
pub mod cancel;
pub mod config;
pub mod error;
pub mod explorer;
pub mod navigator;
pub mod path;
pub mod registry;
pub mod search;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use backend::{Backend, SharedBackend};
pub use bridge::{EventBridge, EventEnvelope, Subscription};
pub use config::{ConfigStore, JsonFileConfigStore, MemoryConfigStore, NavigatorConfig};
pub use error::{NavigatorError, Result};
pub use explorer::ExplorerCore;
pub use navigator::{DirectoryNavigator, NavigationState};
pub use path::DirectoryId;
pub use registry::{SessionLease, SessionRegistry, FILE_EVENT_CHANNEL};
pub use search::{QueryModifier, StreamingQuery, StreamingSearchEngine};
pub use session::{Liveness, Session};
pub use types::{
    Emitted, FileEntry, FileMetadata, ListingParams, QueryKind, SearchParams,
    StreamingSearchParams,
};
