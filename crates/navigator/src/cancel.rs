//! Version tracking for supersedable requests.
//!
//! Navigation and search both follow "the newest request wins": every new
//! request bumps the active version, and work carrying an older version
//! notices through its token and stops publishing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks the active request version.
#[derive(Debug, Clone, Default)]
pub struct VersionTracker {
    active_version: Arc<AtomicU64>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version and returns a token for it.
    ///
    /// Every token handed out earlier reports as superseded from now on.
    pub fn next(&self) -> SupersedeToken {
        let version = self.active_version.fetch_add(1, Ordering::SeqCst) + 1;
        SupersedeToken {
            active_version: self.active_version.clone(),
            version,
        }
    }

    /// Returns the current active version without incrementing.
    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }
}

/// Handle held by one in-flight request.
#[derive(Debug, Clone)]
pub struct SupersedeToken {
    active_version: Arc<AtomicU64>,
    version: u64,
}

impl SupersedeToken {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `Some(())` while this request is the newest, `None` once a
    /// newer one started. Works with `?` for early returns.
    #[inline]
    pub fn is_current(&self) -> Option<()> {
        if self.version == self.active_version.load(Ordering::SeqCst) {
            Some(())
        } else {
            None
        }
    }

    #[inline]
    pub fn is_superseded(&self) -> bool {
        self.is_current().is_none()
    }
}
