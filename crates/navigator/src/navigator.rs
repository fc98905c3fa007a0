//! Directory navigation controller.
//!
//! Owns the current directory and the file list shown for it. The list is fed
//! by a forwarder task that mirrors the current directory's session; a
//! forwarder whose session is no longer current stops publishing and gives
//! its lease back.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::SharedBackend;
use crate::bridge::EventBridge;
use crate::cancel::{SupersedeToken, VersionTracker};
use crate::config::{ConfigStore, NavigatorConfig, LAST_DIRECTORY_KEY};
use crate::error::{NavigatorError, Result};
use crate::path::DirectoryId;
use crate::registry::{SessionLease, SessionRegistry, FILE_EVENT_CHANNEL};
use crate::session::{Liveness, Session};
use crate::types::{FileEntry, ListingParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationState {
    #[default]
    Idle,
    Loading,
    Ready,
}

/// The directory id currently shown and its published file list.
///
/// Switching the id and publishing files take the same lock, so a forwarder
/// can never publish a list for a directory the navigator already left.
struct View {
    current: Mutex<Option<DirectoryId>>,
    files: watch::Sender<Arc<Vec<FileEntry>>>,
}

impl View {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
            files: watch::channel(Arc::new(Vec::new())).0,
        }
    }

    fn switch_to(&self, id: DirectoryId) {
        let mut current = self.current.lock();
        *current = Some(id);
        self.files.send_replace(Arc::new(Vec::new()));
    }

    fn publish_if_current(&self, id: &DirectoryId, files: Arc<Vec<FileEntry>>) -> bool {
        let current = self.current.lock();
        if current.as_ref() != Some(id) {
            return false;
        }
        self.files.send_replace(files);
        true
    }

    fn current_id(&self) -> Option<DirectoryId> {
        self.current.lock().clone()
    }
}

type SharedLease = Arc<Mutex<Option<SessionLease>>>;

fn release_shared(lease: &SharedLease) {
    let taken = lease.lock().take();
    if let Some(lease) = taken {
        lease.release();
    }
}

/// The session mirrored into the view, and the task doing it.
struct Attachment {
    session: Session,
    lease: SharedLease,
    forwarder: JoinHandle<()>,
}

impl Attachment {
    fn spawn(view: Arc<View>, lease: SessionLease) -> Self {
        let session = lease.session().clone();
        let changes = session.subscribe_changes();
        let liveness = session.subscribe_liveness();
        let lease = Arc::new(Mutex::new(Some(lease)));
        let forwarder = tokio::spawn(forward_session(
            view,
            session.clone(),
            lease.clone(),
            changes,
            liveness,
        ));
        Self {
            session,
            lease,
            forwarder,
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.forwarder.abort();
        release_shared(&self.lease);
    }
}

async fn forward_session(
    view: Arc<View>,
    session: Session,
    lease: SharedLease,
    mut changes: watch::Receiver<u64>,
    mut liveness: watch::Receiver<Liveness>,
) {
    loop {
        if !session.is_active() {
            log::debug!("session {} went inactive", session.directory_id());
            return;
        }
        // Appends made while the snapshot is taken wake the loop again.
        let _ = changes.borrow_and_update();
        if !view.publish_if_current(session.directory_id(), session.files()) {
            log::debug!(
                "session {} is no longer current, releasing",
                session.directory_id()
            );
            release_shared(&lease);
            return;
        }
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = liveness.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

pub struct DirectoryNavigator {
    registry: Arc<SessionRegistry>,
    bridge: Arc<EventBridge>,
    backend: SharedBackend,
    config_store: Arc<dyn ConfigStore>,
    settle_timeout: Duration,
    generations: VersionTracker,
    raw_dir: Mutex<Option<String>>,
    view: Arc<View>,
    attachment: Mutex<Option<Attachment>>,
    current_dir: watch::Sender<String>,
    error: watch::Sender<Option<NavigatorError>>,
    state: watch::Sender<NavigationState>,
    loading: watch::Sender<bool>,
}

impl std::fmt::Debug for DirectoryNavigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryNavigator")
            .field("current_dir", &*self.current_dir.borrow())
            .field("state", &*self.state.borrow())
            .field("generation", &self.generations.current_version())
            .finish()
    }
}

impl DirectoryNavigator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        bridge: Arc<EventBridge>,
        backend: SharedBackend,
        config_store: Arc<dyn ConfigStore>,
        config: &NavigatorConfig,
    ) -> Self {
        Self {
            registry,
            bridge,
            backend,
            config_store,
            settle_timeout: config.settle_timeout(),
            generations: VersionTracker::new(),
            raw_dir: Mutex::new(None),
            view: Arc::new(View::new()),
            attachment: Mutex::new(None),
            current_dir: watch::channel(String::new()).0,
            error: watch::channel(None).0,
            state: watch::channel(NavigationState::Idle).0,
            loading: watch::channel(false).0,
        }
    }

    /// Navigates to `path` and lists it.
    ///
    /// Setting the same raw path again is a no-op. A call superseded by a
    /// newer navigation stops at its next suspension point without touching
    /// the published state. Empty and access-denied directories are reported
    /// through [`error`](Self::error) only; failed backend calls are reported
    /// there and returned.
    pub async fn set_current_dir(&self, path: &str, params: &ListingParams) -> Result<()> {
        let token = {
            let mut raw_dir = self.raw_dir.lock();
            if raw_dir.as_deref() == Some(path) {
                log::debug!("already at {}", path);
                return Ok(());
            }
            *raw_dir = Some(path.to_string());
            self.generations.next()
        };

        if let Err(error) = self.backend.cancel_pending_listing().await {
            log::warn!("failed to cancel pending listing: {}", error);
        }
        if let Err(error) = self
            .config_store
            .update(LAST_DIRECTORY_KEY, Value::String(path.to_string()))
            .await
        {
            log::warn!("failed to persist last directory {}: {}", path, error);
        }
        if self.superseded(&token, path) {
            return Ok(());
        }

        let canonical = match self.backend.canonicalize_directory(path).await {
            Ok(canonical) => canonical,
            Err(error) => {
                let published = self.publish_current(&token, path, |_| {
                    self.forget_raw(path);
                    self.error.send_replace(Some(error.clone()));
                });
                if published.is_none() {
                    return Ok(());
                }
                return Err(error);
            }
        };

        // Switching the view and installing the new attachment happen in one
        // critical section, so an older call can never overwrite a newer one.
        let switched = self.publish_current(&token, path, |attachment| {
            log::info!("navigating to {}", canonical);
            self.current_dir.send_replace(canonical.clone());
            self.error.send_replace(None);
            self.loading.send_replace(true);
            self.state.send_replace(NavigationState::Loading);
            self.view.switch_to(DirectoryId::new(&canonical));

            // The old lease goes first: navigating to the directory already
            // shown starts over with a fresh session instead of appending a
            // second copy of the listing.
            drop(attachment.take());
            let lease = self.registry.acquire(&canonical);
            let session = lease.session().clone();
            *attachment = Some(Attachment::spawn(self.view.clone(), lease));
            self.state.send_replace(NavigationState::Ready);
            session
        });
        let Some(session) = switched else {
            return Ok(());
        };

        let listed = self.backend.list_directory(&canonical, params).await;
        if self.superseded(&token, path) {
            return Ok(());
        }
        let outcome = match listed {
            Ok(()) => self.resolve_listing(&session, &canonical).await,
            Err(error) => Err(error),
        };

        let published = self.publish_current(&token, path, |_| {
            self.loading.send_replace(false);
            match outcome {
                Ok(()) => Ok(()),
                Err(error) if error.is_resolution() => {
                    log::debug!("{} resolved as {}", canonical, error);
                    self.error.send_replace(Some(error));
                    Ok(())
                }
                Err(error) => {
                    log::warn!("listing {} failed: {}", canonical, error);
                    // A failed listing can be retried with the same path.
                    self.forget_raw(path);
                    self.error.send_replace(Some(error.clone()));
                    Err(error)
                }
            }
        });
        published.unwrap_or(Ok(()))
    }

    /// Runs `publish` under the attachment lock unless `token` was superseded
    /// by a newer navigation. Returns `None` when superseded.
    fn publish_current<R>(
        &self,
        token: &SupersedeToken,
        path: &str,
        publish: impl FnOnce(&mut Option<Attachment>) -> R,
    ) -> Option<R> {
        let mut attachment = self.attachment.lock();
        if self.superseded(token, path) {
            return None;
        }
        Some(publish(&mut attachment))
    }

    /// Decides whether a finished listing produced anything.
    async fn resolve_listing(&self, session: &Session, canonical: &str) -> Result<()> {
        let emitted = self.bridge.sequence(FILE_EVENT_CHANNEL);
        if tokio::time::timeout(self.settle_timeout, self.registry.wait_ingested(emitted))
            .await
            .is_err()
        {
            log::warn!(
                "file events for {} not ingested after {:?}",
                canonical,
                self.settle_timeout
            );
        }
        if !session.is_empty() {
            return Ok(());
        }
        if self.backend.check_directory_accessible(canonical).await? {
            Err(NavigatorError::Empty)
        } else {
            Err(NavigatorError::AccessDenied(canonical.to_string()))
        }
    }

    fn superseded(&self, token: &SupersedeToken, path: &str) -> bool {
        if token.is_superseded() {
            log::debug!("navigation to {} superseded", path);
            return true;
        }
        false
    }

    fn forget_raw(&self, path: &str) {
        let mut raw_dir = self.raw_dir.lock();
        if raw_dir.as_deref() == Some(path) {
            *raw_dir = None;
        }
    }

    /// Navigates to the directory persisted by the last navigation, if any.
    /// Returns the restored path.
    pub async fn restore_last_directory(&self, params: &ListingParams) -> Result<Option<String>> {
        let Some(value) = self.config_store.read(LAST_DIRECTORY_KEY).await? else {
            return Ok(None);
        };
        let path = match value {
            Value::String(path) => path,
            other => {
                log::warn!("ignoring non-string {} value: {}", LAST_DIRECTORY_KEY, other);
                return Ok(None);
            }
        };
        self.set_current_dir(&path, params).await?;
        Ok(Some(path))
    }

    /// Lists the current directory again into a fresh session.
    pub async fn refresh(&self, params: &ListingParams) -> Result<()> {
        let current = self.raw_dir.lock().clone();
        let Some(path) = current else {
            return Ok(());
        };
        if let Some(id) = self.view.current_id() {
            self.registry.evict(id.as_str());
        }
        self.forget_raw(&path);
        self.set_current_dir(&path, params).await
    }

    pub async fn parent_directory(&self) -> Result<String> {
        let current = self.require_current_dir()?;
        self.backend.parent_directory(&current).await
    }

    pub async fn root_directory(&self) -> Result<String> {
        let current = self.require_current_dir()?;
        self.backend.root_directory(&current).await
    }

    pub async fn is_path_a_file(&self, path: &str) -> Result<bool> {
        self.backend.is_path_a_file(path).await
    }

    fn require_current_dir(&self) -> Result<String> {
        let current = self.current_dir.borrow().clone();
        if current.is_empty() {
            return Err(NavigatorError::InvalidInput(
                "no current directory".to_string(),
            ));
        }
        Ok(current)
    }

    pub fn current_dir(&self) -> watch::Receiver<String> {
        self.current_dir.subscribe()
    }

    pub fn current_files(&self) -> watch::Receiver<Arc<Vec<FileEntry>>> {
        self.view.files.subscribe()
    }

    pub fn error(&self) -> watch::Receiver<Option<NavigatorError>> {
        self.error.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<NavigationState> {
        self.state.subscribe()
    }

    pub fn is_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn current_directory(&self) -> String {
        self.current_dir.borrow().clone()
    }

    pub fn files_snapshot(&self) -> Arc<Vec<FileEntry>> {
        self.view.files.borrow().clone()
    }

    pub fn current_error(&self) -> Option<NavigatorError> {
        self.error.borrow().clone()
    }

    pub fn navigation_state(&self) -> NavigationState {
        *self.state.borrow()
    }

    /// Session backing the current view.
    pub fn current_session(&self) -> Option<Session> {
        self.attachment
            .lock()
            .as_ref()
            .map(|attachment| attachment.session.clone())
    }
}
