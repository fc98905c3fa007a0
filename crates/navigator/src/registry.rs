//! Session registry: one live session per normalized directory.
//!
//! All mutation funnels through a single mutex so that check-then-create and
//! evict never interleave. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::{EventBridge, EventEnvelope};
use crate::path::DirectoryId;
use crate::session::Session;
use crate::types::{Emitted, FileEntry};

/// Channel the backend emits listing results on, one `Emitted<FileEntry>`
/// per file, tagged with the directory id.
pub const FILE_EVENT_CHANNEL: &str = "file_retriever:file";

/// Upper bound of queued file events applied in one ingestion step.
const INGEST_BATCH: usize = 256;

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<DirectoryId, Session>>,
    ingested_sequence: watch::Sender<u64>,
    ingesting: AtomicBool,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ingested_sequence: watch::channel(0).0,
            ingesting: AtomicBool::new(false),
        }
    }

    /// Returns the active session for `directory`, creating it if needed.
    ///
    /// Racing callers for the same normalized id always get the same session.
    /// An inactive session still present in the map is replaced by a fresh
    /// one, never revived.
    pub fn get_or_create(&self, directory: &str) -> Session {
        let id = DirectoryId::new(directory);
        let mut sessions = self.sessions.lock();
        get_or_create_locked(&mut sessions, id)
    }

    /// Like [`get_or_create`](Self::get_or_create), and registers interest in
    /// the session until the returned lease is released or dropped.
    ///
    /// Owners acquire before they list, so an active session nobody holds
    /// can only contain late events of an abandoned listing. It is retired
    /// and replaced by a fresh one.
    pub fn acquire(self: &Arc<Self>, directory: &str) -> SessionLease {
        let id = DirectoryId::new(directory);
        let session = {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&id) {
                if existing.interest() == 0 && existing.mark_inactive() {
                    log::debug!("retiring unowned session {} ({} stale files)", id, existing.len());
                }
            }
            let session = get_or_create_locked(&mut sessions, id);
            let interest = session.add_interest();
            log::debug!(
                "session {} acquired, interest={}",
                session.directory_id(),
                interest
            );
            session
        };
        SessionLease {
            registry: self.clone(),
            session,
            released: false,
        }
    }

    pub fn get(&self, directory: &str) -> Option<Session> {
        self.sessions.lock().get(&DirectoryId::new(directory)).cloned()
    }

    /// Marks the session inactive and removes it. Absent or already inactive
    /// sessions are a no-op. Returns whether a session was removed.
    pub fn evict(&self, directory: &str) -> bool {
        let id = DirectoryId::new(directory);
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get(&id) else {
            return false;
        };
        if session.mark_inactive() {
            log::debug!("session {} evicted", id);
        }
        sessions.remove(&id).is_some()
    }

    fn release(&self, session: &Session) {
        let mut sessions = self.sessions.lock();
        let remaining = session.drop_interest();
        if remaining > 0 {
            log::debug!(
                "session {} released, interest={}",
                session.directory_id(),
                remaining
            );
            return;
        }

        // Last owner evicts. The map may already hold a newer session for the
        // same directory; that one is left alone.
        session.mark_inactive();
        let registered = sessions
            .get(session.directory_id())
            .is_some_and(|current| current.same_session(session));
        if registered {
            sessions.remove(session.directory_id());
        }
        log::debug!("session {} released by last owner", session.directory_id());
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn directories(&self) -> Vec<DirectoryId> {
        let mut directories: Vec<_> = self.sessions.lock().keys().cloned().collect();
        directories.sort();
        directories
    }

    /// Subscribes to the backend's file events and routes each file to its
    /// session.
    ///
    /// A failed subscription is reported once and not retried; sessions then
    /// stay unpopulated while listing calls report their own failures.
    pub fn spawn_ingestion(self: &Arc<Self>, bridge: &EventBridge) -> Option<JoinHandle<()>> {
        let mut subscription = match bridge.subscribe(FILE_EVENT_CHANNEL) {
            Ok(subscription) => subscription,
            Err(error) => {
                log::error!("file event ingestion disabled: {}", error);
                return None;
            }
        };
        self.ingesting.store(true, Ordering::SeqCst);

        let registry = self.clone();
        Some(tokio::spawn(async move {
            while let Some(first) = subscription.recv().await {
                let mut batch = vec![first];
                while batch.len() < INGEST_BATCH {
                    match subscription.try_recv() {
                        Some(envelope) => batch.push(envelope),
                        None => break,
                    }
                }
                registry.ingest_batch(&batch);
            }
            registry.ingesting.store(false, Ordering::SeqCst);
            log::debug!("file event ingestion stopped");
        }))
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingesting.load(Ordering::SeqCst)
    }

    /// Applies one file event.
    pub fn ingest(&self, envelope: &EventEnvelope) {
        self.ingest_batch(std::slice::from_ref(envelope));
    }

    /// Applies file events in order. Consecutive files of the same directory
    /// are appended to its session in one step.
    pub fn ingest_batch(&self, envelopes: &[EventEnvelope]) {
        let mut run: Option<(String, Vec<FileEntry>)> = None;
        let mut last_sequence = 0;
        for envelope in envelopes {
            last_sequence = last_sequence.max(envelope.sequence);
            let emitted = match envelope.decode::<Emitted<FileEntry>>() {
                Ok(emitted) => emitted,
                Err(error) => {
                    log::warn!(
                        "dropping undecodable file event #{}: {}",
                        envelope.sequence,
                        error
                    );
                    continue;
                }
            };
            let same_directory =
                matches!(&run, Some((directory, _)) if *directory == emitted.metadata);
            if same_directory {
                if let Some((_, files)) = run.as_mut() {
                    files.push(emitted.data);
                }
                continue;
            }
            if let Some((directory, files)) = run.take() {
                self.get_or_create(&directory).extend(files);
            }
            run = Some((emitted.metadata, vec![emitted.data]));
        }
        if let Some((directory, files)) = run {
            self.get_or_create(&directory).extend(files);
        }
        self.ingested_sequence.send_modify(|ingested| {
            *ingested = (*ingested).max(last_sequence);
        });
    }

    /// Last file event sequence applied to the sessions.
    pub fn ingested_sequence(&self) -> u64 {
        *self.ingested_sequence.borrow()
    }

    /// Waits until file events up to `sequence` have been applied. Returns
    /// immediately when ingestion is not running.
    pub async fn wait_ingested(&self, sequence: u64) {
        if !self.is_ingesting() {
            return;
        }
        let mut receiver = self.ingested_sequence.subscribe();
        let _ = receiver.wait_for(|ingested| *ingested >= sequence).await;
    }
}

fn get_or_create_locked(sessions: &mut HashMap<DirectoryId, Session>, id: DirectoryId) -> Session {
    if let Some(existing) = sessions.get(&id) {
        if existing.is_active() {
            return existing.clone();
        }
        log::debug!("replacing inactive session {}", id);
    }
    let session = Session::new(id.clone());
    sessions.insert(id, session.clone());
    session
}

/// Interest in a session held by one owner. Released on drop.
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    session: Session,
    released: bool,
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session)
            .field("released", &self.released)
            .finish()
    }
}

impl SessionLease {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.session);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release_once();
    }
}
