//! Live aggregate of one directory's discovered files.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::path::DirectoryId;
use crate::types::FileEntry;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Inactive,
}

struct SessionInner {
    instance_id: u64,
    directory_id: DirectoryId,
    files: Mutex<Vec<FileEntry>>,
    /// Bumped after every append; carries no data.
    revision: watch::Sender<u64>,
    liveness: watch::Sender<Liveness>,
    interest: AtomicUsize,
}

/// Shared handle to a session. Clones refer to the same session.
///
/// Files are kept in arrival order; nothing is reordered or deduplicated.
/// Observers are woken through a revision counter and take snapshots on
/// their own schedule, so appending never copies the list.
/// A session starts `Active` and turns `Inactive` exactly once.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("instance_id", &self.inner.instance_id)
            .field("directory_id", &self.inner.directory_id)
            .field("files", &self.len())
            .field("liveness", &self.liveness())
            .field("interest", &self.interest())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(directory_id: DirectoryId) -> Self {
        let (revision, _) = watch::channel(0);
        let (liveness, _) = watch::channel(Liveness::Active);
        Self {
            inner: Arc::new(SessionInner {
                instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
                directory_id,
                files: Mutex::new(Vec::new()),
                revision,
                liveness,
                interest: AtomicUsize::new(0),
            }),
        }
    }

    pub fn directory_id(&self) -> &DirectoryId {
        &self.inner.directory_id
    }

    /// Process-unique id of this session instance. A session recreated for
    /// the same directory gets a new one.
    pub fn instance_id(&self) -> u64 {
        self.inner.instance_id
    }

    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the files collected so far.
    pub fn files(&self) -> Arc<Vec<FileEntry>> {
        Arc::new(self.inner.files.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes on every append. The value is a revision number only.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn liveness(&self) -> Liveness {
        *self.inner.liveness.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.liveness() == Liveness::Active
    }

    pub fn subscribe_liveness(&self) -> watch::Receiver<Liveness> {
        self.inner.liveness.subscribe()
    }

    /// Appends a file. Returns `false` when the session is already inactive
    /// and the file was dropped.
    pub fn append(&self, file: FileEntry) -> bool {
        self.extend(vec![file])
    }

    /// Appends `batch` in order with a single change notification.
    pub fn extend(&self, batch: Vec<FileEntry>) -> bool {
        if batch.is_empty() {
            return self.is_active();
        }
        {
            // Liveness is checked under the files lock; `mark_inactive` takes
            // it too, so nothing lands after the session went inactive.
            let mut files = self.inner.files.lock();
            if !self.is_active() {
                log::debug!(
                    "dropping {} files for inactive session {}",
                    batch.len(),
                    self.inner.directory_id
                );
                return false;
            }
            files.extend(batch);
        }
        self.inner.revision.send_modify(|revision| *revision += 1);
        true
    }

    /// Number of owners currently interested in this session.
    pub fn interest(&self) -> usize {
        self.inner.interest.load(Ordering::SeqCst)
    }

    pub(crate) fn add_interest(&self) -> usize {
        self.inner.interest.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements interest, saturating at zero. Returns the remaining count.
    pub(crate) fn drop_interest(&self) -> usize {
        let mut current = self.inner.interest.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return 0;
            }
            match self.inner.interest.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return current - 1,
                Err(observed) => current = observed,
            }
        }
    }

    /// Flips the session to `Inactive`. Returns `true` only for the call
    /// that performed the transition.
    pub(crate) fn mark_inactive(&self) -> bool {
        let _files = self.inner.files.lock();
        self.inner.liveness.send_if_modified(|liveness| {
            if *liveness == Liveness::Active {
                *liveness = Liveness::Inactive;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileEntry {
        FileEntry::new(path, false)
    }

    #[test]
    fn files_keep_arrival_order() {
        let session = Session::new(DirectoryId::new("C:/Users"));
        for path in ["C:/Users/f1", "C:/Users/f2", "C:/Users/f3"] {
            assert!(session.append(file(path)));
        }
        let names: Vec<_> = session.files().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn duplicates_are_kept() {
        let session = Session::new(DirectoryId::new("/tmp"));
        session.append(file("/tmp/a"));
        session.append(file("/tmp/a"));
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn inactive_transition_happens_once() {
        let session = Session::new(DirectoryId::new("/tmp"));
        let mut liveness = session.subscribe_liveness();
        assert!(session.is_active());

        assert!(session.mark_inactive());
        assert!(!session.mark_inactive());
        assert_eq!(session.liveness(), Liveness::Inactive);
        assert!(liveness.has_changed().expect("sender alive"));
        assert_eq!(*liveness.borrow_and_update(), Liveness::Inactive);
    }

    #[test]
    fn inactive_session_rejects_appends() {
        let session = Session::new(DirectoryId::new("/tmp"));
        session.mark_inactive();
        assert!(!session.append(file("/tmp/late")));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn subscribers_are_woken_by_appends() {
        let session = Session::new(DirectoryId::new("/tmp"));
        let mut changes = session.subscribe_changes();

        session.append(file("/tmp/a"));
        changes.changed().await.expect("changed");
        assert_eq!(session.len(), 1);

        session.extend(vec![file("/tmp/b"), file("/tmp/c")]);
        changes.changed().await.expect("changed");
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn snapshots_are_detached_from_later_appends() {
        let session = Session::new(DirectoryId::new("/tmp"));
        session.append(file("/tmp/a"));
        let snapshot = session.files();

        session.append(file("/tmp/b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(session.files().len(), 2);
    }

    #[test]
    fn interest_saturates_at_zero() {
        let session = Session::new(DirectoryId::new("/tmp"));
        assert_eq!(session.add_interest(), 1);
        assert_eq!(session.drop_interest(), 0);
        assert_eq!(session.drop_interest(), 0);
    }

    #[test]
    fn clones_are_the_same_session() {
        let session = Session::new(DirectoryId::new("/tmp"));
        let other = Session::new(DirectoryId::new("/tmp"));
        assert!(session.same_session(&session.clone()));
        assert!(!session.same_session(&other));
        assert_ne!(session.instance_id(), other.instance_id());
    }
}
