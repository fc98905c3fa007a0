//! Streaming search with correlated result channels.
//!
//! Each query gets its own result channel named after a fresh correlation id,
//! so batches of a superseded query can never land on the newer query's
//! channel. Batches are still checked against the issued query text, and a
//! version token drops whatever a superseded query delivers late into the
//! shared accumulator (last query to reset it wins).

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::SharedBackend;
use crate::bridge::{EventBridge, EventEnvelope};
use crate::cancel::{SupersedeToken, VersionTracker};
use crate::error::Result;
use crate::path::drive_prefix;
use crate::types::{Emitted, FileEntry, QueryKind, SearchParams, StreamingSearchParams};

const SEARCH_RESULT_SUFFIX: &str = "search_result";

/// Post-filter derived from the raw query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryModifier {
    pub path_must_start_with: String,
}

impl QueryModifier {
    pub fn accepts(&self, file: &FileEntry) -> bool {
        file.file_path.starts_with(&self.path_must_start_with)
    }

    /// Human-readable label shown next to the results.
    pub fn label(&self) -> String {
        format!("{} drive", self.path_must_start_with)
    }
}

/// Rewrites a drive-prefixed path query (`"c:report"`) into `"C report"`
/// plus a modifier keeping only results under `"C:"`.
///
/// The fuzzy matcher treats `:` as noise and would otherwise return hits from
/// every drive.
pub fn rewrite_query(mut params: SearchParams) -> (SearchParams, Option<QueryModifier>) {
    let Some(text) = params.file_path.as_deref() else {
        return (params, None);
    };
    let Some(drive) = drive_prefix(text) else {
        return (params, None);
    };
    let letter = &drive[..1];
    let rest = text[2..].trim();
    params.file_path = Some(format!("{letter} {rest}"));
    (
        params,
        Some(QueryModifier {
            path_must_start_with: drive,
        }),
    )
}

/// One issued search request.
#[derive(Debug, Clone)]
pub struct StreamingQuery {
    pub correlation_id: Uuid,
    /// Params after rewrite; this is what the backend sees.
    pub params: SearchParams,
    pub modifier: Option<QueryModifier>,
}

impl StreamingQuery {
    pub fn new(params: SearchParams) -> Self {
        let (params, modifier) = rewrite_query(params);
        Self {
            correlation_id: Uuid::new_v4(),
            params,
            modifier,
        }
    }

    pub fn channel(&self) -> String {
        format!("{}:{SEARCH_RESULT_SUFFIX}", self.correlation_id)
    }

    pub fn query_text(&self) -> &str {
        self.params.query_text()
    }

    pub fn streaming_params(&self) -> StreamingSearchParams {
        StreamingSearchParams {
            stream_identifier: self.correlation_id.to_string(),
            params: self.params.clone(),
        }
    }

    /// Short fuzzy queries over-match; exact queries have no length gate.
    pub fn is_adequate(&self, min_length: usize) -> bool {
        if self.params.query_kind != QueryKind::Fuzzy {
            return true;
        }
        let long_enough = |text: &Option<String>| {
            text.as_ref()
                .map_or(true, |text| text.chars().count() >= min_length)
        };
        long_enough(&self.params.file_path) && long_enough(&self.params.name)
    }

    fn filter_labels(&self) -> Vec<String> {
        self.modifier
            .as_ref()
            .map(|modifier| vec![modifier.label()])
            .unwrap_or_default()
    }
}

pub struct StreamingSearchEngine {
    backend: SharedBackend,
    bridge: Arc<EventBridge>,
    versions: VersionTracker,
    fuzzy_min_length: usize,
    results: Mutex<Vec<FileEntry>>,
    /// Bumped whenever `results` changes.
    revision: watch::Sender<u64>,
    filter_labels: watch::Sender<Vec<String>>,
    last_params: watch::Sender<Option<SearchParams>>,
}

impl std::fmt::Debug for StreamingSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSearchEngine")
            .field("active_version", &self.versions.current_version())
            .field("results", &self.results.lock().len())
            .finish()
    }
}

impl StreamingSearchEngine {
    pub fn new(backend: SharedBackend, bridge: Arc<EventBridge>, fuzzy_min_length: usize) -> Self {
        Self {
            backend,
            bridge,
            versions: VersionTracker::new(),
            fuzzy_min_length,
            results: Mutex::new(Vec::new()),
            revision: watch::channel(0).0,
            filter_labels: watch::channel(Vec::new()).0,
            last_params: watch::channel(None).0,
        }
    }

    /// Issues a streaming search. Accepted batches append to the shared
    /// accumulator until the backend call resolves.
    pub async fn query(&self, params: SearchParams) -> Result<()> {
        let query = StreamingQuery::new(params.clone());
        if !query.is_adequate(self.fuzzy_min_length) {
            log::debug!(
                "fuzzy query {:?} too short, not sent to backend",
                query.query_text()
            );
            return Ok(());
        }

        // Reset and version bump happen under the accumulator's lock so a
        // superseded query cannot slip a batch in between.
        let token = {
            let mut results = self.results.lock();
            results.clear();
            self.versions.next()
        };
        self.bump_revision();
        self.last_params.send_replace(Some(params));
        self.filter_labels.send_replace(query.filter_labels());

        let channel = query.channel();
        let mut subscription = self.bridge.subscribe(&channel)?;
        let streaming_params = query.streaming_params();

        let call = async {
            let result = self
                .backend
                .search_streaming(&streaming_params, &channel)
                .await;
            self.bridge.close(&channel);
            result
        };
        let consume = async {
            while let Some(envelope) = subscription.recv().await {
                self.accept_batch(&query, &token, &envelope);
            }
        };
        let (result, ()) = tokio::join!(call, consume);

        if let Err(error) = &result {
            log::warn!("streaming query {} failed: {}", query.correlation_id, error);
        }
        result
    }

    fn accept_batch(&self, query: &StreamingQuery, token: &SupersedeToken, envelope: &EventEnvelope) {
        let batch = match envelope.decode::<Emitted<Vec<FileEntry>>>() {
            Ok(batch) => batch,
            Err(error) => {
                log::warn!("dropping undecodable search batch on {}: {}", envelope.channel, error);
                return;
            }
        };
        if batch.metadata != query.query_text() {
            log::debug!(
                "dropping search batch tagged {:?}, expected {:?}",
                batch.metadata,
                query.query_text()
            );
            return;
        }

        let mut accepted = batch.data;
        if let Some(modifier) = &query.modifier {
            accepted.retain(|file| modifier.accepts(file));
        }

        let applied = {
            let mut results = self.results.lock();
            if token.is_superseded() {
                false
            } else {
                results.extend(accepted);
                true
            }
        };
        if applied {
            self.bump_revision();
        } else {
            log::debug!(
                "dropping search batch of superseded query {}",
                query.correlation_id
            );
        }
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// One-shot search, with the same rewrite and post-filter as [`query`](Self::query).
    pub async fn search(&self, params: SearchParams) -> Result<Vec<FileEntry>> {
        let (params, modifier) = rewrite_query(params);
        let mut files = self.backend.search(&params).await?;
        if let Some(modifier) = modifier {
            files.retain(|file| modifier.accepts(file));
        }
        Ok(files)
    }

    pub fn clear_results(&self) {
        self.results.lock().clear();
        self.bump_revision();
    }

    /// Re-checks every accumulated file against the backend and drops the
    /// ones that no longer exist. Returns how many were removed.
    ///
    /// Files whose existence check fails are kept.
    pub async fn ensure_files_exist(&self) -> usize {
        let files = self.results_snapshot();
        let mut checks: FuturesUnordered<_> = files
            .iter()
            .map(|file| async move {
                let exists = match self.backend.validate_file_exists(&file.file_path).await {
                    Ok(exists) => exists,
                    Err(error) => {
                        log::warn!("could not validate {}: {}", file.file_path, error);
                        true
                    }
                };
                (file.file_path.as_str(), exists)
            })
            .collect();

        let mut removed = 0;
        while let Some((path, exists)) = checks.next().await {
            if exists {
                continue;
            }
            let dropped = {
                let mut results = self.results.lock();
                let before = results.len();
                results.retain(|file| file.file_path != path);
                before - results.len()
            };
            // A query dispatched meanwhile may already have cleared it.
            if dropped > 0 {
                log::debug!("{} no longer exists, removed from results", path);
                removed += dropped;
                self.bump_revision();
            }
        }
        removed
    }

    /// Wakes whenever the accumulated results change. The value is a
    /// revision number only; read the files with
    /// [`results_snapshot`](Self::results_snapshot).
    pub fn results(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn results_snapshot(&self) -> Arc<Vec<FileEntry>> {
        Arc::new(self.results.lock().clone())
    }

    pub fn filter_labels(&self) -> watch::Receiver<Vec<String>> {
        self.filter_labels.subscribe()
    }

    pub fn last_params(&self) -> Option<SearchParams> {
        self.last_params.borrow().clone()
    }
}
