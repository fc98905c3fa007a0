//! Scripted backend double shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};

use crate::backend::Backend;
use crate::bridge::EventBridge;
use crate::error::{NavigatorError, Result};
use crate::path::normalize_directory;
use crate::registry::FILE_EVENT_CHANNEL;
use crate::types::{Emitted, FileEntry, ListingParams, SearchParams, StreamingSearchParams};

pub(crate) fn file(path: &str) -> FileEntry {
    FileEntry::new(path, false)
}

pub(crate) fn dir(path: &str) -> FileEntry {
    FileEntry::new(path, true)
}

/// Blocks a scripted call until released.
pub(crate) struct Gate(Arc<Semaphore>);

impl Gate {
    pub(crate) fn release(&self) {
        self.0.add_permits(1);
    }
}

#[derive(Default)]
struct Script {
    canonical: HashMap<String, String>,
    listings: HashMap<String, Vec<FileEntry>>,
    listing_failures: HashMap<String, String>,
    listing_gates: HashMap<String, Arc<Semaphore>>,
    inaccessible: HashSet<String>,
    searches: HashMap<String, Vec<Vec<FileEntry>>>,
    stray_batches: HashMap<String, Vec<(String, Vec<FileEntry>)>>,
    search_failures: HashMap<String, String>,
    search_gates: HashMap<String, Arc<Semaphore>>,
    missing: HashSet<String>,
    plain_files: HashSet<String>,
    last_search_channel: Option<String>,
    listed: Vec<String>,
}

pub(crate) struct ScriptedBackend {
    bridge: Arc<EventBridge>,
    script: Mutex<Script>,
    cancel_calls: AtomicUsize,
    listing_calls: watch::Sender<usize>,
    streaming_calls: watch::Sender<usize>,
}

impl ScriptedBackend {
    pub(crate) fn new(bridge: Arc<EventBridge>) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            script: Mutex::new(Script::default()),
            cancel_calls: AtomicUsize::new(0),
            listing_calls: watch::channel(0).0,
            streaming_calls: watch::channel(0).0,
        })
    }

    pub(crate) fn canonicalize_as(&self, path: &str, canonical: &str) {
        self.script
            .lock()
            .canonical
            .insert(path.to_string(), canonical.to_string());
    }

    pub(crate) fn script_listing(&self, directory: &str, files: Vec<FileEntry>) {
        self.script
            .lock()
            .listings
            .insert(directory.to_string(), files);
    }

    pub(crate) fn fail_listing(&self, directory: &str, message: &str) {
        self.script
            .lock()
            .listing_failures
            .insert(directory.to_string(), message.to_string());
    }

    pub(crate) fn clear_listing_failure(&self, directory: &str) {
        self.script.lock().listing_failures.remove(directory);
    }

    pub(crate) fn hold_listing(&self, directory: &str) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.script
            .lock()
            .listing_gates
            .insert(directory.to_string(), semaphore.clone());
        Gate(semaphore)
    }

    pub(crate) fn deny_access(&self, directory: &str) {
        self.script.lock().inaccessible.insert(directory.to_string());
    }

    pub(crate) fn script_search(&self, text: &str, batches: Vec<Vec<FileEntry>>) {
        self.script
            .lock()
            .searches
            .insert(text.to_string(), batches);
    }

    /// Emits a batch tagged `tag` on the channel of the query for `text`,
    /// before its own batches.
    pub(crate) fn script_stray_batch(&self, text: &str, tag: &str, files: Vec<FileEntry>) {
        self.script
            .lock()
            .stray_batches
            .entry(text.to_string())
            .or_default()
            .push((tag.to_string(), files));
    }

    pub(crate) fn fail_search(&self, text: &str, message: &str) {
        self.script
            .lock()
            .search_failures
            .insert(text.to_string(), message.to_string());
    }

    pub(crate) fn hold_search(&self, text: &str) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.script
            .lock()
            .search_gates
            .insert(text.to_string(), semaphore.clone());
        Gate(semaphore)
    }

    pub(crate) fn mark_missing(&self, path: &str) {
        self.script.lock().missing.insert(path.to_string());
    }

    pub(crate) fn mark_file(&self, path: &str) {
        self.script.lock().plain_files.insert(path.to_string());
    }

    pub(crate) fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn listed(&self) -> Vec<String> {
        self.script.lock().listed.clone()
    }

    pub(crate) fn streaming_calls(&self) -> usize {
        *self.streaming_calls.borrow()
    }

    pub(crate) fn last_search_channel(&self) -> Option<String> {
        self.script.lock().last_search_channel.clone()
    }

    pub(crate) async fn wait_for_listing_calls(&self, count: usize) {
        let mut calls = self.listing_calls.subscribe();
        let _ = calls.wait_for(|calls| *calls >= count).await;
    }

    pub(crate) async fn wait_for_streaming_calls(&self, count: usize) {
        let mut calls = self.streaming_calls.subscribe();
        let _ = calls.wait_for(|calls| *calls >= count).await;
    }
}

async fn pass_gate(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn list_directory(&self, directory: &str, _params: &ListingParams) -> Result<()> {
        let (files, failure, gate) = {
            let mut script = self.script.lock();
            script.listed.push(directory.to_string());
            (
                script.listings.get(directory).cloned().unwrap_or_default(),
                script.listing_failures.get(directory).cloned(),
                script.listing_gates.get(directory).cloned(),
            )
        };
        self.listing_calls.send_modify(|calls| *calls += 1);
        pass_gate(gate).await;

        if let Some(message) = failure {
            return Err(NavigatorError::Transport(message));
        }
        let tag = normalize_directory(directory);
        for file in files {
            self.bridge
                .emit(FILE_EVENT_CHANNEL, &Emitted::new(file, tag.clone()))?;
        }
        Ok(())
    }

    async fn cancel_pending_listing(&self) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn search(&self, params: &SearchParams) -> Result<Vec<FileEntry>> {
        let script = self.script.lock();
        Ok(script
            .searches
            .get(params.query_text())
            .map(|batches| batches.concat())
            .unwrap_or_default())
    }

    async fn search_streaming(&self, params: &StreamingSearchParams, channel: &str) -> Result<()> {
        let text = params.params.query_text().to_string();
        let (batches, strays, failure, gate) = {
            let mut script = self.script.lock();
            script.last_search_channel = Some(channel.to_string());
            (
                script.searches.get(&text).cloned().unwrap_or_default(),
                script.stray_batches.get(&text).cloned().unwrap_or_default(),
                script.search_failures.get(&text).cloned(),
                script.search_gates.get(&text).cloned(),
            )
        };
        self.streaming_calls.send_modify(|calls| *calls += 1);
        pass_gate(gate).await;

        if let Some(message) = failure {
            return Err(NavigatorError::Transport(message));
        }
        for (tag, files) in strays {
            self.bridge.emit(channel, &Emitted::new(files, tag))?;
        }
        for batch in batches {
            self.bridge.emit(channel, &Emitted::new(batch, text.clone()))?;
        }
        Ok(())
    }

    async fn canonicalize_directory(&self, path: &str) -> Result<String> {
        let script = self.script.lock();
        Ok(script
            .canonical
            .get(path)
            .cloned()
            .unwrap_or_else(|| normalize_directory(path)))
    }

    async fn check_directory_accessible(&self, directory: &str) -> Result<bool> {
        Ok(!self.script.lock().inaccessible.contains(directory))
    }

    async fn validate_file_exists(&self, path: &str) -> Result<bool> {
        Ok(!self.script.lock().missing.contains(path))
    }

    async fn parent_directory(&self, path: &str) -> Result<String> {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) => Ok("/".to_string()),
            Some(split) if trimmed[..split].ends_with(':') => Ok(format!("{}/", &trimmed[..split])),
            Some(split) => Ok(trimmed[..split].to_string()),
            None => Err(NavigatorError::InvalidInput(format!("{path} has no parent"))),
        }
    }

    async fn root_directory(&self, path: &str) -> Result<String> {
        match path.find('/') {
            Some(split) => Ok(path[..=split].to_string()),
            None => Err(NavigatorError::InvalidInput(format!("{path} has no root"))),
        }
    }

    async fn is_path_a_file(&self, path: &str) -> Result<bool> {
        Ok(self.script.lock().plain_files.contains(path))
    }
}
