//! Top-level wiring of the bridge, registry, search engine and navigators.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::backend::SharedBackend;
use crate::bridge::EventBridge;
use crate::config::{ConfigStore, NavigatorConfig};
use crate::navigator::DirectoryNavigator;
use crate::registry::SessionRegistry;
use crate::search::StreamingSearchEngine;

/// Owns the shared pieces of one explorer instance.
///
/// The backend emits into the same bridge handed to [`ExplorerCore::new`];
/// create it with [`ExplorerCore::bridge_for`] so its backlog warning
/// follows the config. Must be constructed inside a Tokio runtime.
pub struct ExplorerCore {
    config: NavigatorConfig,
    bridge: Arc<EventBridge>,
    registry: Arc<SessionRegistry>,
    backend: SharedBackend,
    config_store: Arc<dyn ConfigStore>,
    search: Arc<StreamingSearchEngine>,
    ingestion: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ExplorerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerCore")
            .field("config", &self.config)
            .field("sessions", &self.registry.len())
            .field("ingesting", &self.registry.is_ingesting())
            .finish()
    }
}

impl ExplorerCore {
    pub fn bridge_for(config: &NavigatorConfig) -> Arc<EventBridge> {
        Arc::new(EventBridge::new(config.backlog_warning))
    }

    pub fn new(
        config: NavigatorConfig,
        bridge: Arc<EventBridge>,
        backend: SharedBackend,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let ingestion = registry.spawn_ingestion(&bridge);
        let search = Arc::new(StreamingSearchEngine::new(
            backend.clone(),
            bridge.clone(),
            config.fuzzy_min_length,
        ));
        log::info!(
            "explorer core started (backlog warning {}, settle timeout {:?})",
            config.backlog_warning,
            config.settle_timeout()
        );
        Self {
            config,
            bridge,
            registry,
            backend,
            config_store,
            search,
            ingestion: Mutex::new(ingestion),
        }
    }

    /// A new navigator over the shared registry. Navigators showing the same
    /// directory share its session.
    pub fn navigator(&self) -> DirectoryNavigator {
        DirectoryNavigator::new(
            self.registry.clone(),
            self.bridge.clone(),
            self.backend.clone(),
            self.config_store.clone(),
            &self.config,
        )
    }

    pub fn search(&self) -> &Arc<StreamingSearchEngine> {
        &self.search
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    /// Closes every bridge channel and waits for ingestion to stop.
    pub async fn shutdown(&self) {
        self.bridge.shutdown();
        let ingestion = self.ingestion.lock().take();
        if let Some(handle) = ingestion {
            if let Err(error) = handle.await {
                log::warn!("file event ingestion ended abnormally: {}", error);
            }
        }
        log::info!("explorer core stopped");
    }
}

impl Drop for ExplorerCore {
    fn drop(&mut self) {
        if let Some(handle) = self.ingestion.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::test_support::{file, ScriptedBackend};
    use crate::types::{ListingParams, SearchParams};

    fn explorer() -> (ExplorerCore, Arc<ScriptedBackend>) {
        let config = NavigatorConfig::default();
        let bridge = ExplorerCore::bridge_for(&config);
        let backend = ScriptedBackend::new(bridge.clone());
        let core = ExplorerCore::new(
            config,
            bridge,
            backend.clone(),
            Arc::new(MemoryConfigStore::new()),
        );
        (core, backend)
    }

    #[tokio::test]
    async fn navigation_and_search_share_one_bridge() {
        let (core, backend) = explorer();
        backend.script_listing("/docs", vec![file("/docs/report.md")]);
        backend.script_search("report", vec![vec![file("/docs/report.md")]]);

        let navigator = core.navigator();
        navigator
            .set_current_dir("/docs", &ListingParams::default())
            .await
            .expect("navigate");
        core.search()
            .query(SearchParams::fuzzy_path("report"))
            .await
            .expect("query");

        let mut files = navigator.current_files();
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            files.wait_for(|files| files.len() == 1),
        )
        .await
        .expect("files published")
        .expect("sender alive");
        assert_eq!(core.search().results_snapshot().len(), 1);
        assert_eq!(core.registry().len(), 1);
        assert!(core.registry().is_ingesting());
    }

    #[tokio::test]
    async fn shutdown_stops_ingestion() {
        let (core, _backend) = explorer();
        assert!(core.registry().is_ingesting());

        core.shutdown().await;

        assert!(!core.registry().is_ingesting());
        assert!(core.bridge().subscribe("anything").is_err());
    }
}
