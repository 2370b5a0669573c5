//! # Orchestration Core
//!
//! Single bootstrap path for the orchestrator. Production wiring loads layered
//! configuration, connects to PostgreSQL, applies migrations and stores artifacts
//! on the filesystem; [`OrchestrationCore::with_components`] accepts any store pair
//! so the same wiring runs against the in-memory backends.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::reaper::WorkItemReaper;
use super::update_processor::WorkItemUpdateProcessor;
use super::update_queue::WorkItemUpdateQueue;
use super::work_dispatcher::WorkDispatcher;
use crate::catalog::{FileSystemObjectStore, ObjectStore};
use crate::config::{ConfigManager, OrchestratorConfig};
use crate::database::{migrations, PgWorkItemStore, WorkItemStore};
use crate::error::OrchestratorResult;

pub struct OrchestrationCore {
    pub config: Arc<OrchestratorConfig>,
    pub store: Arc<dyn WorkItemStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub processor: Arc<WorkItemUpdateProcessor>,
    pub dispatcher: Arc<WorkDispatcher>,
    pub reaper: Arc<WorkItemReaper>,
}

impl std::fmt::Debug for OrchestrationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationCore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrchestrationCore {
    /// Load configuration for the detected environment and bootstrap from it
    pub async fn new() -> OrchestratorResult<Self> {
        info!("🔧 Initializing OrchestrationCore with auto-detected environment configuration");
        let config_manager = ConfigManager::load()?;
        Self::from_config(config_manager).await
    }

    pub async fn from_config(config_manager: Arc<ConfigManager>) -> OrchestratorResult<Self> {
        let config = config_manager.config().clone();
        info!(
            environment = config_manager.environment(),
            max_connections = config.database.max_connections,
            "🔧 Initializing OrchestrationCore from configuration"
        );

        let store = PgWorkItemStore::connect(&config.database).await?;
        migrations::run(store.pool()).await?;
        info!("✅ CORE: Database connection established and migrated");

        Ok(Self::with_components(
            config,
            Arc::new(store),
            Arc::new(FileSystemObjectStore::new()),
        ))
    }

    pub fn with_components(
        config: OrchestratorConfig,
        store: Arc<dyn WorkItemStore>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let config = Arc::new(config);
        let processor = Arc::new(WorkItemUpdateProcessor::new(
            store.clone(),
            object_store.clone(),
            &config,
        ));
        let dispatcher = Arc::new(WorkDispatcher::new(store.clone(), &config));
        let reaper = Arc::new(WorkItemReaper::new(
            store.clone(),
            processor.clone(),
            &config.work_items,
        ));

        info!("✅ CORE: Orchestration components ready");
        Self {
            config,
            store,
            object_store,
            processor,
            dispatcher,
            reaper,
        }
    }

    /// Start the fire-and-forget update intake on the current runtime
    pub fn start_update_queue(&self) -> WorkItemUpdateQueue {
        WorkItemUpdateQueue::start(self.processor.clone(), &self.config.update_queue)
    }

    /// Run the reaper in the background until `shutdown` fires
    pub fn spawn_reaper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let reaper = self.reaper.clone();
        tokio::spawn(async move { reaper.run(shutdown).await })
    }
}
