//! Runtime wiring.
//!
//! `ProbekitRuntime` holds the concrete service instances for an embedding
//! application: the orchestrator over a caller-built plugin registry and the
//! checkpoint store pinned to SQLite, both configured from `config.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use probekit_core::checkpoint::CheckpointStore;
use probekit_core::orchestrator::Orchestrator;
use probekit_core::plugin::PluginRegistry;
use probekit_types::config::ProbekitConfig;

use crate::config::load_config;
use crate::sqlite::checkpoint::SqliteCheckpointRepository;
use crate::sqlite::pool::{DatabasePool, resolve_data_dir};

/// Checkpoint store pinned to the SQLite repository.
pub type SqliteCheckpointStore = CheckpointStore<SqliteCheckpointRepository>;

/// Shared runtime state holding all services.
#[derive(Clone)]
pub struct ProbekitRuntime {
    pub orchestrator: Arc<Orchestrator>,
    pub checkpoints: Arc<SqliteCheckpointStore>,
    pub config: ProbekitConfig,
    pub data_dir: PathBuf,
}

impl ProbekitRuntime {
    /// Initialize from the default data directory (`PROBEKIT_DATA_DIR` or
    /// `~/.probekit`).
    pub async fn init(registry: PluginRegistry) -> anyhow::Result<Self> {
        Self::init_in(&resolve_data_dir(), registry).await
    }

    /// Initialize from an explicit data directory: load config, open the
    /// database (running migrations) and wire services.
    pub async fn init_in(data_dir: &Path, registry: PluginRegistry) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let config = load_config(data_dir).await;

        let db_url = format!("sqlite://{}?mode=rwc", data_dir.join("probekit.db").display());
        let db_pool = DatabasePool::new(&db_url).await?;

        let checkpoints = CheckpointStore::new(
            SqliteCheckpointRepository::new(db_pool),
            config.checkpoint.clone(),
        );
        let orchestrator = Orchestrator::new(Arc::new(registry), config.engine.clone());

        tracing::info!(
            data_dir = %data_dir.display(),
            plugins = orchestrator.registry().len(),
            "probekit runtime initialized"
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            checkpoints: Arc::new(checkpoints),
            config,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Stop auto-save timers and close the database.
    pub async fn shutdown(&self) {
        self.checkpoints.close().await;
    }
}
