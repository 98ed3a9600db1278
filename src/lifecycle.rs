//! Process lifecycle: logging, signal handling and service wiring.

use anyhow::{Context, Result};
use prometheus::Registry;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::db;
use crate::domain::models::ChangelistMappingJob;
use crate::repository::sqlite::{RepoCommitsRepository, RepoRepository, SettingsRepository};
use crate::service::{
    ChangelistMapper, ChangelistPipeline, EnqueueGuard, GitCli, PipelineHandle, Queue,
    QueueMetrics,
};

/// Initialize logging with tracing_subscriber. `RUST_LOG` overrides the defaults.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .with_ansi(true)
        .init();
}

/// Cancel the returned token on SIGTERM or SIGINT.
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
        token_clone.cancel();
    });

    Ok(token)
}

/// A running pipeline and the entry point feeding it.
pub struct Service {
    pool: SqlitePool,
    queue: Arc<Queue<ChangelistMappingJob>>,
    guard: EnqueueGuard,
    pipeline: PipelineHandle,
    cancel: CancellationToken,
}

impl Service {
    /// Open the store named by `config` and start the pipeline.
    pub async fn start(
        config: &PipelineConfig,
        registry: &Registry,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let pool = db::init_db(&config.database_url).await?;
        Self::start_with_pool(pool, config, registry, cancel)
    }

    /// Start the pipeline on an already-migrated pool.
    pub fn start_with_pool(
        pool: SqlitePool,
        config: &PipelineConfig,
        registry: &Registry,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let metrics = QueueMetrics::register(registry).context("failed to register queue metrics")?;
        let queue = Arc::new(Queue::new(config.queue_name.clone(), &metrics));

        let repos = Arc::new(RepoRepository::new(pool.clone()));
        let mapper = ChangelistMapper::new(
            repos.clone(),
            Arc::new(RepoCommitsRepository::new(pool.clone())),
            Arc::new(GitCli::new(&config.git_binary)),
        );
        let guard = EnqueueGuard::new(
            Arc::new(SettingsRepository::new(pool.clone())),
            repos,
            queue.clone(),
            config.feature_flag.clone(),
        );

        let pipeline = ChangelistPipeline::start(
            queue.clone(),
            Arc::new(mapper),
            config.slow_task_threshold,
            cancel.clone(),
        );

        tracing::info!(queue = %config.queue_name, "Changelist mapping pipeline started");
        Ok(Self {
            pool,
            queue,
            guard,
            pipeline,
            cancel,
        })
    }

    pub fn guard(&self) -> &EnqueueGuard {
        &self.guard
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Cancel the pipeline, wait for both loops and close the pool.
    pub async fn shutdown(self) {
        tracing::info!(pending = self.queue.len(), "Shutting down changelist mapping pipeline");
        self.cancel.cancel();
        self.pipeline.join().await;
        self.pool.close().await;
        tracing::info!("Changelist mapping pipeline stopped");
    }
}
