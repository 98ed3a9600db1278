use anyhow::Result;
use prometheus::Registry;
use tokio::io::{AsyncBufReadExt, BufReader};

use changelist_sync::config::PipelineConfig;
use changelist_sync::domain::models::ChangelistMappingJob;
use changelist_sync::lifecycle::{self, Service};
use changelist_sync::service::metrics;

/// Reads `<repo-name> <working-copy>` lines from stdin and hands them to the
/// enqueue guard until SIGINT/SIGTERM.
#[tokio::main]
async fn main() -> Result<()> {
    lifecycle::init_logging();

    let config = PipelineConfig::from_env()?;
    let cancel = lifecycle::install_shutdown_handler()?;
    let registry = Registry::new();
    let service = Service::start(&config, &registry, cancel.clone()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("stdin closed, waiting for shutdown signal");
            cancel.cancelled().await;
            break;
        };

        let Some((repo, dir)) = parse_job_line(&line) else {
            if !line.trim().is_empty() {
                tracing::warn!(line = %line, "Expected `<repo-name> <working-copy>`, ignoring");
            }
            continue;
        };
        let job = ChangelistMappingJob::new(repo, dir);
        if !service.guard().enqueue(job).await {
            tracing::debug!(repo, "Job not admitted");
        }
    }

    service.shutdown().await;

    match metrics::encode_text(&registry) {
        Ok(text) => tracing::info!("Final queue metrics:\n{}", text),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }
    Ok(())
}

fn parse_job_line(line: &str) -> Option<(&str, &str)> {
    let (repo, dir) = line.trim().split_once(char::is_whitespace)?;
    let dir = dir.trim();
    if repo.is_empty() || dir.is_empty() {
        return None;
    }
    Some((repo, dir))
}
