use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::handoff::HandoffReceiver;
use super::{panic_message, JobHandler, Task};
use crate::service::queue::Popped;

/// Run tasks one at a time until the hand-off closes or `cancel` fires.
///
/// Failed or panicking jobs are logged and dropped. Every task that reaches
/// the handler has its timer closed exactly once.
pub(super) async fn run(
    mut tasks: HandoffReceiver<Task>,
    handler: Arc<dyn JobHandler>,
    slow_task_threshold: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("[CONSUMER] Started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = tasks.recv() => task,
        };
        let Some(Popped { job, timer }) = next else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }

        tracing::debug!(repo = %job.repo, dir = %job.dir.display(), "[CONSUMER] Mapping changelists");
        match AssertUnwindSafe(handler.handle(&job, &cancel)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(repo = %job.repo, error = %format!("{:#}", e), "[CONSUMER] Changelist mapping failed");
            }
            Err(panic) => {
                tracing::error!(
                    repo = %job.repo,
                    panic = panic_message(panic.as_ref()),
                    "[CONSUMER] Changelist mapping panicked"
                );
            }
        }

        let elapsed = timer.done();
        if elapsed > slow_task_threshold {
            tracing::warn!(
                repo = %job.repo,
                duration_ms = elapsed.as_millis() as u64,
                "[CONSUMER] Changelist mapping took longer than expected"
            );
        }
    }

    tracing::info!("[CONSUMER] Stopped");
}
