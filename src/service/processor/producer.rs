use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::handoff::HandoffSender;
use super::Task;
use crate::domain::models::ChangelistMappingJob;
use crate::service::queue::Queue;

/// Wait for work, drain the queue into the hand-off, repeat.
///
/// Returning drops `tasks`, which closes the hand-off for the consumer.
pub(super) async fn run(
    queue: Arc<Queue<ChangelistMappingJob>>,
    tasks: HandoffSender<Task>,
    cancel: CancellationToken,
) {
    tracing::info!(queue = queue.name(), "[PRODUCER] Started");

    loop {
        if !queue.wait_for_work(&cancel).await {
            tracing::info!(queue = queue.name(), "[PRODUCER] Cancelled, stopping");
            return;
        }

        while let Some(task) = queue.pop() {
            let repo = task.job.repo.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        queue = queue.name(),
                        repo = %repo,
                        "[PRODUCER] Cancelled during hand-off, dropping job"
                    );
                    return;
                }
                sent = tasks.send(task) => {
                    if sent.is_err() {
                        tracing::warn!(
                            queue = queue.name(),
                            repo = %repo,
                            "[PRODUCER] Consumer is gone, stopping"
                        );
                        return;
                    }
                }
            }
        }
    }
}
