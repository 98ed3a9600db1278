//! Background pipeline draining the mapping queue.
//!
//! Two long-lived tasks connected by a zero-capacity hand-off:
//! - the producer sleeps until the queue has work and feeds jobs one by one
//! - the consumer runs each job through a [`JobHandler`], strictly serially
//!
//! The hand-off is the only backpressure: while the consumer is busy the
//! producer stalls and new jobs pile up in the queue.

mod consumer;
mod handoff;
mod producer;

pub use handoff::{handoff, HandoffClosed, HandoffReceiver, HandoffSender};

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::models::ChangelistMappingJob;
use crate::service::mapper::ChangelistMapper;
use crate::service::queue::{Popped, Queue};

/// A popped job in flight between producer and consumer.
pub(crate) type Task = Popped<ChangelistMappingJob>;

/// Work performed by the consumer for every job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ChangelistMappingJob, cancel: &CancellationToken)
        -> anyhow::Result<()>;
}

#[async_trait]
impl JobHandler for ChangelistMapper {
    async fn handle(
        &self,
        job: &ChangelistMappingJob,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.sync(&job.repo, &job.dir, cancel).await
    }
}

pub struct ChangelistPipeline;

impl ChangelistPipeline {
    /// Spawn the producer and consumer. Both stop once `cancel` fires.
    pub fn start(
        queue: Arc<Queue<ChangelistMappingJob>>,
        handler: Arc<dyn JobHandler>,
        slow_task_threshold: Duration,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let (tx, rx) = handoff::<Task>();

        let producer = tokio::spawn(guarded(
            "producer",
            producer::run(queue, tx, cancel.clone()),
        ));
        let consumer = tokio::spawn(guarded(
            "consumer",
            consumer::run(rx, handler, slow_task_threshold, cancel),
        ));

        PipelineHandle { producer, consumer }
    }
}

pub struct PipelineHandle {
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl PipelineHandle {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        for (name, handle) in [("producer", self.producer), ("consumer", self.consumer)] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "[PIPELINE] Task did not finish cleanly");
            }
        }
    }
}

/// Run `fut`, logging a panic instead of letting it escape. The consumer
/// contains job panics itself, this only catches panics in the loops.
async fn guarded<F>(name: &'static str, fut: F)
where
    F: Future<Output = ()> + Send,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        tracing::error!(
            task = name,
            panic = panic_message(panic.as_ref()),
            "[PIPELINE] Task panicked"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::{RepoCommitsRepository, RepoRepository};
    use crate::error::AppError;
    use crate::repository::RepoCommitsChangelistsStore;
    use crate::service::metrics::QueueMetrics;
    use crate::test_utils::fixtures;
    use crate::test_utils::mocks::ScriptedCommitLog;
    use prometheus::Registry;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    const SLOW: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        gate: Option<Arc<Semaphore>>,
        panic_on: Option<String>,
        fail: bool,
    }

    impl RecordingHandler {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(
            &self,
            job: &ChangelistMappingJob,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(job.repo.clone());
            if self.panic_on.as_deref() == Some(job.repo.as_str()) {
                panic!("handler blew up on {}", job.repo);
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await?.forget();
            }
            if self.fail {
                anyhow::bail!("mapping failed for {}", job.repo);
            }
            Ok(())
        }
    }

    fn queue(metrics: &QueueMetrics) -> Arc<Queue<ChangelistMappingJob>> {
        Arc::new(Queue::new("pipeline-test", metrics))
    }

    fn job(repo: &str) -> ChangelistMappingJob {
        ChangelistMappingJob::new(repo, format!("/srv/repos/{repo}"))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn join_within(handle: PipelineHandle) {
        timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("pipeline should stop");
    }

    #[tokio::test]
    async fn test_processes_jobs_in_fifo_order() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        for repo in ["a", "b", "c"] {
            queue.push(job(repo));
        }

        let handler = Arc::new(RecordingHandler::default());
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), handler.clone(), SLOW, cancel.clone());

        wait_until(|| handler.seen().len() == 3).await;
        queue.push(job("d"));
        wait_until(|| handler.seen().len() == 4).await;
        assert_eq!(handler.seen(), vec!["a", "b", "c", "d"]);

        cancel.cancel();
        join_within(handle).await;

        let bound = metrics.bind("pipeline-test");
        assert_eq!(bound.processing_seconds.get_sample_count(), 4);
        assert_eq!(bound.depth.get(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_dropped_and_do_not_stop_the_consumer() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), handler.clone(), SLOW, cancel.clone());

        queue.push(job("a"));
        queue.push(job("b"));
        wait_until(|| handler.seen().len() == 2).await;
        assert!(queue.is_empty(), "failed jobs are not requeued");

        cancel.cancel();
        join_within(handle).await;
        assert_eq!(
            metrics.bind("pipeline-test").processing_seconds.get_sample_count(),
            2,
            "timer closes on failure too"
        );
    }

    #[tokio::test]
    async fn test_busy_consumer_stalls_producer() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let gate = Arc::new(Semaphore::new(0));
        let handler = Arc::new(RecordingHandler {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), handler.clone(), SLOW, cancel.clone());

        for repo in ["a", "b", "c"] {
            queue.push(job(repo));
        }
        wait_until(|| handler.seen().len() == 1).await;
        // "a" is being handled, "b" is held by the producer in the hand-off.
        wait_until(|| queue.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1, "producer must not pop past a pending hand-off");

        gate.add_permits(3);
        wait_until(|| handler.seen().len() == 3).await;
        assert!(queue.is_empty());

        cancel.cancel();
        join_within(handle).await;
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_pipeline() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue(&metrics), handler, SLOW, cancel.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        join_within(handle).await;
    }

    #[tokio::test]
    async fn test_jobs_queued_after_cancel_are_not_processed() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let handler = Arc::new(RecordingHandler::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let handle = ChangelistPipeline::start(queue.clone(), handler.clone(), SLOW, cancel);
        queue.push(job("late"));
        join_within(handle).await;

        assert!(handler.seen().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_job_panic_does_not_stop_the_pipeline() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let handler = Arc::new(RecordingHandler {
            panic_on: Some("boom".into()),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), handler.clone(), SLOW, cancel.clone());

        queue.push(job("boom"));
        wait_until(|| handler.seen().len() == 1).await;

        for repo in ["next1", "next2", "next3"] {
            queue.push(job(repo));
        }
        wait_until(|| handler.seen().len() == 4).await;
        assert_eq!(handler.seen(), vec!["boom", "next1", "next2", "next3"]);
        assert!(queue.is_empty());
        assert_eq!(
            metrics.bind("pipeline-test").processing_seconds.get_sample_count(),
            4,
            "timer closes on panic too"
        );

        cancel.cancel();
        join_within(handle).await;
    }

    #[tokio::test]
    async fn test_panicking_git_client_is_contained_per_job() {
        let pool = fixtures::setup_test_db().await;
        let repo_id = fixtures::perforce_repo(&pool, "perforce/depot").await;
        let git = Arc::new(ScriptedCommitLog::new());
        git.commit_p4("first", 1);
        git.panic_on_log();
        let mapper = ChangelistMapper::new(
            Arc::new(RepoRepository::new(pool.clone())),
            Arc::new(RepoCommitsRepository::new(pool.clone())),
            git.clone(),
        );

        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), Arc::new(mapper), SLOW, cancel.clone());

        queue.push(job("perforce/depot"));
        queue.push(job("perforce/depot"));
        wait_until(|| git.ranges().len() == 2).await;

        cancel.cancel();
        join_within(handle).await;
        assert_eq!(
            RepoCommitsRepository::new(pool).count_for_repo(repo_id).await.unwrap(),
            0
        );
    }

    /// Records how each mapping run ended.
    struct OutcomeRecorder {
        mapper: ChangelistMapper,
        outcomes: Mutex<Vec<anyhow::Result<()>>>,
    }

    #[async_trait]
    impl JobHandler for OutcomeRecorder {
        async fn handle(
            &self,
            job: &ChangelistMappingJob,
            cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            let outcome = self.mapper.handle(job, cancel).await;
            let reported = match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(anyhow::anyhow!("{:#}", e)),
            };
            self.outcomes.lock().unwrap().push(outcome);
            reported
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_mapping() {
        let pool = fixtures::setup_test_db().await;
        let repo_id = fixtures::perforce_repo(&pool, "perforce/depot").await;
        let git = Arc::new(ScriptedCommitLog::new());
        git.commit_p4("first", 1);
        git.commit_p4("second", 2);
        git.delay_log(Duration::from_secs(30));
        let handler = Arc::new(OutcomeRecorder {
            mapper: ChangelistMapper::new(
                Arc::new(RepoRepository::new(pool.clone())),
                Arc::new(RepoCommitsRepository::new(pool.clone())),
                git.clone(),
            ),
            outcomes: Mutex::new(Vec::new()),
        });

        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), handler.clone(), SLOW, cancel.clone());

        queue.push(job("perforce/depot"));
        wait_until(|| git.ranges().len() == 1).await;

        cancel.cancel();
        join_within(handle).await;

        let outcomes = handler.outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        let err = outcomes[0].as_ref().expect_err("mapping should be cancelled");
        assert!(matches!(
            err.root_cause().downcast_ref::<AppError>(),
            Some(AppError::Cancelled)
        ));
        drop(outcomes);

        assert_eq!(
            RepoCommitsRepository::new(pool).count_for_repo(repo_id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_slow_jobs_do_not_change_control_flow() {
        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let handler = Arc::new(RecordingHandler::default());
        let cancel = CancellationToken::new();
        let handle =
            ChangelistPipeline::start(queue.clone(), handler.clone(), Duration::ZERO, cancel.clone());

        queue.push(job("a"));
        queue.push(job("b"));
        wait_until(|| handler.seen().len() == 2).await;

        cancel.cancel();
        join_within(handle).await;
    }

    #[tokio::test]
    async fn test_maps_changelists_end_to_end() {
        let pool = fixtures::setup_test_db().await;
        let repo_id = fixtures::perforce_repo(&pool, "perforce/depot").await;
        let git = Arc::new(ScriptedCommitLog::new());
        git.commit_p4("first", 101);
        git.commit_p4("second", 102);
        let mapper = ChangelistMapper::new(
            Arc::new(RepoRepository::new(pool.clone())),
            Arc::new(RepoCommitsRepository::new(pool.clone())),
            git.clone(),
        );

        let metrics = QueueMetrics::register(&Registry::new()).unwrap();
        let queue = queue(&metrics);
        let cancel = CancellationToken::new();
        let handle = ChangelistPipeline::start(queue.clone(), Arc::new(mapper), SLOW, cancel.clone());

        queue.push(job("perforce/depot"));
        let commits = RepoCommitsRepository::new(pool.clone());
        timeout(Duration::from_secs(5), async {
            while commits.count_for_repo(repo_id).await.unwrap() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("mappings should be written");

        git.commit_p4("third", 103);
        queue.push(job("perforce/depot"));
        timeout(Duration::from_secs(5), async {
            while commits.count_for_repo(repo_id).await.unwrap() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("incremental mapping should be written");

        cancel.cancel();
        join_within(handle).await;

        let latest = commits.get_latest_for_repo(repo_id).await.unwrap().unwrap();
        assert_eq!(latest.perforce_changelist_id, 103);
    }

    #[test]
    fn test_panic_message_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(literal.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
