pub mod changelist;
pub mod enqueue;
pub mod git;
pub mod mapper;
pub mod metrics;
pub mod processor;
pub mod queue;

pub use enqueue::EnqueueGuard;
pub use git::{CommitLog, GitCli};
pub use mapper::ChangelistMapper;
pub use metrics::QueueMetrics;
pub use processor::{ChangelistPipeline, JobHandler, PipelineHandle};
pub use queue::Queue;
