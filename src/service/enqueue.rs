//! Admission control in front of the mapping queue.

use std::sync::Arc;

use crate::config::FLAG_ENABLED;
use crate::domain::models::ChangelistMappingJob;
use crate::repository::{FeatureFlagStore, RepoStore};
use crate::service::queue::Queue;

/// Pushes a job only when the feature flag is enabled and the repository is
/// a Perforce import. Lookup failures reject the job with a warning.
pub struct EnqueueGuard {
    flags: Arc<dyn FeatureFlagStore>,
    repos: Arc<dyn RepoStore>,
    queue: Arc<Queue<ChangelistMappingJob>>,
    flag_key: String,
}

impl EnqueueGuard {
    pub fn new(
        flags: Arc<dyn FeatureFlagStore>,
        repos: Arc<dyn RepoStore>,
        queue: Arc<Queue<ChangelistMappingJob>>,
        flag_key: impl Into<String>,
    ) -> Self {
        Self {
            flags,
            repos,
            queue,
            flag_key: flag_key.into(),
        }
    }

    /// Returns whether the job was admitted.
    pub async fn enqueue(&self, job: ChangelistMappingJob) -> bool {
        // Read on every call so flipping the flag takes effect immediately.
        match self.flags.get_flag(&self.flag_key).await {
            Ok(Some(value)) if value == FLAG_ENABLED => {}
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(
                    repo = %job.repo,
                    flag = %self.flag_key,
                    error = %e,
                    "Failed to read feature flag, not enqueueing changelist mapping job"
                );
                return false;
            }
        }

        let repo = match self.repos.get_by_name(&job.repo).await {
            Ok(repo) => repo,
            Err(e) => {
                tracing::warn!(
                    repo = %job.repo,
                    error = %e,
                    "Failed to get repo, not enqueueing changelist mapping job"
                );
                return false;
            }
        };

        if !repo.is_perforce() {
            return false;
        }

        tracing::debug!(repo = %job.repo, queue = self.queue.name(), "Enqueueing changelist mapping job");
        self.queue.push(job);
        true
    }
}
