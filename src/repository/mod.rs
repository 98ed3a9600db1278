pub mod sqlite;

use async_trait::async_trait;

use crate::domain::models::{PerforceChangelist, Repo, RepoCommit, RepoId};
use crate::error::Result;

/// Repository directory: resolves names to classified repository records.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Fails with `AppError::RepoNotFound` when no record has this name.
    async fn get_by_name(&self, name: &str) -> Result<Repo>;
}

/// Checkpoint store for commit to changelist mappings.
#[async_trait]
pub trait RepoCommitsChangelistsStore: Send + Sync {
    /// The most recently mapped commit of a repository, `None` if nothing
    /// has been mapped yet.
    async fn get_latest_for_repo(&self, repo_id: RepoId) -> Result<Option<RepoCommit>>;

    /// Persist a whole batch atomically: either every record is visible
    /// afterwards or none is.
    async fn batch_insert_commit_changelists(
        &self,
        repo_id: RepoId,
        changelists: &[PerforceChangelist],
    ) -> Result<()>;
}

/// String-valued feature flags, read fresh on every call.
#[async_trait]
pub trait FeatureFlagStore: Send + Sync {
    async fn get_flag(&self, key: &str) -> Result<Option<String>>;
}
