//! Incremental commit to changelist mapping for one repository.
//!
//! The store's checkpoint (latest mapped commit) bounds the work: only
//! commits after it and up to HEAD are enumerated. Nothing is written unless
//! every commit in the window parsed, and the write is a single atomic batch,
//! so a failed run leaves the checkpoint where it was and the next run retries
//! the same window.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{CommitRange, PerforceChangelist, Repo};
use crate::repository::{RepoCommitsChangelistsStore, RepoStore};
use crate::service::changelist::parse_changelist_id;
use crate::service::git::CommitLog;

pub struct ChangelistMapper {
    repos: Arc<dyn RepoStore>,
    changelists: Arc<dyn RepoCommitsChangelistsStore>,
    git: Arc<dyn CommitLog>,
}

impl ChangelistMapper {
    pub fn new(
        repos: Arc<dyn RepoStore>,
        changelists: Arc<dyn RepoCommitsChangelistsStore>,
        git: Arc<dyn CommitLog>,
    ) -> Self {
        Self {
            repos,
            changelists,
            git,
        }
    }

    /// Map every not-yet-mapped commit of `repo_name`, read from the working
    /// copy at `dir`.
    ///
    /// Returns `Ok(())` without writing when the repository is not a Perforce
    /// import or when the checkpoint already equals HEAD.
    pub async fn sync(&self, repo_name: &str, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();

        let repo = self
            .repos
            .get_by_name(repo_name)
            .await
            .with_context(|| format!("failed to look up repo {}", repo_name))?;

        if !repo.is_perforce() {
            tracing::warn!(
                repo = repo_name,
                external_service_type = %repo.external_service_type,
                "[MAPPER] Skipping changelist mapping for a non-perforce repo"
            );
            return Ok(());
        }

        let Some(range) = self.commit_range(&repo, dir, cancel).await? else {
            tracing::debug!(repo = repo_name, "[MAPPER] Already mapped up to HEAD");
            return Ok(());
        };

        let changelists = self.collect_changelists(dir, &range, cancel).await?;
        if changelists.is_empty() {
            tracing::debug!(repo = repo_name, range = %range.as_rev_arg(), "[MAPPER] No new commits");
            return Ok(());
        }

        self.changelists
            .batch_insert_commit_changelists(repo.id, &changelists)
            .await
            .with_context(|| {
                format!(
                    "failed to persist {} changelist mappings for repo {}",
                    changelists.len(),
                    repo_name
                )
            })?;

        tracing::info!(
            repo = repo_name,
            records = changelists.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "[MAPPER] Mapped commits to changelists"
        );
        Ok(())
    }

    /// The window of commits still to map, `None` when there is nothing to do.
    async fn commit_range(
        &self,
        repo: &Repo,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<CommitRange>> {
        let latest = self
            .changelists
            .get_latest_for_repo(repo.id)
            .await
            .with_context(|| format!("failed to get latest mapped commit for repo {}", repo.name))?;

        let Some(latest) = latest else {
            return Ok(Some(CommitRange::Full {
                head: "HEAD".to_string(),
            }));
        };

        let head = self
            .git
            .resolve_head(dir, cancel)
            .await
            .with_context(|| format!("failed to resolve HEAD of {}", dir.display()))?;

        if latest.commit_sha == head {
            return Ok(None);
        }

        Ok(Some(CommitRange::Since {
            from: latest.commit_sha,
            head,
        }))
    }

    /// Enumerate and parse the window. The result is ordered oldest commit
    /// first, the reverse of git's traversal order.
    async fn collect_changelists(
        &self,
        dir: &Path,
        range: &CommitRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerforceChangelist>> {
        let entries = self
            .git
            .log_with_messages(dir, range, cancel)
            .await
            .with_context(|| format!("failed to list commits {}", range.as_rev_arg()))?;

        let mut changelists = entries
            .into_iter()
            .map(|entry| -> crate::error::Result<PerforceChangelist> {
                let id = parse_changelist_id(&entry.commit_sha, &entry.message)?;
                Ok(PerforceChangelist::new(entry.commit_sha, id))
            })
            .collect::<crate::error::Result<Vec<_>>>()
            .context("failed to parse changelist ID")?;

        changelists.reverse();
        Ok(changelists)
    }
}
