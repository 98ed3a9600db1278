//! Shared fixtures and doubles for unit tests, integration tests and benches.

use sqlx::SqlitePool;

/// Creates an in-memory SQLite database with migrations applied.
///
/// Exactly one connection: every connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn setup_test_db() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");
    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

pub mod fixtures {
    use sqlx::SqlitePool;

    use crate::config::{CHANGELIST_MAPPING_FLAG, FLAG_ENABLED};
    use crate::domain::models::{RepoId, PERFORCE_SERVICE_TYPE};
    use crate::repository::sqlite::{RepoRepository, SettingsRepository};

    pub use super::setup_test_db;

    /// Deterministic 40-hex commit id.
    pub fn sha(n: usize) -> String {
        format!("{:040x}", n)
    }

    /// A commit message the way git-p4 writes it, as `%s%b` renders it.
    pub fn p4_message(subject: &str, change: i64) -> String {
        format!(
            "{}[git-p4: depot-paths = \"//depot/main/\": change = {}]\n",
            subject, change
        )
    }

    pub async fn perforce_repo(pool: &SqlitePool, name: &str) -> RepoId {
        RepoRepository::new(pool.clone())
            .create(name, PERFORCE_SERVICE_TYPE)
            .await
            .expect("Failed to create repo")
    }

    pub async fn enable_mapping(pool: &SqlitePool) {
        SettingsRepository::new(pool.clone())
            .set_flag(CHANGELIST_MAPPING_FLAG, FLAG_ENABLED)
            .await
            .expect("Failed to enable changelist mapping");
    }
}

pub mod mocks {
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use super::fixtures::{p4_message, sha};
    use crate::domain::models::{CommitRange, LogEntry, PerforceChangelist, RepoCommit, RepoId};
    use crate::error::{AppError, Result};
    use crate::repository::{FeatureFlagStore, RepoCommitsChangelistsStore};
    use crate::service::git::CommitLog;

    #[derive(Default)]
    struct Script {
        /// Oldest first.
        commits: Vec<LogEntry>,
        ranges: Vec<CommitRange>,
        log_error: Option<String>,
        log_delay: Option<Duration>,
        panic_on_log: bool,
    }

    /// In-memory linear history standing in for a working copy.
    #[derive(Default)]
    pub struct ScriptedCommitLog {
        script: Mutex<Script>,
        next_sha: AtomicUsize,
    }

    impl ScriptedCommitLog {
        pub fn new() -> Self {
            Self::default()
        }

        fn script(&self) -> MutexGuard<'_, Script> {
            self.script.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Append a commit with an arbitrary message, returns its sha.
        pub fn commit(&self, message: &str) -> String {
            let commit_sha = sha(0xc0_0000 + self.next_sha.fetch_add(1, Ordering::SeqCst));
            self.script().commits.push(LogEntry {
                commit_sha: commit_sha.clone(),
                message: message.to_string(),
            });
            commit_sha
        }

        /// Append a commit carrying a git-p4 annotation.
        pub fn commit_p4(&self, subject: &str, change: i64) -> String {
            self.commit(&p4_message(subject, change))
        }

        /// Ranges passed to `log_with_messages`, in call order.
        pub fn ranges(&self) -> Vec<CommitRange> {
            self.script().ranges.clone()
        }

        pub fn fail_log_with(&self, message: &str) {
            self.script().log_error = Some(message.to_string());
        }

        pub fn delay_log(&self, delay: Duration) {
            self.script().log_delay = Some(delay);
        }

        pub fn panic_on_log(&self) {
            self.script().panic_on_log = true;
        }
    }

    #[async_trait]
    impl CommitLog for ScriptedCommitLog {
        async fn resolve_head(&self, _dir: &Path, cancel: &CancellationToken) -> Result<String> {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let script = self.script();
            script
                .commits
                .last()
                .map(|c| c.commit_sha.clone())
                .ok_or_else(|| AppError::git("rev-parse", "ambiguous argument 'HEAD'"))
        }

        async fn log_with_messages(
            &self,
            _dir: &Path,
            range: &CommitRange,
            cancel: &CancellationToken,
        ) -> Result<Vec<LogEntry>> {
            let (delay, should_panic) = {
                let mut script = self.script();
                script.ranges.push(range.clone());
                (script.log_delay, script.panic_on_log)
            };
            if should_panic {
                panic!("scripted git log panic");
            }

            if let Some(delay) = delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let script = self.script();
            if let Some(message) = &script.log_error {
                return Err(AppError::git("log", message.clone()));
            }

            let position = |wanted: &str| {
                script
                    .commits
                    .iter()
                    .position(|c| c.commit_sha == wanted)
                    .ok_or_else(|| AppError::git("log", format!("bad revision '{}'", wanted)))
            };

            let window = match range {
                CommitRange::Full { head } if head == "HEAD" => &script.commits[..],
                CommitRange::Full { head } => &script.commits[..=position(head)?],
                CommitRange::Since { from, head } => {
                    &script.commits[position(from)? + 1..=position(head)?]
                }
            };

            Ok(window.iter().rev().cloned().collect())
        }
    }

    /// Delegates reads, fails every batch insert without writing.
    pub struct FailingCommitsStore<S> {
        inner: S,
        attempted: AtomicUsize,
    }

    impl<S> FailingCommitsStore<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                attempted: AtomicUsize::new(0),
            }
        }

        /// Records offered to the failed inserts so far.
        pub fn attempted_records(&self) -> usize {
            self.attempted.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<S: RepoCommitsChangelistsStore> RepoCommitsChangelistsStore for FailingCommitsStore<S> {
        async fn get_latest_for_repo(&self, repo_id: RepoId) -> Result<Option<RepoCommit>> {
            self.inner.get_latest_for_repo(repo_id).await
        }

        async fn batch_insert_commit_changelists(
            &self,
            _repo_id: RepoId,
            changelists: &[PerforceChangelist],
        ) -> Result<()> {
            self.attempted.fetch_add(changelists.len(), Ordering::SeqCst);
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    /// A flag store whose backend is down.
    pub struct UnavailableFlagStore;

    #[async_trait]
    impl FeatureFlagStore for UnavailableFlagStore {
        async fn get_flag(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::Database(sqlx::Error::PoolClosed))
        }
    }
}
