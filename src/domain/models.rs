//! Domain entities for changelist mapping - behavior lives WITH data

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

use crate::error::{AppError, Result};

/// External service type of repositories imported from Perforce.
pub const PERFORCE_SERVICE_TYPE: &str = "perforce";

// ====== Identifiers ======

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct RepoId(pub i64);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ====== Repositories ======

/// Repository record as known to the repository directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub id: RepoId,
    pub name: String,
    /// Classification of the code host the repository was imported from.
    pub external_service_type: String,
}

impl Repo {
    pub fn is_perforce(&self) -> bool {
        self.external_service_type == PERFORCE_SERVICE_TYPE
    }
}

// ====== Jobs ======

/// Request to map the commits of one repository.
///
/// `dir` is the on-disk working copy the git commands run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelistMappingJob {
    pub repo: String,
    pub dir: PathBuf,
}

impl ChangelistMappingJob {
    pub fn new(repo: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            dir: dir.into(),
        }
    }
}

// ====== Mapping records ======

/// One resolved commit to changelist pair, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerforceChangelist {
    pub commit_sha: String,
    pub changelist_id: i64,
}

impl PerforceChangelist {
    pub fn new(commit_sha: impl Into<String>, changelist_id: i64) -> Self {
        Self {
            commit_sha: commit_sha.into(),
            changelist_id,
        }
    }
}

/// A persisted mapping row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCommit {
    pub id: i64,
    pub repo_id: RepoId,
    pub commit_sha: String,
    pub perforce_changelist_id: i64,
    pub created_at: DateTime<Utc>,
}

// ====== Commit log ======

/// Commits that still need mapping: `from` is excluded, `head` is included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitRange {
    /// Everything reachable from `head`.
    Full { head: String },
    /// Everything reachable from `head` but not from `from`.
    Since { from: String, head: String },
}

impl CommitRange {
    /// The revision argument handed to `git log`.
    pub fn as_rev_arg(&self) -> String {
        match self {
            CommitRange::Full { head } => head.clone(),
            CommitRange::Since { from, head } => format!("{}..{}", from, head),
        }
    }
}

/// One record of `git log` output: the commit id and its subject and body
/// glued together without a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub commit_sha: String,
    pub message: String,
}

impl LogEntry {
    /// Split a raw `"<sha> <message>"` record at the first space.
    pub fn parse(record: &str) -> Result<Self> {
        let record = record.trim_start_matches('\n');
        let (sha, message) = record.split_once(' ').unwrap_or((record, ""));
        validate_commit_sha(sha)?;

        Ok(Self {
            commit_sha: sha.to_string(),
            message: message.to_string(),
        })
    }
}

/// Accepts only full 40 character lower-case hex object ids.
pub fn validate_commit_sha(sha: &str) -> Result<()> {
    let valid = sha.len() == 40 && sha.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidCommitSha(sha.to_string()))
    }
}
