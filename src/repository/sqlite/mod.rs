//! SQLite implementations of the store traits.

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};

mod commit_repository;
mod repo_repository;
mod settings_repository;

pub use commit_repository::RepoCommitsRepository;
pub use repo_repository::RepoRepository;
pub use settings_repository::SettingsRepository;

/// Commit ids are stored as their 20 raw bytes.
pub(crate) fn encode_commit_sha(sha: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(sha).map_err(|_| AppError::InvalidCommitSha(sha.to_string()))?;
    if bytes.len() != 20 {
        return Err(AppError::InvalidCommitSha(sha.to_string()));
    }
    Ok(bytes)
}

pub(crate) fn decode_commit_sha(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
