//! Error types for the changelist sync pipeline.
//!
//! This module provides structured error handling with:
//! - `AppError`: Domain-specific errors for store, VCS and parsing operations
//! - `Result<T>`: Type alias for Results using AppError
//!
//! Orchestration code (mapper, lifecycle) works in `anyhow` and attaches
//! step context on top of these variants.

use thiserror::Error;

// ============================================================================
// DOMAIN ERROR TYPE
// ============================================================================

/// Domain-specific errors for pipeline operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// No repository record with this name
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The git subprocess failed or produced output we cannot use
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    /// A commit message has no usable changelist annotation
    #[error("failed to retrieve changelist ID from commit {commit}: {message}")]
    ChangelistParse { commit: String, message: String },

    /// Not a 40 character hex object id
    #[error("Invalid commit SHA: {0:?}")]
    InvalidCommitSha(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Work was abandoned because the pipeline is shutting down
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Create a git error
    pub fn git(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a changelist parse error
    pub fn changelist_parse(commit: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ChangelistParse {
            commit: commit.into(),
            message: msg.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RepoNotFound(_))
    }
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;
