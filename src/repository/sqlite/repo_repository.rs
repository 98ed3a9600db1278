//! Repository directory backed by the `repo` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::models::{Repo, RepoId};
use crate::error::{AppError, Result};
use crate::repository::RepoStore;

pub struct RepoRepository {
    pool: SqlitePool,
}

impl RepoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a repository with its code host classification.
    pub async fn create(&self, name: &str, external_service_type: &str) -> Result<RepoId> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO repo (name, external_service_type, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(name)
        .bind(external_service_type)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = RepoId(result.last_insert_rowid());
        tracing::info!(repo = name, repo_id = %id, "Created repo");
        Ok(id)
    }
}

#[async_trait]
impl RepoStore for RepoRepository {
    async fn get_by_name(&self, name: &str) -> Result<Repo> {
        let row = sqlx::query(
            r#"
            SELECT id, name, external_service_type
            FROM repo
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::RepoNotFound(name.to_string()))?;

        Ok(Repo {
            id: RepoId(row.get("id")),
            name: row.get("name"),
            external_service_type: row.get("external_service_type"),
        })
    }
}
