//! Commit to changelist mappings.
//!
//! Rows are append-only. A repository's checkpoint is the row with the
//! highest changelist id; batches are written oldest commit first, so ties
//! resolve to the most recently inserted (and newest) commit.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_commit_sha, encode_commit_sha, parse_datetime};
use crate::domain::models::{PerforceChangelist, RepoCommit, RepoId};
use crate::error::Result;
use crate::repository::RepoCommitsChangelistsStore;

/// Rows per multi-value INSERT, keeps binds well under SQLite's limit.
const CHUNK_SIZE: usize = 100;

pub struct RepoCommitsRepository {
    pool: SqlitePool,
}

impl RepoCommitsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reverse lookup: the commit a changelist was imported as.
    ///
    /// When several commits carry the same changelist the newest wins.
    pub async fn get_repo_commit_changelist(
        &self,
        repo_id: RepoId,
        changelist_id: i64,
    ) -> Result<Option<RepoCommit>> {
        let row = sqlx::query(
            r#"
            SELECT id, repo_id, commit_sha, perforce_changelist_id, created_at
            FROM repo_commits_changelists
            WHERE repo_id = ?1 AND perforce_changelist_id = ?2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(repo_id)
        .bind(changelist_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_repo_commit(&r)))
    }

    /// All mappings of a repository in insertion order.
    pub async fn list_for_repo(&self, repo_id: RepoId) -> Result<Vec<RepoCommit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, repo_id, commit_sha, perforce_changelist_id, created_at
            FROM repo_commits_changelists
            WHERE repo_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(repo_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_repo_commit).collect())
    }

    pub async fn count_for_repo(&self, repo_id: RepoId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM repo_commits_changelists WHERE repo_id = ?")
                .bind(repo_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl RepoCommitsChangelistsStore for RepoCommitsRepository {
    async fn get_latest_for_repo(&self, repo_id: RepoId) -> Result<Option<RepoCommit>> {
        let row = sqlx::query(
            r#"
            SELECT id, repo_id, commit_sha, perforce_changelist_id, created_at
            FROM repo_commits_changelists
            WHERE repo_id = ?
            ORDER BY perforce_changelist_id DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_repo_commit(&r)))
    }

    async fn batch_insert_commit_changelists(
        &self,
        repo_id: RepoId,
        changelists: &[PerforceChangelist],
    ) -> Result<()> {
        if changelists.is_empty() {
            return Ok(());
        }

        // Encode up front so a bad sha fails before the transaction opens.
        let encoded = changelists
            .iter()
            .map(|c| -> Result<(Vec<u8>, i64)> {
                Ok((encode_commit_sha(&c.commit_sha)?, c.changelist_id))
            })
            .collect::<Result<Vec<_>>>()?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for chunk in encoded.chunks(CHUNK_SIZE) {
            let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
                r#"
                INSERT INTO repo_commits_changelists (
                    repo_id, commit_sha, perforce_changelist_id, created_at
                ) "#,
            );

            qb.push_values(chunk, |mut b, (sha, changelist_id)| {
                b.push_bind(repo_id)
                    .push_bind(sha.as_slice())
                    .push_bind(*changelist_id)
                    .push_bind(&now);
            });

            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::debug!(repo_id = %repo_id, records = changelists.len(), "Inserted changelist mappings");
        Ok(())
    }
}

fn map_repo_commit(row: &SqliteRow) -> RepoCommit {
    let sha: Vec<u8> = row.get("commit_sha");
    let created_at: String = row.get("created_at");

    RepoCommit {
        id: row.get("id"),
        repo_id: RepoId(row.get("repo_id")),
        commit_sha: decode_commit_sha(&sha),
        perforce_changelist_id: row.get("perforce_changelist_id"),
        created_at: parse_datetime(&created_at),
    }
}
