use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::repository::FeatureFlagStore;

/// Key/value settings table, used for feature flags.
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set_flag(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        tracing::info!(flag = key, value, "Updated feature flag");
        Ok(())
    }
}

#[async_trait]
impl FeatureFlagStore for SettingsRepository {
    async fn get_flag(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }
}
