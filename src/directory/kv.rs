//! Key-value store directory
//!
//! One row per identity in a `kv_store` table, keyed `user:{email}` with the
//! JSON record as value. Creation relies on the primary key constraint, so
//! concurrent creates of the same email resolve inside the store itself and
//! creates of different emails never contend.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use super::{DirectoryError, IdentityRecord, IdentityUpdate, UserDirectory};

#[derive(Clone)]
pub struct KvDirectory {
    pool: SqlitePool,
}

fn key_for(email: &str) -> String {
    format!("user:{}", email)
}

/// How long a writer waits for the database lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn storage_err(e: impl std::fmt::Display) -> DirectoryError {
    DirectoryError::Storage(e.to_string())
}

impl KvDirectory {
    /// Connect to the store at `url` (e.g. `sqlite:data/users.db?mode=rwc`)
    pub async fn connect(url: &str) -> Result<Self, DirectoryError> {
        tracing::debug!("Connecting to key-value user store");

        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_err)?
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let directory = Self { pool };
        directory.migrate().await?;
        Ok(directory)
    }

    async fn migrate(&self) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DirectoryError::Storage(format!("migration failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl UserDirectory for KvDirectory {
    async fn find(&self, email: &str) -> Result<Option<IdentityRecord>, DirectoryError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key_for(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        value
            .map(|v| serde_json::from_str(&v).map_err(storage_err))
            .transpose()
    }

    async fn create(&self, email: &str) -> Result<IdentityRecord, DirectoryError> {
        let record = IdentityRecord::new(email);
        let value = serde_json::to_string(&record).map_err(storage_err)?;
        let now = record.created_at.timestamp();

        let result = sqlx::query(
            "INSERT INTO kv_store (key, value, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key_for(email))
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::AlreadyExists(email.to_string()));
        }
        Ok(record)
    }

    async fn update(
        &self,
        email: &str,
        update: IdentityUpdate,
    ) -> Result<IdentityRecord, DirectoryError> {
        // One statement: the write lock is taken up front, so concurrent
        // updates queue on the busy timeout instead of failing an upgrade.
        // A NULL argument keeps the stored reference.
        let value = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE kv_store
            SET value = json_set(
                    value,
                    '$.externalWorkspaceRef',
                    COALESCE(?1, json_extract(value, '$.externalWorkspaceRef')),
                    '$.externalDestinationRef',
                    COALESCE(?2, json_extract(value, '$.externalDestinationRef'))
                ),
                updated_at = ?3
            WHERE key = ?4
            RETURNING value
            "#,
        )
        .bind(update.external_workspace_ref)
        .bind(update.external_destination_ref)
        .bind(chrono::Utc::now().timestamp())
        .bind(key_for(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .ok_or_else(|| DirectoryError::NotFound(email.to_string()))?;

        serde_json::from_str(&value).map_err(storage_err)
    }

    fn name(&self) -> &'static str {
        "kv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::contract;
    use std::sync::Arc;

    async fn connect_temp() -> (tempfile::TempDir, KvDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("users.db").display());
        let kv = KvDirectory::connect(&url).await.unwrap();
        (dir, kv)
    }

    #[tokio::test]
    async fn test_find_after_create() {
        let (_tmp, dir) = connect_temp().await;
        contract::find_after_create(&dir).await;
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let (_tmp, dir) = connect_temp().await;
        contract::duplicate_create_rejected(&dir).await;
    }

    #[tokio::test]
    async fn test_email_is_case_sensitive() {
        let (_tmp, dir) = connect_temp().await;
        contract::email_is_case_sensitive(&dir).await;
    }

    #[tokio::test]
    async fn test_update_attaches_refs() {
        let (_tmp, dir) = connect_temp().await;
        contract::update_attaches_refs(&dir).await;
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (_tmp, dir) = connect_temp().await;
        contract::update_missing_is_not_found(&dir).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_single_winner() {
        let (_tmp, dir) = connect_temp().await;
        contract::concurrent_create_single_winner(Arc::new(dir)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_all_succeed() {
        let (_tmp, dir) = connect_temp().await;
        contract::concurrent_updates_all_succeed(Arc::new(dir)).await;
    }

    #[tokio::test]
    async fn test_stored_value_keeps_refs_across_partial_updates() {
        let (_tmp, dir) = connect_temp().await;
        dir.create("a@x.com").await.unwrap();

        dir.update(
            "a@x.com",
            IdentityUpdate {
                external_workspace_ref: Some("ws-1".to_string()),
                external_destination_ref: None,
            },
        )
        .await
        .unwrap();

        let raw: String = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind("user:a@x.com")
            .fetch_one(&dir.pool)
            .await
            .unwrap();
        let record: IdentityRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.external_workspace_ref.as_deref(), Some("ws-1"));
        assert_eq!(record.external_destination_ref, None);
    }

    #[tokio::test]
    async fn test_records_survive_reconnect() {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("users.db").display());

        let created = {
            let dir = KvDirectory::connect(&url).await.unwrap();
            let record = dir.create("a@x.com").await.unwrap();
            dir.pool.close().await;
            record
        };

        let dir = KvDirectory::connect(&url).await.unwrap();
        assert_eq!(dir.find("a@x.com").await.unwrap(), Some(created));
    }
}
