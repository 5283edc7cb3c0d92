//! User directory
//!
//! Stores claimed identities keyed by email behind a single contract,
//! [`UserDirectory`], with three interchangeable backends:
//!
//! - `journal`: durable append-only JSON-lines file, replayed on open
//! - `memory`: volatile map, loses every record on restart
//! - `kv`: external key-value table (sqlite via sqlx), one row per identity
//!
//! The backend is chosen once at startup by [`open_directory`] and injected
//! into the gateway as `Arc<dyn UserDirectory>`.
//!
//! Every backend enforces exactly-once creation: of N concurrent `create`
//! calls for the same email, one returns the record and the rest fail with
//! [`DirectoryError::AlreadyExists`].

pub mod journal;
pub mod kv;
pub mod memory;

pub use journal::JournalDirectory;
pub use kv::KvDirectory;
pub use memory::MemoryDirectory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StoreConfig, StoreKind};

/// A claimed identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Primary key, case-sensitive as stored
    pub email: String,
    pub created_at: DateTime<Utc>,
    /// Upstream workspace attached by provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_workspace_ref: Option<String>,
    /// Upstream destination attached by provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_destination_ref: Option<String>,
}

impl IdentityRecord {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            created_at: Utc::now(),
            external_workspace_ref: None,
            external_destination_ref: None,
        }
    }

    /// Apply an update in place. Only attaches references, never clears them.
    pub fn apply(&mut self, update: &IdentityUpdate) {
        if let Some(workspace) = &update.external_workspace_ref {
            self.external_workspace_ref = Some(workspace.clone());
        }
        if let Some(destination) = &update.external_destination_ref {
            self.external_destination_ref = Some(destination.clone());
        }
    }
}

/// Fields that `update` may attach to an existing record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub external_workspace_ref: Option<String>,
    pub external_destination_ref: Option<String>,
}

/// Errors surfaced by every directory backend
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// `create` lost to an existing record with the same email.
    #[error("Email already exists")]
    AlreadyExists(String),

    /// `update` on an email with no record.
    #[error("User not found")]
    NotFound(String),

    /// Backend I/O or encoding failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage contract for identity records
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a record. `Ok(None)` when absent.
    async fn find(&self, email: &str) -> Result<Option<IdentityRecord>, DirectoryError>;

    /// Create a record, failing with `AlreadyExists` if one is present.
    async fn create(&self, email: &str) -> Result<IdentityRecord, DirectoryError>;

    /// Attach fields to an existing record, failing with `NotFound` if absent.
    async fn update(
        &self,
        email: &str,
        update: IdentityUpdate,
    ) -> Result<IdentityRecord, DirectoryError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Open the backend selected by configuration
pub async fn open_directory(config: &StoreConfig) -> anyhow::Result<Arc<dyn UserDirectory>> {
    let directory: Arc<dyn UserDirectory> = match config.kind {
        StoreKind::File => Arc::new(
            JournalDirectory::open(&config.path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open user journal: {}", e))?,
        ),
        StoreKind::Memory => {
            tracing::warn!(
                "Using in-memory user directory - identities will be lost on restart"
            );
            Arc::new(MemoryDirectory::default())
        }
        StoreKind::KeyValue => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("USER_STORE_URL is required for USER_STORE=kv"))?;
            Arc::new(
                KvDirectory::connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to connect user store: {}", e))?,
            )
        }
    };

    tracing::info!(backend = directory.name(), "User directory ready");
    Ok(directory)
}
