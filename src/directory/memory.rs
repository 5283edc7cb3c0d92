//! Volatile in-memory directory
//!
//! Records live only as long as the process. Intended for demos and
//! serverless deployments where losing identities on restart is acceptable.

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{DirectoryError, IdentityRecord, IdentityUpdate, UserDirectory};

#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, IdentityRecord>>,
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find(&self, email: &str) -> Result<Option<IdentityRecord>, DirectoryError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn create(&self, email: &str) -> Result<IdentityRecord, DirectoryError> {
        let mut users = self.users.write().await;
        match users.entry(email.to_string()) {
            Entry::Occupied(_) => Err(DirectoryError::AlreadyExists(email.to_string())),
            Entry::Vacant(slot) => {
                let record = IdentityRecord::new(email);
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(
        &self,
        email: &str,
        update: IdentityUpdate,
    ) -> Result<IdentityRecord, DirectoryError> {
        let mut users = self.users.write().await;
        let record = users
            .get_mut(email)
            .ok_or_else(|| DirectoryError::NotFound(email.to_string()))?;
        record.apply(&update);
        Ok(record.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
