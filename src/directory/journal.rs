//! Durable file journal directory
//!
//! Each create or update appends the full record as one JSON line and syncs
//! it before the in-memory index is touched. On open the journal is replayed
//! and the last line per email wins.
//!
//! A crash mid-append leaves an unterminated trailing line. Replay drops it
//! and truncates the file back to the last complete record, so a record is
//! either fully present or absent. A trailing line that parses as a whole
//! record is kept and given its newline. A failed append is rolled back the same
//! way before the error is returned.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::{DirectoryError, IdentityRecord, IdentityUpdate, UserDirectory};

struct JournalState {
    index: HashMap<String, IdentityRecord>,
    file: File,
    /// Length of the journal up to the last complete record
    len: u64,
}

pub struct JournalDirectory {
    path: PathBuf,
    state: RwLock<JournalState>,
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> DirectoryError {
    DirectoryError::Storage(format!("{}: {}", path.display(), e))
}

impl JournalDirectory {
    /// Open (or create) the journal at `path` and replay it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(&path, e))?;
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(storage_err(&path, e)),
        };

        let Replay {
            index,
            mut len,
            unterminated,
        } = replay(&path, &contents)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_err(&path, e))?;

        if len < contents.len() as u64 {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = contents.len() as u64 - len,
                "Dropping incomplete trailing journal record"
            );
            file.set_len(len).await.map_err(|e| storage_err(&path, e))?;
        }

        if unterminated {
            tracing::warn!(
                path = %path.display(),
                "Terminating last journal record that had no trailing newline"
            );
            file.write_all(b"\n")
                .await
                .map_err(|e| storage_err(&path, e))?;
            file.flush().await.map_err(|e| storage_err(&path, e))?;
            file.sync_data().await.map_err(|e| storage_err(&path, e))?;
            len += 1;
        }

        tracing::info!(
            path = %path.display(),
            identities = index.len(),
            "User journal replayed"
        );

        Ok(Self {
            path,
            state: RwLock::new(JournalState { index, file, len }),
        })
    }

    /// Append one record; on failure truncate back so no torn line remains
    async fn append(
        &self,
        state: &mut JournalState,
        record: &IdentityRecord,
    ) -> Result<(), DirectoryError> {
        let mut line = serde_json::to_vec(record).map_err(|e| storage_err(&self.path, e))?;
        line.push(b'\n');

        let written = async {
            state.file.write_all(&line).await?;
            state.file.flush().await?;
            state.file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Journal append failed, rolling back"
            );
            if let Err(rollback) = state.file.set_len(state.len).await {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Journal rollback failed"
                );
            }
            return Err(storage_err(&self.path, e));
        }

        state.len += line.len() as u64;
        Ok(())
    }
}

/// Result of replaying journal bytes
struct Replay {
    index: HashMap<String, IdentityRecord>,
    /// Byte length covered by complete records
    len: u64,
    /// The last record parsed but had no trailing newline
    unterminated: bool,
}

/// Rebuild the index from journal bytes.
///
/// A trailing fragment without a newline is kept when it parses as a whole
/// record and dropped otherwise.
fn replay(path: &Path, contents: &[u8]) -> Result<Replay, DirectoryError> {
    let mut index = HashMap::new();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while let Some(newline) = contents[offset..].iter().position(|&b| b == b'\n') {
        let line = &contents[offset..offset + newline];
        line_no += 1;
        offset += newline + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record: IdentityRecord = serde_json::from_slice(line).map_err(|e| {
            storage_err(path, format!("corrupt journal record on line {}: {}", line_no, e))
        })?;
        index.insert(record.email.clone(), record);
    }

    let tail = &contents[offset..];
    if !tail.iter().all(u8::is_ascii_whitespace) {
        if let Ok(record) = serde_json::from_slice::<IdentityRecord>(tail) {
            index.insert(record.email.clone(), record);
            return Ok(Replay {
                index,
                len: contents.len() as u64,
                unterminated: true,
            });
        }
    }

    Ok(Replay {
        index,
        len: offset as u64,
        unterminated: false,
    })
}

#[async_trait]
impl UserDirectory for JournalDirectory {
    async fn find(&self, email: &str) -> Result<Option<IdentityRecord>, DirectoryError> {
        Ok(self.state.read().await.index.get(email).cloned())
    }

    async fn create(&self, email: &str) -> Result<IdentityRecord, DirectoryError> {
        let mut state = self.state.write().await;
        if state.index.contains_key(email) {
            return Err(DirectoryError::AlreadyExists(email.to_string()));
        }

        let record = IdentityRecord::new(email);
        self.append(&mut state, &record).await?;
        state.index.insert(email.to_string(), record.clone());

        tracing::debug!(email = %email, "Identity appended to journal");
        Ok(record)
    }

    async fn update(
        &self,
        email: &str,
        update: IdentityUpdate,
    ) -> Result<IdentityRecord, DirectoryError> {
        let mut state = self.state.write().await;
        let mut record = state
            .index
            .get(email)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(email.to_string()))?;
        record.apply(&update);

        self.append(&mut state, &record).await?;
        state.index.insert(email.to_string(), record.clone());
        Ok(record)
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}
