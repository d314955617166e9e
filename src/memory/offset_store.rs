//! Consolidation offset persistence.
//!
//! Only the consolidated prefix bound and its completion timestamp are
//! persisted. Run flags are process-lifetime state and never touch disk, so
//! a restart always begins with no run in flight.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Durable per-conversation consolidation offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOffsets {
    /// Exclusive upper bound of the already-consolidated transcript prefix
    pub last_consolidated: usize,

    /// Completion time of the last successful run, if any
    pub last_consolidated_at: Option<DateTime<Utc>>,
}

/// Load/save access to per-conversation offsets.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Offsets for a conversation; zero-valued if none were ever saved.
    async fn load(&self, conversation: &str) -> Result<StoredOffsets>;

    async fn save(&self, conversation: &str, offsets: &StoredOffsets) -> Result<()>;
}

/// JSON-file offset store.
///
/// Directory layout:
///   {workspace}/offsets/{conversation}.json
pub struct FileOffsetStore {
    offsets_dir: PathBuf,
}

impl FileOffsetStore {
    /// Create a new offset store. Creates the directory if needed.
    pub async fn new(workspace: &Path) -> Result<Self> {
        let offsets_dir = workspace.join("offsets");
        fs::create_dir_all(&offsets_dir).await?;
        Ok(Self { offsets_dir })
    }

    fn offsets_path(&self, conversation: &str) -> PathBuf {
        let safe_id: String = conversation
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.offsets_dir.join(format!("{}.json", safe_id))
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self, conversation: &str) -> Result<StoredOffsets> {
        let path = self.offsets_path(conversation);
        if !path.exists() {
            return Ok(StoredOffsets::default());
        }

        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str::<StoredOffsets>(&content) {
            Ok(offsets) => Ok(offsets),
            Err(e) => {
                warn!("Failed to parse offsets for {}: {}", conversation, e);
                Ok(StoredOffsets::default())
            }
        }
    }

    async fn save(&self, conversation: &str, offsets: &StoredOffsets) -> Result<()> {
        let path = self.offsets_path(conversation);
        let content = serde_json::to_string_pretty(offsets)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
