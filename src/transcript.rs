//! Append-only conversation transcripts.
//!
//! One JSON file per conversation under `{workspace}/transcripts/`. The full
//! entry list is kept in memory and rewritten on each mutation; a corrupt
//! file loads as an empty transcript with a warning rather than failing.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    User,
    Assistant,
    Tool,
    System,
}

impl EntryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::Tool => "TOOL",
            Self::System => "SYSTEM",
        }
    }
}

/// A single conversational entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub role: EntryRole,
    pub content: String,
}

impl TranscriptEntry {
    pub fn new(role: EntryRole, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Read access to a conversation's entry log.
#[async_trait]
pub trait TranscriptLog: Send + Sync {
    /// Current number of entries in the conversation.
    async fn length(&self, conversation: &str) -> Result<usize>;

    /// Entries in `[start, end)`, clamped to the valid index range.
    async fn slice(&self, conversation: &str, start: usize, end: usize)
        -> Result<Vec<TranscriptEntry>>;
}

/// File-backed transcript store keyed by conversation id.
///
/// Directory layout:
///   {workspace}/transcripts/{conversation}.json
pub struct TranscriptStore {
    transcripts_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<TranscriptEntry>>>,
}

impl TranscriptStore {
    /// Create a new transcript store. Creates the directory if needed.
    pub async fn new(workspace: &Path) -> Result<Self> {
        let transcripts_dir = workspace.join("transcripts");
        fs::create_dir_all(&transcripts_dir).await?;
        Ok(Self {
            transcripts_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Append an entry and persist the transcript. Returns the new length.
    pub async fn append(&self, conversation: &str, entry: TranscriptEntry) -> Result<usize> {
        self.ensure_loaded(conversation).await?;
        let mut cache = self.cache.write().await;
        let entries = cache.entry(conversation.to_string()).or_default();
        entries.push(entry);
        let len = entries.len();
        let snapshot = entries.clone();
        drop(cache);

        self.persist(conversation, &snapshot).await?;
        debug!("Appended entry {} to conversation {}", len, conversation);
        Ok(len)
    }

    /// Drop all entries for a conversation and persist the empty transcript.
    pub async fn clear(&self, conversation: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.insert(conversation.to_string(), Vec::new());
        drop(cache);
        self.persist(conversation, &[]).await
    }

    /// The most recent `n` entries.
    pub async fn recent(&self, conversation: &str, n: usize) -> Result<Vec<TranscriptEntry>> {
        self.ensure_loaded(conversation).await?;
        let cache = self.cache.read().await;
        let entries = cache.get(conversation).map(Vec::as_slice).unwrap_or(&[]);
        let start = entries.len().saturating_sub(n);
        Ok(entries[start..].to_vec())
    }

    /// Load a transcript file into the cache on first access.
    async fn ensure_loaded(&self, conversation: &str) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if cache.contains_key(conversation) {
                return Ok(());
            }
        }

        let path = self.transcript_path(conversation);
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Vec<TranscriptEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to parse transcript for {}: {}", conversation, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut cache = self.cache.write().await;
        cache.entry(conversation.to_string()).or_insert(entries);
        Ok(())
    }

    async fn persist(&self, conversation: &str, entries: &[TranscriptEntry]) -> Result<()> {
        let path = self.transcript_path(conversation);
        let content = serde_json::to_string_pretty(entries)?;
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

    fn transcript_path(&self, conversation: &str) -> PathBuf {
        // Sanitize conversation id for use as filename
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
        self.transcripts_dir.join(format!("{}.json", safe_id))
    }
}

#[async_trait]
impl TranscriptLog for TranscriptStore {
    async fn length(&self, conversation: &str) -> Result<usize> {
        self.ensure_loaded(conversation).await?;
        let cache = self.cache.read().await;
        Ok(cache.get(conversation).map(Vec::len).unwrap_or(0))
    }

    async fn slice(
        &self,
        conversation: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<TranscriptEntry>> {
        self.ensure_loaded(conversation).await?;
        let cache = self.cache.read().await;
        let entries = cache.get(conversation).map(Vec::as_slice).unwrap_or(&[]);
        let end = end.min(entries.len());
        let start = start.min(end);
        Ok(entries[start..end].to_vec())
    }
}
