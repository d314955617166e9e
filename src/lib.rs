//! Mulch - background memory consolidation for long-running chat agents
//!
//! A chat agent's transcript grows without bound; the model's context does
//! not. Mulch watches each conversation's append-only transcript and, in the
//! background, condenses the older portion into durable memory files while
//! the most recent entries stay verbatim:
//! - Decides *when* to consolidate (backlog window, hard limit, cooldown)
//! - Decides *which* contiguous range to consolidate
//! - Guarantees at most one consolidation run in flight per conversation,
//!   coalescing concurrent triggers into a single follow-up run

pub mod config;
pub mod memory;
pub mod provider;
pub mod transcript;

pub use config::{ConsolidationPolicy, MulchConfig, ProviderConfig};
pub use memory::{
    ConsolidationArtifact, ConsolidationScheduler, Consolidator, EntryRange, FileOffsetStore,
    LlmConsolidator, MemoryStore, OffsetStore, StateSnapshot, StoredOffsets, TriggerDecision,
};
pub use provider::{ChatProvider, OpenAiProvider};
pub use transcript::{EntryRole, TranscriptEntry, TranscriptLog, TranscriptStore};

/// Result type for Mulch operations
pub type Result<T> = std::result::Result<T, MulchError>;

/// Errors that can occur in Mulch
#[derive(Debug, thiserror::Error)]
pub enum MulchError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transcript error: {0}")]
    Transcript(String),

    #[error("Memory consolidation failed: {0}")]
    Consolidation(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
