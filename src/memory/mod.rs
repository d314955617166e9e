//! Memory consolidation for Mulch
//!
//! Provides the trigger evaluator, the per-conversation consolidation
//! scheduler, offset persistence, and the LLM-backed consolidator that
//! distills old transcript ranges into durable memory files.

mod consolidator;
mod offset_store;
mod scheduler;
mod store;
mod trigger;

pub use consolidator::{ConsolidationArtifact, Consolidator, EntryRange, LlmConsolidator};
pub use offset_store::{FileOffsetStore, OffsetStore, StoredOffsets};
pub use scheduler::{ConsolidationScheduler, StateSnapshot};
pub use store::MemoryStore;
pub use trigger::{evaluate, TriggerDecision};
