//! The consolidation operation: a contiguous transcript range goes in, a
//! condensed artifact lands in the durable memory files.
//!
//! The scheduler treats any non-success outcome uniformly as failure and
//! leaves the consolidated offset untouched, so a consolidator must be safe
//! to invoke again with the same start index (the end may have grown).

use super::store::MemoryStore;
use crate::provider::ChatProvider;
use crate::transcript::TranscriptEntry;
use crate::{MulchError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Half-open range `[start, end)` of transcript indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRange {
    pub start: usize,
    pub end: usize,
}

impl EntryRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// What a successful consolidation produced.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationArtifact {
    /// History paragraph appended to HISTORY.md, if the model produced one
    pub history_entry: Option<String>,

    /// Whether MEMORY.md was rewritten
    pub memory_updated: bool,
}

/// Turns a range of transcript entries into a durable memory artifact.
#[async_trait]
pub trait Consolidator: Send + Sync {
    async fn consolidate(
        &self,
        conversation: &str,
        range: EntryRange,
        entries: &[TranscriptEntry],
    ) -> Result<ConsolidationArtifact>;
}

/// System prompt for the consolidation call.
const CONSOLIDATION_SYSTEM_PROMPT: &str =
    "You are a memory consolidation agent. Respond only with valid JSON.";

/// Instructions for the JSON object the model must return.
const CONSOLIDATION_INSTRUCTIONS: &str = r#"You are a memory consolidation agent. Process this conversation and return a JSON object with exactly two keys:

1. "history_entry": A paragraph (2-5 sentences) summarizing the key events/decisions/topics. Start with a timestamp like [YYYY-MM-DD HH:MM]. Include enough detail to be useful when found by grep search later.

2. "memory_update": The updated long-term memory content. Add any new facts: user location, preferences, personal info, habits, project context, technical decisions, tools/services used. If nothing new, return the existing content unchanged."#;

/// The model's response contract.
#[derive(Debug, Deserialize)]
struct ConsolidationUpdate {
    #[serde(default)]
    history_entry: Option<String>,
    #[serde(default)]
    memory_update: Option<String>,
}

/// LLM-backed consolidator writing to the layered memory files.
pub struct LlmConsolidator {
    provider: Arc<dyn ChatProvider>,
    memory: MemoryStore,
}

impl LlmConsolidator {
    pub fn new(provider: Arc<dyn ChatProvider>, memory: MemoryStore) -> Self {
        Self { provider, memory }
    }

    fn build_prompt(current_memory: &str, conversation_text: &str) -> String {
        format!(
            "{}\n\n## Current Long-term Memory\n{}\n\n## Conversation to Process\n{}\n\nRespond with ONLY valid JSON, no markdown fences.",
            CONSOLIDATION_INSTRUCTIONS,
            if current_memory.is_empty() {
                "(empty)"
            } else {
                current_memory
            },
            conversation_text
        )
    }

    fn render_entries(entries: &[TranscriptEntry]) -> String {
        entries
            .iter()
            .map(|e| {
                format!(
                    "[{}] {}: {}",
                    e.timestamp.format("%Y-%m-%d %H:%M"),
                    e.role.as_str(),
                    e.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Strip a surrounding Markdown code fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line itself (may carry a language tag)
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body).trim()
}

#[async_trait]
impl Consolidator for LlmConsolidator {
    async fn consolidate(
        &self,
        conversation: &str,
        range: EntryRange,
        entries: &[TranscriptEntry],
    ) -> Result<ConsolidationArtifact> {
        if entries.is_empty() {
            return Ok(ConsolidationArtifact::default());
        }

        debug!(
            "Consolidating {} entries [{}, {}) for {}",
            entries.len(),
            range.start,
            range.end,
            conversation
        );

        let current_memory = self.memory.read_long_term().await?;
        let prompt = Self::build_prompt(&current_memory, &Self::render_entries(entries));

        let response = self
            .provider
            .chat(CONSOLIDATION_SYSTEM_PROMPT, &prompt)
            .await?;
        let text = strip_code_fences(&response);
        if text.is_empty() {
            return Err(MulchError::Consolidation(
                "LLM returned an empty response".into(),
            ));
        }

        let update: ConsolidationUpdate = serde_json::from_str(text)
            .map_err(|e| MulchError::Consolidation(format!("unparseable response: {}", e)))?;

        let mut artifact = ConsolidationArtifact::default();
        if let Some(entry) = update.history_entry.filter(|e| !e.trim().is_empty()) {
            self.memory.append_history(&entry).await?;
            artifact.history_entry = Some(entry);
        }
        if let Some(new_memory) = update.memory_update {
            if new_memory != current_memory {
                self.memory.write_long_term(&new_memory).await?;
                artifact.memory_updated = true;
            }
        }

        info!(
            "Consolidated {} entries for {} (history: {}, memory updated: {})",
            entries.len(),
            conversation,
            artifact.history_entry.is_some(),
            artifact.memory_updated
        );
        Ok(artifact)
    }
}
