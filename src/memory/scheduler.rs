//! Per-conversation consolidation scheduling.
//!
//! The scheduler owns each conversation's consolidation state and drives the
//! trigger → run → coalesced-rerun cycle. At most one run is physically
//! executing per conversation at any instant; trigger events arriving during
//! a run collapse into exactly one follow-up run. Different conversations
//! are fully independent.
//!
//! All state reads/writes for one conversation happen under that
//! conversation's mutex, so the transitions are strictly serialized. The
//! consolidation work itself runs on a spawned task; appending an entry
//! never blocks on it.

use super::consolidator::{Consolidator, EntryRange};
use super::offset_store::{OffsetStore, StoredOffsets};
use super::trigger;
use crate::config::ConsolidationPolicy;
use crate::transcript::TranscriptLog;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How often `wait_until_idle` re-checks the state.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read-only view of a conversation's consolidation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub last_consolidated: usize,
    pub last_consolidated_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub pending_rerun: bool,
}

/// Mutable per-conversation record. Only the scheduler touches it, and only
/// while holding the conversation's mutex.
struct ConversationState {
    offsets: StoredOffsets,
    is_running: bool,
    pending_rerun: bool,
    /// Bumped on every reset; a run whose dispatch-time generation no longer
    /// matches discards its completion write.
    generation: u64,
}

impl ConversationState {
    fn new(offsets: StoredOffsets) -> Self {
        Self {
            offsets,
            is_running: false,
            pending_rerun: false,
            generation: 0,
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            last_consolidated: self.offsets.last_consolidated,
            last_consolidated_at: self.offsets.last_consolidated_at,
            is_running: self.is_running,
            pending_rerun: self.pending_rerun,
        }
    }
}

struct SchedulerInner {
    policy: ConsolidationPolicy,
    log: Arc<dyn TranscriptLog>,
    consolidator: Arc<dyn Consolidator>,
    offset_store: Arc<dyn OffsetStore>,
    conversations: Mutex<HashMap<String, Arc<Mutex<ConversationState>>>>,
}

/// Drives background memory consolidation across conversations.
#[derive(Clone)]
pub struct ConsolidationScheduler {
    inner: Arc<SchedulerInner>,
}

impl ConsolidationScheduler {
    pub fn new(
        policy: ConsolidationPolicy,
        log: Arc<dyn TranscriptLog>,
        consolidator: Arc<dyn Consolidator>,
        offset_store: Arc<dyn OffsetStore>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                policy,
                log,
                consolidator,
                offset_store,
                conversations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Handle an "entry appended" event for a conversation.
    ///
    /// Evaluates the trigger against the current transcript length and either
    /// dispatches a background run, marks a follow-up for the run already in
    /// flight, or does nothing. Returns once the bookkeeping is done; the
    /// consolidation itself happens on a spawned task.
    pub async fn on_entry_appended(&self, conversation: &str) -> Result<()> {
        let state = self.state_for(conversation).await?;
        let mut st = state.lock().await;

        let total = self.inner.log.length(conversation).await?;
        let decision = trigger::evaluate(total, Utc::now(), &st.offsets, &self.inner.policy);
        if !decision.should_trigger {
            return Ok(());
        }

        if st.is_running {
            // Coalesce: any number of qualifying events during a run become
            // one follow-up run.
            if !st.pending_rerun {
                st.pending_rerun = true;
                debug!("Consolidation already running for {}; follow-up queued", conversation);
            }
            return Ok(());
        }

        let range = EntryRange {
            start: st.offsets.last_consolidated,
            end: decision.compress_end,
        };
        st.is_running = true;
        let generation = st.generation;
        drop(st);

        debug!(
            "Consolidation scheduled for {} over [{}, {})",
            conversation, range.start, range.end
        );
        self.spawn_run(conversation.to_string(), state, range, generation);
        Ok(())
    }

    /// Handle an explicit conversation reset.
    ///
    /// Zeroes the offsets (in memory and on disk) and clears the run flags.
    /// A run still physically executing keeps running, but its completion
    /// write is discarded against the bumped generation.
    pub async fn on_conversation_reset(&self, conversation: &str) -> Result<()> {
        let state = self.state_for(conversation).await?;
        let mut st = state.lock().await;

        st.generation = st.generation.wrapping_add(1);
        st.offsets = StoredOffsets::default();
        st.is_running = false;
        st.pending_rerun = false;
        self.inner
            .offset_store
            .save(conversation, &st.offsets)
            .await?;

        info!("Consolidation state reset for {}", conversation);
        Ok(())
    }

    /// Read-only state snapshot for observability and tests.
    pub async fn snapshot(&self, conversation: &str) -> Result<StateSnapshot> {
        let state = self.state_for(conversation).await?;
        let st = state.lock().await;
        Ok(st.snapshot())
    }

    /// Wait until no run is executing or pending for the conversation.
    pub async fn wait_until_idle(&self, conversation: &str) -> Result<()> {
        loop {
            let snapshot = self.snapshot(conversation).await?;
            if !snapshot.is_running && !snapshot.pending_rerun {
                return Ok(());
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Per-conversation state, created on first access with persisted
    /// offsets. Run flags always start false in a fresh process.
    async fn state_for(&self, conversation: &str) -> Result<Arc<Mutex<ConversationState>>> {
        {
            let conversations = self.inner.conversations.lock().await;
            if let Some(state) = conversations.get(conversation) {
                return Ok(state.clone());
            }
        }

        // Load outside the registry lock; a racing creator wins via entry().
        let offsets = self.inner.offset_store.load(conversation).await?;
        let mut conversations = self.inner.conversations.lock().await;
        Ok(conversations
            .entry(conversation.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(offsets))))
            .clone())
    }

    fn spawn_run(
        &self,
        conversation: String,
        state: Arc<Mutex<ConversationState>>,
        range: EntryRange,
        generation: u64,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            Self::run_loop(inner, conversation, state, range, generation).await;
        });
    }

    /// Execute one consolidation run, then honor at most one coalesced
    /// follow-up per completion, re-evaluating the trigger each time against
    /// the then-current transcript. Runs entirely outside the entry path.
    async fn run_loop(
        inner: Arc<SchedulerInner>,
        conversation: String,
        state: Arc<Mutex<ConversationState>>,
        first_range: EntryRange,
        generation: u64,
    ) {
        let mut range = first_range;
        loop {
            let outcome = async {
                let entries = inner.log.slice(&conversation, range.start, range.end).await?;
                inner
                    .consolidator
                    .consolidate(&conversation, range, &entries)
                    .await
            }
            .await;

            let mut st = state.lock().await;
            if st.generation != generation {
                // The conversation was reset mid-run; the reset already
                // cleared the flags, so this completion is simply dropped.
                debug!("Discarding stale consolidation result for {}", conversation);
                return;
            }
            st.is_running = false;

            match outcome {
                Ok(_) => {
                    // The range was fixed at dispatch time; entries appended
                    // since then stay unconsolidated until the next run.
                    st.offsets.last_consolidated = range.end;
                    st.offsets.last_consolidated_at = Some(Utc::now());
                    if let Err(e) = inner.offset_store.save(&conversation, &st.offsets).await {
                        // In-memory offsets stay authoritative; the next
                        // successful run retries the save.
                        warn!("Failed to persist offsets for {}: {}", conversation, e);
                    }
                    info!(
                        "Consolidation complete for {}: [{}, {})",
                        conversation, range.start, range.end
                    );
                }
                Err(e) => {
                    // Failed range is not marked consumed; the next
                    // qualifying event retries from the same start.
                    warn!("Consolidation failed for {}: {}", conversation, e);
                }
            }

            if !st.pending_rerun {
                return;
            }
            st.pending_rerun = false;

            let total = match inner.log.length(&conversation).await {
                Ok(total) => total,
                Err(e) => {
                    warn!("Skipping follow-up consolidation for {}: {}", conversation, e);
                    return;
                }
            };
            let decision =
                trigger::evaluate(total, Utc::now(), &st.offsets, &inner.policy);
            if !decision.should_trigger {
                return;
            }

            range = EntryRange {
                start: st.offsets.last_consolidated,
                end: decision.compress_end,
            };
            st.is_running = true;
            drop(st);
            debug!(
                "Follow-up consolidation for {} over [{}, {})",
                conversation, range.start, range.end
            );
        }
    }
}
