//! Consolidation trigger evaluation.
//!
//! A pure function over the current transcript length, the clock, and the
//! conversation's consolidation offsets. The scheduler re-invokes it on each
//! appended entry and once more right after a run completes, so it must be
//! safe to call any number of times with no hidden state.

use super::offset_store::StoredOffsets;
use crate::config::ConsolidationPolicy;
use chrono::{DateTime, Utc};

/// Outcome of a trigger evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerDecision {
    pub should_trigger: bool,

    /// Exclusive upper bound of the range a run would consolidate,
    /// i.e. `total_entries - tail_keep_size` clamped at zero.
    pub compress_end: usize,
}

/// Decide whether a consolidation run is due.
///
/// The backlog is everything between the consolidated prefix and the kept
/// tail: `delta = compress_end - last_consolidated`. A run is due when the
/// backlog reaches the window size, when it reaches the hard limit, or when
/// any backlog at all has been waiting longer than the cooldown since the
/// last successful run. The conditions are OR'd; whichever holds, the same
/// `compress_end` is used.
pub fn evaluate(
    total_entries: usize,
    now: DateTime<Utc>,
    offsets: &StoredOffsets,
    policy: &ConsolidationPolicy,
) -> TriggerDecision {
    let compress_end = total_entries.saturating_sub(policy.tail_keep_size);

    // Nothing new beyond the consolidated prefix (also covers a transcript
    // shorter than the kept tail).
    if compress_end <= offsets.last_consolidated {
        return TriggerDecision {
            should_trigger: false,
            compress_end,
        };
    }

    let delta = compress_end - offsets.last_consolidated;

    let window_reached = delta >= policy.window_size;
    let hard_limit_reached = delta >= policy.hard_limit;
    // Cooldown can only fire once a first run has succeeded.
    let cooldown_elapsed = match offsets.last_consolidated_at {
        Some(at) => {
            now.signed_duration_since(at).num_seconds() >= policy.cooldown_seconds as i64
        }
        None => false,
    };

    TriggerDecision {
        should_trigger: window_reached || hard_limit_reached || cooldown_elapsed,
        compress_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy(window_size: usize, hard_limit: usize) -> ConsolidationPolicy {
        ConsolidationPolicy {
            context_size: 75,
            tail_keep_size: 40,
            window_size,
            cooldown_seconds: 900,
            hard_limit,
        }
    }

    fn offsets(last_consolidated: usize) -> StoredOffsets {
        StoredOffsets {
            last_consolidated,
            last_consolidated_at: None,
        }
    }

    /// Window trigger: entries appended one at a time fire exactly at
    /// total = tail_keep_size + window_size.
    #[test]
    fn test_window_trigger_fires_exactly_at_threshold() {
        let policy = policy(12, 30);
        let now = Utc::now();

        for total in 0..52 {
            let decision = evaluate(total, now, &offsets(0), &policy);
            assert!(!decision.should_trigger, "unexpected trigger at {}", total);
        }

        let decision = evaluate(52, now, &offsets(0), &policy);
        assert!(decision.should_trigger);
        assert_eq!(decision.compress_end, 12);
    }

    /// Hard-limit trigger fires before a larger window is reached.
    #[test]
    fn test_hard_limit_precedes_window() {
        let policy = policy(20, 8);
        let now = Utc::now();

        let decision = evaluate(47, now, &offsets(0), &policy);
        assert!(!decision.should_trigger);

        let decision = evaluate(48, now, &offsets(0), &policy);
        assert!(decision.should_trigger);
        assert_eq!(decision.compress_end, 8);
    }

    /// Cooldown trigger consolidates even a single pending entry.
    #[test]
    fn test_cooldown_trigger_with_minimal_backlog() {
        let policy = policy(12, 30);
        let now = Utc::now();
        let stale = StoredOffsets {
            last_consolidated: 5,
            last_consolidated_at: Some(now - Duration::seconds(901)),
        };

        // delta = (46 - 40) - 5 = 1, below window and hard limit
        let decision = evaluate(46, now, &stale, &policy);
        assert!(decision.should_trigger);
        assert_eq!(decision.compress_end, 6);
    }

    #[test]
    fn test_cooldown_not_elapsed_does_not_trigger() {
        let policy = policy(12, 30);
        let now = Utc::now();
        let recent = StoredOffsets {
            last_consolidated: 5,
            last_consolidated_at: Some(now - Duration::seconds(10)),
        };
        assert!(!evaluate(46, now, &recent, &policy).should_trigger);
    }

    /// Cooldown never fires before the first successful run.
    #[test]
    fn test_cooldown_requires_prior_run() {
        let policy = policy(12, 30);
        let decision = evaluate(41, Utc::now(), &offsets(0), &policy);
        assert!(!decision.should_trigger);
        assert_eq!(decision.compress_end, 1);
    }

    /// A transcript shorter than the kept tail clamps to no-trigger.
    #[test]
    fn test_short_transcript_clamps() {
        let policy = policy(12, 30);
        let decision = evaluate(7, Utc::now(), &offsets(0), &policy);
        assert!(!decision.should_trigger);
        assert_eq!(decision.compress_end, 0);
    }

    /// Nothing beyond the consolidated prefix → no trigger, even when the
    /// cooldown has long elapsed.
    #[test]
    fn test_no_backlog_no_trigger() {
        let policy = policy(12, 30);
        let now = Utc::now();
        let caught_up = StoredOffsets {
            last_consolidated: 12,
            last_consolidated_at: Some(now - Duration::seconds(10_000)),
        };
        assert!(!evaluate(52, now, &caught_up, &policy).should_trigger);
    }

    /// Re-evaluation right after a run uses the advanced prefix.
    #[test]
    fn test_reevaluation_after_advance() {
        let policy = policy(12, 30);
        let now = Utc::now();

        // 15 entries arrived during the previous run: compress_end = 27
        let decision = evaluate(67, now, &offsets(12), &policy);
        assert!(decision.should_trigger);
        assert_eq!(decision.compress_end, 27);
    }
}
