//! Task fixation detector.
//!
//! Flags one agent repeatedly producing events for the same task over a long
//! window, a slower-burning signal than rapid-fire. The task identity comes
//! from the `task_type` metadata entry, falling back to the event type.

use super::PatternDetector;
use crate::chain::ChainSnapshot;
use crate::event::{EventRecord, PatternType, PatternVerdict, Severity};

/// Counts same-task events from one agent inside the pattern window.
pub struct FixationDetector {
    window_ms: i64,
    threshold: usize,
}

impl FixationDetector {
    /// Create a detector with the given window and count threshold.
    #[must_use]
    pub fn new(window_ms: u64, threshold: usize) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            threshold: threshold.max(1),
        }
    }
}

impl PatternDetector for FixationDetector {
    fn name(&self) -> &'static str {
        "fixation"
    }

    fn evaluate(&self, snapshot: &ChainSnapshot, event: &EventRecord) -> PatternVerdict {
        let task_key = event.task_key();
        let now_ms = event.timestamp.timestamp_millis();

        let count = snapshot
            .recent
            .iter()
            .filter(|entry| entry.task_key == task_key)
            .filter(|entry| now_ms - entry.timestamp_ms <= self.window_ms)
            .count();

        let matched = count > self.threshold;
        let severity = if count > self.threshold * 2 {
            Severity::Critical
        } else if matched {
            Severity::Warning
        } else {
            Severity::Info
        };

        PatternVerdict {
            pattern_type: PatternType::Fixation,
            severity,
            matched,
            evidence: format!(
                "{count} same-task events within {}ms (threshold {})",
                self.window_ms, self.threshold
            ),
        }
    }
}
