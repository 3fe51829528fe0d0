//! Rapid-fire detector.

use super::PatternDetector;
use crate::chain::ChainSnapshot;
use crate::event::{EventRecord, PatternType, PatternVerdict, Severity};

/// Counts events with the same (`event_type`, `source_agent_id`) signature
/// inside a sliding time window.
///
/// `threshold` events alone never match; the `threshold + 1`th does.
pub struct RapidFireDetector {
    window_ms: i64,
    threshold: usize,
}

impl RapidFireDetector {
    /// Create a detector with the given window and count threshold.
    #[must_use]
    pub fn new(window_ms: u64, threshold: usize) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            threshold: threshold.max(1),
        }
    }
}

impl PatternDetector for RapidFireDetector {
    fn name(&self) -> &'static str {
        "rapid_fire"
    }

    fn evaluate(&self, snapshot: &ChainSnapshot, event: &EventRecord) -> PatternVerdict {
        let signature = event.signature();
        let now_ms = event.timestamp.timestamp_millis();

        // The snapshot already contains the event under evaluation, so the
        // count includes it.
        let count = snapshot
            .recent
            .iter()
            .filter(|entry| entry.signature == signature)
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
            pattern_type: PatternType::RapidFire,
            severity,
            matched,
            evidence: format!(
                "{count} same-signature events within {}ms (threshold {})",
                self.window_ms, self.threshold
            ),
        }
    }
}
