//! Fan-out detector.

use super::PatternDetector;
use crate::chain::ChainSnapshot;
use crate::event::{EventRecord, PatternType, PatternVerdict, Severity};

/// Flags a parent event spawning an excessive number of direct children.
///
/// Exactly `threshold` children is tolerated; `threshold + 1` matches.
pub struct FanOutDetector {
    threshold: usize,
}

impl FanOutDetector {
    /// Create a detector with the given branching threshold.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }
}

impl PatternDetector for FanOutDetector {
    fn name(&self) -> &'static str {
        "fan_out"
    }

    fn evaluate(&self, snapshot: &ChainSnapshot, _event: &EventRecord) -> PatternVerdict {
        let children = snapshot.parent_child_count;
        let matched = children > self.threshold;
        let severity = if children > self.threshold * 2 {
            Severity::Critical
        } else if matched {
            Severity::Warning
        } else {
            Severity::Info
        };

        PatternVerdict {
            pattern_type: PatternType::FanOut,
            severity,
            matched,
            evidence: format!(
                "parent has {children} direct children (threshold {})",
                self.threshold
            ),
        }
    }
}
