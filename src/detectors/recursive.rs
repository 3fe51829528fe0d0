//! Recursive pattern detector.

use super::PatternDetector;
use crate::chain::ChainSnapshot;
use crate::event::{EventRecord, PatternType, PatternVerdict, Severity};

/// Walks the ancestor path of a new event looking for an earlier event with
/// the same (`event_type`, `source_agent_id`) signature.
///
/// A hit means the agent is reacting to its own past action. Severity
/// escalates with the number of repeats found inside the lookback.
pub struct RecursiveDetector {
    lookback: usize,
    repeat_threshold: usize,
}

impl RecursiveDetector {
    /// Create a detector with the given lookback depth and critical repeat
    /// threshold.
    #[must_use]
    pub fn new(lookback: usize, repeat_threshold: usize) -> Self {
        Self {
            lookback: lookback.max(1),
            repeat_threshold: repeat_threshold.max(1),
        }
    }
}

impl PatternDetector for RecursiveDetector {
    fn name(&self) -> &'static str {
        "recursive"
    }

    fn evaluate(&self, snapshot: &ChainSnapshot, event: &EventRecord) -> PatternVerdict {
        let signature = event.signature();
        let repeats = snapshot
            .ancestor_signatures
            .iter()
            .take(self.lookback)
            .filter(|ancestor| **ancestor == signature)
            .count();

        let matched = repeats >= 1;
        let severity = if repeats > self.repeat_threshold {
            Severity::Critical
        } else if matched {
            Severity::Warning
        } else {
            Severity::Info
        };

        PatternVerdict {
            pattern_type: PatternType::Recursive,
            severity,
            matched,
            evidence: format!(
                "{repeats} ancestor repeats within lookback {} (critical above {})",
                self.lookback, self.repeat_threshold
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RecursiveDetector;
    use crate::detectors::testutil::snapshot;
    use crate::detectors::PatternDetector;
    use crate::event::{EventRecord, Severity};

    #[test]
    fn ancestor_within_lookback_matches() {
        let detector = RecursiveDetector::new(4, 3);
        let event = EventRecord::new("exec", "comment-created", "agent-x");
        let mut snap = snapshot("exec");
        snap.ancestor_signatures = vec![
            EventRecord::new("exec", "workflow-triggered", "agent-y").signature(),
            event.signature(),
        ];
        let verdict = detector.evaluate(&snap, &event);
        assert!(verdict.matched);
        assert_eq!(verdict.severity, Severity::Warning);
    }

    #[test]
    fn ancestor_beyond_lookback_never_matches() {
        let detector = RecursiveDetector::new(2, 3);
        let event = EventRecord::new("exec", "comment-created", "agent-x");
        let other = EventRecord::new("exec", "workflow-triggered", "agent-y");
        let mut snap = snapshot("exec");
        snap.ancestor_signatures = vec![
            other.signature(),
            other.signature(),
            event.signature(), // third ancestor, outside lookback of 2
        ];
        assert!(!detector.evaluate(&snap, &event).matched);
    }

    #[test]
    fn many_repeats_escalate_to_critical() {
        let detector = RecursiveDetector::new(8, 2);
        let event = EventRecord::new("exec", "comment-created", "agent-x");
        let mut snap = snapshot("exec");
        snap.ancestor_signatures = vec![event.signature(); 3];
        assert_eq!(detector.evaluate(&snap, &event).severity, Severity::Critical);
    }

    #[test]
    fn empty_chain_is_clean() {
        let detector = RecursiveDetector::new(4, 3);
        let event = EventRecord::new("exec", "comment-created", "agent-x");
        let verdict = detector.evaluate(&snapshot("exec"), &event);
        assert!(!verdict.matched);
        assert_eq!(verdict.severity, Severity::Info);
    }
}
