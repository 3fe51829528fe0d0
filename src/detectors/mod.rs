//! Pattern detectors.
//!
//! Each detector inspects the chain snapshot produced by an ingest and emits
//! a [`PatternVerdict`]. Detectors never short-circuit each other: the
//! gateway runs every one of them and collects all verdicts before anything
//! is enforced.

use crate::chain::ChainSnapshot;
use crate::config::EngineConfig;
use crate::event::{EventRecord, PatternVerdict};

mod fan_out;
mod fixation;
mod rapid_fire;
mod recursive;

pub use fan_out::FanOutDetector;
pub use fixation::FixationDetector;
pub use rapid_fire::RapidFireDetector;
pub use recursive::RecursiveDetector;

/// Capability shared by all pattern detectors.
pub trait PatternDetector: Send + Sync {
    /// Name of the detector for logging.
    fn name(&self) -> &'static str;

    /// Evaluate one ingested event against its chain snapshot.
    fn evaluate(&self, snapshot: &ChainSnapshot, event: &EventRecord) -> PatternVerdict;
}

/// The standard detector set, configured from [`EngineConfig`].
#[must_use]
pub fn default_detectors(config: &EngineConfig) -> Vec<Box<dyn PatternDetector>> {
    vec![
        Box::new(RapidFireDetector::new(
            config.rapid_fire_window_ms,
            config.rapid_fire_threshold,
        )),
        Box::new(RecursiveDetector::new(
            config.recursive_lookback_depth,
            config.recursive_repeat_threshold,
        )),
        Box::new(FanOutDetector::new(config.fan_out_threshold)),
        Box::new(FixationDetector::new(
            config.pattern_window_ms,
            config.fixation_threshold,
        )),
    ]
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::chain::{ChainSnapshot, RecentEvent};
    use crate::event::EventRecord;

    /// A minimal snapshot for detector unit tests.
    pub fn snapshot(execution_id: &str) -> ChainSnapshot {
        ChainSnapshot {
            execution_id: execution_id.to_string(),
            depth: 0,
            size: 1,
            event_depth: 0,
            parent_child_count: 0,
            ancestor_signatures: Vec::new(),
            recent: Vec::new(),
        }
    }

    /// Recent-event entry derived from a record.
    pub fn recent(event: &EventRecord) -> RecentEvent {
        RecentEvent {
            timestamp_ms: event.timestamp.timestamp_millis(),
            signature: event.signature(),
            task_key: event.task_key(),
        }
    }
}
