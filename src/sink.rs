//! Outbound observability collaborators.
//!
//! Both sinks are fire-and-forget: the trait methods are infallible and the
//! gateway never lets an implementation affect an admission decision.
//! Implementations own their delivery (and log their own failures).

use crate::breaker::BreakerTransition;
use crate::event::{PatternType, PatternVerdict};

/// Counter/gauge sink keyed by pattern type and severity.
pub trait MetricsSink: Send + Sync {
    /// A detector produced a verdict.
    fn record_verdict(&self, execution_id: &str, verdict: &PatternVerdict) {
        let _ = (execution_id, verdict);
    }

    /// A breaker changed (or explicitly kept) its state.
    fn record_transition(&self, pattern: PatternType, transition: BreakerTransition) {
        let _ = (pattern, transition);
    }

    /// An admission was denied because of this pattern.
    fn record_denial(&self, pattern: PatternType) {
        let _ = pattern;
    }

    /// New global confidence value.
    fn update_global_confidence(&self, confidence: f64) {
        let _ = confidence;
    }
}

/// Receives critical verdicts for out-of-band alerting.
pub trait NotificationSink: Send + Sync {
    /// A critical pattern matched.
    fn notify_critical(&self, execution_id: &str, verdict: &PatternVerdict) {
        let _ = (execution_id, verdict);
    }
}

/// Metrics sink that drops everything.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

/// Notification sink that drops everything.
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {}
