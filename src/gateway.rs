//! Admission gateway.
//!
//! The single public entry point of the engine. Orchestrators call
//! [`AdmissionGateway::record_event`] for every event they are about to act
//! on or have just produced; the gateway updates the chain tracker, runs all
//! detectors, feeds verdicts into the breaker registry and the confidence
//! engine, and returns an allow/deny decision with reasons. The gateway
//! exclusively owns all mutable state; callers only pass immutable records in
//! and read immutable snapshots out.

use crate::breaker::{BreakerStatus, CircuitBreakerRegistry};
use crate::chain::ChainTracker;
use crate::confidence::{ConfidenceEngine, ConfidenceReport};
use crate::config::EngineConfig;
use crate::detectors::{default_detectors, PatternDetector};
use crate::event::{EngineError, EventRecord, PatternType, Severity};
use crate::sink::{MetricsSink, NoopMetricsSink, NoopNotificationSink, NotificationSink};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one `record_event` call.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    /// Whether the orchestrator may act on the event.
    pub allow: bool,
    /// Why admission was denied; empty when allowed.
    pub reasons: Vec<String>,
    /// Execution confidence after this event.
    pub confidence: f64,
    /// Patterns whose breakers are currently open.
    pub open_breakers: Vec<PatternType>,
}

/// Coarse engine health, derived from breakers and global confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    /// No open breakers, confidence above threshold.
    Healthy,
    /// At least one open breaker, or global confidence below threshold.
    Degraded,
    /// Most breakers open; the orchestrator should back off entirely.
    Unhealthy,
}

/// Read-only system snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Derived overall state.
    pub overall: SystemHealth,
    /// Every instantiated breaker.
    pub breakers: Vec<BreakerStatus>,
    /// Live chain count.
    pub active_executions: usize,
    /// Global rolling confidence.
    pub global_confidence: f64,
}

/// Deny reason used when the chain grew past the configured depth.
const REASON_MAX_DEPTH: &str = "max-depth-exceeded";
/// Deny reason used when only the confidence threshold blocked admission.
const REASON_LOW_CONFIDENCE: &str = "low-confidence";

/// The loop prevention engine's front door.
pub struct AdmissionGateway {
    config: Arc<EngineConfig>,
    chains: ChainTracker,
    detectors: Vec<Box<dyn PatternDetector>>,
    confidence: ConfidenceEngine,
    breakers: CircuitBreakerRegistry,
    metrics: Arc<dyn MetricsSink>,
    notifications: Arc<dyn NotificationSink>,
}

impl AdmissionGateway {
    /// Create a gateway with no-op observability sinks.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_sinks(config, Arc::new(NoopMetricsSink), Arc::new(NoopNotificationSink))
    }

    /// Create a gateway wired to external metrics and notification sinks.
    #[must_use]
    pub fn with_sinks(
        config: EngineConfig,
        metrics: Arc<dyn MetricsSink>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            chains: ChainTracker::new(config.clone()),
            detectors: default_detectors(&config),
            confidence: ConfidenceEngine::new(config.clone()),
            breakers: CircuitBreakerRegistry::new(config.clone()),
            config,
            metrics,
            notifications,
        }
    }

    /// Record one event and decide whether the orchestrator may act on it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedEvent`] for events with missing
    /// fields, unknown parent references, or reused ids. Nothing is mutated
    /// in that case; the caller should treat it as an integration bug.
    pub fn record_event(&self, event: &EventRecord) -> Result<AdmissionDecision, EngineError> {
        self.record_event_at(event, Utc::now().timestamp_millis())
    }

    /// [`Self::record_event`] against an explicit clock, for deterministic
    /// replay and tests.
    pub fn record_event_at(
        &self,
        event: &EventRecord,
        now_ms: i64,
    ) -> Result<AdmissionDecision, EngineError> {
        for execution_id in self.chains.maybe_sweep_at(now_ms) {
            self.confidence.evict(&execution_id);
        }

        let snapshot = self.chains.ingest_at(event, now_ms)?;

        let verdicts: Vec<_> = self
            .detectors
            .iter()
            .map(|detector| {
                let verdict = detector.evaluate(&snapshot, event);
                debug!(
                    execution_id = %event.execution_id,
                    detector = detector.name(),
                    matched = verdict.matched,
                    severity = ?verdict.severity,
                    "gateway: verdict"
                );
                verdict
            })
            .collect();

        // Enforcement first, then scoring; both see every verdict.
        for verdict in &verdicts {
            let transition = self.breakers.record_verdict_at(verdict, now_ms);
            self.metrics.record_verdict(&event.execution_id, verdict);
            self.metrics.record_transition(verdict.pattern_type, transition);
            if verdict.matched && verdict.severity == Severity::Critical {
                self.notifications.notify_critical(&event.execution_id, verdict);
            }
        }

        let state = self
            .confidence
            .apply_verdicts_at(&event.execution_id, &verdicts, now_ms);
        self.metrics.update_global_confidence(state.global_confidence);

        let mut reasons: Vec<String> = Vec::new();
        for verdict in verdicts.iter().filter(|verdict| verdict.matched) {
            if self.breakers.is_open_at(verdict.pattern_type, now_ms) {
                let reason = verdict.pattern_type.as_str().to_string();
                if !reasons.contains(&reason) {
                    self.metrics.record_denial(verdict.pattern_type);
                    reasons.push(reason);
                }
            }
        }
        if snapshot.depth > self.config.max_chain_depth {
            reasons.push(REASON_MAX_DEPTH.to_string());
        }
        if reasons.is_empty() && state.execution_confidence < self.config.confidence_threshold {
            reasons.push(REASON_LOW_CONFIDENCE.to_string());
        }

        let allow = reasons.is_empty();
        if !allow {
            warn!(
                execution_id = %event.execution_id,
                reasons = ?reasons,
                confidence = state.execution_confidence,
                "gateway: admission denied"
            );
        }

        Ok(AdmissionDecision {
            allow,
            reasons,
            confidence: state.execution_confidence,
            open_breakers: self.breakers.open_patterns_at(now_ms),
        })
    }

    /// Read-only admission probe for an execution: no open breakers and
    /// confidence at or above the threshold.
    ///
    /// Executions the engine has never scored fall back to the global
    /// aggregate, keeping ambiguous states on the conservative side.
    #[must_use]
    pub fn should_allow(&self, execution_id: &str) -> bool {
        self.should_allow_at(execution_id, Utc::now().timestamp_millis())
    }

    /// [`Self::should_allow`] against an explicit clock.
    #[must_use]
    pub fn should_allow_at(&self, execution_id: &str, now_ms: i64) -> bool {
        if !self.breakers.open_patterns_at(now_ms).is_empty() {
            return false;
        }
        let confidence = self
            .confidence
            .execution_confidence_at(execution_id, now_ms)
            .unwrap_or_else(|| self.confidence.global_confidence_at(now_ms));
        confidence >= self.config.confidence_threshold
    }

    /// Evict idle chains now instead of waiting for an opportunistic sweep.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now().timestamp_millis());
    }

    /// [`Self::sweep`] against an explicit clock.
    pub fn sweep_at(&self, now_ms: i64) {
        for execution_id in self.chains.sweep_at(now_ms) {
            self.confidence.evict(&execution_id);
        }
    }

    /// Breaker states, active chain count, and overall health.
    #[must_use]
    pub fn system_status(&self) -> SystemStatus {
        self.system_status_at(Utc::now().timestamp_millis())
    }

    /// [`Self::system_status`] against an explicit clock.
    #[must_use]
    pub fn system_status_at(&self, now_ms: i64) -> SystemStatus {
        let open_count = self.breakers.open_patterns_at(now_ms).len();
        let global_confidence = self.confidence.global_confidence_at(now_ms);

        let overall = if open_count > 3 {
            SystemHealth::Unhealthy
        } else if open_count >= 1 || global_confidence < self.config.confidence_threshold {
            SystemHealth::Degraded
        } else {
            SystemHealth::Healthy
        };

        SystemStatus {
            overall,
            breakers: self.breakers.statuses(),
            active_executions: self.chains.active_count(),
            global_confidence,
        }
    }

    /// Global and per-execution confidence values plus the violation count.
    #[must_use]
    pub fn confidence_report(&self) -> ConfidenceReport {
        self.confidence.report_at(Utc::now().timestamp_millis())
    }

    /// [`Self::confidence_report`] against an explicit clock.
    #[must_use]
    pub fn confidence_report_at(&self, now_ms: i64) -> ConfidenceReport {
        self.confidence.report_at(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{AdmissionGateway, SystemHealth};
    use crate::config::EngineConfig;
    use crate::event::{EventRecord, PatternType, PatternVerdict};
    use crate::sink::{MetricsSink, NotificationSink};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn at(ms: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().expect("valid timestamp")
    }

    #[test]
    fn clean_root_event_is_allowed() {
        let gateway = AdmissionGateway::new(EngineConfig::default());
        let event = EventRecord::new("exec", "comment-created", "agent-x").with_timestamp(at(0));
        let decision = gateway.record_event_at(&event, 0).expect("decision");
        assert!(decision.allow);
        assert!(decision.reasons.is_empty());
        assert!(decision.open_breakers.is_empty());
        assert!((decision.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_event_is_rejected_without_state_change() {
        let gateway = AdmissionGateway::new(EngineConfig::default());
        let mut event = EventRecord::new("exec", "comment-created", "agent-x");
        event.parent_event_id = Some("ghost".to_string());
        assert!(gateway.record_event_at(&event, 0).is_err());
        assert_eq!(gateway.system_status_at(0).active_executions, 0);
    }

    #[test]
    fn deep_chains_are_denied() {
        let config = EngineConfig {
            max_chain_depth: 2,
            ..EngineConfig::default()
        };
        let gateway = AdmissionGateway::new(config);
        let mut previous = EventRecord::new("exec", "comment-created", "agent-x").with_timestamp(at(0));
        gateway.record_event_at(&previous, 0).expect("root");
        let mut last = None;
        for i in 1..4 {
            // Alternate types/agents so only depth can trip the decision.
            let event = EventRecord::child_of(&previous, &format!("type-{i}"), &format!("agent-{i}"))
                .with_timestamp(at(i64::from(i) * 60_000));
            last = Some(
                gateway
                    .record_event_at(&event, i64::from(i) * 60_000)
                    .expect("decision"),
            );
            previous = event;
        }
        let decision = last.expect("decisions recorded");
        assert!(!decision.allow);
        assert!(decision.reasons.contains(&"max-depth-exceeded".to_string()));
    }

    #[test]
    fn unknown_execution_probe_uses_global_confidence() {
        let gateway = AdmissionGateway::new(EngineConfig::default());
        assert!(gateway.should_allow_at("never-seen", 0));
    }

    #[test]
    fn status_degrades_when_a_breaker_opens() {
        let config = EngineConfig {
            rapid_fire_threshold: 2,
            ..EngineConfig::default()
        };
        let gateway = AdmissionGateway::new(config);
        let root = EventRecord::new("exec", "comment-created", "agent-x").with_timestamp(at(0));
        gateway.record_event_at(&root, 0).expect("root");
        let mut parent = root;
        for i in 1..6 {
            let event = EventRecord::child_of(&parent, "comment-created", "agent-x")
                .with_timestamp(at(i * 100));
            gateway.record_event_at(&event, i * 100).expect("decision");
            parent = event;
        }
        let status = gateway.system_status_at(600);
        assert_eq!(status.overall, SystemHealth::Degraded);
        assert!(!gateway.should_allow_at("exec", 600));
    }

    #[derive(Default)]
    struct CapturingSinks {
        verdicts: Mutex<Vec<PatternVerdict>>,
        criticals: Mutex<Vec<PatternType>>,
    }

    impl MetricsSink for CapturingSinks {
        fn record_verdict(&self, _execution_id: &str, verdict: &PatternVerdict) {
            self.verdicts.lock().push(verdict.clone());
        }
    }

    impl NotificationSink for CapturingSinks {
        fn notify_critical(&self, _execution_id: &str, verdict: &PatternVerdict) {
            self.criticals.lock().push(verdict.pattern_type);
        }
    }

    #[test]
    fn sinks_receive_verdicts_and_critical_notifications() {
        let sinks = Arc::new(CapturingSinks::default());
        let config = EngineConfig {
            rapid_fire_threshold: 1,
            ..EngineConfig::default()
        };
        let gateway =
            AdmissionGateway::with_sinks(config, sinks.clone(), sinks.clone());

        let root = EventRecord::new("exec", "comment-created", "agent-x").with_timestamp(at(0));
        gateway.record_event_at(&root, 0).expect("root");
        let mut parent = root;
        for i in 1..4 {
            let event = EventRecord::child_of(&parent, "comment-created", "agent-x")
                .with_timestamp(at(i * 100));
            gateway.record_event_at(&event, i * 100).expect("decision");
            parent = event;
        }

        // Every ingest records one verdict per detector.
        assert_eq!(sinks.verdicts.lock().len(), 16);
        // The third same-signature event exceeds 2x the threshold.
        assert!(sinks.criticals.lock().contains(&PatternType::RapidFire));
    }
}
