//! Confidence scoring.
//!
//! Keeps one score per execution plus a global rolling aggregate, all in
//! [0, 1]. Matched verdicts subtract severity-weighted penalties; absent new
//! violations the scores recover toward 1.0 at a fixed rate, modeling
//! transient versus persistent risk. Detection stays decoupled from
//! enforcement: a threshold breach here is advisory, blocking belongs to the
//! circuit breakers.

use crate::config::EngineConfig;
use crate::event::{PatternVerdict, Severity};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const INFO_PENALTY: f64 = 0.0005;
const WARNING_PENALTY: f64 = 0.05;
const CRITICAL_PENALTY: f64 = 0.25;

/// Result of applying one batch of verdicts.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceState {
    /// Score of the execution the verdicts belong to.
    pub execution_confidence: f64,
    /// Global rolling aggregate across active executions.
    pub global_confidence: f64,
    /// Whether the execution score dropped below the configured threshold.
    pub threshold_breached: bool,
}

/// One execution's current score, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionConfidence {
    /// Execution id.
    pub execution_id: String,
    /// Current (decay-adjusted) score.
    pub confidence: f64,
}

/// Read-only confidence snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    /// Global rolling aggregate.
    pub global_confidence: f64,
    /// Per-execution scores.
    pub per_execution: Vec<ExecutionConfidence>,
    /// Total threshold breaches since startup.
    pub violation_count: u64,
}

#[derive(Debug)]
struct Score {
    value: f64,
    updated_at_ms: i64,
}

impl Score {
    const fn new(now_ms: i64) -> Self {
        Self {
            value: 1.0,
            updated_at_ms: now_ms,
        }
    }

    /// Value after decay-recovery toward 1.0, never overshooting.
    fn decayed(&self, now_ms: i64, recovery_per_sec: f64) -> f64 {
        let elapsed_secs = (now_ms - self.updated_at_ms).max(0) as f64 / 1000.0;
        (self.value + elapsed_secs * recovery_per_sec).min(1.0)
    }
}

/// Aggregates detector verdicts into running confidence scores.
pub struct ConfidenceEngine {
    config: Arc<EngineConfig>,
    executions: RwLock<HashMap<String, Arc<Mutex<Score>>>>,
    global: Mutex<Score>,
    violations: AtomicU64,
}

impl ConfidenceEngine {
    /// Create an engine with every score at 1.0.
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            executions: RwLock::new(HashMap::new()),
            global: Mutex::new(Score::new(0)),
            violations: AtomicU64::new(0),
        }
    }

    /// Apply one ingest's verdicts to the execution and global scores.
    pub fn apply_verdicts_at(
        &self,
        execution_id: &str,
        verdicts: &[PatternVerdict],
        now_ms: i64,
    ) -> ConfidenceState {
        let penalty: f64 = verdicts
            .iter()
            .filter(|verdict| verdict.matched)
            .map(|verdict| match verdict.severity {
                Severity::Info => INFO_PENALTY,
                Severity::Warning => WARNING_PENALTY,
                Severity::Critical => CRITICAL_PENALTY,
            })
            .sum();

        let score = self.score_for(execution_id, now_ms);
        let execution_confidence = {
            let mut score = score.lock();
            let value = (score.decayed(now_ms, self.config.confidence_recovery_per_sec)
                - penalty)
                .clamp(0.0, 1.0);
            score.value = value;
            score.updated_at_ms = now_ms;
            value
        };

        // The global aggregate is a separate lightweight accumulator,
        // updated after the per-execution score so unrelated executions
        // never contend on it for long.
        let global_confidence = {
            let mut global = self.global.lock();
            let alpha = self.config.global_ewma_alpha;
            let decayed = global.decayed(now_ms, self.config.confidence_recovery_per_sec);
            let value = (decayed * (1.0 - alpha) + execution_confidence * alpha).clamp(0.0, 1.0);
            global.value = value;
            global.updated_at_ms = now_ms;
            value
        };

        let threshold_breached = execution_confidence < self.config.confidence_threshold;
        if threshold_breached {
            self.violations.fetch_add(1, Ordering::Relaxed);
            warn!(
                execution_id,
                confidence = execution_confidence,
                threshold = self.config.confidence_threshold,
                "confidence: threshold breached"
            );
        }

        ConfidenceState {
            execution_confidence,
            global_confidence,
            threshold_breached,
        }
    }

    /// Drop a (evicted) execution's score so stale data stops skewing reports.
    pub fn evict(&self, execution_id: &str) {
        let removed = self.executions.write().remove(execution_id).is_some();
        if removed {
            debug!(execution_id, "confidence: evicted execution score");
        }
    }

    /// Current (decay-adjusted) score of one execution, if tracked.
    #[must_use]
    pub fn execution_confidence_at(&self, execution_id: &str, now_ms: i64) -> Option<f64> {
        let score = self.executions.read().get(execution_id).cloned()?;
        let value = score
            .lock()
            .decayed(now_ms, self.config.confidence_recovery_per_sec);
        Some(value)
    }

    /// Current (decay-adjusted) global aggregate.
    #[must_use]
    pub fn global_confidence_at(&self, now_ms: i64) -> f64 {
        self.global
            .lock()
            .decayed(now_ms, self.config.confidence_recovery_per_sec)
    }

    /// Threshold breaches since startup.
    #[must_use]
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Immutable snapshot of all scores.
    #[must_use]
    pub fn report_at(&self, now_ms: i64) -> ConfidenceReport {
        let per_execution = {
            let executions = self.executions.read();
            let mut entries: Vec<ExecutionConfidence> = executions
                .iter()
                .map(|(execution_id, score)| ExecutionConfidence {
                    execution_id: execution_id.clone(),
                    confidence: score
                        .lock()
                        .decayed(now_ms, self.config.confidence_recovery_per_sec),
                })
                .collect();
            entries.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
            entries
        };

        ConfidenceReport {
            global_confidence: self.global_confidence_at(now_ms),
            per_execution,
            violation_count: self.violation_count(),
        }
    }

    fn score_for(&self, execution_id: &str, now_ms: i64) -> Arc<Mutex<Score>> {
        {
            let executions = self.executions.read();
            if let Some(score) = executions.get(execution_id) {
                return score.clone();
            }
        }
        let mut executions = self.executions.write();
        executions
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Score::new(now_ms))))
            .clone()
    }
}
