//! Per-pattern circuit breakers.
//!
//! One breaker per pattern type, created lazily on the first verdict and
//! living for the process lifetime. State transitions are clock-checked on
//! access rather than driven by a timer thread, so an open breaker moves to
//! half-open the first time it is touched after its cooldown elapses.

use crate::config::EngineConfig;
use crate::event::{PatternType, PatternVerdict, Severity};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Admitting; verdicts accumulate a trigger counter.
    Closed,
    /// Denying all admissions tagged with this pattern.
    Open,
    /// One probe admission allowed; its verdict decides the next state.
    HalfOpen,
}

/// What a recorded verdict did to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// No state change.
    NoOp,
    /// Closed → open.
    Opened,
    /// Open → half-open (cooldown elapsed).
    HalfOpened,
    /// Half-open → closed (clean probe).
    Closed,
    /// Half-open → open again, with a longer cooldown.
    Reopened,
}

/// Read-only view of one breaker, for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Pattern this breaker gates.
    pub pattern_type: PatternType,
    /// Current state.
    pub state: BreakerState,
    /// Matched verdicts recorded since the last full reset.
    pub trigger_count: u32,
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    trigger_count: u32,
    window_start_ms: i64,
    last_triggered_ms: i64,
    cooldown_until_ms: i64,
    cooldown_ms: u64,
}

impl Breaker {
    const fn new(now_ms: i64, base_cooldown_ms: u64) -> Self {
        Self {
            state: BreakerState::Closed,
            trigger_count: 0,
            window_start_ms: now_ms,
            last_triggered_ms: 0,
            cooldown_until_ms: 0,
            cooldown_ms: base_cooldown_ms,
        }
    }

    /// Lazy open → half-open transition once the cooldown has elapsed.
    fn advance(&mut self, now_ms: i64) -> bool {
        if self.state == BreakerState::Open && now_ms >= self.cooldown_until_ms {
            self.state = BreakerState::HalfOpen;
            true
        } else {
            false
        }
    }

    fn open(&mut self, now_ms: i64) {
        self.state = BreakerState::Open;
        self.cooldown_until_ms = now_ms + self.cooldown_ms as i64;
        self.last_triggered_ms = now_ms;
    }
}

/// Registry of per-pattern breakers.
pub struct CircuitBreakerRegistry {
    config: Arc<EngineConfig>,
    breakers: RwLock<HashMap<PatternType, Arc<Mutex<Breaker>>>>,
}

const KNOWN_PATTERNS: [PatternType; 4] = [
    PatternType::RapidFire,
    PatternType::Recursive,
    PatternType::FanOut,
    PatternType::Fixation,
];

impl CircuitBreakerRegistry {
    /// Create an empty registry; breakers appear on first verdict.
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Feed one verdict into its pattern's breaker.
    pub fn record_verdict_at(
        &self,
        verdict: &PatternVerdict,
        now_ms: i64,
    ) -> BreakerTransition {
        let pattern = fold_pattern(verdict.pattern_type);
        let breaker = self.breaker_for(pattern, now_ms);
        let mut breaker = breaker.lock();

        let half_opened = breaker.advance(now_ms);

        let transition = match breaker.state {
            BreakerState::Closed => self.record_closed(&mut breaker, verdict, now_ms),
            BreakerState::Open => {
                if verdict.matched {
                    breaker.last_triggered_ms = now_ms;
                }
                BreakerTransition::NoOp
            }
            BreakerState::HalfOpen => self.record_half_open(&mut breaker, verdict, now_ms),
        };

        match transition {
            BreakerTransition::Opened => warn!(
                pattern = pattern.as_str(),
                trigger_count = breaker.trigger_count,
                cooldown_ms = breaker.cooldown_ms,
                "breaker: opened"
            ),
            BreakerTransition::Reopened => warn!(
                pattern = pattern.as_str(),
                cooldown_ms = breaker.cooldown_ms,
                "breaker: probe failed, reopened with doubled cooldown"
            ),
            BreakerTransition::Closed => {
                info!(pattern = pattern.as_str(), "breaker: clean probe, closed");
            }
            BreakerTransition::NoOp | BreakerTransition::HalfOpened => {}
        }

        if half_opened && transition == BreakerTransition::NoOp {
            BreakerTransition::HalfOpened
        } else {
            transition
        }
    }

    /// Whether this pattern's breaker currently denies admission.
    ///
    /// Touching an open breaker past its cooldown moves it to half-open,
    /// which admits a single probe.
    #[must_use]
    pub fn is_open_at(&self, pattern: PatternType, now_ms: i64) -> bool {
        let pattern = fold_pattern(pattern);
        let breaker = {
            let breakers = self.breakers.read();
            breakers.get(&pattern).cloned()
        };
        let Some(breaker) = breaker else {
            return false;
        };
        let mut breaker = breaker.lock();
        if breaker.advance(now_ms) {
            info!(pattern = pattern.as_str(), "breaker: cooldown elapsed, half-open");
        }
        breaker.state == BreakerState::Open
    }

    /// Patterns whose breakers are currently open.
    #[must_use]
    pub fn open_patterns_at(&self, now_ms: i64) -> Vec<PatternType> {
        KNOWN_PATTERNS
            .into_iter()
            .chain(std::iter::once(PatternType::Other))
            .filter(|pattern| self.is_open_at(*pattern, now_ms))
            .collect()
    }

    /// Current state of every instantiated breaker.
    #[must_use]
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.read();
        let mut statuses: Vec<BreakerStatus> = breakers
            .iter()
            .map(|(pattern, breaker)| {
                let breaker = breaker.lock();
                BreakerStatus {
                    pattern_type: *pattern,
                    state: breaker.state,
                    trigger_count: breaker.trigger_count,
                }
            })
            .collect();
        statuses.sort_by_key(|status| status.pattern_type.as_str());
        statuses
    }

    fn record_closed(
        &self,
        breaker: &mut Breaker,
        verdict: &PatternVerdict,
        now_ms: i64,
    ) -> BreakerTransition {
        if !verdict.matched {
            return BreakerTransition::NoOp;
        }

        if now_ms - breaker.window_start_ms > self.config.breaker_burst_window_ms as i64 {
            breaker.trigger_count = 0;
            breaker.window_start_ms = now_ms;
        }
        breaker.trigger_count += 1;
        breaker.last_triggered_ms = now_ms;

        if verdict.severity == Severity::Critical
            || breaker.trigger_count > self.config.breaker_burst_threshold
        {
            breaker.open(now_ms);
            BreakerTransition::Opened
        } else {
            BreakerTransition::NoOp
        }
    }

    fn record_half_open(
        &self,
        breaker: &mut Breaker,
        verdict: &PatternVerdict,
        now_ms: i64,
    ) -> BreakerTransition {
        if verdict.matched {
            breaker.cooldown_ms = breaker
                .cooldown_ms
                .saturating_mul(2)
                .min(self.config.breaker_max_cooldown_ms);
            breaker.trigger_count += 1;
            breaker.open(now_ms);
            BreakerTransition::Reopened
        } else {
            breaker.state = BreakerState::Closed;
            breaker.trigger_count = 0;
            breaker.window_start_ms = now_ms;
            BreakerTransition::Closed
        }
    }

    fn breaker_for(&self, pattern: PatternType, now_ms: i64) -> Arc<Mutex<Breaker>> {
        {
            let breakers = self.breakers.read();
            if let Some(breaker) = breakers.get(&pattern) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(pattern)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Breaker::new(
                    now_ms,
                    self.config.breaker_cooldown_ms.min(self.config.breaker_max_cooldown_ms),
                )))
            })
            .clone()
    }
}

/// Map verdict types the registry is not configured for onto the generic
/// bucket so the admission path always completes.
fn fold_pattern(pattern: PatternType) -> PatternType {
    if KNOWN_PATTERNS.contains(&pattern) || pattern == PatternType::Other {
        pattern
    } else {
        error!(pattern = pattern.as_str(), "breaker: unknown pattern type, folding to other");
        PatternType::Other
    }
}

#[cfg(test)]
mod tests {
    use super::{BreakerTransition, CircuitBreakerRegistry};
    use crate::config::EngineConfig;
    use crate::event::{PatternType, PatternVerdict, Severity};
    use std::sync::Arc;

    fn registry(cooldown_ms: u64, burst_threshold: u32) -> CircuitBreakerRegistry {
        let config = EngineConfig {
            breaker_cooldown_ms: cooldown_ms,
            breaker_max_cooldown_ms: cooldown_ms * 4,
            breaker_burst_threshold: burst_threshold,
            ..EngineConfig::default()
        };
        CircuitBreakerRegistry::new(Arc::new(config))
    }

    fn verdict(severity: Severity, matched: bool) -> PatternVerdict {
        PatternVerdict {
            pattern_type: PatternType::RapidFire,
            severity,
            matched,
            evidence: String::new(),
        }
    }

    #[test]
    fn critical_verdict_opens_immediately() {
        let registry = registry(1_000, 10);
        let transition = registry.record_verdict_at(&verdict(Severity::Critical, true), 0);
        assert_eq!(transition, BreakerTransition::Opened);
        assert!(registry.is_open_at(PatternType::RapidFire, 10));
    }

    #[test]
    fn warning_burst_opens_after_threshold() {
        let registry = registry(1_000, 2);
        for i in 0..2 {
            let transition = registry.record_verdict_at(&verdict(Severity::Warning, true), i);
            assert_eq!(transition, BreakerTransition::NoOp);
        }
        let transition = registry.record_verdict_at(&verdict(Severity::Warning, true), 3);
        assert_eq!(transition, BreakerTransition::Opened);
    }

    #[test]
    fn clean_verdicts_never_trip() {
        let registry = registry(1_000, 1);
        for i in 0..20 {
            registry.record_verdict_at(&verdict(Severity::Info, false), i);
        }
        assert!(!registry.is_open_at(PatternType::RapidFire, 100));
    }

    #[test]
    fn cooldown_moves_open_to_half_open() {
        let registry = registry(1_000, 10);
        registry.record_verdict_at(&verdict(Severity::Critical, true), 0);
        assert!(registry.is_open_at(PatternType::RapidFire, 500));
        // First touch after the cooldown admits a probe.
        assert!(!registry.is_open_at(PatternType::RapidFire, 1_500));
    }

    #[test]
    fn clean_probe_closes_and_resets() {
        let registry = registry(1_000, 10);
        registry.record_verdict_at(&verdict(Severity::Critical, true), 0);
        let transition = registry.record_verdict_at(&verdict(Severity::Info, false), 1_500);
        assert_eq!(transition, BreakerTransition::Closed);
        assert!(!registry.is_open_at(PatternType::RapidFire, 1_600));
        assert_eq!(registry.statuses()[0].trigger_count, 0);
    }

    #[test]
    fn matched_probe_reopens_with_doubled_cooldown() {
        let registry = registry(1_000, 10);
        registry.record_verdict_at(&verdict(Severity::Critical, true), 0);
        let transition = registry.record_verdict_at(&verdict(Severity::Warning, true), 1_500);
        assert_eq!(transition, BreakerTransition::Reopened);
        // Doubled cooldown: still open at +1.5s, half-open after +2s.
        assert!(registry.is_open_at(PatternType::RapidFire, 2_900));
        assert!(!registry.is_open_at(PatternType::RapidFire, 3_600));
    }

    #[test]
    fn cooldown_doubling_is_capped() {
        let registry = registry(1_000, 10);
        let mut now = 0;
        registry.record_verdict_at(&verdict(Severity::Critical, true), now);
        // Fail four probes; the cap (4x base) keeps the cooldown bounded.
        for _ in 0..4 {
            now += 20_000;
            registry.record_verdict_at(&verdict(Severity::Warning, true), now);
        }
        // Capped cooldown is 4s: still open at +3s, probing again at +5s.
        assert!(registry.is_open_at(PatternType::RapidFire, now + 3_000));
        assert!(!registry.is_open_at(PatternType::RapidFire, now + 5_000));
    }

    #[test]
    fn breakers_are_independent_per_pattern() {
        let registry = registry(1_000, 10);
        registry.record_verdict_at(&verdict(Severity::Critical, true), 0);
        assert!(registry.is_open_at(PatternType::RapidFire, 10));
        assert!(!registry.is_open_at(PatternType::FanOut, 10));
        assert_eq!(registry.open_patterns_at(10), vec![PatternType::RapidFire]);
    }
}
