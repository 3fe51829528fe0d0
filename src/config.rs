//! Engine configuration.
//!
//! Loaded once at startup and immutable thereafter. Values come from
//! environment variables and optional layered config files, falling back to
//! defaults when neither is present.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for every engine component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum confidence required for admission.
    #[serde(rename = "guard_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Maximum allowed causal chain depth.
    #[serde(rename = "guard_max_chain_depth")]
    pub max_chain_depth: usize,
    /// Idle TTL after which a chain becomes evictable.
    #[serde(rename = "guard_chain_idle_ttl_ms")]
    pub chain_idle_ttl_ms: u64,
    /// Minimum gap between opportunistic eviction sweeps.
    #[serde(rename = "guard_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Cap on the recent-event window kept per chain.
    #[serde(rename = "guard_recent_window_limit")]
    pub recent_window_limit: usize,

    /// Sliding window for rapid-fire counting.
    #[serde(rename = "guard_rapid_fire_window_ms")]
    pub rapid_fire_window_ms: u64,
    /// Same-signature events tolerated inside the rapid-fire window.
    #[serde(rename = "guard_rapid_fire_threshold")]
    pub rapid_fire_threshold: usize,

    /// How many ancestors the recursive detector inspects.
    #[serde(rename = "guard_recursive_lookback_depth")]
    pub recursive_lookback_depth: usize,
    /// Ancestor repeats that escalate a recursive match to critical.
    #[serde(rename = "guard_recursive_repeat_threshold")]
    pub recursive_repeat_threshold: usize,

    /// Direct children tolerated under a single parent event.
    #[serde(rename = "guard_fan_out_threshold")]
    pub fan_out_threshold: usize,

    /// Same-task events tolerated inside the pattern window.
    #[serde(rename = "guard_fixation_threshold")]
    pub fixation_threshold: usize,
    /// Long window for fixation counting.
    #[serde(rename = "guard_pattern_window_ms")]
    pub pattern_window_ms: u64,

    /// Matched verdicts inside the burst window that open a breaker.
    #[serde(rename = "guard_breaker_burst_threshold")]
    pub breaker_burst_threshold: u32,
    /// Rolling window for breaker trigger counting.
    #[serde(rename = "guard_breaker_burst_window_ms")]
    pub breaker_burst_window_ms: u64,
    /// Base cooldown before an open breaker probes again.
    #[serde(rename = "guard_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
    /// Upper bound for the doubled cooldown.
    #[serde(rename = "guard_breaker_max_cooldown_ms")]
    pub breaker_max_cooldown_ms: u64,

    /// Confidence recovered per second absent new violations.
    #[serde(rename = "guard_confidence_recovery_per_sec")]
    pub confidence_recovery_per_sec: f64,
    /// Weight of the newest execution score in the global rolling average.
    #[serde(rename = "guard_global_ewma_alpha")]
    pub global_ewma_alpha: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.999,
            max_chain_depth: 10,
            chain_idle_ttl_ms: 3_600_000,
            sweep_interval_ms: 60_000,
            recent_window_limit: 256,
            rapid_fire_window_ms: 10_000,
            rapid_fire_threshold: 20,
            recursive_lookback_depth: 5,
            recursive_repeat_threshold: 3,
            fan_out_threshold: 10,
            fixation_threshold: 5,
            pattern_window_ms: 3_600_000,
            breaker_burst_threshold: 3,
            breaker_burst_window_ms: 60_000,
            breaker_cooldown_ms: 300_000,
            breaker_max_cooldown_ms: 3_600_000,
            confidence_recovery_per_sec: 0.01,
            global_ewma_alpha: 0.2,
        }
    }
}

impl EngineConfig {
    /// Load engine settings from config files and environment variables.
    ///
    /// Priority: env vars → config files → defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let builder = Self::with_defaults(Config::builder()).map(|b| {
            b.add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
                .add_source(File::with_name("config/local").required(false))
                .add_source(Environment::default().ignore_empty(true))
        });

        let config = match builder {
            Ok(builder) => builder.build(),
            Err(err) => return Self::warn_and_default(err),
        };

        match config.and_then(Config::try_deserialize) {
            Ok(settings) => settings,
            Err(err) => Self::warn_and_default(err),
        }
    }

    /// Cooldown as a [`Duration`].
    #[must_use]
    pub const fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let d = Self::default();
        builder
            .set_default("guard_confidence_threshold", d.confidence_threshold)?
            .set_default("guard_max_chain_depth", d.max_chain_depth as u64)?
            .set_default("guard_chain_idle_ttl_ms", d.chain_idle_ttl_ms)?
            .set_default("guard_sweep_interval_ms", d.sweep_interval_ms)?
            .set_default("guard_recent_window_limit", d.recent_window_limit as u64)?
            .set_default("guard_rapid_fire_window_ms", d.rapid_fire_window_ms)?
            .set_default("guard_rapid_fire_threshold", d.rapid_fire_threshold as u64)?
            .set_default(
                "guard_recursive_lookback_depth",
                d.recursive_lookback_depth as u64,
            )?
            .set_default(
                "guard_recursive_repeat_threshold",
                d.recursive_repeat_threshold as u64,
            )?
            .set_default("guard_fan_out_threshold", d.fan_out_threshold as u64)?
            .set_default("guard_fixation_threshold", d.fixation_threshold as u64)?
            .set_default("guard_pattern_window_ms", d.pattern_window_ms)?
            .set_default(
                "guard_breaker_burst_threshold",
                u64::from(d.breaker_burst_threshold),
            )?
            .set_default("guard_breaker_burst_window_ms", d.breaker_burst_window_ms)?
            .set_default("guard_breaker_cooldown_ms", d.breaker_cooldown_ms)?
            .set_default("guard_breaker_max_cooldown_ms", d.breaker_max_cooldown_ms)?
            .set_default(
                "guard_confidence_recovery_per_sec",
                d.confidence_recovery_per_sec,
            )?
            .set_default("guard_global_ewma_alpha", d.global_ewma_alpha)
    }

    fn warn_and_default(err: ConfigError) -> Self {
        tracing::warn!(error = %err, "Failed to load engine config, using defaults");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.confidence_threshold > 0.99);
        assert!(config.breaker_max_cooldown_ms >= config.breaker_cooldown_ms);
        assert!(config.recent_window_limit > config.rapid_fire_threshold);
    }

    #[test]
    fn from_env_falls_back_to_defaults() {
        let config = EngineConfig::from_env();
        assert_eq!(config.max_chain_depth, EngineConfig::default().max_chain_depth);
    }
}
