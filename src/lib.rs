//! Loop prevention engine for reactive agent orchestration.
//!
//! Autonomous agents that react to external events (issue comments, webhooks,
//! task completions) can trigger each other indefinitely: one agent comments,
//! another reacts, the first reacts back. This crate tracks causal event
//! chains across concurrent executions, detects dangerous patterns
//! (rapid-fire repetition, recursive self-triggering, fan-out bursts, task
//! fixation), keeps a running confidence score that behavior is loop-free,
//! and gates admissions behind per-pattern circuit breakers.
//!
//! The engine is purely in-memory and CPU-bound: no blocking I/O, no
//! background threads. Callers run it synchronously inline with their own
//! event dispatch, from as many threads as they like.
//!
//! ```
//! use loopguard::{AdmissionGateway, EngineConfig, EventRecord};
//!
//! let gateway = AdmissionGateway::new(EngineConfig::default());
//! let event = EventRecord::new("exec-1", "comment-created", "agent-x");
//! let decision = gateway.record_event(&event)?;
//! assert!(decision.allow);
//! # Ok::<(), loopguard::EngineError>(())
//! ```

/// Per-pattern circuit breakers.
pub mod breaker;
/// Causal chain tracking and eviction.
pub mod chain;
/// Engine configuration.
pub mod config;
/// Confidence scoring.
pub mod confidence;
/// Pattern detectors.
pub mod detectors;
/// Event model, verdicts, and errors.
pub mod event;
/// The admission gateway.
pub mod gateway;
/// Outbound metrics and notification sinks.
pub mod sink;

pub use breaker::{BreakerState, BreakerStatus, BreakerTransition, CircuitBreakerRegistry};
pub use chain::{ChainSnapshot, ChainTracker, RecentEvent};
pub use config::EngineConfig;
pub use confidence::{ConfidenceEngine, ConfidenceReport, ConfidenceState, ExecutionConfidence};
pub use detectors::{
    default_detectors, FanOutDetector, FixationDetector, PatternDetector, RapidFireDetector,
    RecursiveDetector,
};
pub use event::{EngineError, EventRecord, PatternType, PatternVerdict, Severity};
pub use gateway::{AdmissionDecision, AdmissionGateway, SystemHealth, SystemStatus};
pub use sink::{MetricsSink, NoopMetricsSink, NoopNotificationSink, NotificationSink};
