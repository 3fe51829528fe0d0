//! Event model, pattern verdicts, and engine errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Pattern categories tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Repeated same-signature events within a short window.
    RapidFire,
    /// An agent reacting to its own earlier action within the same chain.
    Recursive,
    /// One parent event spawning an excessive number of children.
    FanOut,
    /// Prolonged focus on a single task by a single agent.
    Fixation,
    /// Fallback bucket for verdicts the registry was not configured for.
    Other,
}

impl PatternType {
    /// Stable string form used in decision reasons and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RapidFire => "rapid-fire",
            Self::Recursive => "recursive",
            Self::FanOut => "fan-out",
            Self::Fixation => "fixation",
            Self::Other => "other",
        }
    }
}

/// Verdict severity. Ordering matters: `Critical` > `Warning` > `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No concern; recorded for observability only.
    Info,
    /// Threshold exceeded.
    Warning,
    /// Threshold exceeded by a wide margin; trips breakers immediately.
    Critical,
}

/// Outcome of one detector invocation against one ingested event.
#[derive(Debug, Clone, Serialize)]
pub struct PatternVerdict {
    /// Which pattern the detector looks for.
    pub pattern_type: PatternType,
    /// Severity of the finding.
    pub severity: Severity,
    /// Whether the pattern actually matched.
    pub matched: bool,
    /// Free-form human-readable evidence.
    pub evidence: String,
}

impl PatternVerdict {
    /// A non-matching verdict for a pattern type.
    #[must_use]
    pub fn clean(pattern_type: PatternType) -> Self {
        Self {
            pattern_type,
            severity: Severity::Info,
            matched: false,
            evidence: String::new(),
        }
    }
}

/// Immutable description of one causal event.
///
/// Callers construct these and hand them to
/// [`AdmissionGateway::record_event`](crate::gateway::AdmissionGateway::record_event);
/// the engine never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event identifier.
    pub event_id: String,
    /// Groups all events of one logical task.
    pub execution_id: String,
    /// Parent event within the same execution, if any.
    pub parent_event_id: Option<String>,
    /// Enumerated tag, e.g. `comment-created`, `workflow-triggered`.
    pub event_type: String,
    /// The agent that produced the event.
    pub source_agent_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Opaque caller-supplied metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EventRecord {
    /// Create a root event (no parent) with a generated v4 id.
    #[must_use]
    pub fn new(execution_id: &str, event_type: &str, source_agent_id: &str) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            parent_event_id: None,
            event_type: event_type.to_string(),
            source_agent_id: source_agent_id.to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a child of an existing event, inheriting its execution id.
    #[must_use]
    pub fn child_of(parent: &Self, event_type: &str, source_agent_id: &str) -> Self {
        let mut event = Self::new(&parent.execution_id, event_type, source_agent_id);
        event.parent_event_id = Some(parent.event_id.clone());
        event
    }

    /// Override the timestamp, e.g. when replaying externally timestamped events.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Hash of the (`event_type`, `source_agent_id`) pair.
    ///
    /// Rapid-fire and recursive detection compare events by this signature.
    #[must_use]
    pub fn signature(&self) -> String {
        hash_pair(&self.event_type, &self.source_agent_id)
    }

    /// Hash of the (task type, `source_agent_id`) pair used by fixation
    /// detection. Task type comes from the `task_type` metadata entry when
    /// present, otherwise the event type.
    #[must_use]
    pub fn task_key(&self) -> String {
        let task_type = self
            .metadata
            .get("task_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&self.event_type);
        hash_pair(task_type, &self.source_agent_id)
    }

    /// Check required fields are present.
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        let missing = [
            ("event_id", &self.event_id),
            ("execution_id", &self.execution_id),
            ("event_type", &self.event_type),
            ("source_agent_id", &self.source_agent_id),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        match missing {
            Some((field, _)) => Err(EngineError::MalformedEvent {
                event_id: self.event_id.clone(),
                reason: format!("missing required field: {field}"),
            }),
            None => Ok(()),
        }
    }
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(b":");
    hasher.update(right.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Errors produced on the admission path.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The event is missing required fields, references an unknown parent,
    /// or reuses an already-recorded event id. No state was mutated.
    #[error("malformed event {event_id}: {reason}")]
    MalformedEvent {
        /// Id of the rejected event.
        event_id: String,
        /// What made it malformed.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::{EventRecord, PatternType, Severity};

    #[test]
    fn signature_depends_on_type_and_agent() {
        let a = EventRecord::new("e1", "comment-created", "agent-x");
        let b = EventRecord::new("e1", "comment-created", "agent-x");
        let c = EventRecord::new("e1", "comment-created", "agent-y");
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn task_key_prefers_metadata() {
        let plain = EventRecord::new("e1", "comment-created", "agent-x");
        let tagged = EventRecord::new("e1", "comment-created", "agent-x")
            .with_metadata("task_type", serde_json::json!("triage"));
        assert_ne!(plain.task_key(), tagged.task_key());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let mut event = EventRecord::new("e1", "comment-created", "agent-x");
        event.event_type = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn pattern_labels_are_stable() {
        assert_eq!(PatternType::RapidFire.as_str(), "rapid-fire");
        assert_eq!(PatternType::FanOut.as_str(), "fan-out");
    }
}
