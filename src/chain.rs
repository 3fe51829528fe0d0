//! Causal chain tracking.
//!
//! One [`Chain`] per execution id, holding the tree of ingested events.
//! Depth is tracked incrementally (`parent depth + 1`), so ingest is O(1)
//! amortized apart from the bounded ancestor walk used to build snapshots.
//! Idle chains are evicted lazily during ingest or via an explicit sweep.

use crate::config::EngineConfig;
use crate::event::{EngineError, EventRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Compact per-chain record of one recently ingested event.
#[derive(Debug, Clone)]
pub struct RecentEvent {
    /// Event timestamp in unix milliseconds.
    pub timestamp_ms: i64,
    /// (`event_type`, `source_agent_id`) signature hash.
    pub signature: String,
    /// (task type, `source_agent_id`) hash for fixation counting.
    pub task_key: String,
}

/// Immutable view of a chain right after an event was appended.
///
/// This is the only chain state detectors ever see.
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    /// Owning execution id.
    pub execution_id: String,
    /// Max root-to-leaf path length across the whole chain.
    pub depth: usize,
    /// Total events in the chain.
    pub size: usize,
    /// Depth of the event that was just appended (root = 0).
    pub event_depth: usize,
    /// Direct children of the appended event's parent, counting it.
    pub parent_child_count: usize,
    /// Ancestor signatures of the appended event, nearest first.
    pub ancestor_signatures: Vec<String>,
    /// Bounded window of the chain's most recent events, oldest first.
    pub recent: Vec<RecentEvent>,
}

#[derive(Debug)]
struct ChainEvent {
    parent: Option<String>,
    signature: String,
    depth: usize,
    child_count: usize,
}

#[derive(Debug)]
struct Chain {
    events: HashMap<String, ChainEvent>,
    recent: VecDeque<RecentEvent>,
    depth: usize,
    size: usize,
    last_activity_ms: i64,
}

impl Chain {
    fn new(now_ms: i64) -> Self {
        Self {
            events: HashMap::new(),
            recent: VecDeque::new(),
            depth: 0,
            size: 0,
            last_activity_ms: now_ms,
        }
    }

    /// Append an event, returning its snapshot. Fails without mutating the
    /// chain when the parent reference is unknown or the id is reused.
    fn append(
        &mut self,
        event: &EventRecord,
        now_ms: i64,
        recent_limit: usize,
        ancestor_bound: usize,
    ) -> Result<ChainSnapshot, EngineError> {
        if self.events.contains_key(&event.event_id) {
            return Err(EngineError::MalformedEvent {
                event_id: event.event_id.clone(),
                reason: "event id already recorded in this execution".to_string(),
            });
        }

        let depth = match &event.parent_event_id {
            Some(parent_id) => match self.events.get(parent_id) {
                Some(parent) => parent.depth + 1,
                None => {
                    return Err(EngineError::MalformedEvent {
                        event_id: event.event_id.clone(),
                        reason: format!("unknown parent event: {parent_id}"),
                    });
                }
            },
            None => 0,
        };

        let parent_child_count = match &event.parent_event_id {
            Some(parent_id) => {
                if let Some(parent) = self.events.get_mut(parent_id) {
                    parent.child_count += 1;
                    parent.child_count
                } else {
                    0
                }
            }
            None => 0,
        };

        self.events.insert(
            event.event_id.clone(),
            ChainEvent {
                parent: event.parent_event_id.clone(),
                signature: event.signature(),
                depth,
                child_count: 0,
            },
        );
        self.size += 1;
        self.depth = self.depth.max(depth);
        self.last_activity_ms = now_ms;

        self.recent.push_back(RecentEvent {
            timestamp_ms: event.timestamp.timestamp_millis(),
            signature: event.signature(),
            task_key: event.task_key(),
        });
        while self.recent.len() > recent_limit {
            self.recent.pop_front();
        }

        Ok(ChainSnapshot {
            execution_id: event.execution_id.clone(),
            depth: self.depth,
            size: self.size,
            event_depth: depth,
            parent_child_count,
            ancestor_signatures: self.ancestors_of(event.parent_event_id.as_deref(), ancestor_bound),
            recent: self.recent.iter().cloned().collect(),
        })
    }

    fn ancestors_of(&self, start: Option<&str>, bound: usize) -> Vec<String> {
        let mut signatures = Vec::new();
        let mut current = start;
        while let Some(id) = current {
            let Some(node) = self.events.get(id) else {
                break;
            };
            signatures.push(node.signature.clone());
            // Bound mirrors the max chain depth so a corrupt link can never
            // turn this walk into an infinite loop.
            if signatures.len() >= bound {
                break;
            }
            current = node.parent.as_deref();
        }
        signatures
    }
}

/// Tracks all active chains with one mutex per execution id.
pub struct ChainTracker {
    config: Arc<EngineConfig>,
    chains: RwLock<HashMap<String, Arc<Mutex<Chain>>>>,
    last_sweep_ms: Mutex<i64>,
}

impl ChainTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            chains: RwLock::new(HashMap::new()),
            last_sweep_ms: Mutex::new(0),
        }
    }

    /// Append an event to its execution's chain.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedEvent`] for missing fields, unknown
    /// parent references, or reused event ids; state is left untouched.
    pub fn ingest_at(
        &self,
        event: &EventRecord,
        now_ms: i64,
    ) -> Result<ChainSnapshot, EngineError> {
        event.validate()?;

        let existing = {
            let chains = self.chains.read();
            chains.get(&event.execution_id).cloned()
        };

        if let Some(chain) = existing {
            return self.append_locked(&chain, event, now_ms);
        }

        // New execution. A parent reference on a chain root is malformed,
        // and rejecting it here avoids inserting an empty chain.
        if let Some(parent_id) = &event.parent_event_id {
            return Err(EngineError::MalformedEvent {
                event_id: event.event_id.clone(),
                reason: format!("unknown parent event: {parent_id}"),
            });
        }

        let chain = {
            let mut chains = self.chains.write();
            chains
                .entry(event.execution_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Chain::new(now_ms))))
                .clone()
        };
        debug!(execution_id = %event.execution_id, "chain_tracker: new chain");
        self.append_locked(&chain, event, now_ms)
    }

    fn append_locked(
        &self,
        chain: &Arc<Mutex<Chain>>,
        event: &EventRecord,
        now_ms: i64,
    ) -> Result<ChainSnapshot, EngineError> {
        let mut guard = chain.lock();
        guard.append(
            event,
            now_ms,
            self.config.recent_window_limit,
            self.config.max_chain_depth + 1,
        )
    }

    /// Evict chains idle past the TTL, returning their execution ids.
    pub fn sweep_at(&self, now_ms: i64) -> Vec<String> {
        let ttl = self.config.chain_idle_ttl_ms as i64;
        let mut evicted = Vec::new();

        {
            let mut chains = self.chains.write();
            chains.retain(|execution_id, chain| {
                let idle = now_ms - chain.lock().last_activity_ms;
                if idle > ttl {
                    evicted.push(execution_id.clone());
                    false
                } else {
                    true
                }
            });
        }

        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "chain_tracker: evicted idle chains");
        }
        evicted
    }

    /// Run a sweep only if the sweep interval has elapsed.
    pub fn maybe_sweep_at(&self, now_ms: i64) -> Vec<String> {
        {
            let mut last = self.last_sweep_ms.lock();
            if now_ms - *last < self.config.sweep_interval_ms as i64 {
                return Vec::new();
            }
            *last = now_ms;
        }
        self.sweep_at(now_ms)
    }

    /// Number of live chains.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.chains.read().len()
    }
}
