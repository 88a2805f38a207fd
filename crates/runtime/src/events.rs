use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Event types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationKind {
    Action,
    Tool,
}

/// Lifecycle phase of one invocation. For every invocation id the emitted
/// sequence is REQUESTED, STARTED, then exactly one terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvocationPhase {
    Requested,
    Started,
    Succeeded,
    Failed,
}

/// One structured lifecycle record delivered to subscribed listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub kind: InvocationKind,
    pub phase: InvocationPhase,
    /// The action id being invoked.
    pub id: String,
    /// Opaque per-call identifier shared by all four phases of a call.
    pub invocation_id: String,
    pub parent_invocation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Set on terminal phases only.
    pub duration_ms: Option<u64>,
    pub attributes: BTreeMap<String, String>,
}

impl InvocationEvent {
    pub fn new(
        kind: InvocationKind,
        phase: InvocationPhase,
        id: impl Into<String>,
        invocation_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            phase,
            id: id.into(),
            invocation_id: invocation_id.into(),
            parent_invocation_id: None,
            timestamp,
            duration_ms: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_invocation_id = Some(parent.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ── Event clock ──────────────────────────────────────────────────────────────

/// Hands out timestamps that never decrease, even if the wall clock steps
/// backwards mid-invocation.
#[derive(Debug, Default)]
pub struct EventClock {
    last: Option<DateTime<Utc>>,
}

impl EventClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last {
            if now < last {
                now = last;
            }
        }
        self.last = Some(now);
        now
    }
}

// ── Emitter ──────────────────────────────────────────────────────────────────

/// Handle returned by [`InvocationEmitter::subscribe`]; pass it back to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub trait InvocationListener: Send + Sync {
    fn on_event(&self, event: &InvocationEvent);
}

type ListenerList = Arc<Vec<(u64, Arc<dyn InvocationListener>)>>;

/// Thread-safe fan-out of invocation events.
///
/// Subscription mutates a copy-on-write snapshot, so emission never holds a
/// lock while listeners run. A panicking listener is logged and skipped; it
/// aborts neither delivery to other listeners nor the originating execution.
pub struct InvocationEmitter {
    listeners: RwLock<ListenerList>,
    next_id: AtomicU64,
}

impl Default for InvocationEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationEmitter {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(vec![])),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn InvocationListener>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = guard.as_ref().clone();
        next.push((id, listener));
        *guard = Arc::new(next);
        SubscriptionId(id)
    }

    /// Returns true when the subscription was still present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        let next: Vec<_> = guard
            .as_ref()
            .iter()
            .filter(|(existing, _)| *existing != id.0)
            .cloned()
            .collect();
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    pub fn listener_count(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn emit(&self, event: &InvocationEvent) {
        let snapshot: ListenerList = match self.listeners.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        for (_, listener) in snapshot.iter() {
            let delivery = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if delivery.is_err() {
                warn!(
                    action = %event.id,
                    invocation = %event.invocation_id,
                    "invocation listener panicked; continuing delivery"
                );
            }
        }
    }
}

// ── Built-in listeners ───────────────────────────────────────────────────────

/// Forwards every event to `tracing`, for zero-setup observability.
#[derive(Debug, Default)]
pub struct LogListener;

impl InvocationListener for LogListener {
    fn on_event(&self, event: &InvocationEvent) {
        info!(
            kind = ?event.kind,
            phase = ?event.phase,
            action = %event.id,
            invocation = %event.invocation_id,
            duration_ms = event.duration_ms,
            "invocation event"
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
