//! Emitted event contract and subscriber fan-out.
//!
//! The [`AgentEvent`] union is the de facto contract with the transport layer
//! that relays events to remote clients; its serialized `type` tags must stay
//! stable. [`EventBus`] is the explicit observer list the controller fans
//! events out through.

use crate::prompts::PromptRequest;
use crate::types::ContextUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reason a prompt response could not be applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptRejectReason {
    /// The prompt id is unknown: already resolved, discarded, or never issued.
    NotFound,
}

/// Events emitted by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionReady {
        session_id: String,
        vault_id: String,
        supported_commands: Vec<String>,
    },
    ResponseStart {
        session_id: String,
    },
    ResponseChunk {
        session_id: String,
        text: String,
    },
    ResponseEnd {
        session_id: String,
        duration_ms: u64,
        usage: ContextUsage,
    },
    ToolStart {
        session_id: String,
        tool_id: String,
        name: String,
    },
    ToolInput {
        session_id: String,
        tool_id: String,
        input: serde_json::Value,
    },
    ToolEnd {
        session_id: String,
        tool_id: String,
    },
    PromptPending {
        prompt_id: String,
        request: PromptRequest,
    },
    PromptResolved {
        prompt_id: String,
    },
    PromptResponseRejected {
        prompt_id: String,
        reason: PromptRejectReason,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    SessionCleared,
}

/// Monotonic envelope for emitted events.
///
/// `seq` is assigned by the bus at emit time; `ts_unix_ms` is wall-clock
/// capture time used for diagnostics and playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEventEnvelope {
    pub seq: u64,
    pub ts_unix_ms: u64,
    pub event: AgentEvent,
}

impl AgentEventEnvelope {
    /// Build a new envelope around an event.
    pub fn new(seq: u64, event: AgentEvent) -> Self {
        Self {
            seq,
            ts_unix_ms: now_unix_millis(),
            event,
        }
    }
}

/// Subscriber callback invoked for every emitted envelope.
pub type EventCallback = Arc<dyn Fn(&AgentEventEnvelope) + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Explicit observer list with isolated, sequenced delivery.
///
/// Delivery is synchronous and per-subscriber isolated: a panicking callback
/// is caught and logged and the remaining subscribers still receive the
/// event. There is no ordering guarantee across subscribers.
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, EventCallback>>,
    next_subscriber: AtomicU64,
    next_seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a callback; returns the handle used to unsubscribe.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriberId {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, callback);
        SubscriberId(id)
    }

    /// Remove a previously registered callback.
    ///
    /// Returns false when the handle was already removed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id.0)
            .is_some()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Wrap `event` in a sequenced envelope and deliver it to every
    /// subscriber.
    pub fn emit(&self, event: AgentEvent) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let envelope = AgentEventEnvelope::new(seq, event);
        // Snapshot the callback list so delivery runs without the lock held.
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&envelope))).is_err() {
                tracing::error!(seq = envelope.seq, "event subscriber panicked");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock unix time in milliseconds.
fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
