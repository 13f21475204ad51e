//! Event streamer: folds the runtime's low-level cursor into domain events.
//!
//! The streamer owns one turn's cursor. It forwards chunk/tool events through
//! the bus while accumulating a running [`StreamSnapshot`], and it exposes
//! that aggregate two ways: a completion future with the final result, and a
//! synchronous live accessor. The split is what lets the controller persist
//! partial output after an abort without waiting for normal completion.

use crate::events::{AgentEvent, EventBus};
use crate::runtime::RuntimeEvent;
use crate::types::{ContextUsage, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Best-effort accumulated aggregate of one streaming turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamSnapshot {
    /// Assistant text accumulated so far.
    pub content: String,
    /// Tool invocations observed so far, in start order.
    pub tool_invocations: Vec<ToolInvocation>,
    /// Running usage totals, seeded from the session's prior turns.
    pub usage: ContextUsage,
}

impl StreamSnapshot {
    /// Empty snapshot carrying existing usage totals.
    pub fn with_usage(usage: ContextUsage) -> Self {
        Self {
            usage,
            ..Self::default()
        }
    }

    /// True when the turn produced anything worth persisting.
    pub fn has_output(&self) -> bool {
        !self.content.trim().is_empty() || !self.tool_invocations.is_empty()
    }
}

/// Terminal state of one streaming turn.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The cursor ended normally.
    Completed(StreamSnapshot),
    /// The cancellation signal fired; the snapshot holds what was streamed.
    Cancelled(StreamSnapshot),
    /// The runtime reported a mid-turn fault.
    Failed {
        message: String,
        partial: StreamSnapshot,
    },
}

impl StreamOutcome {
    /// The accumulated snapshot, regardless of how the turn ended.
    pub fn snapshot(&self) -> &StreamSnapshot {
        match self {
            Self::Completed(snapshot) | Self::Cancelled(snapshot) => snapshot,
            Self::Failed { partial, .. } => partial,
        }
    }
}

/// Handle over one spawned streaming turn.
pub struct StreamerHandle {
    live: Arc<Mutex<StreamSnapshot>>,
    task: JoinHandle<StreamOutcome>,
}

impl StreamerHandle {
    /// Instantaneous copy of the accumulated aggregate.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait for the turn to finish and return its outcome.
    pub async fn wait(self) -> StreamOutcome {
        let live = Arc::clone(&self.live);
        match self.task.await {
            Ok(outcome) => outcome,
            // A panicked stream task still salvages the live aggregate.
            Err(err) => StreamOutcome::Failed {
                message: format!("stream task failed: {err}"),
                partial: live.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            },
        }
    }
}

/// Spawn the streaming task for one turn.
///
/// `live` must be pre-seeded with the session's usage totals; the controller
/// keeps a clone as its mid-turn snapshot accessor. `cancel` stops the stream
/// between events: nothing further is forwarded and the accumulated snapshot
/// is returned rather than an error.
pub fn spawn_stream(
    session_id: String,
    mut events: mpsc::Receiver<RuntimeEvent>,
    live: Arc<Mutex<StreamSnapshot>>,
    bus: Arc<EventBus>,
    mut cancel: watch::Receiver<bool>,
) -> StreamerHandle {
    let accessor = Arc::clone(&live);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                // Cancellation wins over a ready event so nothing is
                // forwarded for a turn that is no longer current.
                biased;
                changed = cancel.changed() => {
                    let _ = changed;
                    tracing::debug!(%session_id, "stream cancelled");
                    return StreamOutcome::Cancelled(snapshot_of(&live));
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return StreamOutcome::Completed(snapshot_of(&live));
                    };
                    if *cancel.borrow() {
                        return StreamOutcome::Cancelled(snapshot_of(&live));
                    }
                    if let Some(message) = apply_event(&session_id, event, &live, &bus) {
                        return StreamOutcome::Failed {
                            message,
                            partial: snapshot_of(&live),
                        };
                    }
                }
            }
        }
    });
    StreamerHandle {
        live: accessor,
        task,
    }
}

fn snapshot_of(live: &Arc<Mutex<StreamSnapshot>>) -> StreamSnapshot {
    live.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Fold one cursor event into the aggregate and forward its domain event.
///
/// Returns `Some(message)` when the event reported a mid-turn fault.
fn apply_event(
    session_id: &str,
    event: RuntimeEvent,
    live: &Arc<Mutex<StreamSnapshot>>,
    bus: &EventBus,
) -> Option<String> {
    match event {
        RuntimeEvent::ResponseStarted => {
            bus.emit(AgentEvent::ResponseStart {
                session_id: session_id.to_string(),
            });
        }
        RuntimeEvent::TextDelta { text } => {
            live.lock()
                .unwrap_or_else(|e| e.into_inner())
                .content
                .push_str(&text);
            bus.emit(AgentEvent::ResponseChunk {
                session_id: session_id.to_string(),
                text,
            });
        }
        RuntimeEvent::ToolStarted { tool_id, name } => {
            live.lock()
                .unwrap_or_else(|e| e.into_inner())
                .tool_invocations
                .push(ToolInvocation::started(tool_id.clone(), name.clone()));
            bus.emit(AgentEvent::ToolStart {
                session_id: session_id.to_string(),
                tool_id,
                name,
            });
        }
        RuntimeEvent::ToolInput { tool_id, input } => {
            {
                let mut snapshot = live.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(invocation) = snapshot
                    .tool_invocations
                    .iter_mut()
                    .find(|inv| inv.tool_id == tool_id)
                {
                    invocation.input = Some(input.clone());
                }
            }
            bus.emit(AgentEvent::ToolInput {
                session_id: session_id.to_string(),
                tool_id,
                input,
            });
        }
        RuntimeEvent::ToolCompleted { tool_id } => {
            {
                let mut snapshot = live.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(invocation) = snapshot
                    .tool_invocations
                    .iter_mut()
                    .find(|inv| inv.tool_id == tool_id)
                {
                    invocation.completed = true;
                }
            }
            bus.emit(AgentEvent::ToolEnd {
                session_id: session_id.to_string(),
                tool_id,
            });
        }
        RuntimeEvent::TokenUsage {
            input_tokens,
            output_tokens,
        } => {
            let mut snapshot = live.lock().unwrap_or_else(|e| e.into_inner());
            snapshot.usage.cumulative_tokens = snapshot
                .usage
                .cumulative_tokens
                .saturating_add(input_tokens)
                .saturating_add(output_tokens);
        }
        RuntimeEvent::ModelInfo {
            model,
            context_window,
        } => {
            let mut snapshot = live.lock().unwrap_or_else(|e| e.into_inner());
            snapshot.usage.active_model = Some(model);
            snapshot.usage.context_window = Some(context_window);
        }
        RuntimeEvent::Failed { message } => return Some(message),
    }
    None
}
