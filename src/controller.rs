//! Active session controller.
//!
//! [`SessionController`] owns the single live connection to the agent
//! runtime. It arbitrates concurrent `send_message` calls, fans events out to
//! subscribers, bridges runtime approval requests into the pending-prompt
//! registry, and guarantees teardown under cancellation and error.
//!
//! Processing is fire-and-forget: `send_message` returns once a run is
//! accepted and the turn continues in a spawned task. Each run is stamped
//! with a generation; cleanup only mutates shared state when its generation
//! is still current, so a superseded run can finish late without closing a
//! connection a newer run now owns.

use crate::error::AlreadyProcessingError;
use crate::events::{AgentEvent, EventBus, EventCallback, PromptRejectReason, SubscriberId};
use crate::prompts::{PendingPromptRegistry, PromptRequest, PromptResponse, ResolveOutcome};
use crate::runtime::{
    AgentRuntime, CallbackReceivers, RuntimeCallbacks, RuntimeEvent, SessionControl,
    ToolApprovalRequest, UserQuestionRequest,
};
use crate::store::ConversationStore;
use crate::streamer::{spawn_stream, StreamOutcome, StreamSnapshot};
use crate::types::{ContextUsage, ConversationMessage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Point-in-time public view of the controller.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub vault_id: Option<String>,
    pub vault_path: Option<PathBuf>,
    pub is_processing: bool,
}

#[derive(Default)]
struct ControllerState {
    session_id: Option<String>,
    vault_id: Option<String>,
    vault_path: Option<PathBuf>,
    processing: bool,
    cancel: Option<watch::Sender<bool>>,
    control: Option<Arc<dyn SessionControl>>,
    live: Option<Arc<Mutex<StreamSnapshot>>>,
    usage: ContextUsage,
    pending: PendingPromptRegistry,
    prompt_nonce: u64,
}

struct Shared {
    state: Mutex<ControllerState>,
    /// Serializes `send_message` arbitration so two concurrent callers cannot
    /// both claim the single connection slot.
    admission: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    bus: Arc<EventBus>,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Orchestrates one live agent session and its processing runs.
///
/// Construct one instance per transport and pass it explicitly; there is no
/// global accessor.
pub struct SessionController {
    runtime: Arc<dyn AgentRuntime>,
    store: Arc<dyn ConversationStore>,
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(runtime: Arc<dyn AgentRuntime>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            runtime,
            store,
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState::default()),
                admission: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                bus: Arc::new(EventBus::new()),
            }),
        }
    }

    /// Register an event subscriber; delivery is isolated per subscriber.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriberId {
        self.shared.bus.subscribe(callback)
    }

    /// Remove a previously registered subscriber.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    /// Current session identity and processing flag.
    ///
    /// Pure read, valid at any time including mid-stream.
    pub fn state(&self) -> SessionState {
        let state = self.shared.state();
        SessionState {
            session_id: state.session_id.clone(),
            vault_id: state.vault_id.clone(),
            vault_path: state.vault_path.clone(),
            is_processing: state.processing,
        }
    }

    /// Best-effort aggregate of the in-flight turn, or an empty snapshot
    /// carrying the session's usage totals when idle.
    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.shared.state();
        match &state.live {
            Some(live) => live.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            None => StreamSnapshot::with_usage(state.usage.clone()),
        }
    }

    /// Outstanding pending prompts across both registries.
    pub fn pending_prompt_count(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Accept a message for the given vault and launch a processing run.
    ///
    /// With `session_id` the existing session is resumed; without it a fresh
    /// session is created, implicitly clearing a session that is still
    /// processing (takeover). The only error surfaced to the caller is
    /// [`AlreadyProcessingError`]; everything past acceptance is reported
    /// through the event stream.
    pub async fn send_message(
        &self,
        vault_id: &str,
        vault_path: &Path,
        session_id: Option<&str>,
        prompt: &str,
    ) -> Result<SessionState, AlreadyProcessingError> {
        let _admission = self.shared.admission.lock().await;
        let takeover = {
            let state = self.shared.state();
            if state.processing {
                if session_id.is_some() {
                    return Err(AlreadyProcessingError {
                        session_id: state.session_id.clone(),
                    });
                }
                true
            } else {
                false
            }
        };
        if takeover {
            self.clear_session().await;
        }

        let (callbacks, receivers) = RuntimeCallbacks::channel();
        let opened = match session_id {
            Some(id) => {
                self.runtime
                    .resume_session(vault_path, id, prompt, callbacks)
                    .await
            }
            None => {
                self.runtime
                    .create_session(vault_id, vault_path, prompt, callbacks)
                    .await
            }
        };
        let session = match opened {
            Ok(session) => session,
            Err(err) => {
                self.shared.bus.emit(AgentEvent::Error {
                    message: format!("failed to open agent session: {err}"),
                    recoverable: false,
                });
                return Ok(self.state());
            }
        };
        if let Some(requested) = session_id {
            if session.session_id != requested {
                self.shared.bus.emit(AgentEvent::Error {
                    message: format!(
                        "session {requested} could not be resumed; continuing as {}",
                        session.session_id
                    ),
                    recoverable: true,
                });
            }
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let live = {
            let mut state = self.shared.state();
            state.session_id = Some(session.session_id.clone());
            state.vault_id = Some(vault_id.to_string());
            state.vault_path = Some(vault_path.to_path_buf());
            state.processing = true;
            state.cancel = Some(cancel_tx);
            state.control = Some(Arc::clone(&session.control));
            // Token totals survive turns within a session and reset only for
            // a brand-new one.
            if session_id.is_none() {
                state.usage = ContextUsage::default();
            }
            let stale = state.pending.discard_all();
            if stale > 0 {
                tracing::warn!(stale, "discarded stale pending prompts at turn start");
            }
            let live = Arc::new(Mutex::new(StreamSnapshot::with_usage(state.usage.clone())));
            state.live = Some(Arc::clone(&live));
            live
        };

        spawn_prompt_listeners(Arc::clone(&self.shared), receivers, generation);

        let run = ProcessingRun {
            shared: Arc::clone(&self.shared),
            store: Arc::clone(&self.store),
            session_id: session.session_id,
            vault_id: vault_id.to_string(),
            vault_path: vault_path.to_path_buf(),
            prompt: prompt.to_string(),
            generation,
            control: session.control,
            events: session.events,
            cancel: cancel_rx,
            live,
        };
        tokio::spawn(run.execute());

        Ok(self.state())
    }

    /// Hard teardown: cancel the in-flight run, terminate the backing
    /// process, reject every pending prompt, and reset all identity and
    /// streaming state. Safe to call with no active session.
    pub async fn clear_session(&self) {
        // Invalidate the generation first so a pending run's cleanup skips.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let control = {
            let mut state = self.shared.state();
            if let Some(cancel) = state.cancel.take() {
                let _ = cancel.send(true);
            }
            let rejected = state.pending.discard_all();
            if rejected > 0 {
                tracing::debug!(rejected, "rejected pending prompts on session clear");
            }
            state.session_id = None;
            state.vault_id = None;
            state.vault_path = None;
            state.processing = false;
            state.live = None;
            state.usage = ContextUsage::default();
            state.control.take()
        };
        if let Some(control) = control {
            if let Err(err) = control.close().await {
                tracing::warn!(error = %err, "failed to close agent session");
            }
        }
        self.shared.bus.emit(AgentEvent::SessionCleared);
    }

    /// Soft teardown of the current turn only: interrupt the runtime
    /// gracefully and reject pending prompts, keeping the session identity
    /// so the conversation can continue.
    pub async fn abort_processing(&self) {
        let (was_processing, control) = {
            let mut state = self.shared.state();
            if state.processing {
                if let Some(cancel) = state.cancel.as_ref() {
                    let _ = cancel.send(true);
                }
                let rejected = state.pending.discard_all();
                if rejected > 0 {
                    tracing::debug!(rejected, "rejected pending prompts on abort");
                }
                (true, state.control.clone())
            } else {
                (false, None)
            }
        };
        if !was_processing {
            tracing::warn!("abort requested but no turn is processing");
            return;
        }
        if let Some(control) = control {
            if let Err(err) = control.interrupt().await {
                tracing::warn!(error = %err, "failed to interrupt agent session");
            }
        }
    }

    /// Fulfill a pending prompt with a caller response.
    ///
    /// Unknown ids (already resolved, discarded, or never issued) emit a
    /// `prompt_response_rejected` event and change nothing, so duplicate or
    /// late responses after a clear are harmless.
    pub fn respond_to_prompt(&self, prompt_id: &str, response: PromptResponse) {
        let outcome = self.shared.state().pending.resolve(prompt_id, response);
        match outcome {
            ResolveOutcome::Resolved => {
                self.shared.bus.emit(AgentEvent::PromptResolved {
                    prompt_id: prompt_id.to_string(),
                });
            }
            ResolveOutcome::NotFound => {
                tracing::debug!(prompt_id, "response for unknown prompt");
                self.shared.bus.emit(AgentEvent::PromptResponseRejected {
                    prompt_id: prompt_id.to_string(),
                    reason: PromptRejectReason::NotFound,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Processing run
// ---------------------------------------------------------------------------

/// One accepted `send_message`, executed as a spawned task.
struct ProcessingRun {
    shared: Arc<Shared>,
    store: Arc<dyn ConversationStore>,
    session_id: String,
    vault_id: String,
    vault_path: PathBuf,
    prompt: String,
    generation: u64,
    control: Arc<dyn SessionControl>,
    events: mpsc::Receiver<RuntimeEvent>,
    cancel: watch::Receiver<bool>,
    live: Arc<Mutex<StreamSnapshot>>,
}

impl ProcessingRun {
    async fn execute(self) {
        let Self {
            shared,
            store,
            session_id,
            vault_id,
            vault_path,
            prompt,
            generation,
            control,
            events,
            cancel,
            live,
        } = self;
        let started = Instant::now();

        // Best-effort command listing; an unreachable listing is not fatal.
        let supported_commands = match control.supported_commands().await {
            Ok(commands) => commands,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list supported commands");
                Vec::new()
            }
        };
        shared.bus.emit(AgentEvent::SessionReady {
            session_id: session_id.clone(),
            vault_id: vault_id.clone(),
            supported_commands,
        });

        // The user message lands in the log before any streamed output.
        if let Err(err) = store
            .append_message(&vault_path, &session_id, ConversationMessage::user(&prompt))
            .await
        {
            shared.bus.emit(AgentEvent::Error {
                message: format!("failed to record user message: {err}"),
                recoverable: true,
            });
        }

        let handle = spawn_stream(
            session_id.clone(),
            events,
            Arc::clone(&live),
            Arc::clone(&shared.bus),
            cancel,
        );
        let outcome = handle.wait().await;

        // A superseded run emits nothing further and leaves state to the run
        // that replaced it; `clear_session` already tore everything down.
        if shared.generation.load(Ordering::SeqCst) != generation {
            tracing::warn!(generation, "skipping finalization for superseded turn");
            return;
        }

        let (snapshot, completed) = match outcome {
            StreamOutcome::Completed(snapshot) => (snapshot, true),
            StreamOutcome::Cancelled(snapshot) => {
                shared.bus.emit(AgentEvent::Error {
                    message: "turn interrupted before completion".to_string(),
                    recoverable: true,
                });
                (snapshot, false)
            }
            StreamOutcome::Failed { message, partial } => {
                shared.bus.emit(AgentEvent::Error {
                    message,
                    recoverable: true,
                });
                (partial, false)
            }
        };

        // An interrupted turn still gets a synthesized end marker and a
        // persisted partial message when it produced anything.
        if completed || snapshot.has_output() {
            shared.bus.emit(AgentEvent::ResponseEnd {
                session_id: session_id.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                usage: snapshot.usage.clone(),
            });
        }
        if snapshot.has_output() {
            let message = ConversationMessage::assistant(
                snapshot.content.clone(),
                snapshot.tool_invocations.clone(),
            );
            if let Err(err) = store.append_message(&vault_path, &session_id, message).await {
                shared.bus.emit(AgentEvent::Error {
                    message: format!("failed to record assistant message: {err}"),
                    recoverable: true,
                });
            }
        }

        // Generation-gated cleanup: a superseded run must not touch state a
        // newer run now owns.
        let control_to_close = {
            let mut state = shared.state();
            let current = shared.generation.load(Ordering::SeqCst);
            if current != generation {
                tracing::warn!(generation, current, "skipping cleanup for superseded turn");
                None
            } else {
                state.processing = false;
                state.cancel = None;
                state.live = None;
                state.usage = snapshot.usage.clone();
                state.control.take()
            }
        };
        if let Some(control) = control_to_close {
            if let Err(err) = control.close().await {
                tracing::warn!(error = %err, "failed to close agent session");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt listeners
// ---------------------------------------------------------------------------

/// Bridge runtime approval channels into the registry for one run.
fn spawn_prompt_listeners(shared: Arc<Shared>, receivers: CallbackReceivers, generation: u64) {
    let CallbackReceivers {
        mut permissions,
        mut questions,
    } = receivers;
    {
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(request) = permissions.recv().await {
                register_permission(&shared, request, generation);
            }
        });
    }
    tokio::spawn(async move {
        while let Some(request) = questions.recv().await {
            register_question(&shared, request, generation);
        }
    });
}

fn register_permission(shared: &Shared, request: ToolApprovalRequest, generation: u64) {
    let mut state = shared.state();
    if shared.generation.load(Ordering::SeqCst) != generation {
        drop(state);
        tracing::warn!(generation, "dismissing approval request from a superseded turn");
        request.dismiss();
        return;
    }
    let (tool_name, input, responder) = request.into_parts();
    let prompt_id = format!("perm-{generation}-{:04x}", state.prompt_nonce);
    state.prompt_nonce = state.prompt_nonce.saturating_add(1);
    state.pending.insert_permission(prompt_id.clone(), responder);
    drop(state);
    shared.bus.emit(AgentEvent::PromptPending {
        prompt_id,
        request: PromptRequest::ToolPermission { tool_name, input },
    });
}

fn register_question(shared: &Shared, request: UserQuestionRequest, generation: u64) {
    let mut state = shared.state();
    if shared.generation.load(Ordering::SeqCst) != generation {
        drop(state);
        tracing::warn!(generation, "dismissing question request from a superseded turn");
        request.dismiss();
        return;
    }
    let (questions, responder) = request.into_parts();
    let prompt_id = format!("ask-{generation}-{:04x}", state.prompt_nonce);
    state.prompt_nonce = state.prompt_nonce.saturating_add(1);
    state.pending.insert_question(prompt_id.clone(), responder);
    drop(state);
    shared.bus.emit(AgentEvent::PromptPending {
        prompt_id,
        request: PromptRequest::AskUserQuestion { questions },
    });
}
