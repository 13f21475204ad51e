//! Shared test fixtures for the session-core test modules.
//!
//! Keeping the mock runtime/store and the event-collector helpers here
//! prevents each test module from rebuilding ad-hoc channel plumbing.

use crate::error::{RuntimeError, StoreError};
use crate::events::{AgentEvent, AgentEventEnvelope, EventBus, SubscriberId};
use crate::runtime::{
    AgentRuntime, RuntimeCallbacks, RuntimeEvent, RuntimeSession, SessionControl,
};
use crate::store::ConversationStore;
use crate::types::ConversationMessage;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Opt-in log capture for tests debugged with `RUST_LOG=...`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wire tag of an event, for compact order assertions.
pub fn event_tag(event: &AgentEvent) -> &'static str {
    match event {
        AgentEvent::SessionReady { .. } => "session_ready",
        AgentEvent::ResponseStart { .. } => "response_start",
        AgentEvent::ResponseChunk { .. } => "response_chunk",
        AgentEvent::ResponseEnd { .. } => "response_end",
        AgentEvent::ToolStart { .. } => "tool_start",
        AgentEvent::ToolInput { .. } => "tool_input",
        AgentEvent::ToolEnd { .. } => "tool_end",
        AgentEvent::PromptPending { .. } => "prompt_pending",
        AgentEvent::PromptResolved { .. } => "prompt_resolved",
        AgentEvent::PromptResponseRejected { .. } => "prompt_response_rejected",
        AgentEvent::Error { .. } => "error",
        AgentEvent::SessionCleared => "session_cleared",
    }
}

/// Subscribe a channel-backed collector to `bus`.
pub fn subscribe_collector(
    bus: &EventBus,
) -> (SubscriberId, mpsc::UnboundedReceiver<AgentEventEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = bus.subscribe(Arc::new(move |envelope: &AgentEventEnvelope| {
        let _ = tx.send(envelope.clone());
    }));
    (id, rx)
}

/// Receive the next collected event or fail loudly after two seconds.
pub async fn recv_event(rx: &mut mpsc::UnboundedReceiver<AgentEventEnvelope>) -> AgentEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event timeout")
        .expect("event channel closed")
        .event
}

/// Poll `predicate` until it holds or two seconds elapse.
pub async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Drain collected events until one matches `tag`.
pub async fn recv_until(
    rx: &mut mpsc::UnboundedReceiver<AgentEventEnvelope>,
    tag: &str,
) -> AgentEvent {
    for _ in 0..32 {
        let event = recv_event(rx).await;
        if event_tag(&event) == tag {
            return event;
        }
    }
    panic!("no `{tag}` event within 32 events");
}

// ---------------------------------------------------------------------------
// Mock runtime
// ---------------------------------------------------------------------------

/// Recording control handle shared by every session a [`MockRuntime`] opens.
pub struct MockControl {
    pub commands: Mutex<Vec<String>>,
    pub fail_commands: AtomicBool,
    pub interrupts: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockControl {
    fn new() -> Self {
        Self {
            commands: Mutex::new(vec!["/review".to_string(), "/quiz".to_string()]),
            fail_commands: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionControl for MockControl {
    async fn supported_commands(&self) -> Result<Vec<String>, RuntimeError> {
        if self.fail_commands.load(Ordering::Relaxed) {
            return Err(RuntimeError::Closed("command listing unavailable".into()));
        }
        Ok(self.commands.lock().expect("lock").clone())
    }

    async fn interrupt(&self) -> Result<(), RuntimeError> {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct MockRuntimeInner {
    /// Scripted cursor events per opened session; `None` means manual feed.
    script: Mutex<Option<Vec<RuntimeEvent>>>,
    next_session: AtomicU64,
    fail_open: Mutex<Option<String>>,
    /// When set, resume returns this id instead of the requested one.
    resume_redirect: Mutex<Option<String>>,
    control: Arc<MockControl>,
    feed: Mutex<Option<mpsc::Sender<RuntimeEvent>>>,
    callbacks: Mutex<Option<RuntimeCallbacks>>,
    creates: AtomicUsize,
    resumes: AtomicUsize,
    resume_requested: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
}

/// Test double for the external agent runtime.
#[derive(Clone)]
pub struct MockRuntime {
    inner: Arc<MockRuntimeInner>,
}

impl MockRuntime {
    fn with_script(script: Option<Vec<RuntimeEvent>>) -> Self {
        Self {
            inner: Arc::new(MockRuntimeInner {
                script: Mutex::new(script),
                next_session: AtomicU64::new(1),
                fail_open: Mutex::new(None),
                resume_redirect: Mutex::new(None),
                control: Arc::new(MockControl::new()),
                feed: Mutex::new(None),
                callbacks: Mutex::new(None),
                creates: AtomicUsize::new(0),
                resumes: AtomicUsize::new(0),
                resume_requested: Mutex::new(None),
                prompts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Every opened session replays `events` and then ends its cursor.
    pub fn scripted(events: Vec<RuntimeEvent>) -> Self {
        Self::with_script(Some(events))
    }

    /// Opened sessions stream whatever the test pushes via [`Self::push`].
    pub fn manual() -> Self {
        Self::with_script(None)
    }

    /// Make the next open/resume fail with a connection error.
    pub fn fail_open(&self, message: &str) {
        *self.inner.fail_open.lock().expect("lock") = Some(message.to_string());
    }

    /// Make resume return `session_id` instead of the requested id.
    pub fn redirect_resume(&self, session_id: &str) {
        *self.inner.resume_redirect.lock().expect("lock") = Some(session_id.to_string());
    }

    pub fn control(&self) -> Arc<MockControl> {
        Arc::clone(&self.inner.control)
    }

    /// Callback channels handed over at the most recent open.
    pub fn callbacks(&self) -> RuntimeCallbacks {
        self.inner
            .callbacks
            .lock()
            .expect("lock")
            .clone()
            .expect("no session opened yet")
    }

    /// Feed one cursor event to the manually driven session.
    pub async fn push(&self, event: RuntimeEvent) {
        let feed = self
            .inner
            .feed
            .lock()
            .expect("lock")
            .clone()
            .expect("no manual session open");
        feed.send(event).await.expect("cursor closed");
    }

    /// End the manually driven session's cursor (normal turn completion).
    pub fn end_turn(&self) {
        *self.inner.feed.lock().expect("lock") = None;
    }

    pub fn creates(&self) -> usize {
        self.inner.creates.load(Ordering::Relaxed)
    }

    pub fn resumes(&self) -> usize {
        self.inner.resumes.load(Ordering::Relaxed)
    }

    pub fn last_resume_request(&self) -> Option<String> {
        self.inner.resume_requested.lock().expect("lock").clone()
    }

    /// Prompts received across all opens, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.inner.prompts.lock().expect("lock").clone()
    }

    fn open(
        &self,
        session_id: String,
        prompt: &str,
        callbacks: RuntimeCallbacks,
    ) -> Result<RuntimeSession, RuntimeError> {
        if let Some(message) = self.inner.fail_open.lock().expect("lock").clone() {
            return Err(RuntimeError::Connection(message));
        }
        self.inner
            .prompts
            .lock()
            .expect("lock")
            .push(prompt.to_string());
        *self.inner.callbacks.lock().expect("lock") = Some(callbacks);

        let (tx, rx) = mpsc::channel(64);
        match self.inner.script.lock().expect("lock").clone() {
            Some(events) => {
                tokio::spawn(async move {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                });
            }
            None => {
                *self.inner.feed.lock().expect("lock") = Some(tx);
            }
        }
        Ok(RuntimeSession {
            session_id,
            events: rx,
            control: Arc::clone(&self.inner.control) as Arc<dyn SessionControl>,
        })
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn create_session(
        &self,
        _vault_id: &str,
        _vault_path: &Path,
        prompt: &str,
        callbacks: RuntimeCallbacks,
    ) -> Result<RuntimeSession, RuntimeError> {
        self.inner.creates.fetch_add(1, Ordering::Relaxed);
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        self.open(format!("sess-{id}"), prompt, callbacks)
    }

    async fn resume_session(
        &self,
        _vault_path: &Path,
        session_id: &str,
        prompt: &str,
        callbacks: RuntimeCallbacks,
    ) -> Result<RuntimeSession, RuntimeError> {
        self.inner.resumes.fetch_add(1, Ordering::Relaxed);
        *self.inner.resume_requested.lock().expect("lock") = Some(session_id.to_string());
        let resolved = self
            .inner
            .resume_redirect
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| session_id.to_string());
        self.open(resolved, prompt, callbacks)
    }
}

// ---------------------------------------------------------------------------
// Mock store
// ---------------------------------------------------------------------------

/// Recording conversation store.
#[derive(Default)]
pub struct MockStore {
    appended: Mutex<Vec<(String, ConversationMessage)>>,
    fail: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// All appended `(session_id, message)` pairs in append order.
    pub fn messages(&self) -> Vec<(String, ConversationMessage)> {
        self.appended.lock().expect("lock").clone()
    }

    /// Messages appended for one session, in append order.
    pub fn messages_for(&self, session_id: &str) -> Vec<ConversationMessage> {
        self.appended
            .lock()
            .expect("lock")
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl ConversationStore for MockStore {
    async fn append_message(
        &self,
        _vault_path: &Path,
        session_id: &str,
        message: ConversationMessage,
    ) -> Result<(), StoreError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(StoreError::Invalid("store offline".into()));
        }
        self.appended
            .lock()
            .expect("lock")
            .push((session_id.to_string(), message));
        Ok(())
    }
}
