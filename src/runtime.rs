//! Agent runtime client contract.
//!
//! The controller consumes an external conversational agent runtime through
//! these seams: [`AgentRuntime`] opens or resumes a session, the returned
//! [`RuntimeSession`] carries the low-level event cursor plus a control
//! handle, and [`RuntimeCallbacks`] bridges runtime-issued approval requests
//! back to the controller.

use crate::error::RuntimeError;
use crate::prompts::PromptReply;
use crate::types::{PermissionDecision, QuestionAnswer, UserQuestion};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Low-level events yielded by a runtime session's cursor.
///
/// The cursor ends (channel close) when the turn completes normally;
/// `Failed` reports a mid-turn runtime fault before the cursor ends.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    ResponseStarted,
    TextDelta {
        text: String,
    },
    ToolStarted {
        tool_id: String,
        name: String,
    },
    ToolInput {
        tool_id: String,
        input: serde_json::Value,
    },
    ToolCompleted {
        tool_id: String,
    },
    TokenUsage {
        input_tokens: u64,
        output_tokens: u64,
    },
    ModelInfo {
        model: String,
        context_window: u64,
    },
    Failed {
        message: String,
    },
}

/// Per-session control surface.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Slash-style commands the runtime supports for this session.
    async fn supported_commands(&self) -> Result<Vec<String>, RuntimeError>;

    /// Gracefully stop the current turn without ending the session.
    async fn interrupt(&self) -> Result<(), RuntimeError>;

    /// Terminate the backing process and release the connection.
    async fn close(&self) -> Result<(), RuntimeError>;
}

/// Live connection returned by [`AgentRuntime::create_session`] /
/// [`AgentRuntime::resume_session`].
pub struct RuntimeSession {
    /// Runtime-assigned session id. May differ from a requested resume id
    /// when the original session is unrecoverable.
    pub session_id: String,
    /// Low-level event cursor for the turn started by the opening prompt.
    pub events: mpsc::Receiver<RuntimeEvent>,
    /// Control handle shared between the controller and its processing run.
    pub control: Arc<dyn SessionControl>,
}

/// External conversational agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Open a brand-new session for `vault_id` and start the first turn.
    async fn create_session(
        &self,
        vault_id: &str,
        vault_path: &Path,
        prompt: &str,
        callbacks: RuntimeCallbacks,
    ) -> Result<RuntimeSession, RuntimeError>;

    /// Resume an existing session and start the next turn.
    async fn resume_session(
        &self,
        vault_path: &Path,
        session_id: &str,
        prompt: &str,
        callbacks: RuntimeCallbacks,
    ) -> Result<RuntimeSession, RuntimeError>;
}

// ---------------------------------------------------------------------------
// Approval request brokering
// ---------------------------------------------------------------------------

/// Tool-permission request raised by the runtime mid-turn.
#[derive(Debug)]
pub struct ToolApprovalRequest {
    tool_name: String,
    input: serde_json::Value,
    responder: oneshot::Sender<PromptReply<PermissionDecision>>,
}

impl ToolApprovalRequest {
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Reject the request without registering it (stale generation).
    pub fn dismiss(self) {
        let _ = self.responder.send(PromptReply::SessionCleared);
    }

    /// Split into the wire payload and the stored responder.
    pub fn into_parts(
        self,
    ) -> (
        String,
        serde_json::Value,
        oneshot::Sender<PromptReply<PermissionDecision>>,
    ) {
        (self.tool_name, self.input, self.responder)
    }
}

/// Free-form question request raised by the runtime mid-turn.
#[derive(Debug)]
pub struct UserQuestionRequest {
    questions: Vec<UserQuestion>,
    responder: oneshot::Sender<PromptReply<Vec<QuestionAnswer>>>,
}

impl UserQuestionRequest {
    pub fn questions(&self) -> &[UserQuestion] {
        &self.questions
    }

    /// Reject the request without registering it (stale generation).
    pub fn dismiss(self) {
        let _ = self.responder.send(PromptReply::SessionCleared);
    }

    /// Split into the wire payload and the stored responder.
    pub fn into_parts(
        self,
    ) -> (
        Vec<UserQuestion>,
        oneshot::Sender<PromptReply<Vec<QuestionAnswer>>>,
    ) {
        (self.questions, self.responder)
    }
}

/// Sender side handed to the runtime when a session is opened.
///
/// Runtime implementations call [`RuntimeCallbacks::request_permission`] /
/// [`RuntimeCallbacks::ask_questions`] and park on the reply.
#[derive(Clone, Debug)]
pub struct RuntimeCallbacks {
    permissions: mpsc::UnboundedSender<ToolApprovalRequest>,
    questions: mpsc::UnboundedSender<UserQuestionRequest>,
}

/// Receiver side kept by the controller's prompt listeners.
pub struct CallbackReceivers {
    pub permissions: mpsc::UnboundedReceiver<ToolApprovalRequest>,
    pub questions: mpsc::UnboundedReceiver<UserQuestionRequest>,
}

impl RuntimeCallbacks {
    pub fn channel() -> (Self, CallbackReceivers) {
        let (permission_tx, permission_rx) = mpsc::unbounded_channel();
        let (question_tx, question_rx) = mpsc::unbounded_channel();
        (
            Self {
                permissions: permission_tx,
                questions: question_tx,
            },
            CallbackReceivers {
                permissions: permission_rx,
                questions: question_rx,
            },
        )
    }

    /// Raise a tool-permission request and wait for the decision.
    pub async fn request_permission(
        &self,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Result<PromptReply<PermissionDecision>, RuntimeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.permissions
            .send(ToolApprovalRequest {
                tool_name: tool_name.into(),
                input,
                responder: response_tx,
            })
            .map_err(|_| RuntimeError::Closed("permission listener is gone".into()))?;
        response_rx
            .await
            .map_err(|_| RuntimeError::Closed("permission request dropped unresolved".into()))
    }

    /// Raise a user-question request and wait for the answers.
    pub async fn ask_questions(
        &self,
        questions: Vec<UserQuestion>,
    ) -> Result<PromptReply<Vec<QuestionAnswer>>, RuntimeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.questions
            .send(UserQuestionRequest {
                questions,
                responder: response_tx,
            })
            .map_err(|_| RuntimeError::Closed("question listener is gone".into()))?;
        response_rx
            .await
            .map_err(|_| RuntimeError::Closed("question request dropped unresolved".into()))
    }
}
