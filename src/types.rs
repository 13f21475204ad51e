//! Shared domain records for conversation turns and prompt payloads.
//!
//! These types cross two boundaries: they are appended to the conversation
//! store and they ride inside the emitted event union, so they keep stable
//! serde shapes.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Message roles
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user message.
    User,
    /// Assistant/model message.
    Assistant,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One tool invocation observed during a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Runtime-assigned invocation id.
    pub tool_id: String,
    /// Tool name as reported by the runtime.
    pub name: String,
    /// Tool input, present once the runtime has streamed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Whether the runtime reported the invocation finished.
    pub completed: bool,
}

impl ToolInvocation {
    /// Record a newly started invocation with no input yet.
    pub fn started(tool_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            name: name.into(),
            input: None,
            completed: false,
        }
    }
}

/// A single message in the per-session conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    /// Author role for this conversation turn.
    pub role: Role,
    /// Text content; empty for assistant turns that were purely tool calls.
    pub content: String,
    /// Tool invocations made while producing this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
    /// Wall-clock capture time in Unix epoch milliseconds.
    pub created_at_unix_ms: u64,
}

impl ConversationMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_invocations: Vec::new(),
            created_at_unix_ms: now_unix_millis(),
        }
    }

    /// Create an assistant message with its observed tool invocations.
    pub fn assistant(content: impl Into<String>, tool_invocations: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_invocations,
            created_at_unix_ms: now_unix_millis(),
        }
    }
}

// ---------------------------------------------------------------------------
// Context usage
// ---------------------------------------------------------------------------

/// Running usage aggregate for the active session.
///
/// `cumulative_tokens` persists across turns within one session and resets
/// only when a brand-new session is started.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextUsage {
    pub cumulative_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_model: Option<String>,
}

// ---------------------------------------------------------------------------
// Prompt payloads
// ---------------------------------------------------------------------------

/// One question the runtime wants the user to answer before continuing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserQuestion {
    pub question: String,
    /// Offered choices; empty means free-form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Caller's answer to one [`UserQuestion`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Caller decision for a tool-permission prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum PermissionDecision {
    Allow,
    Deny {
        /// Optional reason relayed back to the runtime.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Current wall-clock unix time in milliseconds.
pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
