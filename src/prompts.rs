//! Pending prompt registry.
//!
//! Runtime-issued approval requests park here until a caller responds, the
//! turn is aborted, or the session is cleared. The two keyed stores are a
//! deliberate design choice rather than incidental duplication: lookup and
//! discard stay O(1) per kind, and the two response payload shapes are
//! disjoint.

use crate::types::{PermissionDecision, QuestionAnswer, UserQuestion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Wire payload describing one pending prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptRequest {
    ToolPermission {
        tool_name: String,
        input: serde_json::Value,
    },
    AskUserQuestion {
        questions: Vec<UserQuestion>,
    },
}

/// Caller response to a pending prompt.
///
/// The variant selects which keyed store is searched: a response of the wrong
/// kind for an id resolves to "not found" rather than a type error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    ToolPermission(PermissionDecision),
    Question(Vec<QuestionAnswer>),
}

/// Outcome delivered to the runtime-side waiter of a prompt.
///
/// `SessionCleared` is the "your approval no longer matters" condition
/// (session cleared or turn aborted), distinct from the `not_found` rejection
/// a responding caller sees for an unknown id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptReply<T> {
    Answered(T),
    SessionCleared,
}

/// Result of [`PendingPromptRegistry::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    NotFound,
}

/// Keyed stores bridging runtime approval requests to caller responses.
///
/// Every entry is resolved or discarded exactly once: both paths remove the
/// responder before consuming it.
#[derive(Default)]
pub struct PendingPromptRegistry {
    permissions: HashMap<String, oneshot::Sender<PromptReply<PermissionDecision>>>,
    questions: HashMap<String, oneshot::Sender<PromptReply<Vec<QuestionAnswer>>>>,
}

impl PendingPromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a tool-permission responder under `prompt_id`.
    pub fn insert_permission(
        &mut self,
        prompt_id: impl Into<String>,
        responder: oneshot::Sender<PromptReply<PermissionDecision>>,
    ) {
        self.permissions.insert(prompt_id.into(), responder);
    }

    /// Park a user-question responder under `prompt_id`.
    pub fn insert_question(
        &mut self,
        prompt_id: impl Into<String>,
        responder: oneshot::Sender<PromptReply<Vec<QuestionAnswer>>>,
    ) {
        self.questions.insert(prompt_id.into(), responder);
    }

    /// Fulfill the prompt `prompt_id` with a caller response.
    ///
    /// The entry is removed before its responder is consumed, so duplicate or
    /// late responses find nothing and report [`ResolveOutcome::NotFound`].
    pub fn resolve(&mut self, prompt_id: &str, response: PromptResponse) -> ResolveOutcome {
        match response {
            PromptResponse::ToolPermission(decision) => {
                match self.permissions.remove(prompt_id) {
                    Some(responder) => {
                        let _ = responder.send(PromptReply::Answered(decision));
                        ResolveOutcome::Resolved
                    }
                    None => ResolveOutcome::NotFound,
                }
            }
            PromptResponse::Question(answers) => match self.questions.remove(prompt_id) {
                Some(responder) => {
                    let _ = responder.send(PromptReply::Answered(answers));
                    ResolveOutcome::Resolved
                }
                None => ResolveOutcome::NotFound,
            },
        }
    }

    /// Reject every outstanding entry in both stores with
    /// [`PromptReply::SessionCleared`]; returns how many were rejected.
    pub fn discard_all(&mut self) -> usize {
        let mut rejected = 0;
        for (_, responder) in self.permissions.drain() {
            let _ = responder.send(PromptReply::SessionCleared);
            rejected += 1;
        }
        for (_, responder) in self.questions.drain() {
            let _ = responder.send(PromptReply::SessionCleared);
            rejected += 1;
        }
        rejected
    }

    /// Total outstanding prompts across both stores.
    pub fn len(&self) -> usize {
        self.permissions.len() + self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.questions.is_empty()
    }
}
