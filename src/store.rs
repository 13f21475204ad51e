//! Conversation store contract.
//!
//! The per-session message log is an external collaborator; the controller
//! only ever appends, targeted by `(vault_path, session_id)`. Implementations
//! must preserve per-session append order.

use crate::error::StoreError;
use crate::types::ConversationMessage;
use async_trait::async_trait;
use std::path::Path;

/// Append-only, per-session conversation log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one message to the session's log.
    async fn append_message(
        &self,
        vault_path: &Path,
        session_id: &str,
        message: ConversationMessage,
    ) -> Result<(), StoreError>;
}
