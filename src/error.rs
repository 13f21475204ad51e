//! Unified error types for the session core.

use std::fmt;

// ---------------------------------------------------------------------------
// RuntimeError
// ---------------------------------------------------------------------------

/// Errors from the agent runtime client.
#[derive(Debug)]
pub enum RuntimeError {
    /// The session process could not be started or reached.
    Connection(String),
    /// The backing session ended or was closed before the call completed.
    Closed(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "runtime connection: {msg}"),
            Self::Closed(msg) => write!(f, "runtime session closed: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors when appending to the conversation store.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    /// The store rejected the append (bad session id, closed log, ...).
    Invalid(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Invalid(msg) => write!(f, "invalid append: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// AlreadyProcessingError
// ---------------------------------------------------------------------------

/// A turn is already running for the active session.
///
/// This is a caller-correctable conflict from `send_message`, never a generic
/// internal fault: the caller can wait, abort the running turn, or start a
/// fresh session by omitting the session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyProcessingError {
    /// Session that owns the in-flight turn, when known.
    pub session_id: Option<String>,
}

impl fmt::Display for AlreadyProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session_id {
            Some(id) => write!(f, "session {id} is already processing a turn"),
            None => write!(f, "a turn is already processing"),
        }
    }
}

impl std::error::Error for AlreadyProcessingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_display() {
        assert_eq!(
            RuntimeError::Connection("spawn failed".into()).to_string(),
            "runtime connection: spawn failed"
        );
        assert_eq!(
            RuntimeError::Closed("process exited".into()).to_string(),
            "runtime session closed: process exited"
        );
    }

    #[test]
    fn store_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "log missing");
        let e = StoreError::from(io_err);
        let s = e.to_string();
        assert!(s.starts_with("io:"), "got: {s}");
        assert!(s.contains("log missing"));
    }

    #[test]
    fn store_error_invalid_message() {
        let e = StoreError::Invalid("unknown session".into());
        assert_eq!(e.to_string(), "invalid append: unknown session");
    }

    #[test]
    fn already_processing_display_variants() {
        let with_id = AlreadyProcessingError {
            session_id: Some("abcd-1234".into()),
        };
        assert_eq!(
            with_id.to_string(),
            "session abcd-1234 is already processing a turn"
        );
        let without = AlreadyProcessingError { session_id: None };
        assert_eq!(without.to_string(), "a turn is already processing");
    }
}
