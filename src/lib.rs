//! Mentor — session orchestration core for a vault-aware AI study assistant.
//!
//! This crate owns the single live connection to an external conversational
//! agent runtime: it accepts caller messages, streams runtime output as
//! discrete events to subscribers, bridges runtime-issued approval prompts to
//! asynchronous caller responses, and guarantees clean teardown under
//! cancellation and error (including salvage of partial output on abort).
//!
//! Vault access, the spaced-repetition scheduler, configuration loading, and
//! the wire transport are external collaborators consumed through the traits
//! in [`runtime`] and [`store`]; construct a
//! [`controller::SessionController`] over your implementations and subscribe
//! to its event stream.

pub mod controller;
pub mod error;
pub mod events;
pub mod prompts;
pub mod runtime;
pub mod store;
pub mod streamer;
#[cfg(test)]
pub mod testsupport;
pub mod types;
