//! Streaming chat client for the agent relay.
//!
//! The pieces, bottom-up:
//!
//! - [`AgentClient`] talks to the relay: session creation, the streaming
//!   turn, and the synchronous fallback dispatch.
//! - [`SessionCoordinator`] makes sure exactly one session gets created and
//!   lets everyone else wait for it.
//! - [`Conversation`] runs turns against a ready session and keeps the
//!   transcript consistent when turns are superseded or fail.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod stream;
pub mod turn;

#[cfg(test)]
mod test_support;

pub use client::{AgentClient, Session, Turn};
pub use config::ClientConfig;
pub use coordinator::{SessionCoordinator, SessionState};
pub use error::ClientError;
pub use session::OpenedSession;
pub use stream::{StreamEnding, StreamHandlers, StreamOutcome};
pub use turn::{Conversation, TurnReport, TurnState};
