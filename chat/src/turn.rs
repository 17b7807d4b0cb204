//! Per-session conversation and the turn state machine.
//!
//! DESIGN
//! ======
//! A [`Conversation`] owns the transcript and the turn counter of one
//! session. Each submitted line becomes one turn:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed | Aborted | TransportError
//! TransportError (no delta yet) -> FallbackSending -> Completed | FallbackError
//! ```
//!
//! The user message and an empty assistant placeholder are appended up
//! front; the placeholder's text is rewritten as deltas arrive.
//!
//! At most one turn is active. Submitting a new turn cancels the previous
//! one under the same lock that guards the transcript, and every transcript
//! write re-checks the writer's token under that lock, so a superseded turn
//! can never touch the transcript again.
//!
//! A stream that fails before any delta falls back to the synchronous
//! dispatcher exactly once, reusing the turn's sequence id. A stream that
//! fails after some text keeps that text and reports an interruption notice.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wire::{DisplayMessage, Payload, Role, StreamEvent};

use crate::client::{AgentClient, Session, Turn};
use crate::error::ClientError;
use crate::session::OpenedSession;
use crate::stream::StreamHandlers;

/// Placeholder text when a turn completed without any text.
pub const EMPTY_REPLY_TEXT: &str = "The agent didn't send a message this time. Please try again.";
/// Placeholder text when both streaming and the fallback failed.
pub const NO_REPLY_TEXT: &str = "We couldn't retrieve a response. Please try again shortly.";
/// Notice when the fallback answered without any assistant message.
pub const NO_ASSISTANT_NOTICE: &str = "No assistant response returned";
/// Notice when a stream broke after partial text.
pub const INTERRUPTED_NOTICE: &str = "The agent connection was interrupted. The response may be incomplete.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Aborted,
    TransportError,
    FallbackSending,
    FallbackError,
}

/// How one turn went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub sequence_id: u64,
    /// Every state the turn entered after `Idle`, in order.
    pub transitions: Vec<TurnState>,
    /// Final assistant placeholder text.
    pub text: String,
    /// True when at least one streamed delta arrived.
    pub streamed: bool,
    /// Extra assistant messages appended by the fallback.
    pub extra: Vec<DisplayMessage>,
    pub notice: Option<String>,
}

impl TurnReport {
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.transitions.last().copied().unwrap_or(TurnState::Idle)
    }
}

struct ActiveTurn {
    sequence_id: u64,
    token: CancellationToken,
}

struct Transcript {
    next_sequence: u64,
    messages: Vec<DisplayMessage>,
    active: Option<ActiveTurn>,
}

/// One session's conversation. Clones share the same transcript.
#[derive(Clone)]
pub struct Conversation {
    client: Arc<AgentClient>,
    session: Session,
    transcript: Arc<Mutex<Transcript>>,
}

impl Conversation {
    /// Start a conversation seeded with the session's greeting.
    #[must_use]
    pub fn new(client: Arc<AgentClient>, opened: OpenedSession) -> Self {
        let transcript = Transcript { next_sequence: 1, messages: opened.greeting, active: None };
        Self { client, session: opened.session, transcript: Arc::new(Mutex::new(transcript)) }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Snapshot of the transcript.
    #[must_use]
    pub fn messages(&self) -> Vec<DisplayMessage> {
        lock(&self.transcript).messages.clone()
    }

    /// Cancel the active turn, if any. Returns whether one was cancelled.
    pub fn cancel_active(&self) -> bool {
        let mut transcript = lock(&self.transcript);
        match transcript.active.take() {
            Some(active) => {
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one turn. Blank input is ignored and yields `None`.
    ///
    /// `handlers` observe the stream; they are called with the transcript
    /// locked and must not call back into this conversation.
    pub async fn submit<H>(&self, text: &str, metadata: Option<Value>, handlers: &mut H) -> Option<TurnReport>
    where
        H: StreamHandlers + ?Sized,
    {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let token = CancellationToken::new();
        let (sequence_id, placeholder_id) = self.begin(text, &token);
        let mut report = TurnReport {
            sequence_id,
            transitions: vec![TurnState::Sending],
            text: String::new(),
            streamed: false,
            extra: Vec::new(),
            notice: None,
        };

        let turn = Turn { text, sequence_id, metadata: metadata.as_ref() };
        let mut tracker = Tracker {
            transcript: &self.transcript,
            token: &token,
            placeholder_id: &placeholder_id,
            inner: handlers,
            streamed: false,
            opened: false,
        };
        let result = self.client.stream_message(&self.session, turn, &token, &mut tracker).await;
        let (streamed, opened) = (tracker.streamed, tracker.opened);
        report.streamed = streamed;
        if opened {
            report.transitions.push(TurnState::Streaming);
        }

        match result {
            Ok(outcome) => {
                let text = if outcome.full_text.trim().is_empty() {
                    EMPTY_REPLY_TEXT.to_owned()
                } else {
                    outcome.full_text
                };
                if self.write_if_current(&token, &placeholder_id, &text, Vec::new()) {
                    report.text = text;
                    report.transitions.push(TurnState::Completed);
                } else {
                    report.transitions.push(TurnState::Aborted);
                }
            }
            Err(ClientError::Cancelled) => report.transitions.push(TurnState::Aborted),
            Err(_) if token.is_cancelled() => report.transitions.push(TurnState::Aborted),
            Err(err) => {
                warn!(session_id = %self.session.id, sequence_id, error = %err, streamed, "streaming failed");
                report.transitions.push(TurnState::TransportError);
                if streamed {
                    report.text = self.placeholder_text(&placeholder_id);
                    report.notice = Some(INTERRUPTED_NOTICE.to_owned());
                } else {
                    report.transitions.push(TurnState::FallbackSending);
                    self.fall_back(turn, &token, &placeholder_id, &mut report).await;
                }
            }
        }

        self.end(sequence_id);
        Some(report)
    }

    /// Send the turn through the synchronous dispatcher.
    async fn fall_back(&self, turn: Turn<'_>, token: &CancellationToken, placeholder_id: &str, report: &mut TurnReport) {
        info!(session_id = %self.session.id, sequence_id = turn.sequence_id, "falling back to synchronous dispatch");
        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                report.transitions.push(TurnState::Aborted);
                return;
            }
            result = self.client.send_message(&self.session, turn) => result,
        };

        let replies: Vec<DisplayMessage> = match result {
            Ok(messages) => messages
                .into_iter()
                .filter(|m| m.role != Role::User && m.has_text())
                .collect(),
            Err(err) => {
                warn!(session_id = %self.session.id, error = %err, "fallback dispatch failed");
                report.notice = Some(err.to_string());
                Vec::new()
            }
        };

        let mut replies = replies.into_iter();
        let (text, extra, state) = match replies.next() {
            Some(first) => (first.text, replies.collect(), TurnState::Completed),
            None => {
                report.notice.get_or_insert_with(|| NO_ASSISTANT_NOTICE.to_owned());
                (NO_REPLY_TEXT.to_owned(), Vec::new(), TurnState::FallbackError)
            }
        };
        if self.write_if_current(token, placeholder_id, &text, extra.clone()) {
            report.text = text;
            report.extra = extra;
            report.transitions.push(state);
        } else {
            report.transitions.push(TurnState::Aborted);
        }
    }

    /// Register a new active turn, cancelling the previous one, and append
    /// the user message plus an empty placeholder.
    fn begin(&self, text: &str, token: &CancellationToken) -> (u64, String) {
        let mut transcript = lock(&self.transcript);
        if let Some(previous) = transcript.active.take() {
            info!(sequence_id = previous.sequence_id, "aborting previous turn");
            previous.token.cancel();
        }

        let sequence_id = transcript.next_sequence;
        transcript.next_sequence += 1;
        transcript.active = Some(ActiveTurn { sequence_id, token: token.clone() });

        let now = timestamp();
        let placeholder_id = format!("assistant-{}", uuid::Uuid::new_v4());
        transcript.messages.push(DisplayMessage::new(
            format!("local-{}", uuid::Uuid::new_v4()),
            Role::User,
            text,
            Some(now.clone()),
        ));
        transcript.messages.push(DisplayMessage::new(placeholder_id.clone(), Role::Assistant, "", Some(now)));
        (sequence_id, placeholder_id)
    }

    fn end(&self, sequence_id: u64) {
        let mut transcript = lock(&self.transcript);
        if transcript.active.as_ref().is_some_and(|a| a.sequence_id == sequence_id) {
            transcript.active = None;
        }
    }

    /// Replace the placeholder text and append `extra`, unless `token` was cancelled.
    fn write_if_current(&self, token: &CancellationToken, placeholder_id: &str, text: &str, extra: Vec<DisplayMessage>) -> bool {
        let mut transcript = lock(&self.transcript);
        if token.is_cancelled() {
            return false;
        }
        set_text(&mut transcript, placeholder_id, text);
        transcript.messages.extend(extra);
        true
    }

    fn placeholder_text(&self, placeholder_id: &str) -> String {
        lock(&self.transcript)
            .messages
            .iter()
            .find(|m| m.id == placeholder_id)
            .map(|m| m.text.clone())
            .unwrap_or_default()
    }
}

/// Mirrors streamed text into the transcript, then forwards to the caller.
struct Tracker<'a, H: ?Sized> {
    transcript: &'a Mutex<Transcript>,
    token: &'a CancellationToken,
    placeholder_id: &'a str,
    inner: &'a mut H,
    streamed: bool,
    opened: bool,
}

impl<H: StreamHandlers + ?Sized> StreamHandlers for Tracker<'_, H> {
    fn on_open(&mut self) {
        self.opened = true;
        let _guard = lock(self.transcript);
        if !self.token.is_cancelled() {
            self.inner.on_open();
        }
    }

    fn on_event(&mut self, event: &StreamEvent) {
        let _guard = lock(self.transcript);
        if !self.token.is_cancelled() {
            self.inner.on_event(event);
        }
    }

    fn on_delta(&mut self, delta: &str, full_text: &str, payload: &Payload) {
        let mut transcript = lock(self.transcript);
        if self.token.is_cancelled() {
            return;
        }
        self.streamed = true;
        set_text(&mut transcript, self.placeholder_id, full_text);
        self.inner.on_delta(delta, full_text, payload);
    }

    fn on_complete(&mut self, full_text: &str) {
        let _guard = lock(self.transcript);
        if !self.token.is_cancelled() {
            self.inner.on_complete(full_text);
        }
    }
}

fn set_text(transcript: &mut Transcript, placeholder_id: &str, text: &str) {
    if let Some(message) = transcript.messages.iter_mut().find(|m| m.id == placeholder_id) {
        text.clone_into(&mut message.text);
    }
}

fn lock(transcript: &Mutex<Transcript>) -> MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seconds since the Unix epoch, as a string.
fn timestamp() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "turn_test.rs"]
mod tests;
