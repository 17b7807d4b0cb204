//! Streaming client: one streamed turn from request to terminal state.
//!
//! DESIGN
//! ======
//! The response body is read chunk by chunk through a [`FrameDecoder`]; each
//! complete frame is decoded, classified, and merged into the turn's
//! [`Accumulator`]. Handlers see every frame (`on_event`), every non-empty
//! delta (`on_delta`), and exactly one `on_complete` on success.
//!
//! Termination, highest priority first:
//! 1. the `[DONE]` sentinel
//! 2. a completion tag (or a terminal snapshot)
//! 3. the body closing with no more bytes, which completes with whatever
//!    text has accumulated
//!
//! CANCELLATION
//! ============
//! Every await races the caller's [`CancellationToken`] (biased toward the
//! token). Dropping the body on cancellation closes the connection, which is
//! what tells the relay to abort its own upstream request. The token is also
//! checked before every callback, so nothing fires once it is cancelled, and
//! `on_complete` is never called for a cancelled turn.

use std::fmt::Display;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wire::{Accumulator, FrameDecoder, Payload, SseFrame, StreamEvent, StreamPayload, classify};

use crate::client::{AgentClient, Session, Turn};
use crate::error::ClientError;

/// Callbacks for one streamed turn. Every method defaults to a no-op.
pub trait StreamHandlers {
    /// The relay accepted the request and the body is about to be read.
    fn on_open(&mut self) {}

    /// Every decoded frame, whatever it classifies as.
    fn on_event(&mut self, _event: &StreamEvent) {}

    /// A non-empty delta, with the full text after applying it.
    fn on_delta(&mut self, _delta: &str, _full_text: &str, _payload: &Payload) {}

    /// The turn finished; called at most once.
    fn on_complete(&mut self, _full_text: &str) {}
}

impl StreamHandlers for () {}

/// Why a stream ended successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnding {
    Sentinel,
    Completion,
    /// The body closed without a terminal frame.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub full_text: String,
    pub ending: StreamEnding,
}

impl AgentClient {
    /// Stream one turn's reply.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Cancelled`] when `cancel` fires at any point
    /// - [`ClientError::Transport`] on a network failure, a non-2xx reply, a
    ///   broken body, or a gap between chunks longer than the idle timeout
    pub async fn stream_message<H>(
        &self,
        session: &Session,
        turn: Turn<'_>,
        cancel: &CancellationToken,
        handlers: &mut H,
    ) -> Result<StreamOutcome, ClientError>
    where
        H: StreamHandlers + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let request = self
            .http
            .post(self.stream_url(session))
            .header(ACCEPT, "text/event-stream")
            .json(&self.turn_body(session, turn))
            .send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Cancelled),
                text = response.text() => text.unwrap_or_default(),
            };
            return Err(ClientError::http_status(status.as_u16(), body));
        }

        debug!(session_id = %session.id, sequence_id = turn.sequence_id, "stream opened");
        handlers.on_open();

        let mut body = Box::pin(response.bytes_stream());
        let idle = self.config().idle_timeout;
        let mut decoder = FrameDecoder::new();
        let mut acc = Accumulator::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Cancelled),
                chunk = next_chunk(&mut body, idle) => chunk?,
            };
            let Some(chunk) = chunk else { break };

            for frame in decoder.push(&chunk) {
                if let Some(ending) = handle_frame(frame, &mut acc, cancel, handlers)? {
                    return finish(acc, ending, cancel, handlers);
                }
            }
        }

        if let Some(frame) = decoder.finish() {
            if let Some(ending) = handle_frame(frame, &mut acc, cancel, handlers)? {
                return finish(acc, ending, cancel, handlers);
            }
        }
        finish(acc, StreamEnding::Closed, cancel, handlers)
    }
}

/// Feed one frame through classification and the accumulator.
///
/// Returns the ending if the frame is terminal.
fn handle_frame<H>(
    frame: SseFrame,
    acc: &mut Accumulator,
    cancel: &CancellationToken,
    handlers: &mut H,
) -> Result<Option<StreamEnding>, ClientError>
where
    H: StreamHandlers + ?Sized,
{
    let event = StreamEvent::from(frame);
    ensure_live(cancel)?;
    handlers.on_event(&event);

    let step = classify(&event.payload);
    if step == StreamPayload::Sentinel {
        return Ok(Some(StreamEnding::Sentinel));
    }
    if let Some(delta) = acc.apply(&step) {
        ensure_live(cancel)?;
        handlers.on_delta(&delta, acc.text(), &event.payload);
    }
    Ok(step.is_terminal().then_some(StreamEnding::Completion))
}

fn finish<H>(
    acc: Accumulator,
    ending: StreamEnding,
    cancel: &CancellationToken,
    handlers: &mut H,
) -> Result<StreamOutcome, ClientError>
where
    H: StreamHandlers + ?Sized,
{
    ensure_live(cancel)?;
    handlers.on_complete(acc.text());
    Ok(StreamOutcome { full_text: acc.into_text(), ending })
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ClientError> {
    if cancel.is_cancelled() { Err(ClientError::Cancelled) } else { Ok(()) }
}

/// Next body chunk, or `None` at end of body.
async fn next_chunk<S, B, E>(body: &mut S, idle: Option<Duration>) -> Result<Option<B>, ClientError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    E: Display,
{
    let next = match idle {
        Some(limit) => tokio::time::timeout(limit, body.next()).await.map_err(|_| {
            warn!(idle_secs = limit.as_secs_f64(), "stream idle; giving up");
            ClientError::transport(format!("no data received for {:.1}s", limit.as_secs_f64()))
        })?,
        None => body.next().await,
    };
    next.transpose()
        .map_err(|e| ClientError::transport(format!("stream read failed: {e}")))
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
