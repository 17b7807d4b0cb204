//! Client error taxonomy.
//!
//! Undecodable stream frames are not errors: they are kept as raw text and
//! run through the shape-tolerant extractor like any other payload.

/// Errors surfaced by the chat client.
///
/// `Clone` so a failed session can be shared with every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The relay refused to create a session, or answered without an id.
    #[error("session creation failed: status {status}: {body}")]
    SessionCreation { status: u16, body: String },

    /// Network failure, non-2xx reply, broken body, or idle stream.
    #[error("{}", transport_message(.status.as_ref().copied(), .message))]
    Transport { status: Option<u16>, message: String },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport { status: None, message: message.into() }
    }

    pub(crate) fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::Transport { status: Some(status), message: body.into() }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn transport_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("relay returned status {status}: {message}"),
        None => format!("transport error: {message}"),
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport { status: err.status().map(|s| s.as_u16()), message: err.to_string() }
    }
}
