//! HTTP client for the relay's agent routes.
//!
//! DESIGN
//! ======
//! `AgentClient` is cheap to share behind an `Arc`: it owns one pooled
//! `reqwest::Client` and the config. The three operations live next to
//! their own logic:
//! - [`AgentClient::create_session`] in `session.rs`
//! - [`AgentClient::send_message`] in `dispatch.rs`
//! - [`AgentClient::stream_message`] in `stream.rs`

use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use wire::{RelayRequest, TurnPayload};

use crate::config::{CONNECT_TIMEOUT_SECS, ClientConfig};
use crate::error::ClientError;

/// An open upstream conversation. The id never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub assistant_id: Option<String>,
    pub endpoint: String,
}

/// One user message as sent to the relay.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub text: &'a str,
    /// Strictly increasing per session, starting at 1.
    pub sequence_id: u64,
    pub metadata: Option<&'a Value>,
}

pub struct AgentClient {
    pub(crate) http: reqwest::Client,
    config: ClientConfig,
    base: Url,
}

impl AgentClient {
    /// Build a client for the relay named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the relay URL does not parse, or
    /// [`ClientError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.relay_url).map_err(|e| ClientError::Config(format!("relay url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Config(format!("relay url cannot be a base: {}", config.relay_url)));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ClientError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config, base })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Relay URL for `segments` appended to the base path, each percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn messages_url(&self, session: &Session) -> Url {
        self.endpoint(&["session", &session.id, "messages"])
    }

    pub(crate) fn stream_url(&self, session: &Session) -> Url {
        self.endpoint(&["session", &session.id, "messages", "stream"])
    }

    pub(crate) fn turn_body(&self, session: &Session, turn: Turn<'_>) -> RelayRequest<TurnPayload> {
        let assistant_id = session.assistant_id.clone().or_else(|| self.config.assistant_id.clone());
        RelayRequest::turn(assistant_id, turn.sequence_id, turn.text, turn.metadata.cloned())
    }
}
