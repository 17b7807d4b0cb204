//! Session creation.
//!
//! The creation payload starts from a default set of fields. Caller
//! overrides replace individual top-level fields only; an override that is
//! `null` keeps the default.

use serde_json::{Map, Value, json};
use tracing::{debug, info};
use wire::{DisplayMessage, RelayRequest, extract_messages};

use crate::client::{AgentClient, Session};
use crate::error::ClientError;

/// Chunk types the client asks the agent to stream.
const STREAMED_CHUNK_TYPES: [&str; 1] = ["Text"];

/// A new session and any greeting the agent sent with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSession {
    pub session: Session,
    pub greeting: Vec<DisplayMessage>,
}

/// Default creation payload merged with caller `overrides`.
#[must_use]
pub fn build_session_payload(endpoint: &str, overrides: Option<&Map<String, Value>>) -> Value {
    let mut payload = Map::new();
    payload.insert("externalSessionKey".into(), json!(uuid::Uuid::new_v4().to_string()));
    payload.insert("instanceConfig".into(), json!({ "endpoint": endpoint }));
    payload.insert("streamingCapabilities".into(), json!({ "chunkTypes": STREAMED_CHUNK_TYPES }));
    payload.insert("bypassUser".into(), json!(false));

    for (key, value) in overrides.into_iter().flatten() {
        if !value.is_null() {
            payload.insert(key.clone(), value.clone());
        }
    }
    Value::Object(payload)
}

/// Session id from `sessionId`, `id`, or `session.id`, in that order.
#[must_use]
pub fn session_id_from(response: &Value) -> Option<String> {
    ["/sessionId", "/id", "/session/id"]
        .into_iter()
        .filter_map(|pointer| response.pointer(pointer))
        .find_map(|value| match value {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

impl AgentClient {
    /// Open a session through the relay.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionCreation`] on a non-2xx reply or a reply
    /// without a usable session id, and [`ClientError::Transport`] when the
    /// relay cannot be reached.
    pub async fn create_session(&self, overrides: Option<&Map<String, Value>>) -> Result<OpenedSession, ClientError> {
        let endpoint = self.config().instance_endpoint.clone();
        let body = RelayRequest {
            assistant_id: self.config().assistant_id.clone(),
            payload: Some(build_session_payload(&endpoint, overrides)),
        };

        let mut request = self.http.post(self.endpoint(&["session"])).json(&body);
        if let Some(limit) = self.config().idle_timeout {
            request = request.timeout(limit);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(ClientError::SessionCreation { status, body: text });
        }

        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let id = session_id_from(&parsed).ok_or(ClientError::SessionCreation { status, body: text })?;
        let greeting: Vec<DisplayMessage> = extract_messages(&parsed)
            .into_iter()
            .filter(DisplayMessage::has_text)
            .collect();

        info!(session_id = %id, greeting = greeting.len(), "agent session created");
        debug!(endpoint = %endpoint, "session instance endpoint");
        Ok(OpenedSession {
            session: Session { id, assistant_id: self.config().assistant_id.clone(), endpoint },
            greeting,
        })
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
