//! Synchronous dispatcher: send one message and wait for the whole reply.

use serde_json::Value;
use tracing::debug;
use wire::{DisplayMessage, extract_messages};

use crate::client::{AgentClient, Session, Turn};
use crate::error::ClientError;

impl AgentClient {
    /// Send one turn without streaming and extract every message in the reply.
    ///
    /// No filtering happens here; callers decide which roles to keep.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the relay is unreachable,
    /// answers with a non-2xx status, or returns a body that is not JSON.
    pub async fn send_message(&self, session: &Session, turn: Turn<'_>) -> Result<Vec<DisplayMessage>, ClientError> {
        let mut request = self.http.post(self.messages_url(session)).json(&self.turn_body(session, turn));
        if let Some(limit) = self.config().idle_timeout {
            request = request.timeout(limit);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::http_status(status.as_u16(), text));
        }

        let payload: Value = serde_json::from_str(&text)
            .map_err(|e| ClientError::transport(format!("invalid JSON from relay: {e}")))?;
        let messages = extract_messages(&payload);
        debug!(session_id = %session.id, count = messages.len(), "dispatch reply");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use wire::Role;

    use crate::test_support::{MockRelay, Reply, session};

    #[tokio::test]
    async fn extracts_every_message_in_reply() {
        let reply = json!({
            "messages": [
                {"id": "m1", "role": "user", "text": "hi"},
                {"id": "m2", "type": "Inform", "message": "Hello from the agent"},
            ]
        });
        let (mock, client) = MockRelay::new()
            .with_messages(Reply::Json(StatusCode::OK, reply))
            .start()
            .await;

        let metadata = json!({"channel": "cli"});
        let turn = Turn { text: "hi", sequence_id: 4, metadata: Some(&metadata) };
        let messages = client.send_message(&session("s-1"), turn).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].id, "m2");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text, "Hello from the agent");

        let hit = &mock.hits_on("/messages")[0];
        assert_eq!(hit.path, "/session/s-1/messages");
        assert_eq!(hit.body["payload"]["message"]["sequenceId"], 4);
        assert_eq!(hit.body["payload"]["message"]["metadata"], json!({"channel": "cli"}));
    }

    #[tokio::test]
    async fn non_success_carries_status_and_body() {
        let (_mock, client) = MockRelay::new()
            .with_messages(Reply::Text(StatusCode::SERVICE_UNAVAILABLE, "down"))
            .start()
            .await;

        let turn = Turn { text: "hi", sequence_id: 1, metadata: None };
        let err = client.send_message(&session("s-1"), turn).await.unwrap_err();
        assert_eq!(err, ClientError::Transport { status: Some(503), message: "down".into() });
    }

    #[tokio::test]
    async fn non_json_reply_is_a_transport_error() {
        let (_mock, client) = MockRelay::new()
            .with_messages(Reply::Text(StatusCode::OK, "<html>"))
            .start()
            .await;

        let turn = Turn { text: "hi", sequence_id: 1, metadata: None };
        let err = client.send_message(&session("s-1"), turn).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { status: None, .. }));
    }
}
