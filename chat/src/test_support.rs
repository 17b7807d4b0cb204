//! In-process fake relay and recording stream handlers for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wire::Payload;

use crate::client::{AgentClient, Session};
use crate::config::ClientConfig;
use crate::stream::StreamHandlers;

/// A plain JSON route reply.
#[derive(Clone)]
pub enum Reply {
    Json(StatusCode, Value),
    Text(StatusCode, &'static str),
}

/// How one call to the stream route behaves.
#[derive(Clone)]
pub enum StreamReply {
    /// Send the chunks, then end the body.
    Chunks(Vec<&'static str>),
    /// Send the chunks, then go silent forever.
    Stall(Vec<&'static str>),
    /// Send the chunks, pause briefly, then abort the body mid-stream.
    Broken(Vec<&'static str>),
    /// Fail before streaming.
    Status(StatusCode, &'static str),
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub body: Value,
}

pub struct MockRelay {
    pub session: Reply,
    pub messages: Reply,
    session_stalls: AtomicUsize,
    streams: Mutex<VecDeque<StreamReply>>,
    hits: Mutex<Vec<Hit>>,
}

impl MockRelay {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: Reply::Json(StatusCode::OK, serde_json::json!({ "sessionId": "s-1" })),
            messages: Reply::Json(StatusCode::OK, serde_json::json!({ "messages": [] })),
            session_stalls: AtomicUsize::new(0),
            streams: Mutex::new(VecDeque::new()),
            hits: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_session(mut self, reply: Reply) -> Self {
        self.session = reply;
        self
    }

    #[must_use]
    pub fn with_messages(mut self, reply: Reply) -> Self {
        self.messages = reply;
        self
    }

    /// The first `count` session calls never answer.
    #[must_use]
    pub fn with_session_stalls(self, count: usize) -> Self {
        self.session_stalls.store(count, Ordering::SeqCst);
        self
    }

    /// Queue the reply for the next stream call. Unqueued calls get a 500.
    #[must_use]
    pub fn with_stream(self, reply: StreamReply) -> Self {
        self.streams.lock().unwrap().push_back(reply);
        self
    }

    #[must_use]
    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    #[must_use]
    pub fn hits_on(&self, suffix: &str) -> Vec<Hit> {
        self.hits().into_iter().filter(|h| h.path.ends_with(suffix)).collect()
    }

    /// Serve on an ephemeral port; returns the mock and a client pointed at it.
    pub async fn start(self) -> (Arc<Self>, AgentClient) {
        self.start_with(|_| {}).await
    }

    /// Like [`MockRelay::start`], letting the caller adjust the client config.
    pub async fn start_with(self, adjust: impl FnOnce(&mut ClientConfig)) -> (Arc<Self>, AgentClient) {
        let mock = Arc::new(self);
        let router = Router::new()
            .route("/api/agent/session", post(session_route))
            .route("/api/agent/session/{id}/messages", post(messages_route))
            .route("/api/agent/session/{id}/messages/stream", post(stream_route))
            .with_state(Arc::clone(&mock));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut config = ClientConfig::new(format!("http://{addr}/api/agent"));
        adjust(&mut config);
        (mock, AgentClient::new(config).unwrap())
    }

    fn record(&self, path: String, body: &Bytes) {
        let body = serde_json::from_slice(body).unwrap_or(Value::Null);
        self.hits.lock().unwrap().push(Hit { path, body });
    }
}

fn reply(reply: Reply) -> Response {
    match reply {
        Reply::Json(status, value) => (status, axum::Json(value)).into_response(),
        Reply::Text(status, text) => (status, text).into_response(),
    }
}

async fn session_route(State(mock): State<Arc<MockRelay>>, body: Bytes) -> Response {
    mock.record("/session".into(), &body);
    let stalled = mock
        .session_stalls
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if stalled {
        std::future::pending::<()>().await;
    }
    reply(mock.session.clone())
}

async fn messages_route(State(mock): State<Arc<MockRelay>>, Path(id): Path<String>, body: Bytes) -> Response {
    mock.record(format!("/session/{id}/messages"), &body);
    reply(mock.messages.clone())
}

async fn stream_route(State(mock): State<Arc<MockRelay>>, Path(id): Path<String>, body: Bytes) -> Response {
    mock.record(format!("/session/{id}/messages/stream"), &body);
    let next = mock.streams.lock().unwrap().pop_front();
    let Some(next) = next else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no stream queued").into_response();
    };

    let chunks = |list: Vec<&'static str>| stream::iter(list.into_iter().map(|c| Ok::<_, io::Error>(Bytes::from_static(c.as_bytes()))));
    let body: BoxStream<'static, Result<Bytes, io::Error>> = match next {
        StreamReply::Status(status, text) => return (status, text).into_response(),
        StreamReply::Chunks(list) => chunks(list).boxed(),
        StreamReply::Stall(list) => chunks(list).chain(stream::pending()).boxed(),
        StreamReply::Broken(list) => chunks(list)
            .chain(stream::once(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Err(io::Error::other("upstream reset"))
            }))
            .boxed(),
    };
    ([(CONTENT_TYPE, "text/event-stream; charset=utf-8")], Body::from_stream(body)).into_response()
}

/// A session value for direct client calls.
#[must_use]
pub fn session(id: &str) -> Session {
    Session { id: id.into(), assistant_id: Some("a-1".into()), endpoint: String::new() }
}

// =============================================================================
// RECORDING HANDLERS
// =============================================================================

/// Stream handlers that record every callback.
#[derive(Default)]
pub struct Recorder {
    pub opened: usize,
    pub events: usize,
    pub deltas: Vec<String>,
    pub full_texts: Vec<String>,
    pub completions: Vec<String>,
    /// Cancelled from inside the first `on_delta`.
    pub cancel_on_delta: Option<CancellationToken>,
    /// Receives a copy of every delta as it arrives.
    pub delta_tx: Option<mpsc::UnboundedSender<String>>,
}

impl StreamHandlers for Recorder {
    fn on_open(&mut self) {
        self.opened += 1;
    }

    fn on_event(&mut self, _event: &wire::StreamEvent) {
        self.events += 1;
    }

    fn on_delta(&mut self, delta: &str, full_text: &str, _payload: &Payload) {
        self.deltas.push(delta.to_owned());
        self.full_texts.push(full_text.to_owned());
        if let Some(tx) = &self.delta_tx {
            let _ = tx.send(delta.to_owned());
        }
        if let Some(token) = self.cancel_on_delta.take() {
            token.cancel();
        }
    }

    fn on_complete(&mut self, full_text: &str) {
        self.completions.push(full_text.to_owned());
    }
}
