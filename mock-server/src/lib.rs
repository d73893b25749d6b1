//! Recording echo server for exercising HTTP clients.
//!
//! Every request, on any path and method, is recorded and answered with the
//! currently configured canned reply (200 with an empty JSON object until
//! told otherwise).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;

/// One request as the server saw it.
#[derive(Clone, Debug, Default)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone, Debug)]
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Shared server state: the canned reply and what has been received.
#[derive(Debug)]
pub struct Echo {
    reply: RwLock<Reply>,
    last: RwLock<Option<Recorded>>,
    hits: AtomicUsize,
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            reply: RwLock::new(Reply {
                status: 200,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: b"{}".to_vec(),
            }),
            last: RwLock::new(None),
            hits: AtomicUsize::new(0),
        }
    }
}

pub type Shared = Arc<Echo>;

impl Echo {
    pub fn shared() -> Shared {
        Arc::new(Self::default())
    }

    /// Answer subsequent requests with `status` and a raw body.
    pub async fn respond(&self, status: u16, body: impl Into<Vec<u8>>) {
        *self.reply.write().await = Reply {
            status,
            headers: Vec::new(),
            body: body.into(),
        };
    }

    /// Answer subsequent requests with `status` and `value` as JSON.
    pub async fn respond_json<T: Serialize>(&self, status: u16, value: &T) {
        *self.reply.write().await = Reply {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        };
    }

    pub async fn last(&self) -> Option<Recorded> {
        self.last.read().await.clone()
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub fn app(state: Shared) -> Router {
    Router::new().fallback(echo).with_state(state)
}

pub async fn run(listener: TcpListener, state: Shared) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

async fn echo(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let recorded = Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    };
    debug!(method = %recorded.method, path = %recorded.path, "recorded request");
    *state.last.write().await = Some(recorded);
    state.hits.fetch_add(1, Ordering::SeqCst);

    let reply = state.reply.read().await.clone();
    let mut out = HeaderMap::new();
    for (name, value) in &reply.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<axum::http::HeaderName>(),
            value.parse::<axum::http::HeaderValue>(),
        ) {
            out.append(name, value);
        }
    }
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, out, reply.body)
}
