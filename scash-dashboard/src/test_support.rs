//! In-process stand-in for the manager backend.
//!
//! Serves canned responses per path and records every request, so tests
//! can assert on what was (or was not) sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::api_client::{HISTORY_PATH, LOGS_PATH, STATUS_PATH};

/// One request as the backend saw it.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    /// Decoded JSON body, or `Null` when empty or not JSON.
    pub body: Value,
}

#[derive(Clone)]
struct Canned {
    status: u16,
    body: String,
    json: bool,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    routes: HashMap<String, Canned>,
    calls: Vec<RecordedCall>,
}

type Shared = Arc<Mutex<Inner>>;

#[derive(Clone)]
pub struct MockBackend {
    inner: Shared,
    url: String,
}

impl MockBackend {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let inner = Shared::default();
        let app = Router::new().fallback(handle).with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            inner,
            url: format!("http://{addr}"),
        }
    }

    /// Start with a configured, running miner and empty logs/history.
    pub async fn running() -> Self {
        let backend = Self::start().await;
        backend.respond(
            STATUS_PATH,
            200,
            json!({ "ok": true, "needs_setup": false, "running": true, "wallet": "abc" }),
        );
        backend.respond(LOGS_PATH, 200, json!({ "ok": true, "logs": "" }));
        backend.respond(HISTORY_PATH, 200, json!({ "ok": true, "points": [] }));
        backend
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.set(path, Canned {
            status,
            body: body.to_string(),
            json: true,
            delay: None,
        });
    }

    pub fn respond_raw(&self, path: &str, status: u16, body: &str) {
        self.set(path, Canned {
            status,
            body: body.to_owned(),
            json: false,
            delay: None,
        });
    }

    /// Like [`respond`](Self::respond), but hold the answer for `delay`.
    pub fn respond_after(&self, path: &str, delay: Duration, body: Value) {
        self.set(path, Canned {
            status: 200,
            body: body.to_string(),
            json: true,
            delay: Some(delay),
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    fn set(&self, path: &str, canned: Canned) {
        self.inner
            .lock()
            .unwrap()
            .routes
            .insert(path.to_owned(), canned);
    }
}

async fn handle(
    State(inner): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_owned();
    let canned = {
        let mut inner = inner.lock().unwrap();
        inner.calls.push(RecordedCall {
            method: method.to_string(),
            path: path.clone(),
            content_type: headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });
        inner.routes.get(&path).cloned()
    };

    let Some(canned) = canned else {
        return (StatusCode::NOT_FOUND, "<html>Not Found</html>").into_response();
    };

    if let Some(delay) = canned.delay {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(canned.status).unwrap();
    let content_type = if canned.json {
        "application/json"
    } else {
        "text/html"
    };
    (status, [(header::CONTENT_TYPE, content_type)], canned.body).into_response()
}
