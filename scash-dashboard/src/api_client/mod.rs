//! HTTP client for the miner manager API.
//!
//! Every call goes through [`Client::call`], which reads the body as text
//! before parsing it. Proxies and crashed backends answer with HTML, so a
//! body that is not a JSON object becomes a [`TransportError`] carrying
//! the raw text instead of a panic. JSON objects are normalized into an
//! [`Envelope`] whose `ok` and `status` are always present.

pub mod types;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::error::ServerError;
use crate::tracing::prelude::*;
use types::{CommandReply, HashratePoint, HashrateHistory, LogSnapshot, MinerStatus, SetupRequest};

/// Backend address used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

pub const STATUS_PATH: &str = "/api/status";
pub const LOGS_PATH: &str = "/api/logs";
pub const HISTORY_PATH: &str = "/api/hashrate-history";
pub const SETUP_PATH: &str = "/api/setup";
pub const START_PATH: &str = "/api/start";
pub const STOP_PATH: &str = "/api/stop";
pub const RESET_PATH: &str = "/api/reset-config";

/// Failure to get a usable JSON object back from the backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {path} failed: {source}")]
    Network {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// Body was not JSON at all (HTML error page, truncated body, ...).
    #[error("unexpected response from {path} (HTTP {status})")]
    UnexpectedBody {
        path: String,
        status: u16,
        raw: String,
    },

    /// Body was JSON but not an object.
    #[error("unexpected response from {path} (HTTP {status}): not a JSON object")]
    NotAnObject {
        path: String,
        status: u16,
        raw: String,
    },

    /// Body was an object but did not have the expected shape.
    #[error("malformed response from {path} (HTTP {status}): {source}")]
    Decode {
        path: String,
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// HTTP status of the failed exchange, if a response arrived at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Network { source, .. } => source.status().map(|s| s.as_u16()),
            TransportError::UnexpectedBody { status, .. }
            | TransportError::NotAnObject { status, .. }
            | TransportError::Decode { status, .. } => Some(*status),
        }
    }

    /// Raw body text, when the failure was about the body.
    pub fn raw(&self) -> Option<&str> {
        match self {
            TransportError::UnexpectedBody { raw, .. } | TransportError::NotAnObject { raw, .. } => {
                Some(raw)
            }
            _ => None,
        }
    }

    /// Always false; lets callers treat every outcome as `{ ok, status }`.
    pub fn ok(&self) -> bool {
        false
    }
}

/// A JSON object response with `ok` and `status` resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub ok: bool,
    pub status: u16,
    /// Full body, with `ok` and `status` inserted when the backend left
    /// them out.
    pub body: Map<String, Value>,
}

impl Envelope {
    /// Normalize a decoded body.
    ///
    /// An explicit boolean `ok` wins; otherwise 2xx means success. A
    /// numeric `status` in the body wins over the HTTP status. A body
    /// `status` of any other type is left as the backend sent it.
    pub fn from_parts(path: &str, http_status: u16, value: Value) -> Result<Self, TransportError> {
        let Value::Object(mut body) = value else {
            return Err(TransportError::NotAnObject {
                path: path.to_owned(),
                status: http_status,
                raw: value.to_string(),
            });
        };

        let ok = match body.get("ok").and_then(Value::as_bool) {
            Some(ok) => ok,
            None => {
                let ok = (200..300).contains(&http_status);
                body.insert("ok".into(), Value::Bool(ok));
                ok
            }
        };

        let status = match body.get("status") {
            Some(value) => value
                .as_u64()
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(http_status),
            None => {
                body.insert("status".into(), json!(http_status));
                http_status
            }
        };

        Ok(Self { ok, status, body })
    }

    /// Parse a raw body as it came off the wire.
    pub fn parse(path: &str, http_status: u16, raw: String) -> Result<Self, TransportError> {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Self::from_parts(path, http_status, value),
            Err(_) => Err(TransportError::UnexpectedBody {
                path: path.to_owned(),
                status: http_status,
                raw,
            }),
        }
    }

    /// Non-empty `error` text, if the backend sent one.
    pub fn error_text(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Decode the body into a typed response.
    pub fn decode<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(|source| {
            TransportError::Decode {
                path: path.to_owned(),
                status: self.status,
                source,
            }
        })
    }

    fn rejection(&self) -> Rejection {
        Rejection {
            status: self.status,
            error: self.error_text().map(str::to_owned),
        }
    }
}

/// The backend answered, and said no.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub error: Option<String>,
}

impl Rejection {
    /// Turn into a displayable error, using `fallback` when the backend
    /// gave no text.
    pub fn into_server_error(self, fallback: &str) -> ServerError {
        ServerError {
            status: self.status,
            message: self.error.unwrap_or_else(|| fallback.to_owned()),
        }
    }
}

/// Outcome of a request that reached the backend and got JSON back.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply<T> {
    Accepted(T),
    Rejected(Rejection),
}

impl<T> Reply<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Accepted(v) => Reply::Accepted(f(v)),
            Reply::Rejected(r) => Reply::Rejected(r),
        }
    }
}

/// Manager API client.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_URL)
    }

    pub fn with_base_url(url: impl Into<String>) -> Self {
        let mut base_url = url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and normalize whatever comes back.
    ///
    /// No retries and no client-side deadline: a hung request only holds
    /// up its own caller.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Envelope, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let network = |source| TransportError::Network {
            path: path.to_owned(),
            source,
        };

        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            // .json() sets Content-Type: application/json.
            request = request.json(body);
        }

        let response = request.send().await.map_err(network)?;
        let status = response.status().as_u16();
        let raw = response.text().await.map_err(network)?;

        trace!(%method, path, status, len = raw.len(), "API response");

        let envelope = Envelope::parse(path, status, raw);
        if let Err(e) = &envelope {
            debug!(path, status, error = %e, "API response was not a JSON object");
        }
        envelope
    }

    async fn get(&self, path: &str) -> Result<Envelope, TransportError> {
        self.call(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Envelope, TransportError> {
        self.call(Method::POST, path, Some(body)).await
    }

    async fn command(&self, path: &str, body: &Value) -> Result<Reply<CommandReply>, TransportError> {
        let envelope = self.post(path, body).await?;
        decode_reply(path, &envelope)
    }

    pub async fn get_status(&self) -> Result<Reply<MinerStatus>, TransportError> {
        let envelope = self.get(STATUS_PATH).await?;
        decode_reply(STATUS_PATH, &envelope)
    }

    /// Fetch the log buffer.
    ///
    /// A body carrying only an `error` is a rejection even when the HTTP
    /// status said success.
    pub async fn get_logs(&self) -> Result<Reply<String>, TransportError> {
        let envelope = self.get(LOGS_PATH).await?;
        let reply: Reply<LogSnapshot> = decode_reply(LOGS_PATH, &envelope)?;
        Ok(match reply {
            Reply::Accepted(LogSnapshot { text: None }) if envelope.error_text().is_some() => {
                Reply::Rejected(envelope.rejection())
            }
            other => other.map(|snapshot| snapshot.text.unwrap_or_default()),
        })
    }

    pub async fn get_hashrate_history(&self) -> Result<Reply<Vec<HashratePoint>>, TransportError> {
        let envelope = self.get(HISTORY_PATH).await?;
        let reply: Reply<HashrateHistory> = decode_reply(HISTORY_PATH, &envelope)?;
        Ok(reply.map(|history| history.points))
    }

    pub async fn submit_setup(
        &self,
        request: &SetupRequest,
    ) -> Result<Reply<CommandReply>, TransportError> {
        let body = serde_json::to_value(request).map_err(|source| TransportError::Decode {
            path: SETUP_PATH.to_owned(),
            status: 0,
            source,
        })?;
        self.command(SETUP_PATH, &body).await
    }

    pub async fn start(&self) -> Result<Reply<CommandReply>, TransportError> {
        self.command(START_PATH, &json!({})).await
    }

    pub async fn stop(&self) -> Result<Reply<CommandReply>, TransportError> {
        self.command(STOP_PATH, &json!({})).await
    }

    pub async fn reset_config(&self) -> Result<Reply<CommandReply>, TransportError> {
        self.command(RESET_PATH, &json!({})).await
    }
}

fn decode_reply<T: DeserializeOwned>(
    path: &str,
    envelope: &Envelope,
) -> Result<Reply<T>, TransportError> {
    if envelope.ok {
        envelope.decode(path).map(Reply::Accepted)
    } else {
        Ok(Reply::Rejected(envelope.rejection()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::MockBackend;

    #[test]
    fn injects_ok_and_status_from_http() {
        let env = Envelope::from_parts("/x", 200, json!({ "logs": "" })).unwrap();
        assert!(env.ok);
        assert_eq!(env.status, 200);
        assert_eq!(env.body["ok"], true);
        assert_eq!(env.body["status"], 200);

        let env = Envelope::from_parts("/x", 503, json!({ "error": "busy" })).unwrap();
        assert!(!env.ok);
        assert_eq!(env.status, 503);
        assert_eq!(env.error_text(), Some("busy"));
    }

    #[test]
    fn explicit_fields_win_over_http() {
        let env = Envelope::from_parts("/x", 200, json!({ "ok": false, "status": 409 })).unwrap();
        assert!(!env.ok);
        assert_eq!(env.status, 409);

        let env = Envelope::from_parts("/x", 400, json!({ "ok": true })).unwrap();
        assert!(env.ok);
        assert_eq!(env.status, 400);
    }

    #[test]
    fn non_numeric_body_status_is_kept() {
        let env = Envelope::from_parts("/x", 200, json!({ "status": "running" })).unwrap();
        assert!(env.ok);
        assert_eq!(env.status, 200);
        assert_eq!(env.body["status"], "running");
    }

    #[test]
    fn empty_error_text_is_ignored() {
        let env = Envelope::from_parts("/x", 500, json!({ "ok": false, "error": "" })).unwrap();
        assert_eq!(env.error_text(), None);
    }

    #[test]
    fn html_body_is_a_transport_error() {
        let err = Envelope::parse("/api/status", 500, "<html>Bad Gateway</html>".into())
            .unwrap_err();
        assert!(matches!(err, TransportError::UnexpectedBody { status: 500, .. }));
        assert_eq!(err.raw(), Some("<html>Bad Gateway</html>"));
        assert_eq!(err.status(), Some(500));
        assert!(!err.ok());
    }

    #[test]
    fn non_object_json_is_a_transport_error() {
        let err = Envelope::parse("/api/status", 200, "[1,2]".into()).unwrap_err();
        assert!(matches!(err, TransportError::NotAnObject { status: 200, .. }));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = Client::with_base_url("http://host:8080//");
        assert_eq!(client.base_url(), "http://host:8080");
    }

    #[tokio::test]
    async fn server_error_page_does_not_fail_the_call_hard() {
        let backend = MockBackend::start().await;
        backend.respond_raw(STATUS_PATH, 500, "<html><body>Internal Server Error</body></html>");

        let client = Client::with_base_url(backend.url());
        let err = client.get_status().await.unwrap_err();

        assert!(matches!(err, TransportError::UnexpectedBody { status: 500, .. }));
    }

    #[tokio::test]
    async fn status_with_string_threads_and_text_status_decodes() {
        let backend = MockBackend::start().await;
        backend.respond(
            STATUS_PATH,
            200,
            json!({ "ok": true, "status": "running", "running": true, "threads": "4" }),
        );

        let client = Client::with_base_url(backend.url());
        let Reply::Accepted(status) = client.get_status().await.unwrap() else {
            panic!("expected status");
        };

        assert!(status.running);
        assert_eq!(status.threads, Some(4));
    }

    #[tokio::test]
    async fn commands_send_empty_json_object() {
        let backend = MockBackend::start().await;
        backend.respond(START_PATH, 200, json!({ "ok": true, "message": "已请求启动 Miner" }));

        let client = Client::with_base_url(backend.url());
        let reply = client.start().await.unwrap();

        assert_eq!(
            reply,
            Reply::Accepted(CommandReply {
                message: Some("已请求启动 Miner".into())
            })
        );
        let calls = backend.calls_to(START_PATH);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(calls[0].body, json!({}));
    }

    #[tokio::test]
    async fn rejected_command_keeps_server_text() {
        let backend = MockBackend::start().await;
        backend.respond(
            START_PATH,
            400,
            json!({ "ok": false, "error": "配置未完成，请先在向导中填写钱包和矿池。" }),
        );

        let client = Client::with_base_url(backend.url());
        let Reply::Rejected(rejection) = client.start().await.unwrap() else {
            panic!("expected rejection");
        };

        let err = rejection.into_server_error("启动失败");
        assert_eq!(err.status, 400);
        assert_eq!(err.message, "配置未完成，请先在向导中填写钱包和矿池。");
    }

    #[tokio::test]
    async fn logs_error_body_is_rejected() {
        let backend = MockBackend::start().await;
        backend.respond(LOGS_PATH, 200, json!({ "error": "log buffer unavailable" }));

        let client = Client::with_base_url(backend.url());
        let reply = client.get_logs().await.unwrap();

        assert!(matches!(
            reply,
            Reply::Rejected(Rejection { error: Some(ref e), .. }) if e == "log buffer unavailable"
        ));
    }

    #[tokio::test]
    async fn history_points_are_decoded() {
        let backend = MockBackend::start().await;
        backend.respond(
            HISTORY_PATH,
            200,
            json!({ "ok": true, "points": [
                { "ts": 1000, "hs": 500.0, "ewma_hs": 480.0 },
                { "ts": 1010, "hs": 520.0, "ewma_hs": 490.0 },
            ]}),
        );

        let client = Client::with_base_url(backend.url());
        let Reply::Accepted(points) = client.get_hashrate_history().await.unwrap() else {
            panic!("expected points");
        };

        assert_eq!(points.len(), 2);
        assert_eq!(points[1].ts, 1010);
        assert_eq!(points[1].ewma_hs, 490.0);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        // Nothing listens on port 9 (discard) on a test machine.
        let client = Client::with_base_url("http://127.0.0.1:9");
        let err = client.get_status().await.unwrap_err();
        assert!(matches!(err, TransportError::Network { .. }));
    }
}
