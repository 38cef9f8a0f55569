//! Axum server for download and service tests

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;

/// One request as the server saw it
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// How the server answers
#[derive(Clone)]
pub enum Reply {
    /// Serve `body`, honoring `Range: bytes=N-`
    File { body: Vec<u8>, ranges: bool },
    /// Announce the whole body, send the first `sent` bytes, then stall
    Stall { body: Vec<u8>, sent: usize },
    /// Fixed JSON body
    Json(String),
}

pub struct TestServer {
    pub url: String,
    pub requests: Arc<Mutex<Vec<Request>>>,
}

#[derive(Clone)]
struct ServerState {
    reply: Reply,
    requests: Arc<Mutex<Vec<Request>>>,
}

pub async fn serve(reply: Reply) -> TestServer {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = ServerState {
        reply,
        requests: Arc::clone(&requests),
    };
    let app = Router::new().fallback(handle).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestServer { url, requests }
}

/// Start offset of a `bytes=N-` range
fn range_start(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::RANGE)?
        .to_str()
        .ok()?
        .strip_prefix("bytes=")?
        .trim_end_matches('-')
        .parse()
        .ok()
}

async fn handle(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = range_start(&headers);
    state.requests.lock().push(Request {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect(),
        body: body.to_vec(),
    });

    match state.reply {
        Reply::File { body, ranges } => match start {
            Some(start) if ranges && start <= body.len() => {
                let content_range = format!(
                    "bytes {}-{}/{}",
                    start,
                    body.len().saturating_sub(1),
                    body.len()
                );
                (
                    StatusCode::PARTIAL_CONTENT,
                    [(header::CONTENT_RANGE, content_range)],
                    body[start..].to_vec(),
                )
                    .into_response()
            }
            _ => body.into_response(),
        },
        Reply::Stall { body, sent } => {
            let first = Bytes::copy_from_slice(&body[..sent]);
            let chunks = stream::once(async move { Ok::<_, Infallible>(first) }).chain(stream::pending());
            (
                [(header::CONTENT_LENGTH, body.len().to_string())],
                Body::from_stream(chunks),
            )
                .into_response()
        }
        Reply::Json(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
    }
}
