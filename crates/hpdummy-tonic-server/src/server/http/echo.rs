//! Request reflection: the JSON document most endpoints answer with.

use super::AppState;
use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use core::time::Duration;
use http_body_util::BodyExt;
use serde::Serialize;
use std::{collections::BTreeMap, fmt, net::SocketAddr};
use tokio::time::Instant;

/// Request bodies are echoed up to this many bytes.
pub const MAX_BODY_PREVIEW: usize = 1024 * 1024;

/// Granularity of slow body reads.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

const TRUNCATED_SUFFIX: &str = "...[TRUNCATED]";

/// Fixed token counts so gateways that meter LLM traffic find a usage block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "is_zero")]
    pub prompt_tokens: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub completion_tokens: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub input_tokens: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_tokens: u32,
}

impl Usage {
    pub const ECHO: Self = Self {
        prompt_tokens: 1,
        completion_tokens: 2,
        input_tokens: 100,
        output_tokens: 200,
        total_tokens: 300,
    };
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestJson {
    #[serde(rename = "_myhostname")]
    pub hostname: String,
    pub uri: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub content_type: String,
    pub body: String,
    pub body_size: u64,
    #[serde(skip_serializing_if = "is_false")]
    pub body_truncated: bool,
    pub usage: Usage,
    pub source_addr: String,
    pub destination_addr: String,
}

impl RequestJson {
    /// Everything but the body.
    pub fn from_parts(parts: &Parts, state: &AppState) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        let source_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        Self {
            hostname: state.hostname.to_string(),
            uri: full_uri(parts),
            method: parts.method.to_string(),
            headers,
            content_type,
            body: String::new(),
            body_size: 0,
            body_truncated: false,
            usage: Usage::ECHO,
            source_addr,
            destination_addr: state
                .local_addr
                .map(|addr| addr.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn set_body(&mut self, body: BodyPreview) {
        self.body = body.text;
        self.body_size = body.size;
        self.body_truncated = body.truncated;
    }
}

/// `scheme://host/path?query`, falling back to the request target when no
/// host is known.
fn full_uri(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() {
        return parts.uri.to_string();
    }
    let target = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    match parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
    {
        Some(host) => format!("http://{host}{target}"),
        None => target.to_owned(),
    }
}

/// What was read from a request body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodyPreview {
    /// First [`MAX_BODY_PREVIEW`] bytes, lossily decoded, with a marker when cut.
    pub text: String,
    pub size: u64,
    pub truncated: bool,
    /// Number of `READ_CHUNK_SIZE` reads it took.
    pub chunks_read: u64,
    pub read_time: Duration,
}

/// Reads a body to the end, keeping a bounded preview.
///
/// With `delay_per_chunk` the body is consumed in [`READ_CHUNK_SIZE`] pieces
/// with a pause before each piece after the first, imitating a slow backend.
/// A read error ends the body early; what was read so far is reported.
pub async fn read_body<B>(mut body: B, delay_per_chunk: Option<Duration>) -> BodyPreview
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    let start = Instant::now();
    let mut preview = Vec::new();
    let mut out = BodyPreview::default();

    while let Some(frame) = body.frame().await {
        let data = match frame {
            Ok(frame) => match frame.into_data() {
                Ok(data) => data,
                Err(_) => continue,
            },
            Err(e) => {
                tracing::debug!(error = %e, read = out.size, "request body read error");
                break;
            }
        };

        for piece in data.chunks(READ_CHUNK_SIZE) {
            if let Some(delay) = delay_per_chunk {
                if out.chunks_read > 0 {
                    tokio::time::sleep(delay).await;
                }
            }
            out.chunks_read += 1;
            out.size += piece.len() as u64;

            let room = MAX_BODY_PREVIEW - preview.len();
            if piece.len() > room {
                out.truncated = true;
            }
            preview.extend_from_slice(&piece[..piece.len().min(room)]);
        }
    }

    out.text = String::from_utf8_lossy(&preview).into_owned();
    if out.truncated {
        out.text.push_str(TRUNCATED_SUFFIX);
    }
    out.read_time = start.elapsed();
    out
}

/// Serialises `value` as the response body with `status`.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    (status, Json(value)).into_response()
}

/// A pre-rendered JSON document.
pub fn raw_json(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(body),
    )
        .into_response()
}

/// Reads the request and reflects it back.
pub async fn reflect(state: &AppState, request: Request, usage: Usage) -> RequestJson {
    let (parts, body) = request.into_parts();
    let mut json = RequestJson::from_parts(&parts, state);
    json.usage = usage;
    json.set_body(read_body(body, None).await);
    json
}

pub async fn handler(State(state): State<AppState>, request: Request) -> Response {
    let json = reflect(&state, request, Usage::ECHO).await;
    tracing::debug!(
        kind = "HTTP",
        method = %json.method,
        uri = %json.uri,
        body_size = json.body_size,
        src = %json.source_addr,
        "echo"
    );
    json_response(StatusCode::OK, &json)
}
