//! HTTP front end.
//!
//! One `axum` router serves every endpoint over HTTP/1.1 and h2c. A
//! middleware stamps `Connection: keep-alive` on each response, switching to
//! `Connection: close` once the process is draining so persistent clients
//! reconnect elsewhere.
//!
//! - [`echo`]: request reflection (`/` and anything unmatched).
//! - [`binary`]: `/bin/{size}` synthetic downloads.
//! - [`chunked`]: `/chunked/{count}` paced chunked responses.
//! - [`delay`]: `/delay/{reply_ms}[/{read_ms}]` slow replies and slow reads.
//! - [`status`]: `/status/{code}` arbitrary status codes.
//! - [`upload`]: `/upload` body sink.
//! - [`nousage`]: `/nousage/*` malformed metering responses.
//! - [`websocket`]: `/ws` echo and `/ws/close` server-initiated close.

pub mod binary;
pub mod chunked;
pub mod delay;
pub mod echo;
pub mod nousage;
pub mod params;
pub mod status;
pub mod upload;
pub mod websocket;

use crate::server::telemetry;
use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use hpdummy::{BufferPool, Drain};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const HELP: &str = "Available endpoints:
  - /           -> Echo server (returns request details as JSON)
  - /health      -> Health check (returns {\"status\":\"ok\"})
  - /help        -> This help message
  - /bin/{size} -> Binary response (1K, 10M, 1G, 10000G or any byte count like 11111) ?chunked=true for chunked encoding
  - /chunked/{count} -> Chunked response (e.g., /chunked/10?size=1024&delay=100), size up to the buffer size
  - /delay/{reply_ms}[/{read_chunk_delay_ms}] -> Delay simulation
      /delay/1000           -> 1s delay before reply, fast read
      /delay/1000/100       -> 1s delay before reply, 100ms delay per 64KB chunk read
      /delay/0/50           -> No reply delay, 50ms delay per chunk (slow consumer)
  - /status/{code} -> Return specific HTTP status code (e.g., /status/404)
  - /upload     -> Upload sink (streams and discards body, returns byte count)
  - /nousage/*   -> Responses without usage, with wrong Content-Type, bad JSON or empty body
  - /ws         -> WebSocket echo server
  - /ws/close   -> WebSocket server-initiated close test";

const HEALTH: &str = r#"{"status":"ok"}"#;

/// Shared by every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub pool: BufferPool,
    pub drain: Drain,
    pub hostname: Arc<str>,
    /// Listener address, reported as `destination_addr`.
    pub local_addr: Option<SocketAddr>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", any(echo::handler))
        .route("/health", get(health))
        .route("/help", get(help))
        .route("/bin", any(binary::missing_size))
        .route("/bin/", any(binary::missing_size))
        .route("/bin/{*size}", any(binary::handler))
        .route("/chunked", any(chunked::missing_count))
        .route("/chunked/", any(chunked::missing_count))
        .route("/chunked/{*count}", any(chunked::handler))
        .route("/delay", any(delay::invalid))
        .route("/delay/", any(delay::invalid))
        .route("/delay/{*params}", any(delay::handler))
        .route("/status", any(status::missing_code))
        .route("/status/", any(status::missing_code))
        .route("/status/{*code}", any(status::handler))
        .route("/upload", any(upload::handler))
        .route("/nousage", any(nousage::handler))
        .route("/nousage/{*variant}", any(nousage::variant))
        .route("/ws", get(websocket::echo))
        .route("/ws/{*rest}", get(websocket::route))
        .fallback(echo::handler)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_header,
        ))
        .with_state(state)
}

async fn health() -> Response {
    echo::raw_json(StatusCode::OK, HEALTH)
}

async fn help() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        HELP,
    )
        .into_response()
}

/// Sets `Connection` from the drain state. Upgrade responses keep theirs.
async fn connection_header(State(state): State<AppState>, request: Request, next: Next) -> Response {
    telemetry::increment_requests();
    let mut response = next.run(request).await;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        let value = if state.drain.is_draining() {
            "close"
        } else {
            "keep-alive"
        };
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static(value));
    }
    response
}

/// Serves `router` on `listener` until `stop` fires, then waits for open
/// connections to finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    stop: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stop.cancelled_owned())
    .await
}
