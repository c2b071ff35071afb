//! `/chunked/{count}?size=&delay=`: paced chunked responses, one flush per chunk.
//!
//! Every chunk goes out as a single body frame, so `size` may not exceed the
//! streaming buffer size.

use super::{
    AppState,
    params::{self, QueryParams},
};
use crate::server::telemetry;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use core::{num::NonZeroUsize, time::Duration};
use hpdummy::{DEFAULT_CHUNK_SIZE, StreamDescriptor, emit_chunked};

const MISSING_COUNT: &str = "Please specify chunk count: /chunked/10?size=1024&delay=100\n";
const INVALID_COUNT: &str = "Invalid chunk count. Must be a positive integer\n";
const CHUNK_TOO_LARGE: &str = "Invalid chunk size. Must not exceed the server buffer size\n";

pub async fn missing_count() -> Response {
    (StatusCode::BAD_REQUEST, MISSING_COUNT).into_response()
}

/// Builds the stream shape from the path count and query string.
///
/// `max_chunk` is the pool's buffer size: larger chunks would span several
/// frames.
pub fn descriptor(
    count: &str,
    query: &QueryParams,
    max_chunk: usize,
) -> Result<StreamDescriptor, &'static str> {
    let count = count
        .parse::<u64>()
        .ok()
        .filter(|c| *c > 0)
        .ok_or(INVALID_COUNT)?;

    let size = params::positive_or(query, "size", DEFAULT_CHUNK_SIZE.get() as u64);
    let chunk_size = usize::try_from(size)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(INVALID_COUNT)?;
    if chunk_size.get() > max_chunk {
        return Err(CHUNK_TOO_LARGE);
    }
    let total = count.checked_mul(size).ok_or(INVALID_COUNT)?;
    let delay = Duration::from_millis(params::positive_or(query, "delay", 0));

    Ok(StreamDescriptor::chunked(total, chunk_size, delay, true))
}

pub async fn handler(
    State(state): State<AppState>,
    Path(count): Path<String>,
    Query(query): Query<QueryParams>,
) -> Response {
    let descriptor = match descriptor(&count, &query, state.pool.buffer_size()) {
        Ok(d) => d,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    tracing::debug!(
        kind = "CHUNKED",
        chunks = descriptor.total_chunks(),
        chunk_size = descriptor.chunk_size.get(),
        total = descriptor.total_size,
        delay_ms = descriptor.delay.as_millis() as u64,
        "streaming chunked payload"
    );

    let body = emit_chunked(&state.pool, descriptor, "CHUNKED")
        .tracked(state.drain.track())
        .on_complete(telemetry::add_bytes_emitted);
    let mut response = Body::new(body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
