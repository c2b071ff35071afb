//! `/bin/{size}`: synthetic downloads of any size in constant memory.

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
use hpdummy::{DEFAULT_CHUNK_SIZE, StreamDescriptor, emit_chunked, emit_known_length};

const MISSING_SIZE: &str = "Please specify size: /bin/1M, /bin/10M, /bin/10000G or /bin/11111, etc.\n";
const INVALID_SIZE: &str =
    "Invalid size. Supported: K, M, G, T suffixes (e.g., 1K, 10M, 1G, 10000G) or any positive integer\n";
const EMPTY_SIZE: &str = "Size cannot be empty\n";

/// Parses `1K`, `10m`, `1G`, `2T` (binary multiples) or a raw byte count.
pub fn parse_size(raw: &str) -> Result<u64, &'static str> {
    if raw.is_empty() {
        return Err(EMPTY_SIZE);
    }

    let multiplier: u64 = match raw.as_bytes()[raw.len() - 1] {
        b'K' | b'k' => 1 << 10,
        b'M' | b'm' => 1 << 20,
        b'G' | b'g' => 1 << 30,
        b'T' | b't' => 1 << 40,
        _ => 1,
    };
    let digits = if multiplier > 1 {
        &raw[..raw.len() - 1]
    } else {
        raw
    };

    digits
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or(INVALID_SIZE)
}

pub async fn missing_size() -> Response {
    (StatusCode::BAD_REQUEST, MISSING_SIZE).into_response()
}

pub async fn handler(
    State(state): State<AppState>,
    Path(size): Path<String>,
    Query(query): Query<QueryParams>,
) -> Response {
    let size = match parse_size(&size) {
        Ok(size) => size,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    let chunked = params::flag(&query, "chunked");
    let chunk_size = NonZeroUsize::new(state.pool.buffer_size()).unwrap_or(DEFAULT_CHUNK_SIZE);
    let guard = state.drain.track();

    tracing::debug!(kind = "BIN", size, chunked, "streaming binary payload");

    let mut response = if chunked {
        let descriptor = StreamDescriptor::chunked(size, chunk_size, Duration::ZERO, false);
        let body = emit_chunked(&state.pool, descriptor, "BIN")
            .tracked(guard)
            .on_complete(telemetry::add_bytes_emitted);
        Body::new(body).into_response()
    } else {
        let body = emit_known_length(&state.pool, size, chunk_size)
            .tracked(guard)
            .on_complete(telemetry::add_bytes_emitted);
        let mut response = Body::new(body).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        response
    };

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"data.bin\""),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http::{
        router,
        test_support::{body_bytes, body_frames, get, state},
    };
    use hpdummy::pattern::byte_at;
    use http_body::Body as _;
    use tower::ServiceExt;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1K"), Ok(1024));
        assert_eq!(parse_size("1k"), Ok(1024));
        assert_eq!(parse_size("10M"), Ok(10 << 20));
        assert_eq!(parse_size("1G"), Ok(1 << 30));
        assert_eq!(parse_size("10000G"), Ok(10_000 << 30));
        assert_eq!(parse_size("2T"), Ok(2 << 40));
        assert_eq!(parse_size("2048k"), Ok(2 << 20));
        assert_eq!(parse_size("11111"), Ok(11_111));
    }

    #[test]
    fn rejects_bad_sizes() {
        assert_eq!(parse_size(""), Err(EMPTY_SIZE));
        for raw in ["0", "-1", "K", "0K", "1.5M", "abc", "1KB", "99999999999T"] {
            assert_eq!(parse_size(raw), Err(INVALID_SIZE), "{raw}");
        }
    }

    #[tokio::test]
    async fn known_length_download() {
        let state = state();
        let pool = state.pool.clone();
        let drain = state.drain.clone();
        let response = router(state).oneshot(get("/bin/11111")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "11111");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"data.bin\""
        );
        assert_eq!(response.body().size_hint().exact(), Some(11_111));
        assert_eq!(drain.inflight(), 1);

        let body = body_bytes(response).await;
        assert_eq!(body.len(), 11_111);
        for (i, b) in body.iter().enumerate() {
            assert_eq!(*b, byte_at(i), "byte {i}");
        }
        assert_eq!(drain.inflight(), 0);
        assert_eq!(pool.stats().idle, pool.stats().created);
    }

    #[tokio::test]
    async fn chunked_download_has_no_length() {
        let response = router(state())
            .oneshot(get("/bin/200K?chunked=yes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(response.body().size_hint().exact(), None);

        let frames = body_frames(response).await;
        let total: usize = frames.iter().map(bytes::Bytes::len).sum();
        assert_eq!(total, 200 * 1024);
        // 64 KiB buffer: three full writes and a remainder
        assert_eq!(frames.len(), 4);
    }

    #[tokio::test]
    async fn bad_sizes_are_rejected() {
        let app = router(state());
        for (uri, msg) in [
            ("/bin/", MISSING_SIZE),
            ("/bin", MISSING_SIZE),
            ("/bin/xyz", INVALID_SIZE),
            ("/bin/1/2", INVALID_SIZE),
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(&body_bytes(response).await[..], msg.as_bytes(), "{uri}");
        }
    }
}
