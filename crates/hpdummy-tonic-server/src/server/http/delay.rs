//! `/delay/{reply_ms}[/{read_ms}]`: slow replies and slow body consumption.

use super::{
    AppState,
    echo::{self, RequestJson, read_body},
};
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::Response,
};
use core::time::Duration;
use serde::Serialize;

const INVALID_PARAMS: &str = r#"{"error":"invalid delay parameters","format":"/delay/{reply_ms}[/{read_chunk_delay_ms}]","examples":["/delay/1000","/delay/1000/100","/delay/0/50"]}"#;
const NO_DELAY: &str =
    r#"{"error":"at least one delay must be > 0","examples":["/delay/1000","/delay/0/100"]}"#;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DelayParams {
    /// Pause before replying.
    pub reply: Duration,
    /// Pause before each body chunk after the first.
    pub read: Duration,
}

/// Parses `{reply_ms}` or `{reply_ms}/{read_ms}`. Both must be non-negative
/// integers.
pub fn parse_delay_params(raw: &str) -> Option<DelayParams> {
    let (reply, read) = match raw.split_once('/') {
        Some((reply, read)) => (reply, Some(read)),
        None => (raw, None),
    };
    let reply = reply.parse::<u64>().ok()?;
    let read = match read {
        Some(read) => read.parse::<u64>().ok()?,
        None => 0,
    };
    Some(DelayParams {
        reply: Duration::from_millis(reply),
        read: Duration::from_millis(read),
    })
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[derive(Debug, Serialize)]
pub struct DelayResponse {
    #[serde(flatten)]
    pub request: RequestJson,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub read_delay_ms: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub read_chunks: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_read_time_ms: u64,
}

pub async fn invalid() -> Response {
    echo::raw_json(StatusCode::BAD_REQUEST, INVALID_PARAMS)
}

pub async fn handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    request: Request,
) -> Response {
    let Some(params) = parse_delay_params(&raw) else {
        return echo::raw_json(StatusCode::BAD_REQUEST, INVALID_PARAMS);
    };
    if params.reply.is_zero() && params.read.is_zero() {
        return echo::raw_json(StatusCode::BAD_REQUEST, NO_DELAY);
    }

    let (parts, body) = request.into_parts();
    let mut json = RequestJson::from_parts(&parts, &state);
    let read_delay = (!params.read.is_zero()).then_some(params.read);
    let preview = read_body(body, read_delay).await;
    let (chunks_read, read_time) = (preview.chunks_read, preview.read_time);
    json.set_body(preview);

    if !params.reply.is_zero() {
        tokio::time::sleep(params.reply).await;
    }

    tracing::debug!(
        kind = "DELAY",
        reply_ms = params.reply.as_millis() as u64,
        read_ms = params.read.as_millis() as u64,
        chunks_read,
        "delayed reply"
    );

    let mut response = DelayResponse {
        request: json,
        duration_ms: params.reply.as_millis() as u64,
        read_delay_ms: 0,
        read_chunks: 0,
        total_read_time_ms: 0,
    };
    if read_delay.is_some() {
        response.read_delay_ms = params.read.as_millis() as u64;
        response.read_chunks = chunks_read;
        response.total_read_time_ms = read_time.as_millis() as u64;
    }
    echo::json_response(StatusCode::OK, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http::{
        echo::READ_CHUNK_SIZE,
        router,
        test_support::{body_json, get, state},
    };
    use axum::body::Body;
    use tokio::time::Instant;
    use tower::ServiceExt;

    #[test]
    fn parses_params() {
        assert_eq!(
            parse_delay_params("1000"),
            Some(DelayParams {
                reply: Duration::from_secs(1),
                read: Duration::ZERO,
            })
        );
        assert_eq!(
            parse_delay_params("0/50"),
            Some(DelayParams {
                reply: Duration::ZERO,
                read: Duration::from_millis(50),
            })
        );
        for raw in ["", "abc", "-1", "10/", "10/x", "1/2/3", "/5"] {
            assert_eq!(parse_delay_params(raw), None, "{raw}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reply_delay() {
        let start = Instant::now();
        let response = router(state()).oneshot(get("/delay/1000")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["duration_ms"], 1000);
        assert_eq!(json["method"], "GET");
        assert!(json.get("read_delay_ms").is_none());
        assert!(json.get("read_chunks").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_read() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/delay/0/50")
            .body(Body::from(vec![b'z'; 3 * READ_CHUNK_SIZE]))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();

        let json = body_json(response).await;
        assert_eq!(json["duration_ms"], 0);
        assert_eq!(json["read_delay_ms"], 50);
        assert_eq!(json["read_chunks"], 3);
        assert!(json["total_read_time_ms"].as_u64().unwrap() >= 100);
        assert_eq!(json["body_size"], 3 * READ_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn bad_params() {
        let app = router(state());
        for (uri, expected) in [
            ("/delay", INVALID_PARAMS),
            ("/delay/", INVALID_PARAMS),
            ("/delay/soon", INVALID_PARAMS),
            ("/delay/0", NO_DELAY),
            ("/delay/0/0", NO_DELAY),
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let expected: serde_json::Value = serde_json::from_str(expected).unwrap();
            assert_eq!(body_json(response).await, expected, "{uri}");
        }
    }
}
