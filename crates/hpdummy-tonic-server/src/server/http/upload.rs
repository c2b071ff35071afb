//! `/upload`: consumes the request body without keeping it.

use super::{
    AppState,
    echo::{self, RequestJson},
};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::Response,
};
use bytes::Buf;
use http_body_util::BodyExt;
use serde::Serialize;

const READ_FAILED: &str = r#"{"error":"failed to read request body"}"#;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub request: RequestJson,
    pub bytes_received: u64,
}

/// Counts data bytes until the body ends.
pub async fn discard<B>(mut body: B) -> Result<u64, B::Error>
where
    B: http_body::Body + Unpin,
{
    let mut total = 0u64;
    while let Some(frame) = body.frame().await {
        if let Some(data) = frame?.data_ref() {
            total += data.remaining() as u64;
        }
    }
    Ok(total)
}

pub async fn handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let mut json = RequestJson::from_parts(&parts, &state);

    let received = match discard(body).await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(kind = "UPLOAD", error = %e, "upload read failed");
            return echo::raw_json(StatusCode::INTERNAL_SERVER_ERROR, READ_FAILED);
        }
    };
    json.body_size = received;
    tracing::debug!(kind = "UPLOAD", bytes = received, "upload received");

    echo::json_response(
        StatusCode::OK,
        &UploadResponse {
            request: json,
            bytes_received: received,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http::{
        router,
        test_support::{body_json, state},
    };
    use axum::body::Body;
    use bytes::Bytes;
    use http_body::Frame;
    use http_body_util::StreamBody;
    use tower::ServiceExt;

    #[tokio::test]
    async fn counts_and_discards() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from(vec![7u8; 3 * 1024 * 1024]))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["bytes_received"], 3 * 1024 * 1024);
        assert_eq!(json["body_size"], 3 * 1024 * 1024);
        assert_eq!(json["body"], "");
        assert_eq!(json["method"], "POST");
    }

    #[tokio::test]
    async fn read_error_is_500() {
        let frames = futures::stream::iter(vec![
            Ok(Frame::data(Bytes::from_static(b"part"))),
            Err(std::io::Error::other("reset")),
        ]);
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::new(StreamBody::new(frames)))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "failed to read request body"})
        );
    }

    #[tokio::test]
    async fn discard_counts_frames() {
        let frames = futures::stream::iter(
            (0..4).map(|_| Ok::<_, std::io::Error>(Frame::data(Bytes::from_static(b"abcd")))),
        );
        assert_eq!(discard(StreamBody::new(frames)).await.unwrap(), 16);
    }
}
