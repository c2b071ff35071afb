//! `/nousage/*`: responses a metering gateway cannot parse usage from.

use super::{
    AppState,
    echo::{self, Usage},
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

const BAD_JSON: &str =
    r#"{"_myhostname":"test","uri":"/nousage/badjson","method":"GET","invalid json truncated"#;

/// Echo JSON with no usage block.
pub async fn handler(State(state): State<AppState>, request: Request) -> Response {
    let json = echo::reflect(&state, request, Usage::default()).await;
    echo::json_response(StatusCode::OK, &json)
}

pub async fn variant(
    State(state): State<AppState>,
    Path(variant): Path<String>,
    request: Request,
) -> Response {
    tracing::debug!(kind = "NOUSAGE", variant = %variant, "nousage reply");
    match variant.as_str() {
        "wrongct" => {
            let json = echo::reflect(&state, request, Usage::default()).await;
            match serde_json::to_vec(&json) {
                Ok(body) => (
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    body,
                )
                    .into_response(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialise echo");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        "badjson" => echo::raw_json(StatusCode::OK, BAD_JSON),
        "empty" => (
            [(header::CONTENT_TYPE, "application/json")],
            Body::empty(),
        )
            .into_response(),
        _ => handler(State(state), request).await,
    }
}
