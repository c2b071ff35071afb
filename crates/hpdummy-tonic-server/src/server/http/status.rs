//! `/status/{code}`: echo JSON answered with an arbitrary status.

use super::{
    AppState,
    echo::{self, RequestJson, Usage},
};
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::Response,
};
use serde::Serialize;

const MISSING_CODE: &str = r#"{"error":"status code is required","example":"/status/404"}"#;
const BAD_CODE: &str =
    r#"{"error":"invalid status code - must be a valid HTTP status code","example":"/status/404"}"#;
const OUT_OF_RANGE: &str =
    r#"{"error":"status code must be between 100 and 599","example":"/status/200"}"#;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub request: RequestJson,
    pub status_code: u16,
    pub status_message: &'static str,
}

/// Accepts integers in `100..=599`; the error is the ready-made JSON body.
pub fn parse_status_code(raw: &str) -> Result<StatusCode, &'static str> {
    let code = raw.parse::<i64>().map_err(|_| BAD_CODE)?;
    u16::try_from(code)
        .ok()
        .filter(|c| (100..=599).contains(c))
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or(OUT_OF_RANGE)
}

pub async fn missing_code() -> Response {
    echo::raw_json(StatusCode::BAD_REQUEST, MISSING_CODE)
}

pub async fn handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    request: Request,
) -> Response {
    let status = match parse_status_code(&raw) {
        Ok(status) => status,
        Err(body) => return echo::raw_json(StatusCode::BAD_REQUEST, body),
    };

    let request = echo::reflect(&state, request, Usage::ECHO).await;
    tracing::debug!(kind = "STATUS", code = status.as_u16(), "status reply");

    let response = StatusResponse {
        request,
        status_code: status.as_u16(),
        status_message: status.canonical_reason().unwrap_or("Unknown Status Code"),
    };
    echo::json_response(status, &response)
}
