// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Request handlers for the agent's HTTP API.
//!
//! Error taxonomy per request (see [`api_command`]):
//! - missing/malformed `Authorization` header → 401
//! - well-formed but wrong bearer token → 403 (constant-time compare)
//! - body that is not a JSON object → 400
//! - everything else → 200 with the [`CommandResult`], even when the
//!   result's own `status` is `error` — business failures are not HTTP
//!   failures.
//!
//! Responses carry CORS and no-cache headers added by layers in
//! [`super::router`]; nothing here needs to set them.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use sysinfo::System;
use tracing::{debug, warn};

use crate::command::{Command, CommandResult, VERSION};

use super::{page, AppState};

/// `GET /` — status page with the token substituted in.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(page::render(state.token()))
}

/// `GET /ping` — unauthenticated liveness probe.
///
/// `time` is the current Unix timestamp and varies per call, so the console
/// can rely on the body changing even through an over-eager cache.
pub async fn ping(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "system": System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        "hostname": state.hostname(),
        "time": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
    }))
}

/// `POST /api/command` — authenticated command dispatch.
pub async fn api_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(provided) = bearer else {
        return error_response(StatusCode::UNAUTHORIZED, "authorization required");
    };

    if !bool::from(provided.as_bytes().ct_eq(state.token().as_bytes())) {
        warn!("command request with invalid token rejected");
        return error_response(StatusCode::FORBIDDEN, "invalid token");
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) | Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid JSON");
        }
    };

    let command = Command::from_value(&value);
    debug!(?command, "dispatching command");
    let result: CommandResult = state.executor().execute(&command).await;

    (StatusCode::OK, Json(result)).into_response()
}

/// Everything the router doesn't know.
///
/// A bare `OPTIONS` (non-preflight — preflights are answered by the CORS
/// layer before reaching the router) gets an empty 200 so permissive
/// clients don't choke; anything else is a structured 404.
pub async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    error_response(StatusCode::NOT_FOUND, "endpoint not found")
}

/// Best-effort 500 for panicking handlers, installed via `CatchPanicLayer`.
pub fn panic_response(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}
