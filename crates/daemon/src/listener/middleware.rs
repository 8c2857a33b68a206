// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request middleware: trace-ID logging, bearer auth, panic recovery.

use crate::envelope::{Envelope, STATUS_PANIC};
use crate::listener::ListenCtx;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const TRACE_HEADER: &str = "x-trace-id";

/// Assigns or honors `X-Trace-ID`, logs every request with its final
/// status, byte count, and latency. Severity follows the HTTP status.
pub async fn trace_requests(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let trace_id = req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    let status = response.status().as_u16();
    let bytes = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status >= 500 {
        error!(%trace_id, %method, %path, status, bytes, elapsed_ms, "request failed");
    } else if status >= 400 {
        warn!(%trace_id, %method, %path, status, bytes, elapsed_ms, "request rejected");
    } else {
        info!(%trace_id, %method, %path, status, bytes, elapsed_ms, "request");
    }
    response
}

/// Bearer-token auth for everything behind `/api` and `/ws`. The WebSocket
/// route also accepts `?token=` since browser clients cannot set headers on
/// the upgrade request. Mismatch is a plain 401, not an envelope.
pub async fn require_auth(
    State(ctx): State<Arc<ListenCtx>>,
    req: Request,
    next: Next,
) -> Response {
    let header_token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let query_token = if req.uri().path() == "/ws" {
        req.uri().query().and_then(|q| {
            q.split('&').find_map(|pair| pair.strip_prefix("token=")).filter(|t| !t.is_empty())
        })
    } else {
        None
    };

    let authorized = header_token.map(|t| t == ctx.config.token).unwrap_or(false)
        || query_token.map(|t| t == ctx.config.token).unwrap_or(false);

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "unauthorized\n").into_response();
    }
    next.run(req).await
}

/// Converts a handler panic into a uniform internal-error envelope. The
/// panic detail goes to the structured log, never to the client.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "handler panicked");
    Envelope::error(STATUS_PANIC, "internal server error").into_response()
}

#[cfg(test)]
#[path = "middleware_tests.rs"]
mod tests;
