// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uniform JSON response body: `{status, message, data}`.
//!
//! Status 0 means success. Logical failures keep HTTP 200 and carry a
//! category code in `status`; clients inspect the body, not the HTTP code.
//! The only exceptions are 401 (auth, plain body) and 500 (handler panic).

use crate::error::ApiError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Wire status for a recovered handler panic. Unlike category codes this one
/// is also the HTTP status.
pub const STATUS_PANIC: i32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub status: i32,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Success envelope wrapping a serializable payload.
    pub fn ok<T: Serialize>(data: T) -> Self {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        Self { status: 0, message: "ok".to_string(), data }
    }

    /// Success envelope with no payload.
    pub fn ok_empty() -> Self {
        Self { status: 0, message: "ok".to_string(), data: serde_json::Value::Null }
    }

    pub fn error(status: i32, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), data: serde_json::Value::Null }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let http = if self.status == STATUS_PANIC {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        let body = serde_json::to_string(&self).unwrap_or_else(|_| {
            r#"{"status":1500,"message":"response serialization failed","data":null}"#.to_string()
        });
        (http, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Envelope::error(self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
