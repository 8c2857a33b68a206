// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request-path error type.
//!
//! Every handler returns one `ApiError` variant; the envelope layer maps the
//! variant to a wire status code. Expected failures stay at HTTP 200 with a
//! non-zero body status; only panics surface as HTTP 500.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input: bad shape, bad encoding, empty required field.
    #[error("{0}")]
    Validation(String),

    /// Missing or mismatched bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Path escapes the workspace root.
    #[error("path traversal: {0}")]
    PathTraversal(String),

    /// Filesystem permission or other access refusal.
    #[error("{0}")]
    Forbidden(String),

    /// File, process, or session does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Target exists, is non-empty, or is already terminated.
    #[error("{0}")]
    Conflict(String),

    /// Upload exceeds the configured size cap.
    #[error("{0}")]
    TooLarge(String),

    /// Well-formed but semantically invalid request.
    #[error("{0}")]
    InvalidRequest(String),

    /// Filesystem or exec operation failed.
    #[error("{0}")]
    Operation(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Wire status code for the response envelope.
    pub fn status(&self) -> i32 {
        match self {
            ApiError::Validation(_) => 1400,
            ApiError::Unauthorized => 1401,
            ApiError::PathTraversal(_) | ApiError::Forbidden(_) => 1403,
            ApiError::NotFound(_) => 1404,
            ApiError::Conflict(_) => 1409,
            ApiError::TooLarge(_) => 1413,
            ApiError::InvalidRequest(_) => 1422,
            ApiError::Internal(_) => 1500,
            ApiError::Operation(_) => 1600,
        }
    }

    /// Map a filesystem error to the matching category, with `context`
    /// naming the operation and path for the client message.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => ApiError::NotFound(format!("{}: not found", context)),
            ErrorKind::PermissionDenied => {
                ApiError::Forbidden(format!("{}: permission denied", context))
            }
            ErrorKind::AlreadyExists => {
                ApiError::Conflict(format!("{}: already exists", context))
            }
            _ => ApiError::Operation(format!("{}: {}", context, err)),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
