// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session endpoint handlers.

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::listener::{ListenCtx, Payload};
use crate::protocol::{
    CreateSessionRequest, SessionCwdRequest, SessionEnvRequest, SessionExecRequest,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use std::sync::Arc;

/// Body is optional; an empty body creates a default shell in the
/// workspace root.
pub async fn create(
    State(ctx): State<Arc<ListenCtx>>,
    body: Bytes,
) -> Result<Envelope, ApiError> {
    let req: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("invalid session request: {}", e)))?
    };
    let record = ctx.sessions.create(&req)?;
    Ok(Envelope::ok(record.summary()))
}

pub async fn list(State(ctx): State<Arc<ListenCtx>>) -> Result<Envelope, ApiError> {
    Ok(Envelope::ok(ctx.sessions.list()))
}

pub async fn exec(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
    Payload(req): Payload<SessionExecRequest>,
) -> Result<Envelope, ApiError> {
    if req.command.is_empty() {
        return Err(ApiError::Validation("command must not be empty".to_string()));
    }
    let payload = ctx.sessions.exec(&id, &req.command, req.timeout).await?;
    Ok(Envelope::ok(payload))
}

pub async fn env(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
    Payload(req): Payload<SessionEnvRequest>,
) -> Result<Envelope, ApiError> {
    ctx.sessions.set_env(&id, &req.env).await?;
    Ok(Envelope::ok_empty())
}

pub async fn cwd(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
    Payload(req): Payload<SessionCwdRequest>,
) -> Result<Envelope, ApiError> {
    ctx.sessions.change_dir(&id, &req.path).await?;
    Ok(Envelope::ok_empty())
}

pub async fn terminate(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
) -> Result<Envelope, ApiError> {
    ctx.sessions.terminate(&id).await?;
    Ok(Envelope::ok_empty())
}
