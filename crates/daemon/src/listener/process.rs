// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process endpoint handlers.

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::listener::{ListenCtx, Payload};
use crate::protocol::{ExecPayload, ExecRequest, KillRequest, ProcessLogsPayload};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use std::sync::Arc;

pub async fn exec(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<ExecRequest>,
) -> Result<Envelope, ApiError> {
    let record = ctx.processes.exec(&req)?;
    Ok(Envelope::ok(ExecPayload {
        process_id: record.id,
        pid: record.pid,
        status: record.status().as_str().to_string(),
        started_at: record.started_at,
    }))
}

pub async fn exec_sync(
    State(ctx): State<Arc<ListenCtx>>,
    Payload(req): Payload<ExecRequest>,
) -> Result<Envelope, ApiError> {
    let payload = ctx.processes.exec_sync(&req).await?;
    Ok(Envelope::ok(payload))
}

pub async fn list(State(ctx): State<Arc<ListenCtx>>) -> Result<Envelope, ApiError> {
    Ok(Envelope::ok(ctx.processes.list()))
}

pub async fn status(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
) -> Result<Envelope, ApiError> {
    let record = ctx.processes.get(&id)?;
    Ok(Envelope::ok(record.status_payload()))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub tail: Option<usize>,
}

pub async fn logs(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Envelope, ApiError> {
    let record = ctx.processes.get(&id)?;
    let (stdout, stderr) = record.logs(query.tail);
    Ok(Envelope::ok(ProcessLogsPayload { stdout, stderr }))
}

/// Body is optional; an empty body means SIGTERM.
pub async fn kill(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Envelope, ApiError> {
    let req: KillRequest = if body.is_empty() {
        KillRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("invalid kill request: {}", e)))?
    };
    ctx.processes.kill(&id, req.signal.as_deref())?;
    Ok(Envelope::ok_empty())
}

pub async fn remove(
    State(ctx): State<Arc<ListenCtx>>,
    Path(id): Path<String>,
) -> Result<Envelope, ApiError> {
    ctx.processes.remove(&id)?;
    Ok(Envelope::ok_empty())
}
