// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health, readiness, and port-snapshot handlers.
//!
//! `/health` and `/readiness` sit outside the auth layer so the
//! orchestrator can probe a container before it has the token plumbed.

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::listener::ListenCtx;
use crate::protocol::{HealthPayload, ReadinessChecks, ReadinessPayload};
use axum::extract::State;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub async fn health(State(ctx): State<Arc<ListenCtx>>) -> Envelope {
    Envelope::ok(HealthPayload {
        timestamp: epoch_ms(),
        uptime: ctx.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// One write-then-delete probe in the workspace.
pub async fn readiness(State(ctx): State<Arc<ListenCtx>>) -> Envelope {
    let probe = ctx
        .config
        .workspace_path
        .join(format!(".hutch-ready-{}", nanoid::nanoid!(8)));
    let filesystem = match tokio::fs::write(&probe, b"ready").await {
        Ok(()) => tokio::fs::remove_file(&probe).await.is_ok(),
        Err(_) => false,
    };
    Envelope::ok(ReadinessPayload { ready: filesystem, checks: ReadinessChecks { filesystem } })
}

pub async fn ports(State(ctx): State<Arc<ListenCtx>>) -> Result<Envelope, ApiError> {
    let payload = ctx.ports.snapshot().await?;
    Ok(Envelope::ok(payload))
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
