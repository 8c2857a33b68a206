// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket listener.
//!
//! Builds the axum router over a shared [`ListenCtx`] and wires the
//! middleware chain: panic recovery → request logging → bearer auth.
//! Health endpoints sit outside the auth layer.

mod files;
mod health;
mod middleware;
mod process;
mod sessions;
mod ws;

use crate::config::Config;
use crate::error::ApiError;
use crate::files::FileEngine;
use crate::guard::PathGuard;
use crate::ports::PortMonitor;
use crate::sessions::SessionManager;
use crate::supervisor::ProcessManager;
use axum::extract::{DefaultBodyLimit, FromRequest, Request};
use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use hutch_core::ring::DEFAULT_LOG_CAPACITY;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

/// Shared daemon context for all request handlers.
pub struct ListenCtx {
    pub config: Config,
    pub files: FileEngine,
    pub processes: Arc<ProcessManager>,
    pub sessions: Arc<SessionManager>,
    pub ports: Arc<PortMonitor>,
    pub started: Instant,
    pub shutdown: CancellationToken,
}

impl ListenCtx {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let guard = PathGuard::new(config.workspace_path.clone());
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_reads));
        let files = FileEngine::new(guard, config.max_file_size, limiter);
        let processes =
            Arc::new(ProcessManager::new(config.workspace_path.clone(), DEFAULT_LOG_CAPACITY));
        let sessions = Arc::new(SessionManager::new(
            config.workspace_path.clone(),
            config.default_shell.clone(),
            DEFAULT_LOG_CAPACITY,
        ));
        let ports = Arc::new(PortMonitor::new(config.excluded_ports.clone()));
        Self { config, files, processes, sessions, ports, started: Instant::now(), shutdown }
    }

    /// Start the independent background tasks (process reaper, session
    /// idle GC). They stop when the shutdown token fires.
    pub fn spawn_background(&self) {
        self.processes.spawn_reaper(self.shutdown.clone());
        self.sessions.spawn_idle_gc(self.shutdown.clone());
    }
}

pub fn build_router(ctx: Arc<ListenCtx>) -> Router {
    // Outer body bound; precise per-file enforcement (1413 envelope) is the
    // engine's. Doubled because base64 JSON bodies outgrow their payload.
    let body_limit =
        ctx.config.max_file_size.saturating_mul(2).saturating_add(1024 * 1024) as usize;

    let api = Router::new()
        .route("/api/v1/files/write", post(files::write))
        .route("/api/v1/files/read", get(files::read))
        .route("/api/v1/files/list", post(files::list))
        .route("/api/v1/files/delete", post(files::delete))
        .route("/api/v1/files/move", post(files::move_entry))
        .route("/api/v1/files/rename", post(files::rename))
        .route("/api/v1/files/search", post(files::search))
        .route("/api/v1/files/find", post(files::find))
        .route("/api/v1/files/replace", post(files::replace))
        .route("/api/v1/process/exec", post(process::exec))
        .route("/api/v1/process/exec-sync", post(process::exec_sync))
        .route("/api/v1/process", get(process::list))
        .route("/api/v1/process/{id}", delete(process::remove))
        .route("/api/v1/process/{id}/status", get(process::status))
        .route("/api/v1/process/{id}/logs", get(process::logs))
        .route("/api/v1/process/{id}/kill", post(process::kill))
        .route("/api/v1/sessions/create", post(sessions::create))
        .route("/api/v1/sessions", get(sessions::list))
        .route("/api/v1/sessions/{id}/exec", post(sessions::exec))
        .route("/api/v1/sessions/{id}/env", post(sessions::env))
        .route("/api/v1/sessions/{id}/cwd", post(sessions::cwd))
        .route("/api/v1/sessions/{id}/terminate", post(sessions::terminate))
        .route("/api/v1/ports", get(health::ports))
        .route("/ws", get(ws::upgrade))
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&ctx), middleware::require_auth));

    Router::new()
        .route("/health", get(health::health))
        .route("/readiness", get(health::readiness))
        .merge(api)
        .layer(axum_middleware::from_fn(middleware::trace_requests))
        .layer(CatchPanicLayer::custom(middleware::panic_response))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

/// JSON body extractor whose rejection is a validation envelope instead of
/// axum's plain-text 4xx.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(Payload(value))
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
