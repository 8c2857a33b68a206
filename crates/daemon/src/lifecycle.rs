// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, signal handling, graceful shutdown.
//!
//! On SIGINT/SIGTERM the listener stops accepting, in-flight requests get
//! the drain deadline, WebSockets close with 1001 (the socket loops watch
//! the shutdown token), sessions are terminated, and surviving children
//! get SIGTERM then SIGKILL. Exceeding the drain deadline forces exit 1.

use crate::config::Config;
use crate::listener::{build_router, ListenCtx};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Process exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Startup failure or forced shutdown past the drain deadline.
pub const EXIT_FAILURE: i32 = 1;
/// Bad configuration (also used by clap for parse errors).
pub const EXIT_BAD_CONFIG: i32 = 2;

/// Run the daemon to completion; returns the process exit code.
pub async fn run(config: Config) -> i32 {
    let shutdown = CancellationToken::new();
    let ctx = Arc::new(ListenCtx::new(config, shutdown.clone()));
    ctx.spawn_background();

    let listener = match tokio::net::TcpListener::bind(ctx.config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %ctx.config.addr, error = %e, "failed to bind listen address");
            return EXIT_FAILURE;
        }
    };

    info!(
        addr = %ctx.config.addr,
        workspace = %ctx.config.workspace_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "agent listening"
    );
    if ctx.config.token_generated {
        info!(token = %ctx.config.token, generated = true, "auth token");
    }

    spawn_signal_watcher(shutdown.clone());

    let router = build_router(Arc::clone(&ctx));
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    let drain = ctx.config.drain_timeout;
    let forced = tokio::select! {
        result = &mut server => {
            match result {
                Ok(()) => false,
                Err(e) => {
                    error!(error = %e, "server error");
                    true
                }
            }
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(drain).await;
        } => {
            warn!(deadline_secs = drain.as_secs(), "drain deadline exceeded, forcing shutdown");
            true
        }
    };

    info!("terminating sessions and child processes");
    ctx.sessions.terminate_all().await;
    ctx.processes.terminate_all().await;

    if forced {
        EXIT_FAILURE
    } else {
        info!("shutdown complete");
        EXIT_OK
    }
}

fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => info!("received SIGTERM"),
            _ = int.recv() => info!("received SIGINT"),
        }
        shutdown.cancel();
    });
}
