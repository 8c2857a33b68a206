// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hutchd`: sandbox agent daemon entry point.

use clap::Parser;
use hutch_daemon::config::{Args, Config};
use hutch_daemon::lifecycle;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::resolve(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hutchd: {}", e);
            return ExitCode::from(lifecycle::EXIT_BAD_CONFIG as u8);
        }
    };

    init_tracing(&config.log_level);

    let code = lifecycle::run(config).await;
    ExitCode::from(code as u8)
}

/// `RUST_LOG` wins when set; otherwise the configured level applies.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
