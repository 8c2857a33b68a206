// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: flags > environment > defaults.
//!
//! Flags and their env fallbacks are declared together on [`Args`]; the
//! resolved [`Config`] is what the rest of the daemon sees. Bad
//! configuration exits 2 (clap parse errors already do).

use clap::Parser;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default listen address (any interface).
pub const DEFAULT_ADDR: &str = ":9757";
/// Default workspace root inside the container.
pub const DEFAULT_WORKSPACE: &str = "/workspace";
/// Default upload cap per file: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Command-line surface of `hutchd`.
#[derive(Debug, Parser)]
#[command(name = "hutchd", version, about = "Sandbox agent daemon")]
pub struct Args {
    /// Listen address, `host:port` or `:port`
    #[arg(long, env = "ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Workspace root; all file operations are confined to it
    #[arg(long, env = "WORKSPACE_PATH", default_value = DEFAULT_WORKSPACE)]
    pub workspace_path: PathBuf,

    /// Bearer token; generated when omitted
    #[arg(long, env = "TOKEN")]
    pub token: Option<String>,

    /// Upload cap per file, in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// Log level: debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Shared I/O limiter size; defaults to clamp(2·CPU, 1, 32)
    #[arg(long, env = "MAX_CONCURRENT_READS")]
    pub max_concurrent_reads: Option<usize>,

    /// Ports hidden from the port monitor (comma-separated)
    #[arg(long, env = "EXCLUDED_PORTS", value_delimiter = ',')]
    pub excluded_ports: Vec<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {addr:?}: {reason}")]
    BadAddr { addr: String, reason: String },

    #[error("workspace path {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("max file size must be positive")]
    ZeroFileSize,
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Canonicalized workspace root `W`.
    pub workspace_path: PathBuf,
    pub max_file_size: u64,
    pub token: String,
    /// True when no token was supplied and one was generated at startup.
    pub token_generated: bool,
    pub log_level: String,
    pub max_concurrent_reads: usize,
    pub excluded_ports: HashSet<u16>,
    /// Deadline for draining in-flight requests on shutdown.
    pub drain_timeout: Duration,
    /// Shell used for sessions when the client does not name one.
    pub default_shell: String,
}

impl Config {
    /// Resolve a full configuration from parsed arguments.
    ///
    /// Creates the workspace directory when missing, then canonicalizes it
    /// so the path guard compares against a symlink-free root.
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let addr = parse_addr(&args.addr)?;

        std::fs::create_dir_all(&args.workspace_path)
            .map_err(|e| ConfigError::Workspace { path: args.workspace_path.clone(), source: e })?;
        let workspace_path = args
            .workspace_path
            .canonicalize()
            .map_err(|e| ConfigError::Workspace { path: args.workspace_path.clone(), source: e })?;

        if args.max_file_size == 0 {
            return Err(ConfigError::ZeroFileSize);
        }

        let (token, token_generated) = match args.token.filter(|t| !t.is_empty()) {
            Some(t) => (t, false),
            // The orchestrator may inject the token through its JWT secret
            // instead of TOKEN.
            None => match std::env::var("DEVBOX_JWT_SECRET").ok().filter(|t| !t.is_empty()) {
                Some(t) => (t, false),
                None => (generate_token(), true),
            },
        };

        Ok(Self {
            addr,
            workspace_path,
            max_file_size: args.max_file_size,
            token,
            token_generated,
            log_level: normalize_log_level(&args.log_level),
            max_concurrent_reads: args
                .max_concurrent_reads
                .filter(|n| *n > 0)
                .unwrap_or_else(default_concurrent_reads),
            excluded_ports: args.excluded_ports.into_iter().collect(),
            drain_timeout: Duration::from_secs(15),
            default_shell: "/bin/bash".to_string(),
        })
    }
}

/// `:9757` listens on every interface; `host:port` is passed through.
fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let full = if addr.starts_with(':') { format!("0.0.0.0{}", addr) } else { addr.to_string() };
    full.parse().map_err(|e: std::net::AddrParseError| ConfigError::BadAddr {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Unknown levels fall back to `info`.
fn normalize_log_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        l @ ("debug" | "info" | "warn" | "error") => l.to_string(),
        _ => "info".to_string(),
    }
}

fn default_concurrent_reads() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cpus * 2).clamp(1, 32)
}

/// 16 random bytes, lowercase hex.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut out = String::with_capacity(32);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
