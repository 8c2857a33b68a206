// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::config::{Args, Config};
use clap::Parser;
use serial_test::serial;
use tempfile::tempdir;

fn args(extra: &[&str]) -> Args {
    let temp = tempdir().unwrap();
    let workspace = temp.path().to_string_lossy().into_owned();
    // Leak the tempdir so the workspace outlives the Args it backs.
    std::mem::forget(temp);
    let mut argv = vec!["hutchd".to_string(), "--workspace-path".to_string(), workspace];
    argv.extend(extra.iter().map(|s| s.to_string()));
    Args::parse_from(argv)
}

#[test]
#[serial]
fn defaults_apply() {
    let config = Config::resolve(args(&[])).unwrap();
    assert_eq!(config.addr.port(), 9757);
    assert!(config.addr.ip().is_unspecified());
    assert_eq!(config.max_file_size, 100 * 1024 * 1024);
    assert_eq!(config.log_level, "info");
    assert!(config.excluded_ports.is_empty());
    assert_eq!(config.default_shell, "/bin/bash");
}

#[test]
#[serial]
fn token_is_generated_when_absent() {
    std::env::remove_var("DEVBOX_JWT_SECRET");
    let config = Config::resolve(args(&[])).unwrap();
    assert!(config.token_generated);
    assert_eq!(config.token.len(), 32);
    assert!(config.token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
#[serial]
fn explicit_token_wins() {
    let config = Config::resolve(args(&["--token", "sekrit"])).unwrap();
    assert!(!config.token_generated);
    assert_eq!(config.token, "sekrit");
}

#[test]
#[serial]
fn jwt_secret_is_a_token_fallback() {
    std::env::set_var("DEVBOX_JWT_SECRET", "from-jwt");
    let config = Config::resolve(args(&[])).unwrap();
    std::env::remove_var("DEVBOX_JWT_SECRET");
    assert!(!config.token_generated);
    assert_eq!(config.token, "from-jwt");
}

#[test]
#[serial]
fn flag_beats_jwt_secret() {
    std::env::set_var("DEVBOX_JWT_SECRET", "from-jwt");
    let config = Config::resolve(args(&["--token", "flagged"])).unwrap();
    std::env::remove_var("DEVBOX_JWT_SECRET");
    assert_eq!(config.token, "flagged");
}

#[test]
#[serial]
fn bare_port_addr_listens_on_any_interface() {
    let config = Config::resolve(args(&["--addr", ":8080"])).unwrap();
    assert_eq!(config.addr.port(), 8080);
    assert!(config.addr.ip().is_unspecified());
}

#[test]
#[serial]
fn host_port_addr_is_passed_through() {
    let config = Config::resolve(args(&["--addr", "127.0.0.1:7000"])).unwrap();
    assert_eq!(config.addr.to_string(), "127.0.0.1:7000");
}

#[test]
#[serial]
fn bad_addr_is_a_config_error() {
    assert!(Config::resolve(args(&["--addr", "not-an-addr"])).is_err());
}

#[test]
#[serial]
fn zero_max_file_size_is_rejected() {
    assert!(Config::resolve(args(&["--max-file-size", "0"])).is_err());
}

#[test]
#[serial]
fn unknown_log_level_falls_back_to_info() {
    let config = Config::resolve(args(&["--log-level", "verbose"])).unwrap();
    assert_eq!(config.log_level, "info");
}

#[test]
#[serial]
fn log_level_is_case_insensitive() {
    let config = Config::resolve(args(&["--log-level", "DEBUG"])).unwrap();
    assert_eq!(config.log_level, "debug");
}

#[test]
#[serial]
fn excluded_ports_parse_comma_separated() {
    let config = Config::resolve(args(&["--excluded-ports", "9757,8080"])).unwrap();
    assert!(config.excluded_ports.contains(&9757));
    assert!(config.excluded_ports.contains(&8080));
}

#[test]
#[serial]
fn concurrent_reads_default_is_clamped() {
    let config = Config::resolve(args(&[])).unwrap();
    assert!(config.max_concurrent_reads >= 1);
    assert!(config.max_concurrent_reads <= 32);
}

#[test]
#[serial]
fn explicit_concurrent_reads_wins() {
    let config = Config::resolve(args(&["--max-concurrent-reads", "4"])).unwrap();
    assert_eq!(config.max_concurrent_reads, 4);
}

#[test]
#[serial]
fn workspace_is_created_and_canonicalized() {
    let temp = tempdir().unwrap();
    let nested = temp.path().join("deep/workspace");
    let argv = vec![
        "hutchd".to_string(),
        "--workspace-path".to_string(),
        nested.to_string_lossy().into_owned(),
    ];
    let config = Config::resolve(Args::parse_from(argv)).unwrap();
    assert!(config.workspace_path.is_dir());
    assert!(config.workspace_path.is_absolute());
}
