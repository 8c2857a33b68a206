// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface specs: flags, help text, and configuration exit codes.

use crate::prelude::hutchd;

#[test]
fn help_lists_every_flag() {
    let assert = hutchd().arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    for flag in [
        "--addr",
        "--workspace-path",
        "--token",
        "--max-file-size",
        "--log-level",
        "--max-concurrent-reads",
        "--excluded-ports",
    ] {
        assert!(output.contains(flag), "help is missing {}", flag);
    }
}

#[test]
fn version_prints_the_crate_version() {
    hutchd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_flag_exits_2() {
    hutchd().arg("--no-such-flag").assert().code(2);
}

#[test]
fn bad_addr_exits_2() {
    let temp = tempfile::tempdir().unwrap();
    hutchd()
        .args(["--addr", "not-an-addr", "--workspace-path"])
        .arg(temp.path())
        .assert()
        .code(2);
}

#[test]
fn zero_max_file_size_exits_2() {
    let temp = tempfile::tempdir().unwrap();
    hutchd()
        .args(["--max-file-size", "0", "--workspace-path"])
        .arg(temp.path())
        .assert()
        .code(2);
}
