// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::error::ApiError;
use crate::protocol::ExecRequest;
use crate::supervisor::{ProcessManager, ProcessRecord, ProcessStatus};
use hutch_core::LogEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use yare::parameterized;

fn manager() -> (tempfile::TempDir, Arc<ProcessManager>) {
    let temp = tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    (temp, Arc::new(ProcessManager::new(root, 100)))
}

fn exec_request(command: &str, args: &[&str]) -> ExecRequest {
    ExecRequest {
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        cwd: None,
        env: HashMap::new(),
        shell: false,
        timeout: None,
    }
}

async fn wait_terminal(record: &Arc<ProcessRecord>) {
    for _ in 0..200 {
        if record.status().is_terminal() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("process {} never reached a terminal status", record.id);
}

#[tokio::test]
async fn exec_returns_running_record_and_captures_stdout() {
    let (_temp, manager) = manager();
    let record = manager.exec(&exec_request("echo", &["hi"])).unwrap();
    assert!(record.pid > 0);

    wait_terminal(&record).await;
    assert_eq!(record.status(), ProcessStatus::Completed);
    let (stdout, stderr) = record.logs(Some(10));
    assert_eq!(stdout, vec!["hi"]);
    assert!(stderr.is_empty());
}

#[tokio::test]
async fn exec_sync_collects_streams_and_exit_code() {
    let (_temp, manager) = manager();
    let payload = manager
        .exec_sync(&exec_request("sh", &["-c", "echo out; echo err >&2"]))
        .await
        .unwrap();
    assert_eq!(payload.exit_code, Some(0));
    assert_eq!(payload.status, "completed");
    assert_eq!(payload.stdout, "out");
    assert_eq!(payload.stderr, "err");
}

#[tokio::test]
async fn nonzero_exit_is_failed() {
    let (_temp, manager) = manager();
    let payload = manager.exec_sync(&exec_request("sh", &["-c", "exit 3"])).await.unwrap();
    assert_eq!(payload.status, "failed");
    assert_eq!(payload.exit_code, Some(3));
}

#[tokio::test]
async fn shell_mode_joins_command_and_args() {
    let (_temp, manager) = manager();
    let mut req = exec_request("echo one", &["two"]);
    req.shell = true;
    let payload = manager.exec_sync(&req).await.unwrap();
    assert_eq!(payload.stdout, "one two");
}

#[tokio::test]
async fn cwd_defaults_to_workspace() {
    let (temp, manager) = manager();
    let payload = manager.exec_sync(&exec_request("pwd", &[])).await.unwrap();
    assert_eq!(payload.stdout, temp.path().canonicalize().unwrap().display().to_string());
}

#[tokio::test]
async fn env_is_passed_to_the_child() {
    let (_temp, manager) = manager();
    let mut req = exec_request("sh", &["-c", "echo $MARKER_VALUE"]);
    req.env.insert("MARKER_VALUE".to_string(), "present".to_string());
    let payload = manager.exec_sync(&req).await.unwrap();
    assert_eq!(payload.stdout, "present");
}

#[tokio::test]
async fn spawn_failure_is_an_operation_error() {
    let (_temp, manager) = manager();
    let err = manager.exec(&exec_request("/no/such/binary", &[])).unwrap_err();
    assert_eq!(err.status(), 1600);
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let (_temp, manager) = manager();
    assert!(matches!(manager.exec(&exec_request("", &[])), Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn timeout_escalates_and_marks_timeout() {
    let (_temp, manager) = manager();
    let mut req = exec_request("sleep", &["60"]);
    req.timeout = Some(1);
    let record = manager.exec(&req).unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(3), wait_terminal(&record)).await;
    assert!(finished.is_ok(), "timeout escalation took longer than 3s");
    assert_eq!(record.status(), ProcessStatus::Timeout);

    // Killing an already-terminated process conflicts.
    assert!(matches!(
        manager.kill(record.id.as_str(), None),
        Err(ApiError::Conflict(_))
    ));
}

#[tokio::test]
async fn kill_delivers_signal_and_monitor_sets_killed() {
    let (_temp, manager) = manager();
    let record = manager.exec(&exec_request("sleep", &["60"])).unwrap();

    manager.kill(record.id.as_str(), None).unwrap();
    wait_terminal(&record).await;
    assert_eq!(record.status(), ProcessStatus::Killed);

    // Terminal status is immutable: a second kill conflicts instead of
    // rewriting it.
    assert!(manager.kill(record.id.as_str(), None).is_err());
    assert_eq!(record.status(), ProcessStatus::Killed);
}

#[tokio::test]
async fn kill_unknown_process_is_not_found() {
    let (_temp, manager) = manager();
    assert!(matches!(manager.kill("prc-missing", None), Err(ApiError::NotFound(_))));
}

#[tokio::test]
async fn logs_tail_returns_last_lines() {
    let (_temp, manager) = manager();
    let payload = manager
        .exec_sync(&exec_request("sh", &["-c", "for i in 1 2 3 4 5; do echo $i; done"]))
        .await
        .unwrap();
    assert_eq!(payload.status, "completed");

    let record = manager.get(&manager.list()[0].id.to_string()).unwrap();
    let (stdout, _) = record.logs(Some(2));
    assert_eq!(stdout, vec!["4", "5"]);
}

#[tokio::test]
async fn ring_bounds_long_output() {
    let (_temp, manager) = manager();
    // Ring capacity is 100 in these tests; emit 150 lines.
    let payload = manager
        .exec_sync(&exec_request("sh", &["-c", "i=0; while [ $i -lt 150 ]; do echo $i; i=$((i+1)); done"]))
        .await
        .unwrap();
    assert_eq!(payload.status, "completed");
    let record = manager.get(&manager.list()[0].id.to_string()).unwrap();
    let (stdout, _) = record.logs(None);
    assert_eq!(stdout.len(), 100);
    assert_eq!(stdout.first().map(String::as_str), Some("50"));
    assert_eq!(stdout.last().map(String::as_str), Some("149"));
}

#[tokio::test]
async fn subscribers_see_lines_in_order_then_close() {
    let (_temp, manager) = manager();
    let record = manager.exec(&exec_request("sh", &["-c", "echo line1; echo line2"])).unwrap();
    let mut feed = record.subscribe();

    let mut lines = Vec::new();
    loop {
        match feed.recv().await {
            Ok(LogEvent::Line(line)) => lines.push(line.content),
            Ok(LogEvent::Closed) => break,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    assert_eq!(lines, vec!["line1", "line2"]);
}

#[tokio::test]
async fn remove_requires_terminal_status() {
    let (_temp, manager) = manager();
    let record = manager.exec(&exec_request("sleep", &["60"])).unwrap();
    assert!(matches!(manager.remove(record.id.as_str()), Err(ApiError::Conflict(_))));

    manager.kill(record.id.as_str(), Some("SIGKILL")).unwrap();
    wait_terminal(&record).await;
    manager.remove(record.id.as_str()).unwrap();
    assert!(manager.get(record.id.as_str()).is_err());
}

#[tokio::test]
async fn sweep_reaps_only_old_terminated_records() {
    let (_temp, manager) = manager();
    let done = manager.exec(&exec_request("true", &[])).unwrap();
    wait_terminal(&done).await;
    let running = manager.exec(&exec_request("sleep", &["60"])).unwrap();

    // Now: nothing is old enough.
    assert_eq!(manager.sweep(done.started_at), 0);

    // Two hours later the finished record is gone, the running one stays.
    let later = done.started_at + 2 * 60 * 60 * 1000;
    assert_eq!(manager.sweep(later), 1);
    assert!(manager.get(done.id.as_str()).is_err());
    assert!(manager.get(running.id.as_str()).is_ok());

    manager.kill(running.id.as_str(), Some("KILL")).unwrap();
}

#[tokio::test]
async fn list_is_sorted_by_start_time() {
    let (_temp, manager) = manager();
    let first = manager.exec_sync(&exec_request("true", &[])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = manager.exec_sync(&exec_request("true", &[])).await.unwrap();
    let listed = manager.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.process_id);
    assert_eq!(listed[1].id, second.process_id);
}

#[parameterized(
    default_term = { None, "SIGTERM" },
    name = { Some("SIGKILL"), "SIGKILL" },
    short_name = { Some("kill"), "SIGKILL" },
    lower = { Some("sigint"), "SIGINT" },
    number = { Some("9"), "SIGKILL" },
)]
fn signals_parse(input: Option<&str>, expected: &str) {
    let signal = crate::supervisor::parse_signal(input).unwrap();
    assert_eq!(signal.as_str(), expected);
}

#[parameterized(
    bogus_name = { "SIGWHATEVER" },
    bogus_number = { "999" },
)]
fn bad_signals_are_validation_errors(input: &str) {
    assert!(matches!(crate::supervisor::parse_signal(Some(input)), Err(ApiError::Validation(_))));
}
