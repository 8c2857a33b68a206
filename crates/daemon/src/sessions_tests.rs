// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::protocol::CreateSessionRequest;
use crate::sessions::{SessionManager, SessionRecord};
use hutch_core::LogEvent;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use yare::parameterized;

fn manager() -> (tempfile::TempDir, Arc<SessionManager>) {
    let temp = tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    // /bin/sh rather than bash so the tests also run on minimal images.
    (temp, Arc::new(SessionManager::new(root, "/bin/sh".to_string(), 100)))
}

/// PTY allocation is restricted in some sandboxes; skip rather than fail
/// there, mirroring the openpty error text.
fn create_or_skip(
    manager: &Arc<SessionManager>,
    req: &CreateSessionRequest,
) -> Option<Arc<SessionRecord>> {
    match manager.create(req) {
        Ok(record) => Some(record),
        Err(e) => {
            let text = e.to_string();
            if text.contains("openpty") || text.contains("not permitted") {
                eprintln!("skipping PTY test: {}", text);
                None
            } else {
                panic!("session create failed: {}", text);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_reports_cwd_and_follows_cd() {
    let (temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };
    let id = record.id.to_string();

    let result = manager.exec(&id, "pwd", Some(10)).await.unwrap();
    let workspace = temp.path().canonicalize().unwrap().display().to_string();
    assert!(
        result.output.contains(&workspace),
        "expected {} in output {:?}",
        workspace,
        result.output
    );

    manager.change_dir(&id, "/tmp").await.unwrap();
    let result = manager.exec(&id, "pwd", Some(10)).await.unwrap();
    assert!(result.output.contains("/tmp"), "output was {:?}", result.output);

    manager.terminate(&id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exec_captures_exit_codes() {
    let (_temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };
    let id = record.id.to_string();

    let ok = manager.exec(&id, "true", Some(10)).await.unwrap();
    assert_eq!(ok.exit_code, 0);

    let fail = manager.exec(&id, "false", Some(10)).await.unwrap();
    assert_eq!(fail.exit_code, 1);

    manager.terminate(&id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn env_mutation_is_visible_to_later_commands() {
    let (_temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };
    let id = record.id.to_string();

    let mut env = std::collections::HashMap::new();
    env.insert("HUTCH_TEST_VALUE".to_string(), "galvanized".to_string());
    manager.set_env(&id, &env).await.unwrap();

    let result = manager.exec(&id, "echo $HUTCH_TEST_VALUE", Some(10)).await.unwrap();
    assert!(result.output.contains("galvanized"), "output was {:?}", result.output);

    assert_eq!(record.summary().status, "active");
    manager.terminate(&id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_env_key_is_rejected() {
    let (_temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };
    let mut env = std::collections::HashMap::new();
    env.insert("BAD KEY".to_string(), "x".to_string());
    assert!(manager.set_env(record.id.as_str(), &env).await.is_err());
    manager.terminate(record.id.as_str()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_removes_session_and_closes_feed() {
    let (_temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };
    let id = record.id.to_string();
    let mut feed = record.subscribe();

    manager.terminate(&id).await.unwrap();
    assert!(manager.get(&id).is_err());
    assert!(manager.list().is_empty());

    // Subscribers get a final close event (possibly after buffered lines).
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match feed.recv().await {
                Ok(LogEvent::Closed) => break true,
                Ok(LogEvent::Line(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break true,
            }
        }
    })
    .await;
    assert!(matches!(closed, Ok(true)));

    // Terminating again reports the session as gone.
    assert!(manager.terminate(&id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shell_exit_finishes_the_session() {
    let (_temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };
    let id = record.id.to_string();
    let _ = manager.exec(&id, "exit 0", Some(5)).await;

    for _ in 0..100 {
        if manager.get(&id).is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session survived shell exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_idle_past_the_threshold_are_flagged() {
    let (_temp, manager) = manager();
    let Some(record) = create_or_skip(&manager, &CreateSessionRequest::default()) else {
        return;
    };

    let now = record.summary().last_activity_at;
    assert!(manager.idle_ids(now + 1000).is_empty());

    // 31 minutes with no activity.
    let later = now + 31 * 60 * 1000;
    assert_eq!(manager.idle_ids(later), vec![record.id]);

    manager.terminate(record.id.as_str()).await.unwrap();
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (_temp, manager) = manager();
    assert!(manager.get("ses-missing").is_err());
    assert!(manager.exec("ses-missing", "true", None).await.is_err());
}

#[parameterized(
    plain = { "done", "__M__", None },
    match_zero = { "__M__-0", "__M__", Some(0) },
    match_nonzero = { "__M__-127", "__M__", Some(127) },
    echoed_command = { "echo \"__M__-$?\"", "__M__", None },
    wrong_marker = { "__N__-0", "__M__", None },
    trailing_cr = { "  __M__-3  ", "__M__", Some(3) },
)]
fn marker_lines_parse(line: &str, marker: &str, expected: Option<i32>) {
    assert_eq!(crate::sessions::parse_marker(line, marker), expected);
}

#[parameterized(
    plain = { "abc", "abc" },
    quotes = { "say \"hi\"", "say \\\"hi\\\"" },
    dollar = { "cost $5", "cost \\$5" },
    backslash = { "a\\b", "a\\\\b" },
    backtick = { "`ls`", "\\`ls\\`" },
)]
fn shell_escaping(input: &str, expected: &str) {
    assert_eq!(crate::sessions::escape_double_quoted(input), expected);
}
