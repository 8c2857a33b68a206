// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::protocol::*;
use serde_json::json;

#[test]
fn write_request_defaults_to_utf8() {
    let req: WriteFileRequest =
        serde_json::from_value(json!({"path": "a/b.txt", "content": "hello"})).unwrap();
    assert_eq!(req.encoding, ContentEncoding::Utf8);
    assert!(req.permissions.is_none());
}

#[test]
fn write_request_accepts_base64_and_permissions() {
    let req: WriteFileRequest = serde_json::from_value(json!({
        "path": "bin/tool",
        "content": "aGk=",
        "encoding": "base64",
        "permissions": "755",
    }))
    .unwrap();
    assert_eq!(req.encoding, ContentEncoding::Base64);
    assert_eq!(req.permissions.as_deref(), Some("755"));
}

#[test]
fn list_request_flags_default_off() {
    let req: ListFilesRequest = serde_json::from_value(json!({"path": "."})).unwrap();
    assert!(!req.recursive);
    assert!(!req.include_hidden);
}

#[test]
fn file_entry_uses_camel_case() {
    let entry = FileEntry {
        path: "a.txt".to_string(),
        is_dir: false,
        size: 5,
        mode: "644".to_string(),
        modified_at: 123,
    };
    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["isDir"], false);
    assert_eq!(value["modifiedAt"], 123);
}

#[test]
fn exec_request_minimal_form() {
    let req: ExecRequest = serde_json::from_value(json!({"command": "echo"})).unwrap();
    assert!(req.args.is_empty());
    assert!(req.cwd.is_none());
    assert!(!req.shell);
    assert!(req.timeout.is_none());
}

#[test]
fn exec_request_full_form() {
    let req: ExecRequest = serde_json::from_value(json!({
        "command": "sleep",
        "args": ["60"],
        "cwd": "/tmp",
        "env": {"K": "V"},
        "shell": false,
        "timeout": 1,
    }))
    .unwrap();
    assert_eq!(req.args, vec!["60"]);
    assert_eq!(req.timeout, Some(1));
    assert_eq!(req.env.get("K").map(String::as_str), Some("V"));
}

#[test]
fn exec_payload_is_camel_cased() {
    let payload = ExecPayload {
        process_id: hutch_core::ProcessId::from_string("prc-x"),
        pid: 42,
        status: "running".to_string(),
        started_at: 1,
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["processId"], "prc-x");
    assert_eq!(value["startedAt"], 1);
}

#[test]
fn status_payload_omits_absent_fields() {
    let payload = ProcessStatusPayload {
        status: "running".to_string(),
        exit_code: None,
        started_at: 7,
        ended_at: None,
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert!(value.get("exitCode").is_none());
    assert!(value.get("endedAt").is_none());
}

#[test]
fn replace_result_omits_empty_error() {
    let ok = ReplaceResult { path: "a".into(), ok: true, replacements: Some(2), error: None };
    let value = serde_json::to_value(&ok).unwrap();
    assert!(value.get("error").is_none());
    assert_eq!(value["replacements"], 2);
}

#[test]
fn session_create_request_accepts_empty_object() {
    let req: CreateSessionRequest = serde_json::from_value(json!({})).unwrap();
    assert!(req.working_dir.is_none());
    assert!(req.shell.is_none());
    assert!(req.env.is_empty());
}

#[test]
fn kill_request_signal_is_optional() {
    let req: KillRequest = serde_json::from_value(json!({})).unwrap();
    assert!(req.signal.is_none());
    let req: KillRequest = serde_json::from_value(json!({"signal": "SIGKILL"})).unwrap();
    assert_eq!(req.signal.as_deref(), Some("SIGKILL"));
}
