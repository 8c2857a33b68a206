// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::hub::{
    ack_message, close_message, dropped_notice, error_message, list_message, log_message,
    parse_client_message, ClientMessage, SubscriptionSet, TargetKind,
};
use hutch_core::LogLine;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[test]
fn subscribe_message_parses() {
    let msg = parse_client_message(
        r#"{"action":"subscribe","type":"process","targetId":"prc-abc"}"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        ClientMessage::Subscribe { kind: TargetKind::Process, target_id: "prc-abc".to_string() }
    );
}

#[test]
fn unsubscribe_message_parses() {
    let msg = parse_client_message(
        r#"{"action":"unsubscribe","type":"session","targetId":"ses-xyz"}"#,
    )
    .unwrap();
    assert_eq!(
        msg,
        ClientMessage::Unsubscribe { kind: TargetKind::Session, target_id: "ses-xyz".to_string() }
    );
}

#[test]
fn list_message_parses() {
    assert_eq!(parse_client_message(r#"{"action":"list"}"#).unwrap(), ClientMessage::List);
}

#[test]
fn unknown_action_is_an_error() {
    assert!(parse_client_message(r#"{"action":"fly"}"#).is_err());
    assert!(parse_client_message("not json").is_err());
}

#[test]
fn log_messages_carry_tagged_content() {
    let text = log_message(TargetKind::Process, "prc-1", &LogLine::stdout("hello"));
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "log");
    assert_eq!(value["dataType"], "process");
    assert_eq!(value["targetId"], "prc-1");
    assert_eq!(value["log"]["content"], "[stdout] hello");
}

#[test]
fn stderr_lines_are_prefixed() {
    let text = log_message(TargetKind::Process, "prc-1", &LogLine::stderr("boom"));
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["log"]["content"], "[stderr] boom");
}

#[test]
fn dropped_notice_reports_count() {
    let text = dropped_notice(TargetKind::Session, "ses-1", 17);
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["log"]["content"], "dropped: 17");
    assert_eq!(value["dataType"], "session");
}

#[test]
fn close_message_shape() {
    let value: Value = serde_json::from_str(&close_message(TargetKind::Session, "ses-9")).unwrap();
    assert_eq!(value["type"], "close");
    assert_eq!(value["targetId"], "ses-9");
}

#[test]
fn ack_message_shape() {
    let value: Value =
        serde_json::from_str(&ack_message("subscribed", TargetKind::Process, "prc-2")).unwrap();
    assert_eq!(value["action"], "subscribed");
    assert_eq!(value["type"], "process");
    assert_eq!(value["targetId"], "prc-2");
}

#[test]
fn error_message_shape() {
    let value: Value = serde_json::from_str(&error_message("unknown process prc-9")).unwrap();
    assert_eq!(value["error"], "unknown process prc-9");
}

#[test]
fn list_message_includes_both_kinds() {
    let value: Value = serde_json::from_str(&list_message(&[], &[])).unwrap();
    assert_eq!(value["type"], "list");
    assert!(value["processes"].as_array().unwrap().is_empty());
    assert!(value["sessions"].as_array().unwrap().is_empty());
}

#[test]
fn subscriptions_insert_remove_and_cancel() {
    let mut subs = SubscriptionSet::new();
    let token = CancellationToken::new();
    subs.insert(TargetKind::Process, "prc-1", token.clone());
    assert!(subs.contains(TargetKind::Process, "prc-1"));
    assert!(!subs.contains(TargetKind::Session, "prc-1"));

    assert!(subs.remove(TargetKind::Process, "prc-1"));
    assert!(token.is_cancelled());
    assert!(!subs.remove(TargetKind::Process, "prc-1"));
}

#[test]
fn reinserting_a_subscription_cancels_the_old_task() {
    let mut subs = SubscriptionSet::new();
    let first = CancellationToken::new();
    let second = CancellationToken::new();
    subs.insert(TargetKind::Session, "ses-1", first.clone());
    subs.insert(TargetKind::Session, "ses-1", second.clone());
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());
    assert_eq!(subs.len(), 1);
}

#[test]
fn cancel_all_cancels_everything() {
    let mut subs = SubscriptionSet::new();
    let a = CancellationToken::new();
    let b = CancellationToken::new();
    subs.insert(TargetKind::Process, "prc-1", a.clone());
    subs.insert(TargetKind::Session, "ses-1", b.clone());
    subs.cancel_all();
    assert!(a.is_cancelled());
    assert!(b.is_cancelled());
    assert!(subs.is_empty());
}
