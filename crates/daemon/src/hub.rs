// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket hub protocol: client actions, server messages, and the
//! per-socket subscription set.
//!
//! One socket per client. Subscriptions tie a socket to the log feed of a
//! process or session; each one runs as a forward task cancelled through
//! its token when the client unsubscribes or the socket closes.

use crate::protocol::{ProcessSummary, SessionSummary};
use hutch_core::LogLine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Process,
    Session,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Process => "process",
            TargetKind::Session => "session",
        }
    }
}

/// Messages accepted from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "type")]
        kind: TargetKind,
        #[serde(rename = "targetId")]
        target_id: String,
    },
    Unsubscribe {
        #[serde(rename = "type")]
        kind: TargetKind,
        #[serde(rename = "targetId")]
        target_id: String,
    },
    List,
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid message: {}", e))
}

// ---------------------------------------------------------------------------
// Server → client messages. Built as strings so the socket writer can send
// them without further serialization fallibility.

pub fn log_message(kind: TargetKind, target_id: &str, line: &LogLine) -> String {
    json!({
        "type": "log",
        "dataType": kind.as_str(),
        "targetId": target_id,
        "log": { "content": line.tagged() },
    })
    .to_string()
}

/// Emitted once per lag burst when a slow reader forced the feed to drop
/// its oldest queued lines.
pub fn dropped_notice(kind: TargetKind, target_id: &str, dropped: u64) -> String {
    json!({
        "type": "log",
        "dataType": kind.as_str(),
        "targetId": target_id,
        "log": { "content": format!("dropped: {}", dropped) },
    })
    .to_string()
}

/// Final event on a feed whose producer terminated.
pub fn close_message(kind: TargetKind, target_id: &str) -> String {
    json!({
        "type": "close",
        "dataType": kind.as_str(),
        "targetId": target_id,
    })
    .to_string()
}

pub fn ack_message(action: &str, kind: TargetKind, target_id: &str) -> String {
    json!({
        "action": action,
        "type": kind.as_str(),
        "targetId": target_id,
    })
    .to_string()
}

pub fn error_message(message: &str) -> String {
    json!({ "error": message }).to_string()
}

pub fn list_message(processes: &[ProcessSummary], sessions: &[SessionSummary]) -> String {
    json!({
        "type": "list",
        "processes": processes,
        "sessions": sessions,
    })
    .to_string()
}

// ---------------------------------------------------------------------------

/// Live subscriptions of one socket, keyed by `(kind, targetId)`.
#[derive(Default)]
pub struct SubscriptionSet {
    active: HashMap<(TargetKind, String), CancellationToken>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: TargetKind, target_id: &str) -> bool {
        self.active.contains_key(&(kind, target_id.to_string()))
    }

    /// Register a subscription; an existing one for the same target is
    /// cancelled and replaced.
    pub fn insert(&mut self, kind: TargetKind, target_id: &str, token: CancellationToken) {
        if let Some(old) = self.active.insert((kind, target_id.to_string()), token) {
            old.cancel();
        }
    }

    /// Cancel and drop one subscription. Returns false when none matched.
    pub fn remove(&mut self, kind: TargetKind, target_id: &str) -> bool {
        match self.active.remove(&(kind, target_id.to_string())) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything (socket closed).
    pub fn cancel_all(&mut self) {
        for (_, token) in self.active.drain() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
