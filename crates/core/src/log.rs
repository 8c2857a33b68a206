// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log lines produced by supervised processes and shell sessions.

use serde::{Deserialize, Serialize};

/// Which output stream a line was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Prefix tag used when lines are fanned out to WebSocket subscribers.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "[stdout]",
            StreamKind::Stderr => "[stderr]",
        }
    }
}

/// One captured output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: StreamKind,
    pub content: String,
}

impl LogLine {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self { stream: StreamKind::Stdout, content: content.into() }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self { stream: StreamKind::Stderr, content: content.into() }
    }

    /// The line as delivered to subscribers: `[stdout] …` / `[stderr] …`.
    pub fn tagged(&self) -> String {
        format!("{} {}", self.stream.tag(), self.content)
    }
}

/// Event published to log subscribers of a process or session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A new output line was captured.
    Line(LogLine),
    /// The producer terminated; no further lines will follow.
    Closed,
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
