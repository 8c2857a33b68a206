// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hutch-core: domain primitives for the sandbox agent daemon.
//!
//! Shared by the daemon crate: typed IDs for processes and sessions,
//! log lines and the bounded ring buffer that holds them.

pub mod id;
pub mod log;
pub mod ring;

pub use id::{short, IdBuf, ID_MAX_LEN};
pub use log::{LogEvent, LogLine, StreamKind};
pub use ring::LogRing;

crate::define_id! {
    /// Identifier for a supervised process, e.g. `prc-V1StGXR8_Z5jdHi6B-myT`.
    pub struct ProcessId("prc-");
}

crate::define_id! {
    /// Identifier for an interactive shell session, e.g. `ses-FyD9Ih0qCxRg4lJ3n7wae`.
    pub struct SessionId("ses-");
}
