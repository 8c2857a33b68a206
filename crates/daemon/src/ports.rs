// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listening-port monitor.
//!
//! Snapshots listening TCP ports by parsing `/proc/net/tcp` and
//! `/proc/net/tcp6` (no `ss` dependency, works in minimal containers).
//! Snapshots are cached for one second; concurrent callers during a
//! refresh share a single read under the refresh lock.

use crate::error::ApiError;
use crate::protocol::PortsPayload;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const PROC_TCP: &str = "/proc/net/tcp";
const PROC_TCP6: &str = "/proc/net/tcp6";
/// Snapshot TTL.
const CACHE_TTL: Duration = Duration::from_secs(1);
/// Socket state `LISTEN` in procfs hex.
const STATE_LISTEN: &str = "0A";

#[derive(Debug, Clone)]
struct Snapshot {
    ports: Vec<u16>,
    taken_at_ms: u64,
    taken_at: Instant,
}

pub struct PortMonitor {
    excluded: HashSet<u16>,
    cache: Mutex<Option<Snapshot>>,
    refresh: tokio::sync::Mutex<()>,
}

impl PortMonitor {
    pub fn new(excluded: HashSet<u16>) -> Self {
        Self { excluded, cache: Mutex::new(None), refresh: tokio::sync::Mutex::new(()) }
    }

    /// Current snapshot; served from cache within the TTL. Callers always
    /// receive their own copy of the port list.
    pub async fn snapshot(&self) -> Result<PortsPayload, ApiError> {
        if let Some(fresh) = self.cached() {
            return Ok(fresh);
        }

        let _flight = self.refresh.lock().await;
        // A concurrent caller may have refreshed while we waited.
        if let Some(fresh) = self.cached() {
            return Ok(fresh);
        }

        let tcp = tokio::fs::read_to_string(PROC_TCP)
            .await
            .map_err(|e| ApiError::from_io(PROC_TCP, e))?;
        let tcp6 = tokio::fs::read_to_string(PROC_TCP6).await.unwrap_or_default();

        let mut ports: BTreeSet<u16> = BTreeSet::new();
        ports.extend(parse_listening_ports(&tcp));
        ports.extend(parse_listening_ports(&tcp6));
        let ports: Vec<u16> = ports.into_iter().filter(|p| !self.excluded.contains(p)).collect();

        let snapshot = Snapshot { ports, taken_at_ms: epoch_ms(), taken_at: Instant::now() };
        let payload = PortsPayload { ports: snapshot.ports.clone(), taken_at: snapshot.taken_at_ms };
        *self.cache.lock() = Some(snapshot);
        Ok(payload)
    }

    fn cached(&self) -> Option<PortsPayload> {
        let cache = self.cache.lock();
        let snapshot = cache.as_ref()?;
        if snapshot.taken_at.elapsed() < CACHE_TTL {
            Some(PortsPayload { ports: snapshot.ports.clone(), taken_at: snapshot.taken_at_ms })
        } else {
            None
        }
    }
}

/// Extract ports of LISTEN sockets bound to the any-address from one
/// procfs net table.
///
/// Lines look like:
/// `0: 00000000:2585 00000000:0000 0A 00000000:00000000 00:00000000 00000000 0 0 12345 1 ...`
fn parse_listening_ports(table: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for line in table.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let _slot = fields.next();
        let Some(local) = fields.next() else { continue };
        let _remote = fields.next();
        let Some(state) = fields.next() else { continue };
        if state != STATE_LISTEN {
            continue;
        }
        let Some((addr, port_hex)) = local.rsplit_once(':') else { continue };
        // Any-address bind: every nibble of the (v4 or v6) address is zero.
        if !addr.bytes().all(|b| b == b'0') {
            continue;
        }
        if let Ok(port) = u16::from_str_radix(port_hex, 16) {
            ports.push(port);
        }
    }
    ports
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
