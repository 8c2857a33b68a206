// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervisor: async exec, sync exec, kill, logs, status.
//!
//! Each spawned child gets a record with two bounded log rings and a
//! broadcast channel for live subscribers. A monitor task owns the child
//! handle and is the only writer of terminal status; the kill handler just
//! delivers signals. A reaper sweeps records an hour after they end.

use crate::error::ApiError;
use crate::protocol::{ExecRequest, ExecSyncPayload, ProcessStatusPayload, ProcessSummary};
use hutch_core::{LogEvent, LogLine, LogRing, ProcessId, StreamKind};
use nix::sys::signal::{kill as send_signal, Signal};
use nix::unistd::Pid;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace between SIGTERM and SIGKILL on timeout or shutdown.
const KILL_GRACE: Duration = Duration::from_secs(1);
/// Terminated records are swept this long after they end.
const REAP_AFTER: Duration = Duration::from_secs(60 * 60);
/// Reaper cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Per-record live-subscriber channel depth.
const BROADCAST_CAPACITY: usize = 256;
/// Upper bound on a sync exec with no explicit timeout.
const SYNC_EXEC_DEADLINE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
    Killed,
    Timeout,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Killed => "killed",
            ProcessStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug)]
struct ProcState {
    status: ProcessStatus,
    exit_code: Option<i32>,
    ended_at: Option<u64>,
    kill_requested: bool,
    timed_out: bool,
}

#[derive(Debug)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub pid: u32,
    pub command: String,
    pub args: Vec<String>,
    pub started_at: u64,
    state: Mutex<ProcState>,
    stdout: Mutex<LogRing>,
    stderr: Mutex<LogRing>,
    events: broadcast::Sender<LogEvent>,
    done: watch::Sender<ProcessStatus>,
}

impl ProcessRecord {
    fn new(pid: u32, command: String, args: Vec<String>, ring_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (done, _) = watch::channel(ProcessStatus::Running);
        Self {
            id: ProcessId::new(),
            pid,
            command,
            args,
            started_at: epoch_ms(),
            state: Mutex::new(ProcState {
                status: ProcessStatus::Running,
                exit_code: None,
                ended_at: None,
                kill_requested: false,
                timed_out: false,
            }),
            stdout: Mutex::new(LogRing::new(ring_capacity)),
            stderr: Mutex::new(LogRing::new(ring_capacity)),
            events,
            done,
        }
    }

    pub fn status_payload(&self) -> ProcessStatusPayload {
        let state = self.state.lock();
        ProcessStatusPayload {
            status: state.status.as_str().to_string(),
            exit_code: state.exit_code,
            started_at: self.started_at,
            ended_at: state.ended_at,
        }
    }

    pub fn summary(&self) -> ProcessSummary {
        let state = self.state.lock();
        ProcessSummary {
            id: self.id,
            pid: self.pid,
            command: self.command.clone(),
            status: state.status.as_str().to_string(),
            started_at: self.started_at,
            ended_at: state.ended_at,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.state.lock().status
    }

    /// Last `tail` lines of each stream (all lines when `None`).
    pub fn logs(&self, tail: Option<usize>) -> (Vec<String>, Vec<String>) {
        let stdout = self.stdout.lock().tail(tail).into_iter().map(|l| l.content).collect();
        let stderr = self.stderr.lock().tail(tail).into_iter().map(|l| l.content).collect();
        (stdout, stderr)
    }

    /// Live log feed; delivery starts at subscription time.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    fn watch_done(&self) -> watch::Receiver<ProcessStatus> {
        self.done.subscribe()
    }

    fn push_line(&self, stream: StreamKind, content: String) {
        let line = LogLine { stream, content };
        match stream {
            StreamKind::Stdout => self.stdout.lock().push(line.clone()),
            StreamKind::Stderr => self.stderr.lock().push(line.clone()),
        }
        let _ = self.events.send(LogEvent::Line(line));
    }

    fn mark_timed_out(&self) {
        self.state.lock().timed_out = true;
    }

    fn mark_kill_requested(&self) {
        self.state.lock().kill_requested = true;
    }

    /// Terminal transition, performed exactly once by the monitor task.
    fn finalize(&self, exit_code: Option<i32>) {
        let status = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = if state.timed_out {
                ProcessStatus::Timeout
            } else if state.kill_requested {
                ProcessStatus::Killed
            } else if exit_code == Some(0) {
                ProcessStatus::Completed
            } else {
                ProcessStatus::Failed
            };
            state.exit_code = exit_code;
            state.ended_at = Some(epoch_ms());
            state.status
        };
        let _ = self.events.send(LogEvent::Closed);
        let _ = self.done.send(status);
        info!(id = %self.id, status = status.as_str(), ?exit_code, "process ended");
    }

    fn ended_at(&self) -> Option<u64> {
        self.state.lock().ended_at
    }
}

pub struct ProcessManager {
    workspace: PathBuf,
    ring_capacity: usize,
    procs: RwLock<HashMap<ProcessId, Arc<ProcessRecord>>>,
}

impl ProcessManager {
    pub fn new(workspace: PathBuf, ring_capacity: usize) -> Self {
        Self { workspace, ring_capacity, procs: RwLock::new(HashMap::new()) }
    }

    /// Spawn a child and return its record immediately. Output is captured
    /// line-by-line into the record's rings by background readers; the
    /// monitor task waits for exit and applies the timeout escalation.
    pub fn exec(self: &Arc<Self>, req: &ExecRequest) -> Result<Arc<ProcessRecord>, ApiError> {
        if req.command.is_empty() {
            return Err(ApiError::Validation("command must not be empty".to_string()));
        }

        let mut cmd = if req.shell {
            let mut line = req.command.clone();
            for arg in &req.args {
                line.push(' ');
                line.push_str(arg);
            }
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(line);
            c
        } else {
            let mut c = Command::new(&req.command);
            c.args(&req.args);
            c
        };

        let cwd = match &req.cwd {
            None => self.workspace.clone(),
            Some(p) if PathBuf::from(p).is_absolute() => PathBuf::from(p),
            Some(p) => self.workspace.join(p),
        };
        cmd.current_dir(cwd)
            .envs(&req.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child =
            cmd.spawn().map_err(|e| ApiError::Operation(format!("spawn {}: {}", req.command, e)))?;
        let pid = child.id().unwrap_or_default();

        let record = Arc::new(ProcessRecord::new(
            pid,
            req.command.clone(),
            req.args.clone(),
            self.ring_capacity,
        ));
        self.procs.write().insert(record.id, Arc::clone(&record));
        info!(id = %record.id, pid, command = %req.command, "process spawned");

        let stdout_task = child.stdout.take().map(|out| {
            spawn_line_reader(out, StreamKind::Stdout, Arc::clone(&record))
        });
        let stderr_task = child.stderr.take().map(|err| {
            spawn_line_reader(err, StreamKind::Stderr, Arc::clone(&record))
        });

        let timeout = req.timeout.map(Duration::from_secs);
        let monitor_record = Arc::clone(&record);
        tokio::spawn(async move {
            monitor_child(child, monitor_record, timeout, stdout_task, stderr_task).await;
        });

        Ok(record)
    }

    /// Spawn and block until exit; returns collected streams (subject to
    /// ring capacity) and the wall time.
    pub async fn exec_sync(self: &Arc<Self>, req: &ExecRequest) -> Result<ExecSyncPayload, ApiError> {
        let record = self.exec(req)?;
        let deadline = req.timeout.map(|t| Duration::from_secs(t) + KILL_GRACE * 3).unwrap_or(SYNC_EXEC_DEADLINE);

        let mut done = record.watch_done();
        let wait = async {
            loop {
                if done.borrow().is_terminal() {
                    break;
                }
                if done.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_err() {
            return Err(ApiError::Operation(format!(
                "process {} still running after {}s",
                record.id,
                deadline.as_secs()
            )));
        }

        let state = record.status_payload();
        let stdout = record.stdout.lock().text();
        let stderr = record.stderr.lock().text();
        Ok(ExecSyncPayload {
            process_id: record.id,
            exit_code: state.exit_code,
            status: state.status,
            stdout,
            stderr,
            duration: state.ended_at.unwrap_or(record.started_at).saturating_sub(record.started_at),
        })
    }

    pub fn get(&self, id: &str) -> Result<Arc<ProcessRecord>, ApiError> {
        self.procs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("process {} not found", id)))
    }

    pub fn list(&self) -> Vec<ProcessSummary> {
        let mut all: Vec<ProcessSummary> =
            self.procs.read().values().map(|r| r.summary()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.as_str().cmp(b.id.as_str())));
        all
    }

    /// Deliver a signal to a running process. The terminal status
    /// transition belongs to the monitor task, not this handler.
    pub fn kill(&self, id: &str, signal: Option<&str>) -> Result<(), ApiError> {
        let record = self.get(id)?;
        if record.status().is_terminal() {
            return Err(ApiError::Conflict(format!("process {} already exited", id)));
        }
        let sig = parse_signal(signal)?;
        record.mark_kill_requested();
        send_signal(Pid::from_raw(record.pid as i32), sig)
            .map_err(|e| ApiError::Operation(format!("kill {}: {}", id, e)))?;
        info!(id = %record.id, signal = %sig, "signal delivered");
        Ok(())
    }

    /// Remove a terminated record (explicit deletion).
    pub fn remove(&self, id: &str) -> Result<(), ApiError> {
        let record = self.get(id)?;
        if !record.status().is_terminal() {
            return Err(ApiError::Conflict(format!("process {} is still running", id)));
        }
        self.procs.write().remove(id);
        Ok(())
    }

    /// Drop records that ended at least [`REAP_AFTER`] before `now_ms`.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(REAP_AFTER.as_millis() as u64);
        let mut procs = self.procs.write();
        let before = procs.len();
        procs.retain(|_, record| match record.ended_at() {
            Some(ended) => ended > cutoff,
            None => true,
        });
        let swept = before - procs.len();
        if swept > 0 {
            debug!(swept, "process records reaped");
        }
        swept
    }

    /// Background reaper; runs until shutdown.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => { manager.sweep(epoch_ms()); }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Shutdown path: SIGTERM everything still running, then SIGKILL
    /// whatever survives the grace period.
    pub async fn terminate_all(&self) {
        let running: Vec<Arc<ProcessRecord>> = self
            .procs
            .read()
            .values()
            .filter(|r| !r.status().is_terminal())
            .cloned()
            .collect();
        if running.is_empty() {
            return;
        }
        for record in &running {
            record.mark_kill_requested();
            let _ = send_signal(Pid::from_raw(record.pid as i32), Signal::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
        for record in &running {
            if !record.status().is_terminal() {
                let _ = send_signal(Pid::from_raw(record.pid as i32), Signal::SIGKILL);
            }
        }
    }
}

/// Reader task for one std stream: pushes each line to the record (ring +
/// broadcast) until EOF.
fn spawn_line_reader<R>(
    stream: R,
    kind: StreamKind,
    record: Arc<ProcessRecord>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            record.push_line(kind, line);
        }
    })
}

/// Waits for the child and owns every terminal status transition. On
/// timeout: SIGTERM, one second of grace, then SIGKILL.
async fn monitor_child(
    mut child: Child,
    record: Arc<ProcessRecord>,
    timeout: Option<Duration>,
    stdout_task: Option<tokio::task::JoinHandle<()>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
) {
    let exit = match timeout {
        Some(limit) => {
            tokio::select! {
                result = child.wait() => Some(result),
                _ = tokio::time::sleep(limit) => None,
            }
        }
        None => Some(child.wait().await),
    };

    let exit = match exit {
        Some(result) => result,
        None => {
            record.mark_timed_out();
            warn!(id = %record.id, pid = record.pid, "process timed out, escalating");
            let _ = send_signal(Pid::from_raw(record.pid as i32), Signal::SIGTERM);
            tokio::select! {
                result = child.wait() => result,
                _ = tokio::time::sleep(KILL_GRACE) => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    // Drain both readers so every line is in the ring and broadcast before
    // the close event.
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    match exit {
        Ok(status) => record.finalize(status.code()),
        Err(e) => {
            warn!(id = %record.id, error = %e, "wait failed");
            record.finalize(None);
        }
    }
}

/// `SIGTERM` (default), a signal name with or without the `SIG` prefix, or
/// a number.
fn parse_signal(signal: Option<&str>) -> Result<Signal, ApiError> {
    let Some(raw) = signal.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Signal::SIGTERM);
    };
    if let Ok(num) = raw.parse::<i32>() {
        return Signal::try_from(num)
            .map_err(|_| ApiError::Validation(format!("unknown signal number {}", num)));
    }
    let name = raw.to_ascii_uppercase();
    let name = if name.starts_with("SIG") { name } else { format!("SIG{}", name) };
    name.parse::<Signal>().map_err(|_| ApiError::Validation(format!("unknown signal {:?}", raw)))
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
