// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive shell sessions attached to PTYs.
//!
//! Each session spawns the configured shell on a fresh pseudo-terminal.
//! A blocking reader drains the PTY master into the session's ring and
//! broadcast channel; writes go through a dedicated blocking writer task.
//! Completion of `exec` calls is detected with a random per-call marker
//! echoed after the command. If the command itself prints the marker
//! line, detection trips early; that limitation is inherent to driving an
//! interactive shell through its own stdin.

use crate::error::ApiError;
use crate::protocol::{CreateSessionRequest, SessionExecPayload, SessionSummary};
use hutch_core::{LogEvent, LogLine, LogRing, SessionId, StreamKind};
use parking_lot::{Mutex, RwLock};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sessions idle longer than this are reaped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Idle GC cadence.
const GC_INTERVAL: Duration = Duration::from_secs(60);
/// Default wait for the completion marker in `exec`.
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace between `exit` and a hard kill in `terminate`.
const EXIT_GRACE: Duration = Duration::from_secs(1);
const BROADCAST_CAPACITY: usize = 256;
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Terminated => "terminated",
        }
    }
}

struct SessionState {
    status: SessionStatus,
    cwd: PathBuf,
    env: HashMap<String, String>,
    last_activity: u64,
}

pub struct SessionRecord {
    pub id: SessionId,
    pub pid: u32,
    pub created_at: u64,
    state: Mutex<SessionState>,
    stdout: Mutex<LogRing>,
    stderr: Mutex<LogRing>,
    events: broadcast::Sender<LogEvent>,
    writer: mpsc::Sender<Vec<u8>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exited: watch::Sender<bool>,
}

impl SessionRecord {
    pub fn summary(&self) -> SessionSummary {
        let state = self.state.lock();
        SessionSummary {
            id: self.id,
            pid: self.pid,
            cwd: state.cwd.to_string_lossy().into_owned(),
            status: state.status.as_str().to_string(),
            created_at: self.created_at,
            last_activity_at: state.last_activity,
        }
    }

    /// Live log feed; delivery starts at subscription time.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    fn touch(&self) {
        self.state.lock().last_activity = epoch_ms();
    }

    fn last_activity(&self) -> u64 {
        self.state.lock().last_activity
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<(), ApiError> {
        self.writer
            .send(bytes)
            .await
            .map_err(|_| ApiError::Operation(format!("session {} input closed", self.id)))
    }

    fn push_line(&self, content: String) {
        let line = LogLine { stream: StreamKind::Stdout, content };
        self.stdout.lock().push(line.clone());
        let _ = self.events.send(LogEvent::Line(line));
    }
}

pub struct SessionManager {
    workspace: PathBuf,
    default_shell: String,
    ring_capacity: usize,
    sessions: RwLock<HashMap<SessionId, Arc<SessionRecord>>>,
}

impl SessionManager {
    pub fn new(workspace: PathBuf, default_shell: String, ring_capacity: usize) -> Self {
        Self { workspace, default_shell, ring_capacity, sessions: RwLock::new(HashMap::new()) }
    }

    /// Spawn a shell on a new PTY and start its reader/writer/wait tasks.
    pub fn create(self: &Arc<Self>, req: &CreateSessionRequest) -> Result<Arc<SessionRecord>, ApiError> {
        let shell = req.shell.clone().unwrap_or_else(|| self.default_shell.clone());
        let cwd = match &req.working_dir {
            None => self.workspace.clone(),
            Some(p) if PathBuf::from(p).is_absolute() => PathBuf::from(p),
            Some(p) => self.workspace.join(p),
        };

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: req.rows.unwrap_or(DEFAULT_ROWS),
                cols: req.cols.unwrap_or(DEFAULT_COLS),
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ApiError::Operation(format!("openpty: {}", e)))?;

        let mut builder = CommandBuilder::new(&shell);
        builder.cwd(&cwd);
        for (key, value) in &req.env {
            builder.env(key, value);
        }
        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| ApiError::Operation(format!("spawn {}: {}", shell, e)))?;
        let pid = child.process_id().unwrap_or_default();
        let killer = child.clone_killer();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ApiError::Operation(format!("pty reader: {}", e)))?;
        let mut pty_writer = pair
            .master
            .take_writer()
            .map_err(|e| ApiError::Operation(format!("pty writer: {}", e)))?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (exited, _) = watch::channel(false);
        let now = epoch_ms();

        let record = Arc::new(SessionRecord {
            id: SessionId::new(),
            pid,
            created_at: now,
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                cwd,
                env: req.env.clone(),
                last_activity: now,
            }),
            stdout: Mutex::new(LogRing::new(self.ring_capacity)),
            stderr: Mutex::new(LogRing::new(self.ring_capacity)),
            events,
            writer: writer_tx,
            killer: Mutex::new(killer),
            exited,
        });
        self.sessions.write().insert(record.id, Arc::clone(&record));
        info!(id = %record.id, pid, shell = %shell, "session created");

        // Reader: blocking PTY reads, forwarded as chunks to the line pump.
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        // Line pump: assemble chunks into lines, feed ring + broadcast.
        // When the PTY stream ends (shell exit or read error) the session
        // is finished and subscribers get a final close event.
        let pump_manager = Arc::clone(self);
        let pump_record = Arc::clone(&record);
        tokio::spawn(async move {
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = chunk_rx.recv().await {
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let mut line: Vec<u8> = pending.drain(..=pos).collect();
                    line.pop(); // \n
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    pump_record.push_line(String::from_utf8_lossy(&line).into_owned());
                }
            }
            if !pending.is_empty() {
                pump_record.push_line(String::from_utf8_lossy(&pending).into_owned());
            }
            pump_manager.finish(&pump_record);
        });

        // Writer: apply queued input to the PTY on a blocking thread.
        tokio::task::spawn_blocking(move || {
            while let Some(bytes) = writer_rx.blocking_recv() {
                if pty_writer.write_all(&bytes).and_then(|_| pty_writer.flush()).is_err() {
                    break;
                }
            }
        });

        // Wait: observe shell exit independently of the reader.
        let wait_manager = Arc::clone(self);
        let wait_record = Arc::clone(&record);
        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
            let _ = wait_record.exited.send(true);
            wait_manager.finish(&wait_record);
        });

        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<Arc<SessionRecord>, ApiError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut all: Vec<SessionSummary> =
            self.sessions.read().values().map(|r| r.summary()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.as_str().cmp(b.id.as_str())));
        all
    }

    /// Run a command in the session and capture output until the completion
    /// marker (or the timeout, in which case the exit code is a best-effort 0).
    pub async fn exec(
        &self,
        id: &str,
        command: &str,
        timeout: Option<u64>,
    ) -> Result<SessionExecPayload, ApiError> {
        let record = self.get(id)?;
        record.touch();

        let marker = format!("__HUTCH_{}__", nanoid::nanoid!(10));
        let mut feed = record.subscribe();
        let stderr_before = record.stderr.lock().len();

        record
            .write(format!("{}; echo \"{}-$?\"\n", command, marker).into_bytes())
            .await?;

        let deadline = timeout.map(Duration::from_secs).unwrap_or(DEFAULT_EXEC_TIMEOUT);
        let mut output: Vec<String> = Vec::new();
        let mut exit_code = 0;

        let collect = async {
            loop {
                match feed.recv().await {
                    Ok(LogEvent::Line(line)) => {
                        if let Some(code) = parse_marker(&line.content, &marker) {
                            exit_code = code;
                            break;
                        }
                        output.push(line.content);
                    }
                    Ok(LogEvent::Closed) => break,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        };
        if tokio::time::timeout(deadline, collect).await.is_err() {
            debug!(id = %record.id, "session exec timed out waiting for marker");
        }

        let stderr_lines = record.stderr.lock().snapshot();
        let stderr = stderr_lines
            .iter()
            .skip(stderr_before)
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(SessionExecPayload { output: output.join("\n"), stderr, exit_code })
    }

    /// Export each variable into the live shell and record it.
    pub async fn set_env(&self, id: &str, env: &HashMap<String, String>) -> Result<(), ApiError> {
        let record = self.get(id)?;
        record.touch();
        for (key, value) in env {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ApiError::Validation(format!("invalid environment key {:?}", key)));
            }
            record
                .write(format!("export {}=\"{}\"\n", key, escape_double_quoted(value)).into_bytes())
                .await?;
        }
        record.state.lock().env.extend(env.clone());
        Ok(())
    }

    /// `cd` the live shell and record the new working directory.
    pub async fn change_dir(&self, id: &str, path: &str) -> Result<(), ApiError> {
        if path.is_empty() {
            return Err(ApiError::Validation("path must not be empty".to_string()));
        }
        let record = self.get(id)?;
        record.touch();
        record
            .write(format!("cd \"{}\"\n", escape_double_quoted(path)).into_bytes())
            .await?;
        let mut state = record.state.lock();
        let requested = PathBuf::from(path);
        state.cwd = if requested.is_absolute() { requested } else { state.cwd.join(requested) };
        Ok(())
    }

    /// Ask the shell to exit, escalate to a kill after one second, and drop
    /// the session from the map.
    pub async fn terminate(&self, id: &str) -> Result<(), ApiError> {
        let record = self.get(id)?;
        let _ = record.write(b"exit\n".to_vec()).await;

        let mut exited = record.exited.subscribe();
        let gone = async {
            while !*exited.borrow() {
                if exited.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(EXIT_GRACE, gone).await.is_err() {
            warn!(id = %record.id, "shell ignored exit, killing");
            let _ = record.killer.lock().kill();
        }
        self.finish(&record);
        Ok(())
    }

    /// Idempotent terminal transition: mark terminated, close the feed,
    /// remove from the map.
    fn finish(&self, record: &Arc<SessionRecord>) {
        {
            let mut state = record.state.lock();
            if state.status == SessionStatus::Terminated {
                return;
            }
            state.status = SessionStatus::Terminated;
        }
        let _ = record.events.send(LogEvent::Closed);
        self.sessions.write().remove(record.id.as_str());
        info!(id = %record.id, "session terminated");
    }

    /// Sessions idle since before `now_ms - IDLE_TIMEOUT`.
    fn idle_ids(&self, now_ms: u64) -> Vec<SessionId> {
        let cutoff = now_ms.saturating_sub(IDLE_TIMEOUT.as_millis() as u64);
        self.sessions
            .read()
            .values()
            .filter(|r| r.last_activity() < cutoff)
            .map(|r| r.id)
            .collect()
    }

    /// Background idle reaper; runs until shutdown.
    pub fn spawn_idle_gc(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(GC_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        for id in manager.idle_ids(epoch_ms()) {
                            info!(%id, "reaping idle session");
                            let _ = manager.terminate(id.as_str()).await;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Shutdown path: terminate every live session.
    pub async fn terminate_all(&self) {
        let ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        for id in ids {
            let _ = self.terminate(id.as_str()).await;
        }
    }
}

/// `<marker>-<code>` on its own line marks command completion. The PTY echo
/// of the command itself carries `-$?` unexpanded and never parses.
fn parse_marker(line: &str, marker: &str) -> Option<i32> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix(marker)?;
    let code = rest.strip_prefix('-')?;
    code.parse::<i32>().ok()
}

/// Escape for interpolation inside a double-quoted shell string.
fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
