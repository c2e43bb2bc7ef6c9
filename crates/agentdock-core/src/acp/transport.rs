//! Transport contract and the child-process transport
//!
//! A transport owns a full-duplex channel to the agent. Outbound frames are
//! serialized before they reach `send`; inbound traffic is surfaced as
//! discrete `serde_json::Value` frames in decoder order.

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::{mpsc, Mutex};

#[cfg(any(unix, windows))]
use std::process::Stdio;
#[cfg(any(unix, windows))]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(any(unix, windows))]
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
#[cfg(any(unix, windows))]
use tracing::{debug, error, warn};

/// Full-duplex frame channel to an agent.
///
/// Constructed idle; `connect` transitions to ready and `disconnect` tears
/// the channel down. Implementations serialize concurrent senders so the
/// bytes of two frames never interleave.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Write one serialized frame.
    async fn send(&self, frame: String) -> Result<()>;

    /// Next inbound frame. `None` means the connection has ended.
    async fn recv(&self) -> Option<Value>;

    async fn is_connected(&self) -> bool;
}

/// Launch configuration for a child-process agent
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Transport over the stdio pipes of a spawned agent process.
///
/// stdout is split into newline-delimited frames; stderr is drained to the
/// host log and never affects message flow.
pub struct ProcessTransport {
    config: ProcessConfig,
    #[cfg(any(unix, windows))]
    io: Mutex<Option<ProcessIo>>,
    frame_rx: Mutex<Option<mpsc::Receiver<Value>>>,
}

#[cfg(any(unix, windows))]
struct ProcessIo {
    stdin_tx: mpsc::Sender<String>,
    child: Child,
    reader_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl ProcessTransport {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            #[cfg(any(unix, windows))]
            io: Mutex::new(None),
            frame_rx: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }
}

#[cfg(any(unix, windows))]
#[async_trait]
impl Transport for ProcessTransport {
    async fn connect(&self) -> Result<()> {
        let mut io_guard = self.io.lock().await;
        if io_guard.is_some() {
            return Err(TransportError::AlreadyConnected.into());
        }

        ignore_sigpipe();

        debug!(
            command = %self.config.command,
            args = ?self.config.args,
            cwd = %self.config.working_dir.display(),
            "spawning agent process"
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(&self.config.working_dir)
            .env("PATH", augmented_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::LaunchFailed(format!("{}: {}", self.config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::LaunchFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::LaunchFailed("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::LaunchFailed("failed to capture stderr".into()))?;

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(100);
        let (frame_tx, frame_rx) = mpsc::channel::<Value>(256);

        let writer_task = tokio::spawn(write_stdin_task(stdin, stdin_rx));
        let reader_task = tokio::spawn(read_stdout_task(stdout, frame_tx));
        let stderr_task = tokio::spawn(drain_stderr_task(stderr));

        *io_guard = Some(ProcessIo {
            stdin_tx,
            child,
            reader_task,
            stderr_task,
            writer_task,
        });
        *self.frame_rx.lock().await = Some(frame_rx);

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut io_guard = self.io.lock().await;
        let Some(mut io) = io_guard.take() else {
            return Err(TransportError::NotConnected.into());
        };

        // Dropping the writer closes the child's stdin; aborting the reader
        // drops the frame sender so pending recv calls observe end-of-stream.
        io.writer_task.abort();
        io.reader_task.abort();
        io.stderr_task.abort();

        let _ = io.child.start_kill();
        let _ = io.child.wait().await;
        drop(io_guard);

        *self.frame_rx.lock().await = None;
        debug!(command = %self.config.command, "agent process disconnected");
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<()> {
        let mut io_guard = self.io.lock().await;
        let io = io_guard
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        if io.stdin_tx.send(frame).await.is_err() {
            let detail = match io.child.try_wait() {
                Ok(Some(status)) => format!("agent exited: {}", status),
                Ok(None) => "stdin writer stopped".to_string(),
                Err(e) => format!("agent state unknown: {}", e),
            };
            return Err(TransportError::SendFailed(detail).into());
        }
        Ok(())
    }

    async fn recv(&self) -> Option<Value> {
        let mut guard = self.frame_rx.lock().await;
        match guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn is_connected(&self) -> bool {
        self.io.lock().await.is_some()
    }
}

#[cfg(not(any(unix, windows)))]
#[async_trait]
impl Transport for ProcessTransport {
    async fn connect(&self) -> Result<()> {
        Err(TransportError::UnsupportedPlatform.into())
    }

    async fn disconnect(&self) -> Result<()> {
        Err(TransportError::Disconnected.into())
    }

    async fn send(&self, _frame: String) -> Result<()> {
        Err(TransportError::Disconnected.into())
    }

    async fn recv(&self) -> Option<Value> {
        None
    }

    async fn is_connected(&self) -> bool {
        false
    }
}

/// Background task writing newline-delimited frames to the child's stdin.
#[cfg(any(unix, windows))]
async fn write_stdin_task(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = stdin.write_all(frame.as_bytes()).await {
            error!("failed to write to agent stdin: {}", e);
            break;
        }
        if let Err(e) = stdin.write_all(b"\n").await {
            error!("failed to write frame delimiter: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!("failed to flush agent stdin: {}", e);
            break;
        }
    }
    debug!("stdin writer task ended");
}

/// Background task splitting the child's stdout into frames.
///
/// Blank lines and lines not starting with `{` are skipped; subprocesses
/// sometimes print banners before speaking the protocol. A malformed JSON
/// line is logged with a truncated preview and dropped, and reading
/// continues.
#[cfg(any(unix, windows))]
async fn read_stdout_task(stdout: ChildStdout, tx: mpsc::Sender<Value>) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("agent stdout closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !trimmed.starts_with('{') {
                    debug!(
                        line = %preview(trimmed),
                        "skipping non-frame agent output"
                    );
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            warn!("frame channel closed, stopping stdout reader");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, line = %preview(trimmed), "dropping malformed frame");
                    }
                }
            }
            Err(e) => {
                error!("error reading agent stdout: {}", e);
                break;
            }
        }
    }
}

/// Background task draining stderr to the host log.
#[cfg(any(unix, windows))]
async fn drain_stderr_task(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    error!(target: "agent_stderr", "{}", trimmed);
                }
            }
            Err(e) => {
                error!("error reading agent stderr: {}", e);
                break;
            }
        }
    }
    debug!("agent stderr closed");
}

#[cfg(any(unix, windows))]
fn preview(line: &str) -> String {
    line.chars().take(200).collect()
}

/// Prefix common binary install locations to the inherited search path, so
/// agents installed by npm or homebrew resolve without shell profile help.
#[cfg(any(unix, windows))]
fn augmented_path() -> std::ffi::OsString {
    let home = std::env::var("HOME").unwrap_or_default();
    let mut paths: Vec<PathBuf> = [
        format!("{}/.local/bin", home),
        format!("{}/.npm-global/bin", home),
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect();

    if let Some(inherited) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&inherited));
    }

    std::env::join_paths(paths)
        .unwrap_or_else(|_| std::env::var_os("PATH").unwrap_or_default())
}

/// Ignore broken-pipe signals process-wide, at most once.
#[cfg(unix)]
fn ignore_sigpipe() {
    use std::sync::Once;
    static SIGPIPE_ONCE: Once = Once::new();
    SIGPIPE_ONCE.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

#[cfg(all(any(unix, windows), not(unix)))]
fn ignore_sigpipe() {}
