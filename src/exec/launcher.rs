// src/exec/launcher.rs

//! Process launcher.
//!
//! A launch produces a [`ProcessHandle`] whose event channel carries zero or
//! more [`ProcessEvent::Output`] chunks followed by exactly one
//! [`ProcessEvent::Exit`]. Spawn failures do not error; they surface as a
//! synthesized exit with an error payload so callers handle "failed to start"
//! and "ran and failed" the same way.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;

const EVENT_BUFFER: usize = 256;
const CHUNK_SIZE: usize = 8 * 1024;

/// How long to keep draining pipes after the child itself has exited.
/// Grandchildren may hold the pipes open indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start one process.
///
/// `env` holds overrides on top of the inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Terminal information about a process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal (unix only).
    pub signal: Option<i32>,
    /// Set when the process could not be started or waited on.
    pub error: Option<String>,
}

impl ExitInfo {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn spawn_failed(error: impl Into<String>) -> Self {
        Self {
            code: Some(-1),
            signal: None,
            error: Some(error.into()),
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { stream: Stream, chunk: Vec<u8> },
    Exit(ExitInfo),
}

/// A launched (or failed-to-launch) process.
#[derive(Debug)]
pub struct ProcessHandle {
    /// OS process id; `None` when the spawn failed.
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<ProcessEvent>,
}

impl ProcessHandle {
    /// Handle for a process that never started: a single exit event.
    pub fn failed_to_start(error: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: this cannot fail.
        let _ = tx.try_send(ProcessEvent::Exit(ExitInfo::spawn_failed(error)));
        Self {
            pid: None,
            events: rx,
        }
    }
}

/// Trait abstracting how processes are started and stopped.
///
/// Production code uses [`RealLauncher`]; tests provide scripted fakes that
/// do not touch the OS.
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Start a process. Never fails; see [`ProcessHandle::failed_to_start`].
    fn launch(&self, spec: LaunchSpec) -> ProcessHandle;

    /// Ask the process (and its descendants) to terminate.
    ///
    /// Terminating a process that already exited is not an error.
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Launcher backed by `tokio::process`.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct RealLauncher;

impl RealLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for RealLauncher {
    fn launch(&self, spec: LaunchSpec) -> ProcessHandle {
        info!(cmd = %spec, cwd = %spec.cwd.display(), "starting process");

        match spawn_child(&spec) {
            Ok(child) => stream_child(child),
            Err(err) => {
                warn!(cmd = %spec, error = %err, "failed to start process");
                ProcessHandle::failed_to_start(format!("{err:#}"))
            }
        }
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        info!(pid, "terminating process tree");
        terminate_tree(pid)
    }
}

fn spawn_child(spec: &LaunchSpec) -> anyhow::Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so that terminate() reaches every descendant.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .with_context(|| format!("spawning '{}' in {}", spec.program, spec.cwd.display()))
}

fn stream_child(mut child: Child) -> ProcessHandle {
    let pid = child.id();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let stdout_reader = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump(out, Stream::Stdout, tx.clone())));
    let stderr_reader = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump(err, Stream::Stderr, tx.clone())));

    tokio::spawn(async move {
        let exit = match child.wait().await {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => ExitInfo {
                error: Some(format!("waiting for process: {e}")),
                ..ExitInfo::default()
            },
        };

        // Exit must be the last event: let the readers flush first.
        for mut reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut reader).await.is_err() {
                debug!(?pid, "output pipe still open after exit; closing it");
                reader.abort();
            }
        }

        debug!(?pid, code = ?exit.code, signal = ?exit.signal, "process exited");
        let _ = tx.send(ProcessEvent::Exit(exit)).await;
    });

    ProcessHandle { pid, events: rx }
}

async fn pump<R>(mut reader: R, stream: Stream, tx: mpsc::Sender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ProcessEvent::Output {
                    stream,
                    chunk: buf[..n].to_vec(),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?stream, error = %e, "error reading process output");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn terminate_tree(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| anyhow!("pid {pid} is out of range"))?;
    let pid = Pid::from_raw(raw);

    match killpg(pid, Signal::SIGTERM) {
        Ok(()) => Ok(()),
        // Not a group leader (or already gone): fall back to the process itself.
        Err(Errno::ESRCH) => match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow!("sending SIGTERM to {pid}: {e}").into()),
        },
        Err(e) => Err(anyhow!("sending SIGTERM to process group {pid}: {e}").into()),
    }
}

#[cfg(windows)]
fn terminate_tree(pid: u32) -> Result<()> {
    std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("running taskkill for pid {pid}"))?;
    Ok(())
}
