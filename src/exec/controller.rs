// src/exec/controller.rs

//! Execution controller: runs tasks and commands against the registry.
//!
//! Each accepted run gets its own Tokio task that consumes the launcher's
//! event channel and translates it into registry mutations. **Per record key
//! there is never more than one live process**: a second `run` for a key that
//! is still running (or whose aborted process has not exited yet) is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{PlugforgeError, Result};
use crate::exec::launcher::{ExitInfo, LaunchSpec, Launcher, ProcessEvent, Stream};
use crate::exec::rules::StreamRules;
use crate::exec::sanitize::strip_unusable_control_characters;
use crate::exec::tracker::ProcessTracker;
use crate::project::Project;
use crate::registry::Registry;
use crate::types::{RecordKey, Status, TaskType};

/// What is being executed; selects the user-facing log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Task,
    Command,
    DevServer,
}

impl ExecutionKind {
    pub fn completion_message(self, success: bool) -> &'static str {
        match (self, success) {
            (ExecutionKind::Command, true) => "Command completed",
            (ExecutionKind::Command, false) => "Command failed",
            (_, true) => "Task completed",
            (_, false) => "Task failed",
        }
    }

    pub fn abort_message(self) -> &'static str {
        match self {
            ExecutionKind::Task => "Task aborted",
            ExecutionKind::Command => "Command aborted",
            ExecutionKind::DevServer => "Dev mode stopped",
        }
    }
}

/// One request to start a process for a record.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub key: RecordKey,
    pub task_type: TaskType,
    pub kind: ExecutionKind,
    pub spec: LaunchSpec,
    pub rules: StreamRules,
}

impl RunRequest {
    /// Run a package.json script of `project`.
    pub fn task(project: &Project, config: &Config, script: &str) -> Result<Self> {
        let spec = project.task_launch_spec(config, script)?;
        let dev_server = config.is_dev_server(script);
        let task_type = if dev_server || config.is_sustained(script) {
            TaskType::Sustained
        } else {
            TaskType::ShortTerm
        };
        let (kind, rules) = if dev_server {
            (ExecutionKind::DevServer, StreamRules::dev_server())
        } else {
            (ExecutionKind::Task, StreamRules::task())
        };

        Ok(Self {
            key: RecordKey::task(&project.id, script),
            task_type,
            kind,
            spec,
            rules,
        })
    }

    /// Run a plugin command of `project` inside the host application.
    pub fn command(project: &Project, config: &Config, identifier: &str) -> Result<Self> {
        Ok(Self {
            key: RecordKey::command(&project.id, identifier),
            task_type: TaskType::ShortTerm,
            kind: ExecutionKind::Command,
            spec: project.command_launch_spec(config, identifier)?,
            rules: StreamRules::plain(),
        })
    }
}

/// Maps an exit to success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPolicy {
    success_codes: Vec<i32>,
    sustained_success_codes: Vec<i32>,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ExitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            success_codes: config.exit().success_codes.clone(),
            sustained_success_codes: config.exit().sustained_success_codes.clone(),
        }
    }

    /// A process that could not be started never succeeds. A sustained run
    /// ended by a signal (no exit code) was stopped on purpose and counts as
    /// a success.
    pub fn is_success(&self, exit: &ExitInfo, task_type: TaskType) -> bool {
        if exit.error.is_some() {
            return false;
        }
        let sustained = task_type == TaskType::Sustained;
        match exit.code {
            Some(code) => {
                self.success_codes.contains(&code)
                    || (sustained && self.sustained_success_codes.contains(&code))
            }
            None => sustained,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Started(ExecutionHandle),
    /// The key already has a live process; nothing was launched.
    AlreadyRunning,
}

impl RunOutcome {
    pub fn started(self) -> Option<ExecutionHandle> {
        match self {
            RunOutcome::Started(handle) => Some(handle),
            RunOutcome::AlreadyRunning => None,
        }
    }
}

/// Handle to an accepted run.
#[derive(Debug)]
pub struct ExecutionHandle {
    key: RecordKey,
    pid: Option<u32>,
    join: JoinHandle<()>,
}

impl ExecutionHandle {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait until the process exited and its outcome was recorded.
    pub async fn wait(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| PlugforgeError::Other(anyhow::anyhow!("execution of {} panicked: {e}", self.key)))
    }
}

struct ActiveRun {
    aborted: Arc<AtomicBool>,
    kind: ExecutionKind,
}

struct Inner {
    registry: Arc<Registry>,
    launcher: Arc<dyn Launcher>,
    tracker: Arc<dyn ProcessTracker>,
    exit_policy: ExitPolicy,
    // At most one entry per key.
    active: Mutex<HashMap<RecordKey, ActiveRun>>,
}

/// Starts, observes and aborts executions. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("launcher", &self.inner.launcher)
            .field("active", &self.inner.active.lock().len())
            .finish()
    }
}

impl ExecutionController {
    pub fn new(
        registry: Arc<Registry>,
        launcher: Arc<dyn Launcher>,
        tracker: Arc<dyn ProcessTracker>,
        exit_policy: ExitPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                launcher,
                tracker,
                exit_policy,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Whether a process for `key` is still being observed.
    pub fn is_active(&self, key: &RecordKey) -> bool {
        self.inner.active.lock().contains_key(key)
    }

    /// Start a process for `request.key`.
    ///
    /// The record must exist. If it already has a live process this returns
    /// [`RunOutcome::AlreadyRunning`] without touching the record.
    pub fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let RunRequest {
            key,
            task_type,
            kind,
            spec,
            rules,
        } = request;
        let registry = &self.inner.registry;

        let record = registry
            .get(&key)
            .ok_or_else(|| PlugforgeError::RecordNotFound(key.to_string()))?;

        if record.status.is_transient() {
            return Err(PlugforgeError::ProjectError(format!(
                "{key} is {} and cannot be run",
                record.status
            )));
        }

        let mut active = self.inner.active.lock();
        if active.contains_key(&key) || record.is_running() {
            debug!(key = %key, "already running; ignoring run request");
            return Ok(RunOutcome::AlreadyRunning);
        }

        registry.set_status(&key, Status::running(task_type), Some(Utc::now()))?;

        info!(key = %key, cmd = %spec, ?task_type, "starting execution");
        let handle = self.inner.launcher.launch(spec);
        if let Some(pid) = handle.pid {
            if let Err(e) = registry.attach_process_id(&key, pid) {
                warn!(key = %key, pid, error = %e, "could not attach process id");
            }
            self.inner.tracker.add(pid);
        }

        let aborted = Arc::new(AtomicBool::new(false));
        active.insert(
            key.clone(),
            ActiveRun {
                aborted: Arc::clone(&aborted),
                kind,
            },
        );
        drop(active);

        let execution = Execution {
            key: key.clone(),
            task_type,
            kind,
            rules,
            aborted,
            port_attached: false,
            inner: Arc::clone(&self.inner),
        };
        let join = tokio::spawn(execution.drive(handle.events));

        Ok(RunOutcome::Started(ExecutionHandle {
            key,
            pid: handle.pid,
            join,
        }))
    }

    /// Terminate the process attached to `key`.
    ///
    /// Returns `false` (and changes nothing) when no run is live for `key`
    /// or it was already aborted, so a second abort is harmless. Output that
    /// still arrives afterwards is logged, but the record stays `Idle`.
    ///
    /// Runs entirely under the active-run lock, which the run's own task
    /// also takes for every status write and for recording the exit.
    pub fn abort(&self, key: &RecordKey) -> Result<bool> {
        let registry = &self.inner.registry;
        let active = self.inner.active.lock();

        let Some(run) = active.get(key) else {
            debug!(key = %key, "nothing to abort");
            return Ok(false);
        };
        if run.aborted.load(Ordering::SeqCst) {
            debug!(key = %key, "already aborted");
            return Ok(false);
        }
        let Some(pid) = registry.get(key).and_then(|r| r.process_id) else {
            debug!(key = %key, "no process attached; nothing to abort");
            return Ok(false);
        };
        run.aborted.store(true, Ordering::SeqCst);
        let kind = run.kind;

        info!(key = %key, pid, "aborting execution");
        if let Err(e) = self.inner.launcher.terminate(pid) {
            warn!(key = %key, pid, error = %e, "failed to terminate process");
        }
        self.inner.tracker.remove(pid);

        registry.detach_process_id(key)?;
        registry.append_log(key, kind.abort_message())?;
        registry.set_status(key, Status::Idle, Some(Utc::now()))?;
        drop(active);
        Ok(true)
    }

    /// Abort every live execution. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let keys: Vec<RecordKey> = self.inner.active.lock().keys().cloned().collect();
        let mut aborted = 0;
        for key in keys {
            match self.abort(&key) {
                Ok(true) => aborted += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "abort failed"),
            }
        }
        aborted
    }

    /// Remove all log entries of `key`.
    pub fn clear_log(&self, key: &RecordKey) -> Result<()> {
        self.inner.registry.clear_logs(key)
    }
}

/// State of one accepted run, owned by its Tokio task.
struct Execution {
    key: RecordKey,
    task_type: TaskType,
    kind: ExecutionKind,
    rules: StreamRules,
    aborted: Arc<AtomicBool>,
    port_attached: bool,
    inner: Arc<Inner>,
}

impl Execution {
    async fn drive(mut self, mut events: mpsc::Receiver<ProcessEvent>) {
        let mut ended_normally = false;
        let mut exit = None;

        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output { stream, chunk } => {
                    if !ended_normally {
                        ended_normally = self.on_output(stream, &chunk);
                    }
                }
                ProcessEvent::Exit(info) => {
                    exit = Some(info);
                    break;
                }
            }
        }

        let exit = exit.unwrap_or_else(|| ExitInfo {
            error: Some("process output closed without an exit status".to_string()),
            ..ExitInfo::default()
        });

        // Recording the exit and leaving the active map is one step for abort().
        let mut active = self.inner.active.lock();
        if let Err(e) = self.record_exit(&exit, ended_normally) {
            warn!(key = %self.key, error = %e, "could not record exit");
        }
        active.remove(&self.key);
        drop(active);
        debug!(key = %self.key, "execution finished");
    }

    /// Returns whether the chunk ended the run.
    fn on_output(&mut self, stream: Stream, chunk: &[u8]) -> bool {
        let registry = &self.inner.registry;
        let text = strip_unusable_control_characters(&String::from_utf8_lossy(chunk));
        if text.is_empty() {
            return false;
        }

        let verdict = self.rules.classify(stream, &text, self.task_type);

        if let Err(e) = registry.append_log(&self.key, text) {
            warn!(key = %self.key, error = %e, "dropping output");
            return false;
        }

        if let Some(port) = verdict.port.filter(|_| !self.port_attached) {
            info!(key = %self.key, port, "server is listening");
            self.port_attached = registry.set_port(&self.key, port).is_ok();
        }

        if verdict.ends_run {
            return true;
        }

        let _active = self.inner.active.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return false;
        }
        let next = if verdict.is_error {
            Status::Failed
        } else {
            Status::running(self.task_type)
        };
        let changed = registry.get(&self.key).is_some_and(|r| r.status != next);
        if changed {
            if let Err(e) = registry.set_status(&self.key, next, None) {
                warn!(key = %self.key, error = %e, "could not update status");
            }
        }
        false
    }

    /// Caller holds the active-run lock.
    fn record_exit(&self, exit: &ExitInfo, ended_normally: bool) -> Result<()> {
        let registry = &self.inner.registry;

        if self.aborted.load(Ordering::SeqCst) {
            // abort() already logged and reset the record.
            if let Some(pid) = registry.detach_process_id(&self.key)? {
                self.inner.tracker.remove(pid);
            }
            debug!(key = %self.key, code = ?exit.code, "aborted process exited");
            return Ok(());
        }

        if let Some(error) = &exit.error {
            registry.append_log(&self.key, error.as_str())?;
        }

        let success = ended_normally || self.inner.exit_policy.is_success(exit, self.task_type);
        registry.append_log(&self.key, self.kind.completion_message(success))?;

        let status = match self.task_type {
            TaskType::ShortTerm if success => Status::Success,
            TaskType::ShortTerm => Status::Failed,
            TaskType::Sustained => Status::Idle,
        };
        registry.set_status(&self.key, status, Some(Utc::now()))?;

        if let Some(pid) = registry.detach_process_id(&self.key)? {
            self.inner.tracker.remove(pid);
        }

        info!(
            key = %self.key,
            code = ?exit.code,
            signal = ?exit.signal,
            success,
            %status,
            "execution completed"
        );
        Ok(())
    }
}
