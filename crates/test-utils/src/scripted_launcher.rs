use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plugforge::errors::Result;
use plugforge::exec::{ExitInfo, LaunchSpec, Launcher, ProcessEvent, ProcessHandle, Stream};
use tokio::sync::{Notify, mpsc};

/// One step of a fake process.
#[derive(Debug, Clone)]
pub enum Step {
    Output(Stream, String),
    Sleep(Duration),
    /// Block until the test opens the gate.
    WaitFor(Arc<Notify>),
    /// Block until `terminate` is called for this process.
    WaitForTerminate,
    Exit(ExitInfo),
}

/// What a fake process does, in order. A script without an exit step exits
/// with code 0 after its last step.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    spawn_error: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// A process that cannot be started.
    pub fn spawn_failure(error: &str) -> Self {
        Self {
            steps: Vec::new(),
            spawn_error: Some(error.to_string()),
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.steps.push(Step::Output(Stream::Stdout, text.to_string()));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.steps.push(Step::Output(Stream::Stderr, text.to_string()));
        self
    }

    pub fn sleep(mut self, millis: u64) -> Self {
        self.steps.push(Step::Sleep(Duration::from_millis(millis)));
        self
    }

    /// Pause here until `gate.notify_one()` is called.
    pub fn wait_for(mut self, gate: &Arc<Notify>) -> Self {
        self.steps.push(Step::WaitFor(Arc::clone(gate)));
        self
    }

    pub fn until_terminated(mut self) -> Self {
        self.steps.push(Step::WaitForTerminate);
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.steps.push(Step::Exit(ExitInfo::with_code(code)));
        self
    }

    /// Exit without a code, as if killed by `signal`.
    pub fn killed(mut self, signal: i32) -> Self {
        self.steps.push(Step::Exit(ExitInfo {
            code: None,
            signal: Some(signal),
            error: None,
        }));
        self
    }
}

/// A launcher that:
/// - records every launch spec and every termination request
/// - plays queued [`Script`]s instead of spawning processes.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    launched: Mutex<Vec<LaunchSpec>>,
    terminated: Mutex<Vec<u32>>,
    kill_switches: Mutex<HashMap<u32, Arc<Notify>>>,
    next_pid: AtomicU32,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        })
    }

    /// Queue the script played by the next launch.
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, spec: LaunchSpec) -> ProcessHandle {
        self.launched.lock().unwrap().push(spec);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

        if let Some(error) = script.spawn_error {
            return ProcessHandle::failed_to_start(error);
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let kill = Arc::new(Notify::new());
        self.kill_switches
            .lock()
            .unwrap()
            .insert(pid, Arc::clone(&kill));

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for step in script.steps {
                match step {
                    Step::Output(stream, text) => {
                        let event = ProcessEvent::Output {
                            stream,
                            chunk: text.into_bytes(),
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Step::Sleep(d) => tokio::time::sleep(d).await,
                    Step::WaitFor(gate) => gate.notified().await,
                    Step::WaitForTerminate => kill.notified().await,
                    Step::Exit(info) => {
                        let _ = tx.send(ProcessEvent::Exit(info)).await;
                        return;
                    }
                }
            }
            let _ = tx.send(ProcessEvent::Exit(ExitInfo::with_code(0))).await;
        });

        ProcessHandle {
            pid: Some(pid),
            events: rx,
        }
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        self.terminated.lock().unwrap().push(pid);
        if let Some(kill) = self.kill_switches.lock().unwrap().get(&pid) {
            // Stores a permit if the script is not waiting yet.
            kill.notify_one();
        }
        Ok(())
    }
}
