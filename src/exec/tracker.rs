// src/exec/tracker.rs

//! Book-keeping of live process ids outside the registry, so that processes
//! can still be cleaned up when the host application shuts down.

use std::collections::BTreeSet;
use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::exec::launcher::Launcher;

/// Receives add/remove notifications keyed by process id.
pub trait ProcessTracker: Send + Sync + Debug {
    fn add(&self, pid: u32);
    fn remove(&self, pid: u32);
}

/// In-memory tracker; the binary terminates whatever is left on exit.
#[derive(Debug, Default)]
pub struct TrackedProcesses {
    pids: Mutex<BTreeSet<u32>>,
}

impl TrackedProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.pids.lock().iter().copied().collect()
    }

    /// Terminate every tracked process. Returns how many were signalled.
    pub fn terminate_all(&self, launcher: &dyn Launcher) -> usize {
        let pids: Vec<u32> = std::mem::take(&mut *self.pids.lock()).into_iter().collect();
        for pid in &pids {
            if let Err(e) = launcher.terminate(*pid) {
                warn!(pid, error = %e, "failed to terminate tracked process");
            }
        }
        pids.len()
    }
}

impl ProcessTracker for TrackedProcesses {
    fn add(&self, pid: u32) {
        debug!(pid, "tracking process");
        self.pids.lock().insert(pid);
    }

    fn remove(&self, pid: u32) {
        debug!(pid, "untracking process");
        self.pids.lock().remove(&pid);
    }
}
