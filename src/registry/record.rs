// src/registry/record.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{LogEntry, RecordKey, Status, TaskType};

/// A task or command together with its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecRecord {
    pub key: RecordKey,
    pub name: String,
    pub task_type: TaskType,
    pub status: Status,
    /// Present exactly while an execution is in flight.
    pub process_id: Option<u32>,
    pub port: Option<u16>,
    pub time_since_status_change: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
    /// Command script path, or the package.json script body for tasks.
    pub script: String,
    pub shortcut: Option<String>,
    #[serde(skip)]
    next_log_id: u64,
}

impl ExecRecord {
    pub fn new(
        key: RecordKey,
        name: impl Into<String>,
        task_type: TaskType,
        script: impl Into<String>,
    ) -> Self {
        Self {
            key,
            name: name.into(),
            task_type,
            status: Status::Idle,
            process_id: None,
            port: None,
            time_since_status_change: None,
            logs: Vec::new(),
            script: script.into(),
            shortcut: None,
            next_log_id: 0,
        }
    }

    pub fn with_shortcut(mut self, shortcut: Option<String>) -> Self {
        self.shortcut = shortcut;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn is_running(&self) -> bool {
        self.process_id.is_some()
    }

    /// Append one log entry and return it. Ids keep increasing across
    /// [`ExecRecord::clear_logs`] so front-end keys stay unique.
    pub(crate) fn push_log(&mut self, text: String) -> LogEntry {
        self.next_log_id += 1;
        let entry = LogEntry {
            id: self.next_log_id,
            text,
        };
        self.logs.push(entry.clone());
        entry
    }

    pub(crate) fn clear_logs(&mut self) {
        self.logs.clear();
    }
}

/// A package.json script as seen by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub script: String,
    pub task_type: TaskType,
}

/// Change notification published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Upserted(RecordKey),
    Removed(RecordKey),
    StatusChanged { key: RecordKey, status: Status },
    LogAppended { key: RecordKey, entry: LogEntry },
    LogsCleared(RecordKey),
    PortAttached { key: RecordKey, port: u16 },
}
