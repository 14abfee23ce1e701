use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical project identifier (the package.json `name`).
pub type ProjectId = String;

/// How an execution's lifetime is interpreted.
///
/// - `ShortTerm`: runs to completion; the exit code is the outcome.
/// - `Sustained`: expected to keep running until aborted; "success" means
///   "currently up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    ShortTerm,
    Sustained,
}

/// Status of a task or command record.
///
/// `Installing`, `Updating` and `Deleting` are only used while a command
/// *definition* is being written to or removed from the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Idle,
    Pending,
    Success,
    Failed,
    Installing,
    Updating,
    Deleting,
}

impl Status {
    /// Status a run enters when it starts, or when it receives ordinary
    /// output after a transient failure.
    pub fn running(task_type: TaskType) -> Self {
        match task_type {
            TaskType::ShortTerm => Status::Pending,
            TaskType::Sustained => Status::Success,
        }
    }

    /// A command definition is being written or removed.
    pub fn is_transient(self) -> bool {
        matches!(self, Status::Installing | Status::Updating | Status::Deleting)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Installing => "installing",
            Status::Updating => "updating",
            Status::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// Namespace of a record inside a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// A package.json script.
    Task,
    /// A plugin command declared in the manifest.
    Command,
}

/// Registry key: `(project, scope, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordKey {
    pub project_id: ProjectId,
    pub scope: Scope,
    pub identifier: String,
}

impl RecordKey {
    pub fn task(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            scope: Scope::Task,
            identifier: name.into(),
        }
    }

    pub fn command(project_id: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            scope: Scope::Command,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            Scope::Task => "task",
            Scope::Command => "command",
        };
        write!(f, "{}/{}/{}", self.project_id, scope, self.identifier)
    }
}

/// One line (chunk) of accumulated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub text: String,
}

/// Template used when creating a new plugin project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    #[default]
    Empty,
    Webview,
    Datasupplier,
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "empty" => Ok(ProjectType::Empty),
            "webview" => Ok(ProjectType::Webview),
            "datasupplier" => Ok(ProjectType::Datasupplier),
            other => Err(format!(
                "invalid project type: {other} (expected \"empty\", \"webview\" or \"datasupplier\")"
            )),
        }
    }
}
