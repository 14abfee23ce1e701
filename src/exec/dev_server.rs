// src/exec/dev_server.rs

//! The project's development server: a sustained task with its own output
//! rules.

use regex::Regex;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{PlugforgeError, Result};
use crate::exec::controller::{ExecutionController, RunOutcome, RunRequest};
use crate::exec::rules::StreamRules;
use crate::project::Project;
use crate::types::{RecordKey, Status};

/// Printed on stdout by the bundler when a build breaks.
pub const COMPILE_FAILURE_MARKER: &str = "Failed to compile";

/// `localhost:8080`, `127.0.0.1:8080`, `0.0.0.0:8080`, `port 8080`.
pub const PORT_PATTERN: &str =
    r"(?i)(?:\blocalhost|\b127\.0\.0\.1|\b0\.0\.0\.0):(\d{2,5})\b|\bport\s+(\d{2,5})\b";

impl StreamRules {
    /// Rules for the dev server: compile failures on stdout count as errors
    /// and the first announced port is recorded.
    pub fn dev_server() -> Self {
        let port_pattern = match Regex::new(PORT_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "invalid port pattern; port detection disabled");
                None
            }
        };

        Self {
            stdout_failure_markers: vec![COMPILE_FAILURE_MARKER.to_string()],
            port_pattern,
            ..StreamRules::task()
        }
    }
}

/// Controls the dev-server task of one project.
#[derive(Debug, Clone)]
pub struct DevServer {
    controller: ExecutionController,
    key: RecordKey,
    script: String,
}

impl DevServer {
    /// Fails when the project has no script with the configured name.
    pub fn new(controller: ExecutionController, project: &Project, config: &Config) -> Result<Self> {
        let script = config.tasks().dev_server.clone();
        if !project.package.scripts.contains_key(&script) {
            return Err(PlugforgeError::ProjectError(format!(
                "project '{}' has no '{}' script to serve from",
                project.id, script
            )));
        }

        Ok(Self {
            controller,
            key: RecordKey::task(&project.id, &script),
            script,
        })
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn start(&self, project: &Project, config: &Config) -> Result<RunOutcome> {
        let request = RunRequest::task(project, config, &self.script)?;
        let outcome = self.controller.run(request)?;
        if let RunOutcome::Started(handle) = &outcome {
            info!(project = %project.id, pid = ?handle.pid(), "dev server starting");
        }
        Ok(outcome)
    }

    /// Returns `false` when the server was not running.
    pub fn stop(&self) -> Result<bool> {
        self.controller.abort(&self.key)
    }

    pub fn status(&self) -> Option<Status> {
        self.controller.registry().get(&self.key).map(|r| r.status)
    }

    pub fn is_running(&self) -> bool {
        self.controller
            .registry()
            .get(&self.key)
            .is_some_and(|r| r.is_running())
    }

    pub fn port(&self) -> Option<u16> {
        self.controller.registry().get(&self.key).and_then(|r| r.port)
    }

    pub fn url(&self) -> Option<String> {
        self.port().map(|port| format!("http://localhost:{port}"))
    }
}
