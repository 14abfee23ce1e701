// src/config/model.rs

use serde::Deserialize;

/// Default location of the sketchtool binary inside the Sketch app bundle.
pub const DEFAULT_PLUGIN_RUNNER: &str =
    "/Applications/Sketch.app/Contents/Resources/sketchtool/bin/sketchtool";

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [runner]
/// package_manager = "yarn"
/// force_color = true
///
/// [tasks]
/// dev_server = "watch"
/// sustained = ["start", "watch"]
///
/// [exit]
/// success_codes = [0]
/// ```
///
/// All sections are optional. This is the unchecked form; use
/// [`Config::try_from`] (or [`crate::config::load_and_validate`]) to obtain a
/// validated [`Config`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,

    #[serde(default)]
    pub tasks: TasksSection,

    #[serde(default)]
    pub exit: ExitSection,
}

/// `[runner]` section: which executables are spawned.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    /// Package manager used for `<pm> run <script>`.
    #[serde(default = "default_package_manager")]
    pub package_manager: String,

    /// Executable used to run plugin commands.
    #[serde(default = "default_plugin_runner")]
    pub plugin_runner: String,

    /// Whether `FORCE_COLOR=true` is passed to spawned processes.
    #[serde(default = "default_true")]
    pub force_color: bool,
}

fn default_package_manager() -> String {
    "yarn".to_string()
}

fn default_plugin_runner() -> String {
    DEFAULT_PLUGIN_RUNNER.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            package_manager: default_package_manager(),
            plugin_runner: default_plugin_runner(),
            force_color: true,
        }
    }
}

/// `[tasks]` section: how package.json scripts are classified.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TasksSection {
    /// Script that acts as the development server.
    #[serde(default = "default_dev_server")]
    pub dev_server: String,

    /// Scripts that are expected to run until stopped.
    #[serde(default = "default_sustained")]
    pub sustained: Vec<String>,
}

fn default_dev_server() -> String {
    "watch".to_string()
}

fn default_sustained() -> Vec<String> {
    vec!["start".to_string(), "watch".to_string()]
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            dev_server: default_dev_server(),
            sustained: default_sustained(),
        }
    }
}

/// `[exit]` section: exit code interpretation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExitSection {
    /// Exit codes counted as success for every run.
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,

    /// Additional codes counted as success for sustained runs. Forced
    /// termination on windows reports 1.
    #[serde(default = "default_sustained_success_codes")]
    pub sustained_success_codes: Vec<i32>,
}

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

fn default_sustained_success_codes() -> Vec<i32> {
    if cfg!(windows) { vec![1] } else { Vec::new() }
}

impl Default for ExitSection {
    fn default() -> Self {
        Self {
            success_codes: default_success_codes(),
            sustained_success_codes: default_sustained_success_codes(),
        }
    }
}

/// Validated configuration.
///
/// Fields are private so that a `Config` can only be obtained through
/// validation (or [`Config::default`], which is always valid).
#[derive(Debug, Clone)]
pub struct Config {
    runner: RunnerSection,
    tasks: TasksSection,
    exit: ExitSection,
}

impl Config {
    pub(crate) fn new_unchecked(runner: RunnerSection, tasks: TasksSection, exit: ExitSection) -> Self {
        Self { runner, tasks, exit }
    }

    pub fn runner(&self) -> &RunnerSection {
        &self.runner
    }

    pub fn tasks(&self) -> &TasksSection {
        &self.tasks
    }

    pub fn exit(&self) -> &ExitSection {
        &self.exit
    }

    /// Whether the named script is expected to keep running.
    pub fn is_sustained(&self, script: &str) -> bool {
        self.tasks.sustained.iter().any(|s| s == script)
    }

    pub fn is_dev_server(&self, script: &str) -> bool {
        self.tasks.dev_server == script
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new_unchecked(
            RunnerSection::default(),
            TasksSection::default(),
            ExitSection::default(),
        )
    }
}
