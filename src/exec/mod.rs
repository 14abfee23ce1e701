// src/exec/mod.rs

//! Process execution layer.
//!
//! This module runs package scripts and plugin commands with
//! `tokio::process::Command` and records their progress in the
//! [`Registry`](crate::registry::Registry).
//!
//! - [`launcher`] provides the `Launcher` trait and `RealLauncher`, which
//!   spawns processes and streams their output as events. Tests replace it
//!   with a scripted fake.
//! - [`sanitize`] strips control sequences that log views cannot render.
//! - [`rules`] decides what an output chunk means for its run.
//! - [`controller`] owns the per-key execution lifecycle.
//! - [`dev_server`] wraps the controller for the project's dev server.
//! - [`tracker`] keeps process ids for cleanup on shutdown.
//! - [`env`] builds the environment of spawned processes.

pub mod controller;
pub mod dev_server;
pub mod env;
pub mod launcher;
pub mod rules;
pub mod sanitize;
pub mod tracker;

pub use controller::{
    ExecutionController, ExecutionHandle, ExecutionKind, ExitPolicy, RunOutcome, RunRequest,
};
pub use dev_server::DevServer;
pub use launcher::{ExitInfo, LaunchSpec, Launcher, ProcessEvent, ProcessHandle, RealLauncher, Stream};
pub use rules::StreamRules;
pub use sanitize::strip_unusable_control_characters;
pub use tracker::{ProcessTracker, TrackedProcesses};
