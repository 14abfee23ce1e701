// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::ProjectType;

/// Command-line arguments for `plugforge`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "plugforge",
    version,
    about = "Run scripts, plugin commands and the dev server of Sketch plugin projects.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Plugforge.toml` in the current working directory; built-in
    /// defaults are used when it does not exist.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Plugin project directory (the one containing package.json).
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    pub project: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PLUGFORGE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List package.json scripts and their type.
    Tasks,

    /// List plugin commands and the plugin menu.
    Commands,

    /// Run a package.json script and stream its output.
    Run {
        script: String,
        /// Print the command line without running it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a plugin command inside Sketch.
    Exec {
        identifier: String,
        #[arg(long)]
        dry_run: bool,
    },

    /// Start the dev server; Ctrl-C stops it.
    Dev {
        #[arg(long)]
        dry_run: bool,
    },

    /// Declare a new plugin command.
    AddCommand {
        identifier: String,
        /// Display name in Sketch's menu.
        #[arg(long)]
        name: String,
        #[arg(long)]
        shortcut: Option<String>,
    },

    /// Change an existing plugin command.
    UpdateCommand {
        identifier: String,
        /// New identifier.
        #[arg(long, value_name = "IDENTIFIER")]
        rename: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "clear_shortcut")]
        shortcut: Option<String>,
        #[arg(long)]
        clear_shortcut: bool,
    },

    /// Remove a plugin command (its script file is kept).
    RemoveCommand { identifier: String },

    /// Scaffold a new plugin project.
    New {
        name: String,
        #[arg(long, value_enum, default_value_t = ProjectType::Empty)]
        template: ProjectType,
        /// Directory the project is created in.
        #[arg(long, value_name = "DIR")]
        home: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
