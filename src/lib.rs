// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod project;
pub mod registry;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{Config, default_config_path, load_and_validate, load_or_default};
use crate::exec::{
    DevServer, ExecutionController, ExitPolicy, LaunchSpec, Launcher, RealLauncher, RunOutcome,
    RunRequest, TrackedProcesses,
};
use crate::project::create::{CreationUpdate, NewProject, create_project, creation_spec};
use crate::project::service::{NewCommand, ProjectService};
use crate::project::Project;
use crate::registry::{Registry, RegistryEvent};
use crate::types::{RecordKey, Scope, Status, TaskType};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - project loading and registry seeding
/// - the execution controller with the real launcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::New {
            name,
            template,
            home,
            dry_run,
        } => {
            let request = NewProject {
                name,
                project_type: template,
            };
            let home = home.unwrap_or_else(default_projects_home);
            new_project(&config, &home, &request, dry_run).await
        }
        command => run_in_project(&args.project, &config, command).await,
    }
}

/// Subcommands that operate on an existing project.
async fn run_in_project(path: &Path, config: &Config, command: Command) -> Result<()> {
    let mut project =
        Project::load(path).with_context(|| format!("loading project at {}", path.display()))?;
    let registry = Arc::new(Registry::new());
    project.seed(&registry, config);

    match command {
        Command::Tasks => print_tasks(&project, config, &registry),
        Command::Commands => print_commands(&project, &registry),
        Command::Run { script, dry_run } => {
            let request = RunRequest::task(&project, config, &script)?;
            if dry_run {
                print_launch(&request.spec);
                return Ok(());
            }
            let session = Session::new(Arc::clone(&registry), config);
            let status = session.run_and_follow(request).await?;
            finish(&script, status)?;
        }
        Command::Exec { identifier, dry_run } => {
            let request = RunRequest::command(&project, config, &identifier)?;
            if dry_run {
                print_launch(&request.spec);
                return Ok(());
            }
            let session = Session::new(Arc::clone(&registry), config);
            let status = session.run_and_follow(request).await?;
            finish(&identifier, status)?;
        }
        Command::Dev { dry_run } => {
            if dry_run {
                print_launch(&project.task_launch_spec(config, &config.tasks().dev_server)?);
                return Ok(());
            }
            let session = Session::new(Arc::clone(&registry), config);
            let server = DevServer::new(session.controller.clone(), &project, config)?;
            let events = registry.subscribe();
            let outcome = server.start(&project, config)?;
            let status = session.follow(server.key(), events, outcome).await?;
            finish(&config.tasks().dev_server, status)?;
        }
        Command::AddCommand {
            identifier,
            name,
            shortcut,
        } => {
            let service = ProjectService::new(Arc::clone(&registry));
            let command = NewCommand {
                identifier: identifier.clone(),
                name,
                shortcut,
            };
            service.add_command(&mut project, command)?;
            println!("added command '{identifier}'");
        }
        Command::UpdateCommand {
            identifier,
            rename,
            name,
            shortcut,
            clear_shortcut,
        } => {
            let current = project
                .manifest
                .command(&identifier)
                .ok_or_else(|| anyhow!("project '{}' has no command '{identifier}'", project.id))?;
            let update = NewCommand {
                identifier: rename.unwrap_or_else(|| identifier.clone()),
                name: name.unwrap_or_else(|| current.name.clone()),
                shortcut: if clear_shortcut {
                    None
                } else {
                    shortcut.or_else(|| current.shortcut.clone())
                },
            };
            let service = ProjectService::new(Arc::clone(&registry));
            service.update_command(&mut project, &identifier, update.clone())?;
            println!("updated command '{}'", update.identifier);
        }
        Command::RemoveCommand { identifier } => {
            let service = ProjectService::new(Arc::clone(&registry));
            service.delete_command(&mut project, &identifier)?;
            println!("removed command '{identifier}'");
        }
        Command::New { .. } => bail!("'new' does not operate on an existing project"),
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        // An explicit path must exist.
        Some(path) => load_and_validate(path)?,
        None => load_or_default(&default_config_path())?,
    };
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn default_projects_home() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Sketch Plugins"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Turn a final status into the process outcome.
fn finish(what: &str, status: Status) -> Result<()> {
    match status {
        Status::Failed => bail!("'{what}' failed"),
        _ => Ok(()),
    }
}

/// Controller wired to the real launcher, plus the process set used to
/// clean up on exit.
struct Session {
    controller: ExecutionController,
    launcher: Arc<RealLauncher>,
    tracker: Arc<TrackedProcesses>,
}

impl Session {
    fn new(registry: Arc<Registry>, config: &Config) -> Self {
        let launcher = Arc::new(RealLauncher::new());
        let tracker = Arc::new(TrackedProcesses::new());
        let controller = ExecutionController::new(
            registry,
            launcher.clone(),
            tracker.clone(),
            ExitPolicy::from_config(config),
        );
        Self {
            controller,
            launcher,
            tracker,
        }
    }

    async fn run_and_follow(&self, request: RunRequest) -> Result<Status> {
        let key = request.key.clone();
        let events = self.controller.registry().subscribe();
        let outcome = self.controller.run(request)?;
        self.follow(&key, events, outcome).await
    }

    /// Print the run's output until it finishes. Ctrl-C aborts it.
    async fn follow(
        &self,
        key: &RecordKey,
        mut events: broadcast::Receiver<RegistryEvent>,
        outcome: RunOutcome,
    ) -> Result<Status> {
        let handle = match outcome {
            RunOutcome::Started(handle) => handle,
            RunOutcome::AlreadyRunning => bail!("{key} is already running"),
        };

        let wait = handle.wait();
        tokio::pin!(wait);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut interrupted = false;
        let mut feed_open = true;

        loop {
            tokio::select! {
                result = &mut wait => {
                    result?;
                    break;
                }
                signal = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    signal.context("listening for Ctrl-C")?;
                    info!(key = %key, "interrupted; aborting");
                    self.controller.abort(key)?;
                }
                event = events.recv(), if feed_open => match event {
                    Ok(event) => print_event(key, event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "output is arriving faster than it can be printed");
                    }
                    Err(RecvError::Closed) => feed_open = false,
                },
            }
        }

        // Events published right before completion are still buffered.
        while let Ok(event) = events.try_recv() {
            print_event(key, event);
        }

        let leftovers = self.tracker.terminate_all(self.launcher.as_ref());
        if leftovers > 0 {
            warn!(count = leftovers, "terminated leftover processes");
        }

        self.controller
            .registry()
            .get(key)
            .map(|record| record.status)
            .ok_or_else(|| anyhow!("{key} disappeared while running"))
    }
}

fn print_event(key: &RecordKey, event: RegistryEvent) {
    match event {
        RegistryEvent::LogAppended { key: k, entry } if &k == key => {
            if entry.text.ends_with('\n') {
                print!("{}", entry.text);
            } else {
                println!("{}", entry.text);
            }
        }
        RegistryEvent::PortAttached { key: k, port } if &k == key => {
            println!("listening on http://localhost:{port}");
        }
        RegistryEvent::StatusChanged { key: k, status } if &k == key => {
            debug!(key = %k, %status, "status changed");
        }
        _ => {}
    }
}

fn print_launch(spec: &LaunchSpec) {
    println!("{spec}");
    println!("  cwd: {}", spec.cwd.display());
    for (name, value) in &spec.env {
        println!("  env: {name}={value}");
    }
}

fn print_tasks(project: &Project, config: &Config, registry: &Registry) {
    println!("{} ({})", project.display_name(), project.path.display());
    for record in registry.records_for(&project.id, Scope::Task) {
        let kind = match record.task_type {
            TaskType::ShortTerm => "short-term",
            TaskType::Sustained => "sustained",
        };
        let marker = if config.is_dev_server(&record.name) { " [dev server]" } else { "" };
        println!("  {:<16} {:<10} {}{}", record.name, kind, record.script, marker);
    }
}

fn print_commands(project: &Project, registry: &Registry) {
    println!("{} ({})", project.display_name(), project.plugin_path().display());
    for record in registry.records_for(&project.id, Scope::Command) {
        let shortcut = record
            .shortcut
            .as_deref()
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        println!(
            "  {:<20} {}{}  {}",
            record.key.identifier, record.name, shortcut, record.script
        );
    }

    if let Some(menu) = project.resolved_menu() {
        println!();
        println!("menu: {}", menu.title.as_deref().unwrap_or("(plugins root)"));
        for line in menu.render_lines() {
            println!("  {line}");
        }
    }
}

async fn new_project(config: &Config, home: &Path, request: &NewProject, dry_run: bool) -> Result<()> {
    if dry_run {
        print_launch(&creation_spec(config, home, request)?);
        return Ok(());
    }

    let launcher = RealLauncher::new();
    let project = create_project(&launcher as &dyn Launcher, config, home, request, |update| match update {
        CreationUpdate::Status(status) => info!(%status, "project creation"),
        CreationUpdate::Output { text, .. } => print!("{text}"),
    })
    .await?;

    println!("created '{}' at {}", project.display_name(), project.path.display());
    Ok(())
}
