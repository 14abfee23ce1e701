// src/project/create.rs

//! Scaffolding of new plugin projects with `create-sketch-plugin`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{PlugforgeError, Result};
use crate::exec::env::{creation_environment, platform_command};
use crate::exec::launcher::{LaunchSpec, Launcher, ProcessEvent, Stream};
use crate::exec::sanitize::strip_unusable_control_characters;
use crate::project::Project;
use crate::types::ProjectType;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    pub project_type: ProjectType,
}

/// Progress of a project creation, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationUpdate {
    Status(String),
    Output { stream: Stream, text: String },
}

/// Lowercase, dash-separated directory name for a project name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Program and arguments that scaffold a project of `project_type`.
pub fn build_instructions(project_type: ProjectType, slug: &str, name: &str) -> (String, Vec<String>) {
    let mut args = vec![
        "create-sketch-plugin".to_string(),
        slug.to_string(),
        format!("--name={name}"),
    ];
    match project_type {
        ProjectType::Empty => {}
        ProjectType::Webview => args.push("--template=skpm/with-webview".to_string()),
        ProjectType::Datasupplier => args.push("--template=skpm/with-datasupplier".to_string()),
    }
    (platform_command("npx"), args)
}

/// Whether `home` already contains a directory for `name`.
pub fn project_exists(home: &Path, name: &str) -> bool {
    home.join(slugify(name)).exists()
}

/// Launch spec for creating `request` inside `home`.
pub fn creation_spec(config: &Config, home: &Path, request: &NewProject) -> Result<LaunchSpec> {
    let slug = slugify(&request.name);
    if slug.is_empty() {
        return Err(PlugforgeError::ProjectError(format!(
            "'{}' does not contain any usable characters for a directory name",
            request.name
        )));
    }

    let (program, args) = build_instructions(request.project_type, &slug, &request.name);
    Ok(LaunchSpec {
        program,
        args,
        cwd: home.to_path_buf(),
        env: creation_environment(&home.join(&slug), config.runner().force_color),
    })
}

/// Create a project in `home` and load it.
///
/// Output of the scaffolding tool is forwarded to `on_update` as it arrives.
pub async fn create_project<F>(
    launcher: &dyn Launcher,
    config: &Config,
    home: &Path,
    request: &NewProject,
    mut on_update: F,
) -> Result<Project>
where
    F: FnMut(CreationUpdate),
{
    let spec = creation_spec(config, home, request)?;
    if project_exists(home, &request.name) {
        return Err(PlugforgeError::ProjectError(format!(
            "a project named '{}' already exists in {}",
            request.name,
            home.display()
        )));
    }

    if !home.exists() {
        fs::create_dir_all(home)?;
        on_update(CreationUpdate::Status("Created parent directory".to_string()));
    }

    let project_path: PathBuf = home.join(slugify(&request.name));
    info!(cmd = %spec, home = %home.display(), "creating project");

    let mut handle = launcher.launch(spec);
    let mut exit = None;
    while let Some(event) = handle.events.recv().await {
        match event {
            ProcessEvent::Output { stream, chunk } => {
                let text = strip_unusable_control_characters(&String::from_utf8_lossy(&chunk));
                if !text.is_empty() {
                    on_update(CreationUpdate::Output { stream, text });
                }
            }
            ProcessEvent::Exit(info) => {
                exit = Some(info);
                break;
            }
        }
    }

    match exit {
        Some(info) if info.error.is_none() && info.code == Some(0) => {}
        Some(info) => {
            warn!(code = ?info.code, error = ?info.error, "project creation failed");
            return Err(PlugforgeError::ProjectError(format!(
                "creating '{}' failed: {}",
                request.name,
                info.error
                    .unwrap_or_else(|| format!("exit code {:?}", info.code))
            )));
        }
        None => {
            return Err(PlugforgeError::ProjectError(format!(
                "creating '{}' ended without an exit status",
                request.name
            )));
        }
    }

    on_update(CreationUpdate::Status("Dependencies installed".to_string()));
    Project::load(&project_path)
}
