// src/project/mod.rs

//! Plugin projects on disk.
//!
//! - [`package`]: `package.json` (scripts, skpm block).
//! - [`manifest`]: `manifest.json` (commands, menu).
//! - [`menu`]: the plugin menu tree.
//! - [`service`]: adding, updating and deleting command definitions.
//! - [`create`]: scaffolding new projects.

pub mod create;
pub mod manifest;
pub mod menu;
pub mod package;
pub mod service;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{PlugforgeError, Result};
use crate::exec::env::{base_project_environment, platform_command};
use crate::exec::LaunchSpec;
use crate::registry::{Registry, TaskDefinition};
use crate::types::{ProjectId, TaskType};

pub use manifest::{CommandDefinition, Manifest};
pub use menu::{MenuItem, MenuRoot, Submenu};
pub use package::PackageJson;

/// A loaded plugin project.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: ProjectId,
    pub path: PathBuf,
    pub package: PackageJson,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

impl Project {
    /// Load `package.json` and the manifest it points to.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let package = PackageJson::from_dir(&path)?;
        let manifest_path = path.join(package.manifest_relative_path());
        let manifest = Manifest::from_path(&manifest_path)?;

        info!(
            project = %package.name,
            path = %path.display(),
            commands = manifest.commands.len(),
            scripts = package.scripts.len(),
            "loaded project"
        );

        Ok(Self {
            id: package.name.clone(),
            path,
            package,
            manifest_path,
            manifest,
        })
    }

    /// Re-read both files from disk.
    pub fn reload(&mut self) -> Result<()> {
        *self = Project::load(&self.path)?;
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.package.display_name()
    }

    /// Absolute path of the built `.sketchplugin` bundle.
    pub fn plugin_path(&self) -> PathBuf {
        self.path.join(self.package.plugin_bundle())
    }

    /// Directory command scripts are resolved against.
    pub fn manifest_dir(&self) -> PathBuf {
        self.manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.path.clone())
    }

    /// Menu with references to unknown commands pruned, titled with the
    /// plugin name when the manifest has no title.
    pub fn resolved_menu(&self) -> Option<MenuRoot> {
        let mut menu = self.manifest.menu.clone()?;
        let known: BTreeSet<&str> = self
            .manifest
            .commands
            .iter()
            .map(|c| c.identifier.as_str())
            .collect();
        menu.retain_commands(&known);
        if menu.title.is_none() && !menu.is_root {
            menu.title = Some(self.display_name().to_string());
        }
        Some(menu)
    }

    /// Tasks derived from package.json scripts.
    pub fn task_definitions(&self, config: &Config) -> Vec<TaskDefinition> {
        self.package
            .scripts
            .iter()
            .map(|(name, script)| TaskDefinition {
                name: name.clone(),
                script: script.clone(),
                task_type: if config.is_sustained(name) {
                    TaskType::Sustained
                } else {
                    TaskType::ShortTerm
                },
            })
            .collect()
    }

    /// Reconcile the registry with this project's tasks and commands.
    pub fn seed(&self, registry: &Registry, config: &Config) {
        registry.upsert_tasks(&self.id, &self.task_definitions(config));
        registry.upsert_from_manifest(&self.id, &self.manifest.commands);
        debug!(project = %self.id, "registry seeded");
    }

    /// `<package manager> run <script>`.
    pub fn task_launch_spec(&self, config: &Config, script: &str) -> Result<LaunchSpec> {
        if !self.package.scripts.contains_key(script) {
            return Err(PlugforgeError::ProjectError(format!(
                "project '{}' has no script named '{}'",
                self.id, script
            )));
        }

        Ok(LaunchSpec {
            program: platform_command(&config.runner().package_manager),
            args: vec!["run".to_string(), script.to_string()],
            cwd: self.path.clone(),
            env: base_project_environment(&self.path, config.runner().force_color),
        })
    }

    /// `<plugin runner> run <pluginPath> <identifier> --without-activating`.
    pub fn command_launch_spec(&self, config: &Config, identifier: &str) -> Result<LaunchSpec> {
        if self.manifest.command(identifier).is_none() {
            return Err(PlugforgeError::ProjectError(format!(
                "project '{}' has no command '{}'",
                self.id, identifier
            )));
        }

        Ok(LaunchSpec {
            program: config.runner().plugin_runner.clone(),
            args: vec![
                "run".to_string(),
                self.plugin_path().to_string_lossy().into_owned(),
                identifier.to_string(),
                "--without-activating".to_string(),
            ],
            cwd: self.path.clone(),
            env: base_project_environment(&self.path, config.runner().force_color),
        })
    }
}
