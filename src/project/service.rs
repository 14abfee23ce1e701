// src/project/service.rs

//! Editing command definitions and the plugin menu.
//!
//! Every operation re-reads the manifest from disk, applies one change and
//! writes it back, so edits made by other tools in the meantime are kept.
//! While a write is in flight the command's record carries a transient
//! status (`Installing`, `Updating`, `Deleting`); on failure it is reverted.

use std::fs;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{PlugforgeError, Result};
use crate::project::manifest::{CommandDefinition, Manifest};
use crate::project::menu::MenuRoot;
use crate::project::Project;
use crate::registry::{ExecRecord, Registry};
use crate::types::{RecordKey, Status, TaskType};

/// User-editable fields of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommand {
    pub identifier: String,
    pub name: String,
    pub shortcut: Option<String>,
}

impl NewCommand {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            shortcut: None,
        }
    }

    pub fn with_shortcut(mut self, shortcut: impl Into<String>) -> Self {
        self.shortcut = Some(shortcut.into());
        self
    }

    /// Script path written for a new command, relative to the manifest.
    pub fn script_path(&self) -> String {
        format!("./{}.js", self.identifier)
    }

    fn validate(&self) -> Result<()> {
        let id = self.identifier.trim();
        if id.is_empty() {
            return Err(PlugforgeError::ManifestError("command identifier must not be empty".into()));
        }
        if id != self.identifier || id.contains(['/', '\\']) {
            return Err(PlugforgeError::ManifestError(format!(
                "invalid command identifier '{}'",
                self.identifier
            )));
        }
        if self.name.trim().is_empty() {
            return Err(PlugforgeError::ManifestError(format!(
                "command '{}' needs a name",
                self.identifier
            )));
        }
        Ok(())
    }
}

fn command_template(name: &str) -> String {
    format!(
        "import sketch from 'sketch'\n\nexport default function() {{\n  sketch.UI.message('{}')\n}}\n",
        name.replace('\'', "\\'")
    )
}

/// Mutates command definitions of loaded projects and mirrors the result in
/// the registry.
#[derive(Debug, Clone)]
pub struct ProjectService {
    registry: Arc<Registry>,
}

impl ProjectService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Re-read the project from disk and reconcile the registry.
    pub fn refresh(&self, project: &mut Project, config: &Config) -> Result<()> {
        project.reload()?;
        project.seed(&self.registry, config);
        Ok(())
    }

    /// Declare a new command and create its script when missing.
    pub fn add_command(&self, project: &mut Project, command: NewCommand) -> Result<()> {
        command.validate()?;
        if project.manifest.command(&command.identifier).is_some() {
            return Err(PlugforgeError::ManifestError(format!(
                "command '{}' already exists",
                command.identifier
            )));
        }

        let key = RecordKey::command(&project.id, &command.identifier);
        self.registry.insert(
            ExecRecord::new(key.clone(), &command.name, TaskType::ShortTerm, command.script_path())
                .with_shortcut(command.shortcut.clone())
                .with_status(Status::Installing),
        );

        match write_new_command(project, &command) {
            Ok(()) => {
                self.registry.set_status(&key, Status::Idle, None)?;
                info!(project = %project.id, command = %command.identifier, "command added");
                Ok(())
            }
            Err(e) => {
                warn!(project = %project.id, command = %command.identifier, error = %e, "adding command failed");
                self.registry.remove(&key);
                Err(e)
            }
        }
    }

    /// Change name, shortcut or identifier of an existing command.
    ///
    /// A renamed command gets a fresh record: logs and timestamps of the old
    /// identifier are dropped. Menu references follow the rename. The script
    /// file is left alone.
    pub fn update_command(&self, project: &mut Project, previous: &str, update: NewCommand) -> Result<()> {
        update.validate()?;
        let old_key = RecordKey::command(&project.id, previous);
        self.registry.claim(&old_key, Status::Updating)?;

        match write_updated_command(project, previous, &update) {
            Ok(()) => {
                if previous != update.identifier {
                    self.registry.remove(&old_key);
                }
                self.registry
                    .upsert_from_manifest(&project.id, &project.manifest.commands);
                let new_key = RecordKey::command(&project.id, &update.identifier);
                self.registry.set_status(&new_key, Status::Idle, None)?;
                info!(project = %project.id, from = previous, to = %update.identifier, "command updated");
                Ok(())
            }
            Err(e) => {
                warn!(project = %project.id, command = previous, error = %e, "updating command failed");
                self.registry.set_status(&old_key, Status::Idle, None)?;
                Err(e)
            }
        }
    }

    /// Remove a command from the manifest and the menu. Its script file is
    /// kept.
    pub fn delete_command(&self, project: &mut Project, identifier: &str) -> Result<()> {
        let key = RecordKey::command(&project.id, identifier);
        self.registry.claim(&key, Status::Deleting)?;

        let result = reload_manifest(project).and_then(|mut manifest| {
            manifest.remove_command(identifier).ok_or_else(|| {
                PlugforgeError::ManifestError(format!("command '{identifier}' is not declared"))
            })?;
            manifest.write_to_path(&project.manifest_path)?;
            project.manifest = manifest;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.registry.remove(&key);
                info!(project = %project.id, command = identifier, "command deleted");
                Ok(())
            }
            Err(e) => {
                warn!(project = %project.id, command = identifier, error = %e, "deleting command failed");
                self.registry.set_status(&key, Status::Idle, None)?;
                Err(e)
            }
        }
    }

    /// Replace the plugin menu. An empty menu removes it from the manifest.
    ///
    /// Returns `false` when there was nothing to write.
    pub fn save_menu(&self, project: &mut Project, menu: Option<MenuRoot>) -> Result<bool> {
        let mut manifest = reload_manifest(project)?;
        let menu = menu.filter(|m| !m.is_empty());

        if menu.is_none() && manifest.menu.is_none() {
            debug!(project = %project.id, "no menu to save");
            return Ok(false);
        }

        manifest.menu = menu;
        manifest.write_to_path(&project.manifest_path)?;
        project.manifest = manifest;
        info!(project = %project.id, "menu saved");
        Ok(true)
    }
}

fn reload_manifest(project: &Project) -> Result<Manifest> {
    Manifest::from_path(&project.manifest_path)
}

fn write_new_command(project: &mut Project, command: &NewCommand) -> Result<()> {
    let mut manifest = reload_manifest(project)?;
    if manifest.command(&command.identifier).is_some() {
        return Err(PlugforgeError::ManifestError(format!(
            "command '{}' already exists",
            command.identifier
        )));
    }

    let script = command.script_path();
    let script_file = project.manifest_dir().join(&script);
    if !script_file.exists() {
        fs::write(&script_file, command_template(&command.name))?;
        debug!(path = %script_file.display(), "created command script");
    }

    let mut definition = CommandDefinition::new(&command.identifier, &command.name, script);
    definition.shortcut = command.shortcut.clone();
    manifest.commands.push(definition);

    manifest.write_to_path(&project.manifest_path)?;
    project.manifest = manifest;
    Ok(())
}

fn write_updated_command(project: &mut Project, previous: &str, update: &NewCommand) -> Result<()> {
    let mut manifest = reload_manifest(project)?;
    let renamed = previous != update.identifier;
    if renamed && manifest.command(&update.identifier).is_some() {
        return Err(PlugforgeError::ManifestError(format!(
            "command '{}' already exists",
            update.identifier
        )));
    }

    let definition = manifest.command_mut(previous).ok_or_else(|| {
        PlugforgeError::ManifestError(format!("command '{previous}' is not declared"))
    })?;
    definition.identifier = update.identifier.clone();
    definition.name = update.name.clone();
    definition.shortcut = update.shortcut.clone();

    if renamed {
        if let Some(menu) = manifest.menu.as_mut() {
            menu.rename_command(previous, &update.identifier);
        }
    }

    manifest.write_to_path(&project.manifest_path)?;
    project.manifest = manifest;
    Ok(())
}
