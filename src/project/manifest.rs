// src/project/manifest.rs

//! The plugin `manifest.json`.
//!
//! Only the fields this crate works with are typed; everything else is kept
//! in `extra` and written back untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{PlugforgeError, Result};
use crate::project::menu::MenuRoot;

/// One entry of `commands` in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handlers: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandDefinition {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            script: script.into(),
            shortcut: None,
            handler: None,
            handlers: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub commands: Vec<CommandDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<MenuRoot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PlugforgeError::ManifestError(format!("reading {}: {e}", path.display()))
        })?;
        let manifest = serde_json::from_str(&contents).map_err(|e| {
            PlugforgeError::ManifestError(format!("parsing {}: {e}", path.display()))
        })?;
        Ok(manifest)
    }

    /// Write as pretty JSON (two-space indent, trailing newline).
    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        fs::write(path, json)?;
        Ok(())
    }

    pub fn command(&self, identifier: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.identifier == identifier)
    }

    pub fn command_mut(&mut self, identifier: &str) -> Option<&mut CommandDefinition> {
        self.commands.iter_mut().find(|c| c.identifier == identifier)
    }

    /// Remove a command and every menu reference to it.
    pub fn remove_command(&mut self, identifier: &str) -> Option<CommandDefinition> {
        let idx = self.commands.iter().position(|c| c.identifier == identifier)?;
        if let Some(menu) = self.menu.as_mut() {
            menu.remove_command(identifier);
        }
        Some(self.commands.remove(idx))
    }
}
