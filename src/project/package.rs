// src/project/package.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{PlugforgeError, Result};

/// Manifest location used by skpm when `skpm.manifest` is absent.
pub const DEFAULT_MANIFEST: &str = "src/manifest.json";

/// The parts of `package.json` a plugin project is described by.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageJson {
    /// Lowercase, slugified project name; doubles as the project id.
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub skpm: Option<SkpmSection>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `skpm` block of `package.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkpmSection {
    /// Friendly plugin name.
    #[serde(default)]
    pub name: Option<String>,
    /// Path of `manifest.json`, relative to the project.
    #[serde(default)]
    pub manifest: Option<String>,
    /// Built `.sketchplugin` bundle, relative to the project.
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub assets: Vec<String>,
}

impl PackageJson {
    pub fn from_dir(project_path: &Path) -> Result<Self> {
        let path = project_path.join("package.json");
        let contents = fs::read_to_string(&path).map_err(|e| {
            PlugforgeError::ProjectError(format!("reading {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            PlugforgeError::ProjectError(format!("parsing {}: {e}", path.display()))
        })
    }

    pub fn manifest_relative_path(&self) -> &str {
        self.skpm
            .as_ref()
            .and_then(|s| s.manifest.as_deref())
            .unwrap_or(DEFAULT_MANIFEST)
    }

    pub fn plugin_bundle(&self) -> String {
        self.skpm
            .as_ref()
            .and_then(|s| s.main.clone())
            .unwrap_or_else(|| format!("{}.sketchplugin", self.name))
    }

    pub fn display_name(&self) -> &str {
        self.skpm
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or(&self.name)
    }
}
