#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use plugforge::config::{Config, RawConfigFile};
use plugforge::project::Project;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Builder for an on-disk plugin project in a temporary directory.
pub struct ProjectBuilder {
    name: String,
    display_name: Option<String>,
    scripts: BTreeMap<String, String>,
    commands: Vec<Value>,
    menu: Option<Value>,
    manifest_path: String,
}

impl ProjectBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: None,
            scripts: BTreeMap::new(),
            commands: Vec::new(),
            menu: None,
            manifest_path: "src/manifest.json".to_string(),
        }
    }

    /// The usual skpm scripts: `build`, `watch`, `start`.
    pub fn with_skpm_scripts(self) -> Self {
        self.with_script("build", "skpm-build")
            .with_script("watch", "skpm-build --watch")
            .with_script("start", "skpm-build --watch --run")
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn with_script(mut self, name: &str, body: &str) -> Self {
        self.scripts.insert(name.to_string(), body.to_string());
        self
    }

    pub fn with_command(mut self, identifier: &str, name: &str) -> Self {
        self.commands.push(json!({
            "name": name,
            "identifier": identifier,
            "script": format!("./{identifier}.js"),
        }));
        self
    }

    /// Raw JSON for the manifest's `menu`.
    pub fn with_menu(mut self, menu: Value) -> Self {
        self.menu = Some(menu);
        self
    }

    pub fn with_manifest_path(mut self, path: &str) -> Self {
        self.manifest_path = path.to_string();
        self
    }

    pub fn build(self) -> TempProject {
        let dir = tempfile::tempdir().expect("create temp project dir");
        let root = dir.path().to_path_buf();

        let mut skpm = json!({ "manifest": self.manifest_path, "main": format!("{}.sketchplugin", self.name) });
        if let Some(display) = &self.display_name {
            skpm["name"] = Value::from(display.clone());
        }
        let package = json!({
            "name": self.name,
            "version": "0.1.0",
            "scripts": self.scripts,
            "skpm": skpm,
        });
        write_json(&root.join("package.json"), &package);

        let mut manifest = json!({
            "compatibleVersion": 3,
            "bundleVersion": 1,
            "commands": self.commands,
        });
        if let Some(menu) = self.menu {
            manifest["menu"] = menu;
        }
        let manifest_path = root.join(&self.manifest_path);
        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent).expect("create manifest dir");
        }
        write_json(&manifest_path, &manifest);

        TempProject { dir, root }
    }
}

fn write_json(path: &Path, value: &Value) {
    let text = serde_json::to_string_pretty(value).expect("serialize json");
    fs::write(path, text).expect("write json");
}

/// A project on disk; removed when dropped.
pub struct TempProject {
    dir: TempDir,
    root: PathBuf,
}

impl TempProject {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn load(&self) -> Project {
        Project::load(&self.root).expect("load temp project")
    }

    /// The manifest as raw JSON, read fresh from disk.
    pub fn manifest_json(&self, relative: &str) -> Value {
        let text = fs::read_to_string(self.root.join(relative)).expect("read manifest");
        serde_json::from_str(&text).expect("parse manifest")
    }

    pub fn temp_dir(&self) -> &TempDir {
        &self.dir
    }
}

/// Builder for a validated [`Config`].
pub struct ConfigBuilder {
    raw: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawConfigFile::default(),
        }
    }

    pub fn with_sustained(mut self, scripts: &[&str]) -> Self {
        self.raw.tasks.sustained = scripts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_dev_server(mut self, script: &str) -> Self {
        self.raw.tasks.dev_server = script.to_string();
        self
    }

    pub fn with_sustained_success_codes(mut self, codes: &[i32]) -> Self {
        self.raw.exit.sustained_success_codes = codes.to_vec();
        self
    }

    pub fn build(self) -> Config {
        Config::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
