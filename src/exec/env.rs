// src/exec/env.rs

//! Environment passed to processes spawned for a project.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the search path variable on this platform.
pub fn path_var_name() -> &'static str {
    if cfg!(windows) { "Path" } else { "PATH" }
}

/// Name of an executable as it has to be spawned on this platform. Node
/// tools ship `.cmd` shims on windows.
pub fn platform_command(name: &str) -> String {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        format!("{name}.cmd")
    } else {
        name.to_string()
    }
}

/// Directory holding the project's locally installed executables.
pub fn local_bin_dir(project_path: &Path) -> PathBuf {
    project_path.join("node_modules").join(".bin")
}

/// Environment overrides for a project-scoped process.
///
/// The search path is prefixed with `node_modules/.bin` so that project-local
/// tools win over global ones; `FORCE_COLOR` keeps ANSI colours in piped
/// output.
pub fn project_environment(
    project_path: &Path,
    inherited_path: Option<OsString>,
    force_color: bool,
) -> BTreeMap<String, String> {
    let mut dirs = vec![local_bin_dir(project_path)];
    if let Some(existing) = inherited_path {
        dirs.extend(std::env::split_paths(&existing));
    }

    let joined = std::env::join_paths(&dirs)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| local_bin_dir(project_path).to_string_lossy().into_owned());

    let mut env = BTreeMap::new();
    env.insert(path_var_name().to_string(), joined);
    if force_color {
        env.insert("FORCE_COLOR".to_string(), "true".to_string());
    }
    env
}

/// [`project_environment`] using this process's own search path.
pub fn base_project_environment(project_path: &Path, force_color: bool) -> BTreeMap<String, String> {
    project_environment(project_path, std::env::var_os(path_var_name()), force_color)
}

/// Environment for project scaffolding: interactive prompts are disabled.
pub fn creation_environment(project_path: &Path, force_color: bool) -> BTreeMap<String, String> {
    let mut env = base_project_environment(project_path, force_color);
    env.insert("CI".to_string(), "true".to_string());
    env
}
