// src/config/validate.rs

use crate::config::model::{Config, RawConfigFile};
use crate::errors::{PlugforgeError, Result};

impl TryFrom<RawConfigFile> for Config {
    type Error = PlugforgeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(Config::new_unchecked(raw.runner, raw.tasks, raw.exit))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_runner(cfg)?;
    validate_tasks(cfg)?;
    validate_exit(cfg)?;
    Ok(())
}

fn validate_runner(cfg: &RawConfigFile) -> Result<()> {
    if cfg.runner.package_manager.trim().is_empty() {
        return Err(PlugforgeError::ConfigError(
            "[runner].package_manager must not be empty".to_string(),
        ));
    }
    if cfg.runner.plugin_runner.trim().is_empty() {
        return Err(PlugforgeError::ConfigError(
            "[runner].plugin_runner must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    let dev_server = &cfg.tasks.dev_server;
    if dev_server.trim().is_empty() {
        return Err(PlugforgeError::ConfigError(
            "[tasks].dev_server must not be empty".to_string(),
        ));
    }
    if !cfg.tasks.sustained.iter().any(|s| s == dev_server) {
        return Err(PlugforgeError::ConfigError(format!(
            "[tasks].dev_server '{}' must also be listed in [tasks].sustained",
            dev_server
        )));
    }
    Ok(())
}

fn validate_exit(cfg: &RawConfigFile) -> Result<()> {
    if cfg.exit.success_codes.is_empty() {
        return Err(PlugforgeError::ConfigError(
            "[exit].success_codes must contain at least one code".to_string(),
        ));
    }
    Ok(())
}
