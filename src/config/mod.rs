// src/config/mod.rs

//! Configuration loading and validation for plugforge.
//!
//! - TOML-backed data model (`model.rs`).
//! - Loading from disk (`loader.rs`).
//! - Validation into a checked [`Config`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{Config, ExitSection, RawConfigFile, RunnerSection, TasksSection};
