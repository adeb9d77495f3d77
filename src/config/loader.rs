//! Configuration loader with tier-based merging (C11).
//!
//! Loads [`RunnerConfig`] from three tiers and merges them field-by-field:
//! built-in defaults, a project-level `dataflow-playbook.yaml`, and
//! environment variable overrides, lowest to highest precedence.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;

use super::types::RunnerConfig;

/// Merge two config tiers field-by-field, with `overlay` taking precedence.
///
/// Nested mappings merge recursively; a `null` in the overlay means "not
/// specified" and leaves the base value untouched; anything else (arrays,
/// scalars) is replaced wholesale rather than combined.
fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold `deep_merge` over the config tiers, defaults first.
fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    Project = 1,
    Environment = 2,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for a project-level config file.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// `PLAYBOOK_RUNNER_PROJECT_DIR` or the current directory.
    pub fn discover() -> Self {
        let project_dir = std::env::var("PLAYBOOK_RUNNER_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from(".")));
        Self { project_dir }
    }

    pub fn with_dir(project_dir: Option<PathBuf>) -> Self {
        Self { project_dir }
    }

    fn config_file(&self) -> Option<PathBuf> {
        self.project_dir.as_ref().map(|dir| dir.join("dataflow-playbook.yaml"))
    }
}

pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: RunnerConfig,
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        if let Ok(explicit) = std::env::var("PLAYBOOK_RUNNER_CONFIG_PATH") {
            let path = PathBuf::from(explicit);
            let config = load_yaml_file(&path)?;
            let mut config: RunnerConfig = serde_json::from_value(config)?;
            apply_env_overrides(&mut config);
            return Ok(Self { paths, config, config_path: Some(path) });
        }

        let mut layers: Vec<Value> = Vec::new();
        layers.push(serde_json::to_value(RunnerConfig::default())?);

        let mut config_path = None;
        if let Some(file) = paths.config_file() {
            if file.exists() {
                layers.push(load_yaml_file(&file)?);
                config_path = Some(file);
            }
        }

        let merged = deep_merge_all(layers);
        let mut config: RunnerConfig = serde_json::from_value(merged)?;
        apply_env_overrides(&mut config);

        Ok(Self { paths, config, config_path })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn into_config(self) -> RunnerConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

fn load_yaml_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn apply_env_overrides(config: &mut RunnerConfig) {
    if let Ok(path) = std::env::var("PLAYBOOK_RUNNER_MODULE_RUNNER") {
        config.module_runner = PathBuf::from(path);
    }
    if let Ok(host) = std::env::var("PLAYBOOK_RUNNER_HOST") {
        config.host = host;
    }
    if let Ok(dir) = std::env::var("PLAYBOOK_RUNNER_TEMP_DIR") {
        config.temp_dir = PathBuf::from(dir);
    }
    if let Ok(level) = std::env::var("PLAYBOOK_RUNNER_LOG_LEVEL") {
        config.log_level = level;
    }
}
