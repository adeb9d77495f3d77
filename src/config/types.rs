//! Runner-wide settings (C11): the small set of knobs that do not belong in
//! a playbook itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Path to the `module-runner` executable invoked for ordinary modules.
    pub module_runner: PathBuf,
    /// Target host name passed to every module invocation.
    pub host: String,
    /// Root directory for the per-invocation extra-vars file hand-off.
    pub temp_dir: PathBuf,
    /// Default `tracing` filter directive (e.g. `info`, `debug`).
    pub log_level: String,
    /// Default name for the per-iteration loop variable when a task does
    /// not set `loop_control.loop_var`.
    pub default_loop_var: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            module_runner: PathBuf::from("module-runner"),
            host: "localhost".to_string(),
            temp_dir: std::env::temp_dir().join("dataflow-playbook"),
            log_level: "info".to_string(),
            default_loop_var: "item".to_string(),
        }
    }
}
