//! Layered configuration (C11): built-in defaults, then a project-level
//! `dataflow-playbook.yaml`, then environment variables.

mod loader;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use types::RunnerConfig;
