//! CLI Front-End (C9): `run`, `syntax-check`, and `list-tasks` subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use crate::error::RunError;

#[derive(Parser, Debug)]
#[command(name = "dataflow-playbook", version, about = "Concurrent dataflow scheduler for automation playbooks")]
pub struct Cli {
    /// Path to a project-level config file override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a playbook document.
    Run {
        playbook: PathBuf,

        /// `key=value`, or `@path.yml`/`@path.json` to load a mapping from a file.
        /// May be repeated; later values override earlier ones.
        #[arg(long = "extra-vars")]
        extra_vars: Vec<String>,

        /// Render and report without invoking any module.
        #[arg(long)]
        check: bool,
    },
    /// Parse a playbook and report any structural errors without running it.
    SyntaxCheck { playbook: PathBuf },
    /// List the tasks a playbook would run, in source order, without running it.
    ListTasks { playbook: PathBuf },
}

/// Resolve `--extra-vars` entries, in order, into a single flat mapping.
pub fn parse_extra_vars(entries: &[String]) -> Result<Map<String, Value>, RunError> {
    let mut merged = Map::new();
    for entry in entries {
        let parsed = if let Some(path) = entry.strip_prefix('@') {
            load_vars_file(path)?
        } else if let Some((key, value)) = entry.split_once('=') {
            let mut map = Map::new();
            let value = serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            map.insert(key.to_string(), value);
            map
        } else {
            return Err(RunError::malformed_task(format!(
                "--extra-vars entry '{entry}' is neither key=value nor @path"
            )));
        };
        merged.extend(parsed);
    }
    Ok(merged)
}

fn load_vars_file(path: &str) -> Result<Map<String, Value>, RunError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RunError::internal(format!("failed to read {path}: {e}")))?;
    let value: Value = serde_yaml::from_str(&content)?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RunError::malformed_task(format!("{path} must contain a mapping"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_key_value_pairs_with_yaml_typing() {
        let vars = parse_extra_vars(&["name=world".to_string(), "count=3".to_string()]).unwrap();
        assert_eq!(vars.get("name"), Some(&Value::String("world".to_string())));
        assert_eq!(vars.get("count"), Some(&Value::from(3)));
    }

    #[test]
    fn later_entries_override_earlier_ones() {
        let vars = parse_extra_vars(&["x=1".to_string(), "x=2".to_string()]).unwrap();
        assert_eq!(vars.get("x"), Some(&Value::from(2)));
    }

    #[test]
    fn rejects_entries_without_equals_or_at_prefix() {
        assert!(parse_extra_vars(&["garbage".to_string()]).is_err());
    }
}
