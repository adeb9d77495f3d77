//! Playbook data model and parser (C8).

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RunError;

/// The closed set of recognized control keywords on a task mapping (§6).
/// Everything else on a task mapping is the module key and its payload.
pub const CONTROL_KEYWORDS: &[&str] = &[
    "name",
    "register",
    "delegate_to",
    "retries",
    "delay",
    "until",
    "with_items",
    "loop",
    "loop_control",
    "ignore_errors",
    "when",
    "vars",
    "no_log",
    "block",
];

/// Modules whose payload may be a bare scalar instead of a mapping.
const BARE_SCALAR_MODULES: &[&str] = &["include_tasks", "debug", "pause", "command"];

/// A task mapping split into recognized control keywords and exactly one
/// remaining key: the module name and its raw argument payload.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: Option<String>,
    pub module: String,
    pub args: Value,
    pub when: Option<String>,
    pub register: Option<String>,
    pub loop_source: Option<Value>,
    pub loop_var: String,
    pub block: Option<Vec<Task>>,
    pub vars: Map<String, Value>,
    pub ignore_errors: bool,
}

impl Task {
    pub fn is_block(&self) -> bool {
        self.block.is_some()
    }

    /// Display name: the explicit `name`, falling back to `module: <args>`.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.module.clone())
    }
}

/// An ordered sequence of tasks plus an initial `vars` mapping.
#[derive(Debug, Clone, Default)]
pub struct Playbook {
    pub vars: Map<String, Value>,
    pub tasks: Vec<Task>,
}

/// Parse a playbook document -- a YAML sequence of playbooks -- into its
/// data model.
pub fn parse_document(source: &str) -> Result<Vec<Playbook>, RunError> {
    let raw: Vec<RawPlaybook> = serde_yaml::from_str(source)?;
    raw.into_iter().map(RawPlaybook::into_playbook).collect()
}

pub fn load_document(path: &Path) -> Result<Vec<Playbook>, RunError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RunError::internal(format!("failed to read {}: {e}", path.display())))?;
    parse_document(&content)
}

/// Parse an `include_tasks` target: a flat task sequence with no `vars:`/
/// `tasks:` wrapper.
pub fn load_task_list(path: &Path) -> Result<Vec<Task>, RunError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RunError::internal(format!("failed to read {}: {e}", path.display())))?;
    let raw: Vec<RawTask> = serde_yaml::from_str(&content)?;
    raw.into_iter().map(RawTask::into_task).collect()
}

#[derive(Debug, Deserialize)]
struct RawPlaybook {
    #[serde(default)]
    vars: Map<String, Value>,
    tasks: Vec<RawTask>,
}

impl RawPlaybook {
    fn into_playbook(self) -> Result<Playbook, RunError> {
        let tasks = self
            .tasks
            .into_iter()
            .map(RawTask::into_task)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Playbook { vars: self.vars, tasks })
    }
}

/// A task mapping, deserialized generically so its keys can be inspected
/// before being split into control/module parts.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct RawTask(Map<String, Value>);

impl RawTask {
    fn into_task(self) -> Result<Task, RunError> {
        let mut map = self.0;

        let name = take_string(&mut map, "name");
        let register = take_string(&mut map, "register");
        let when = take_string(&mut map, "when");
        let ignore_errors = map
            .remove("ignore_errors")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let vars = match map.remove("vars") {
            Some(Value::Object(v)) => v,
            Some(_) => return Err(RunError::malformed_task("'vars' must be a mapping")),
            None => Map::new(),
        };

        let with_items = map.remove("with_items");
        let loop_key = map.remove("loop");
        let loop_source = match (with_items, loop_key) {
            (Some(_), Some(_)) => {
                return Err(RunError::malformed_task(
                    "task cannot combine 'loop' and 'with_items'",
                ));
            }
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        };

        let loop_var = map
            .remove("loop_control")
            .and_then(|v| v.get("loop_var").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "item".to_string());

        // Recognized but not acted upon; drop them so the module-key check
        // below only sees the real module key.
        for unused in ["delegate_to", "retries", "delay", "until", "no_log"] {
            map.remove(unused);
        }

        let block = match map.remove("block") {
            Some(Value::Array(items)) => {
                let tasks = items
                    .into_iter()
                    .map(|v| match v {
                        Value::Object(m) => RawTask(m).into_task(),
                        _ => Err(RunError::malformed_task("block entries must be mappings")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Some(tasks)
            }
            Some(_) => return Err(RunError::malformed_task("'block' must be a sequence")),
            None => None,
        };

        let remaining: Vec<String> = map.keys().cloned().collect();
        let module = if block.is_some() {
            "block".to_string()
        } else {
            match remaining.len() {
                1 => remaining.into_iter().next().unwrap(),
                0 => return Err(RunError::malformed_task("task has no module key")),
                _ => {
                    return Err(RunError::malformed_task(format!(
                        "task has more than one module key: {}",
                        remaining.join(", ")
                    )));
                }
            }
        };

        let args = if block.is_some() {
            Value::Null
        } else {
            map.remove(&module).unwrap_or(Value::Null)
        };

        if matches!(args, Value::String(_)) && !BARE_SCALAR_MODULES.contains(&module.as_str()) {
            return Err(RunError::malformed_task(format!(
                "'{module}' does not accept a bare string payload (inline key=value shorthand is not supported)"
            )));
        }

        Ok(Task {
            name,
            module,
            args,
            when,
            register,
            loop_source,
            loop_var,
            block,
            vars,
            ignore_errors,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_linear_playbook() {
        let doc = r#"
- vars: {}
  tasks:
    - set_fact: {x: "hello"}
    - debug: {var: "x"}
"#;
        let playbooks = parse_document(doc).unwrap();
        assert_eq!(playbooks.len(), 1);
        assert_eq!(playbooks[0].tasks.len(), 2);
        assert_eq!(playbooks[0].tasks[0].module, "set_fact");
        assert_eq!(playbooks[0].tasks[1].module, "debug");
    }

    #[test]
    fn rejects_loop_and_with_items_together() {
        let doc = r#"
- tasks:
    - debug: {msg: "{{ item }}"}
      loop: [1, 2]
      with_items: [3, 4]
"#;
        let err = parse_document(doc).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::MalformedTask);
    }

    #[test]
    fn rejects_multiple_module_keys() {
        let doc = r#"
- tasks:
    - debug: {msg: "a"}
      command: "echo hi"
"#;
        let err = parse_document(doc).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::MalformedTask);
    }

    #[test]
    fn rejects_inline_key_value_shorthand() {
        let doc = r#"
- tasks:
    - service: "name=httpd state=started"
"#;
        let err = parse_document(doc).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::MalformedTask);
    }

    #[test]
    fn command_accepts_bare_string_payload() {
        let doc = r#"
- tasks:
    - command: "sleep 0.2; echo slow"
      register: r1
"#;
        let playbooks = parse_document(doc).unwrap();
        assert_eq!(playbooks[0].tasks[0].args, Value::String("sleep 0.2; echo slow".to_string()));
        assert_eq!(playbooks[0].tasks[0].register.as_deref(), Some("r1"));
    }

    #[test]
    fn parses_loop_with_custom_loop_var() {
        let doc = r#"
- tasks:
    - debug: {msg: "{{ entry }}"}
      loop: [1, 2, 3]
      loop_control:
        loop_var: entry
"#;
        let playbooks = parse_document(doc).unwrap();
        assert_eq!(playbooks[0].tasks[0].loop_var, "entry");
        assert_eq!(playbooks[0].tasks[0].loop_source, Some(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn parses_block_with_children() {
        let doc = r#"
- tasks:
    - block:
        - debug: {msg: "one"}
        - debug: {msg: "two"}
      vars:
        shared: true
"#;
        let playbooks = parse_document(doc).unwrap();
        let task = &playbooks[0].tasks[0];
        assert!(task.is_block());
        assert_eq!(task.block.as_ref().unwrap().len(), 2);
    }
}
