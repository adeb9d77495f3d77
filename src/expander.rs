//! Task Expander (C6): rewrites a raw task into zero or more runnable tasks
//! via loop expansion, block flattening, and include expansion, applied in
//! that order and re-applied by the scheduler until nothing changes.

use std::path::Path;

use serde_json::{json, Value};

use crate::environment::{Environment, Slot};
use crate::error::RunError;
use crate::playbook::Task;

/// Either the task needed no rewriting and is ready to become a coroutine,
/// or it was replaced by zero or more tasks that must themselves be run
/// back through the expander.
#[derive(Debug)]
pub enum Expansion {
    Unchanged(Task),
    Replaced(Vec<Task>),
}

/// A result installed for a loop with an empty source, or (by the scheduler)
/// for a task whose `when` guard evaluated false.
pub fn skipped_record() -> Value {
    json!({"failed": false, "skipped": true})
}

pub async fn expand(task: Task, env: &Environment) -> Result<Expansion, RunError> {
    if task.loop_source.is_some() {
        return expand_loop(task, env).await;
    }
    if task.is_block() {
        return Ok(expand_block(task));
    }
    if task.module == "include_tasks" {
        return expand_include(task, env).await;
    }
    Ok(Expansion::Unchanged(task))
}

async fn expand_loop(mut task: Task, env: &Environment) -> Result<Expansion, RunError> {
    let loop_source = task.loop_source.take().expect("caller checked loop_source");

    crate::waiter::wait_for(&loop_source, env).await?;
    let ready = env.ready_snapshot();
    let rendered = crate::template::render_value(&loop_source, &ready)?;
    let items = rendered
        .as_array()
        .cloned()
        .ok_or_else(|| RunError::loop_kind(&task.module))?;

    if items.is_empty() {
        if let Some(register) = &task.register {
            env.set_scoped(register, Slot::ready(skipped_record()));
        }
        return Ok(Expansion::Replaced(Vec::new()));
    }

    // Each clone gets its own `vars` map; `serde_json::Map` is owned, so
    // inserting the per-iteration item here can never leak into a sibling.
    let clones = items
        .into_iter()
        .map(|item| {
            let mut clone = task.clone();
            clone.vars.insert(clone.loop_var.clone(), item);
            clone
        })
        .collect();

    Ok(Expansion::Replaced(clones))
}

fn expand_block(mut task: Task) -> Expansion {
    let children = task.block.take().unwrap_or_default();
    let block_vars = task.vars.clone();

    let merged = children
        .into_iter()
        .map(|mut child| {
            let mut vars = block_vars.clone();
            vars.extend(child.vars.clone());
            child.vars = vars;
            child
        })
        .collect();

    Expansion::Replaced(merged)
}

async fn expand_include(task: Task, env: &Environment) -> Result<Expansion, RunError> {
    let raw_path = match &task.args {
        Value::String(s) => s.clone(),
        Value::Object(m) => m
            .get("file")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RunError::malformed_task("include_tasks requires a 'file' key"))?,
        _ => return Err(RunError::malformed_task("include_tasks requires a string path")),
    };

    let resolved_path = if crate::template::is_template(&raw_path) {
        let as_value = Value::String(raw_path.clone());
        crate::waiter::wait_for(&as_value, env).await?;
        let ready = env.ready_snapshot();
        match crate::template::render_str(&raw_path, &ready)? {
            Value::String(s) => s,
            other => other.to_string(),
        }
    } else {
        raw_path
    };

    let mut sub_tasks = crate::playbook::load_task_list(Path::new(&resolved_path))?;
    for sub in &mut sub_tasks {
        let mut vars = task.vars.clone();
        vars.extend(sub.vars.clone());
        sub.vars = vars;
    }

    Ok(Expansion::Replaced(sub_tasks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::parse_document;
    use std::io::Write;

    fn single_task(doc: &str) -> Task {
        parse_document(doc).unwrap().remove(0).tasks.remove(0)
    }

    #[tokio::test]
    async fn empty_loop_yields_no_children_and_installs_skip() {
        let task = single_task(
            r#"
- tasks:
    - debug: {msg: "{{ item }}"}
      loop: []
      register: r1
"#,
        );
        let env = Environment::new();
        match expand(task, &env).await.unwrap() {
            Expansion::Replaced(children) => assert!(children.is_empty()),
            Expansion::Unchanged(_) => panic!("expected replacement"),
        }
        match env.get("r1").unwrap() {
            Slot::Ready(value) => assert_eq!(value, skipped_record()),
            Slot::Pending(_) => panic!("expected ready slot"),
        }
    }

    #[tokio::test]
    async fn nonempty_loop_produces_ordered_clones_with_item() {
        let task = single_task(
            r#"
- tasks:
    - debug: {msg: "{{ item }}"}
      loop: [1, 2, 3]
"#,
        );
        let env = Environment::new();
        let children = match expand(task, &env).await.unwrap() {
            Expansion::Replaced(children) => children,
            Expansion::Unchanged(_) => panic!("expected replacement"),
        };
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].vars.get("item"), Some(&json!(1)));
        assert_eq!(children[1].vars.get("item"), Some(&json!(2)));
        assert_eq!(children[2].vars.get("item"), Some(&json!(3)));
        assert!(children[0].loop_source.is_none());
    }

    #[tokio::test]
    async fn loop_over_non_sequence_is_loop_kind_failure() {
        let task = single_task(
            r#"
- tasks:
    - debug: {msg: "x"}
      loop: "not-a-list-literal"
"#,
        );
        let env = Environment::new();
        let err = expand(task, &env).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::LoopKindFailure);
    }

    #[tokio::test]
    async fn block_children_inherit_merged_vars() {
        let task = single_task(
            r#"
- tasks:
    - block:
        - debug: {msg: "one"}
          vars: {inner: "child"}
        - debug: {msg: "two"}
      vars:
        shared: "block"
        inner: "block-default"
"#,
        );
        let env = Environment::new();
        let children = match expand(task, &env).await.unwrap() {
            Expansion::Replaced(children) => children,
            Expansion::Unchanged(_) => panic!("expected replacement"),
        };
        assert_eq!(children[0].vars.get("shared"), Some(&json!("block")));
        assert_eq!(children[0].vars.get("inner"), Some(&json!("child")));
        assert_eq!(children[1].vars.get("shared"), Some(&json!("block")));
    }

    #[tokio::test]
    async fn include_tasks_inherits_including_vars() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
- debug: {{msg: "included"}}
  vars: {{inner: "included-own"}}
"#
        )
        .unwrap();

        let doc = format!(
            r#"
- tasks:
    - include_tasks: "{}"
      vars:
        outer: "value"
"#,
            file.path().display()
        );
        let task = single_task(&doc);
        let env = Environment::new();
        let children = match expand(task, &env).await.unwrap() {
            Expansion::Replaced(children) => children,
            Expansion::Unchanged(_) => panic!("expected replacement"),
        };
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].vars.get("outer"), Some(&json!("value")));
        assert_eq!(children[0].vars.get("inner"), Some(&json!("included-own")));
    }
}
