//! End-to-end scenarios driven through the public API: write a playbook to
//! disk, load it via the parser, and run it through the scheduler with a
//! fake module runner standing in for `module-runner`.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dataflow_playbook::cli::parse_extra_vars;
use dataflow_playbook::error::{ErrorKind, RunError};
use dataflow_playbook::invoker::ModuleRunner;
use dataflow_playbook::playbook::load_document;
use dataflow_playbook::scheduler::Scheduler;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

struct RecordingRunner {
    invocations: Mutex<Vec<String>>,
}

impl RecordingRunner {
    fn new() -> Self {
        Self { invocations: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ModuleRunner for RecordingRunner {
    async fn invoke(
        &self,
        module: &str,
        _args: &Value,
        _extra_vars: &HashMap<String, Value>,
        _host: &str,
        check_mode: bool,
    ) -> Result<Value, RunError> {
        if check_mode {
            return Ok(json!({"failed": false, "changed": false, "check_mode": true}));
        }
        self.invocations.lock().unwrap().push(module.to_string());
        Ok(json!({"failed": false, "changed": true}))
    }
}

fn write_playbook(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[tokio::test]
async fn extra_vars_form_the_lowest_precedence_layer() {
    let file = write_playbook(
        r#"
- tasks:
    - debug: {msg: "{{ name }}"}
"#,
    );
    let playbooks = load_document(file.path()).unwrap();
    let vars = parse_extra_vars(&["name=world".to_string()]).unwrap();

    let scheduler = Scheduler::new(Arc::new(RecordingRunner::new()), "localhost", false);
    let summary = scheduler.run(playbooks, vars).await;

    assert_eq!(summary.ran, 1);
    assert!(summary.fatal.is_none());
}

#[tokio::test]
async fn task_vars_shadow_extra_vars_of_the_same_name() {
    let file = write_playbook(
        r#"
- tasks:
    - debug: {msg: "{{ name }}"}
      vars:
        name: "task-local"
"#,
    );
    let playbooks = load_document(file.path()).unwrap();
    let vars = parse_extra_vars(&["name=extra".to_string()]).unwrap();

    let scheduler = Scheduler::new(Arc::new(RecordingRunner::new()), "localhost", false);
    let summary = scheduler.run(playbooks, vars).await;

    assert_eq!(summary.ran, 1);
    assert!(summary.fatal.is_none());
}

#[tokio::test]
async fn non_subprocess_module_reaches_the_invoker() {
    let file = write_playbook(
        r#"
- tasks:
    - shell: {cmd: "echo hi"}
      register: r1
"#,
    );
    let playbooks = load_document(file.path()).unwrap();
    let runner = Arc::new(RecordingRunner::new());
    let scheduler = Scheduler::new(runner.clone(), "localhost", false);
    let summary = scheduler.run(playbooks, serde_json::Map::new()).await;

    assert_eq!(summary.ran, 1);
    assert_eq!(runner.invocations.lock().unwrap().as_slice(), &["shell".to_string()]);
}

#[tokio::test]
async fn malformed_playbook_is_rejected_before_scheduling() {
    let file = write_playbook(
        r#"
- tasks:
    - debug: {msg: "a"}
      command: "echo hi"
"#,
    );
    let err = load_document(file.path()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedTask);
}

#[tokio::test]
async fn check_mode_never_invokes_the_module_runner() {
    let file = write_playbook(
        r#"
- tasks:
    - shell: {cmd: "rm -rf /tmp/whatever"}
      register: r1
"#,
    );
    let playbooks = load_document(file.path()).unwrap();
    let runner = Arc::new(RecordingRunner::new());
    let scheduler = Scheduler::new(runner.clone(), "localhost", true);
    let summary = scheduler.run(playbooks, serde_json::Map::new()).await;

    assert_eq!(summary.ran, 1);
    assert!(runner.invocations.lock().unwrap().is_empty());
}
