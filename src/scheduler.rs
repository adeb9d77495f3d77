//! Task Scheduler (C7): the core orchestrator. Walks a LIFO task stack,
//! expands control-flow, spawns one coroutine per runnable task, wires its
//! result into the environment under its `register` name, and joins every
//! outstanding coroutine at playbook end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::environment::{Completer, Environment, Promise, Slot, SlotResult};
use crate::error::RunError;
use crate::expander::{self, Expansion};
use crate::invoker::ModuleRunner;
use crate::playbook::{Playbook, Task};

/// What a task coroutine produced, before it is wired into any slot.
enum TaskResult {
    Ran(Value),
    Skipped,
}

/// How a spawned task coroutine communicates its result back into the
/// environment: `set_fact` fans out to one completer per key; everything
/// else (if it has a `register`) uses a single completer.
enum SlotInstalls {
    None,
    Register(Completer),
    SetFact(Vec<(String, Completer)>),
}

fn pre_install(task: &Task, env: &Environment) -> SlotInstalls {
    if task.module == "set_fact" {
        if let Value::Object(pairs) = &task.args {
            let installs = pairs
                .keys()
                .map(|key| {
                    let (promise, completer) = Promise::new();
                    env.set_scoped(key.clone(), Slot::Pending(promise));
                    (key.clone(), completer)
                })
                .collect();
            return SlotInstalls::SetFact(installs);
        }
        return SlotInstalls::None;
    }

    if let Some(register) = &task.register {
        let (promise, completer) = Promise::new();
        env.set_scoped(register.clone(), Slot::Pending(promise));
        return SlotInstalls::Register(completer);
    }

    SlotInstalls::None
}

/// Complete a single-slot `register` outcome. `set_fact`'s multi-slot
/// completers are resolved per key inside `execute_set_fact` instead, since
/// each key must settle on its own schedule (see `execute_set_fact`).
fn complete_register(completer: Completer, outcome: &Result<TaskResult, RunError>, ignore_errors: bool) {
    let result = match outcome {
        Ok(TaskResult::Ran(v)) => Ok(v.clone()),
        Ok(TaskResult::Skipped) => Ok(expander::skipped_record()),
        Err(e) if ignore_errors => Ok(e.to_record()),
        Err(e) => Err(e.clone()),
    };
    completer.complete(result);
}

/// Evaluate `when` (auto-wrapped if bare) against `env`; `Ok(None)` means no
/// guard was present, `Ok(Some(false))` means the task should be skipped.
async fn evaluate_guard(when: &str, env: &Environment) -> Result<bool, RunError> {
    let wrapped = crate::template::auto_wrap(when);
    crate::waiter::wait_for(&Value::String(wrapped.clone()), env).await?;
    let ready = env.ready_snapshot();
    let rendered = crate::template::render_str(&wrapped, &ready)?;
    rendered
        .as_bool()
        .ok_or_else(|| RunError::render_failure(&wrapped, "'when' did not evaluate to a boolean"))
}

async fn execute_task(
    task: &Task,
    env: &Environment,
    invoker: &Arc<dyn ModuleRunner>,
    host: &str,
    check_mode: bool,
) -> Result<TaskResult, RunError> {
    if let Some(when) = &task.when {
        if !evaluate_guard(when, env).await? {
            return Ok(TaskResult::Skipped);
        }
    }

    match task.module.as_str() {
        // Well-formed set_fact tasks are dispatched straight to
        // execute_set_fact from `spawn` (it owns the per-key completers
        // `pre_install` created); reaching this arm means the args weren't a
        // mapping in the first place.
        "set_fact" => Err(RunError::malformed_task("set_fact requires a mapping")),

        "pause" => {
            crate::waiter::wait_for(&task.args, env).await?;
            let ready = env.ready_snapshot();
            let rendered = crate::template::render_value(&task.args, &ready)?;
            let (seconds, minutes) = match &rendered {
                Value::Number(n) => (n.as_f64().unwrap_or(0.0), 0.0),
                Value::Object(m) => (
                    m.get("seconds").and_then(Value::as_f64).unwrap_or(0.0),
                    m.get("minutes").and_then(Value::as_f64).unwrap_or(0.0),
                ),
                _ => (0.0, 0.0),
            };
            if !check_mode {
                crate::invoker::run_pause(seconds, minutes).await;
            }
            Ok(TaskResult::Ran(json!({"failed": false, "changed": false})))
        }

        "assert" => {
            let that: Vec<String> = task
                .args
                .get("that")
                .and_then(Value::as_array)
                .ok_or_else(|| RunError::malformed_task("assert requires a 'that' list"))?
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let wrapped: Vec<Value> = that
                .iter()
                .map(|c| Value::String(crate::template::auto_wrap(c)))
                .collect();
            crate::waiter::wait_for(&Value::Array(wrapped), env).await?;
            let ready = env.ready_snapshot();
            let result = crate::invoker::run_assert(&that, &ready)?;
            Ok(TaskResult::Ran(result))
        }

        "debug" => {
            let (var, msg) = match &task.args {
                Value::String(s) => (Some(s.clone()), None),
                Value::Object(m) => (
                    m.get("var").and_then(Value::as_str).map(str::to_string),
                    m.get("msg").and_then(Value::as_str).map(str::to_string),
                ),
                _ => return Err(RunError::malformed_task("debug requires a mapping or bare var name")),
            };
            let probe_target = match (&var, &msg) {
                (Some(v), _) => Value::String(crate::template::auto_wrap(v)),
                (None, Some(m)) => Value::String(m.clone()),
                (None, None) => Value::Null,
            };
            crate::waiter::wait_for(&probe_target, env).await?;
            let ready = env.ready_snapshot();
            let rendered = crate::invoker::run_debug(var.as_deref(), msg.as_deref(), &ready)?;
            info!(value = %rendered, "debug");
            Ok(TaskResult::Ran(json!({"failed": false, "value": rendered})))
        }

        "command" => {
            let command = task
                .args
                .as_str()
                .ok_or_else(|| RunError::malformed_task("command requires a string payload"))?;
            crate::waiter::wait_for(&task.args, env).await?;
            let ready = env.ready_snapshot();
            let rendered = crate::template::render_str(command, &ready)?;
            let command = rendered.as_str().unwrap_or(command);
            if check_mode {
                return Ok(TaskResult::Ran(json!({"failed": false, "changed": false, "check_mode": true})));
            }
            let result = crate::invoker::run_command(command).await?;
            Ok(TaskResult::Ran(result))
        }

        other => {
            crate::waiter::wait_for(&task.args, env).await?;
            let ready = env.ready_snapshot();
            let rendered_args = crate::template::render_value(&task.args, &ready)?;
            let result = invoker.invoke(other, &rendered_args, &ready, host, check_mode).await?;
            Ok(TaskResult::Ran(result))
        }
    }
}

/// Run a `set_fact` task's keys independently: each key gets its own
/// coroutine, waiting on and rendering only the names its own value
/// references, so a key with no missing dependency settles on its own
/// schedule regardless of a sibling key's pendingness or failure.
///
/// `pre_install` already created one completer per key; this function's job
/// is to complete each of them at its own time rather than broadcasting one
/// shared outcome, while still reporting a single aggregate result for the
/// task-level run/fail tally.
async fn execute_set_fact(
    task: &Task,
    env: &Environment,
    completers: Vec<(String, Completer)>,
) -> Result<TaskResult, RunError> {
    if let Some(when) = &task.when {
        if !evaluate_guard(when, env).await? {
            for (_, completer) in completers {
                completer.complete(Ok(expander::skipped_record()));
            }
            return Ok(TaskResult::Skipped);
        }
    }

    let Value::Object(pairs) = &task.args else {
        for (_, completer) in completers {
            completer.complete(Err(RunError::internal("set_fact produced no mapping")));
        }
        return Err(RunError::malformed_task("set_fact requires a mapping"));
    };

    let mut completer_by_key: HashMap<String, Completer> = completers.into_iter().collect();
    let mut handles = Vec::with_capacity(pairs.len());
    for (key, value) in pairs.clone() {
        let env = env.clone();
        let ignore_errors = task.ignore_errors;
        let completer = completer_by_key
            .remove(&key)
            .expect("pre_install installs one completer per set_fact key");
        handles.push(tokio::spawn(async move {
            let rendered: SlotResult = async {
                crate::waiter::wait_for(&value, &env).await?;
                let ready = env.ready_snapshot();
                crate::template::render_value(&value, &ready)
            }
            .await;

            let reported = rendered.clone();
            let for_slot = match rendered {
                Ok(v) => Ok(v),
                Err(e) if ignore_errors => Ok(e.to_record()),
                Err(e) => Err(e),
            };
            completer.complete(for_slot);
            (key, reported)
        }));
    }

    let mut merged = serde_json::Map::with_capacity(handles.len());
    let mut first_err = None;
    for handle in handles {
        let (key, result) = handle
            .await
            .map_err(|e| RunError::internal(format!("set_fact key coroutine panicked: {e}")))?;
        match result {
            Ok(value) => {
                merged.insert(key, value);
            }
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(_) => {}
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(TaskResult::Ran(Value::Object(merged))),
    }
}

/// Final tallies for a document run, used by the CLI to print a summary and
/// choose an exit code.
#[derive(Default)]
pub struct RunSummary {
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fatal: Option<RunError>,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            1
        } else {
            0
        }
    }
}

pub struct Scheduler {
    invoker: Arc<dyn ModuleRunner>,
    host: String,
    check_mode: bool,
}

impl Scheduler {
    pub fn new(invoker: Arc<dyn ModuleRunner>, host: impl Into<String>, check_mode: bool) -> Self {
        Self { invoker, host: host.into(), check_mode }
    }

    pub async fn run(
        &self,
        playbooks: Vec<Playbook>,
        extra_vars: serde_json::Map<String, Value>,
    ) -> RunSummary {
        let root = Environment::new();
        for (name, value) in extra_vars {
            root.set(name, Slot::ready(value));
        }

        let mut summary = RunSummary::default();

        for playbook in playbooks {
            let playbook_env = root.child_scope();
            for (name, value) in playbook.vars {
                playbook_env.set(name, Slot::ready(value));
            }

            let mut stack: Vec<Task> = playbook.tasks.into_iter().rev().collect();
            let mut handles: Vec<JoinHandle<(Task, Result<TaskResult, RunError>)>> = Vec::new();
            let mut expansion_failed = false;

            while let Some(task) = stack.pop() {
                let task_env = playbook_env.child();
                for (name, value) in task.vars.clone() {
                    task_env.set(name, Slot::ready(value));
                }

                match expander::expand(task, &task_env).await {
                    Ok(Expansion::Unchanged(task)) => {
                        let handle = self.spawn(task, task_env);
                        handles.push(handle);
                    }
                    Ok(Expansion::Replaced(children)) => {
                        for child in children.into_iter().rev() {
                            stack.push(child);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "task expansion failed");
                        summary.failed += 1;
                        if summary.fatal.is_none() {
                            summary.fatal = Some(err);
                        }
                        expansion_failed = true;
                        break;
                    }
                }
            }

            for handle in handles {
                let (task, outcome) = match handle.await {
                    Ok(pair) => pair,
                    Err(join_err) => (
                        Task {
                            name: None,
                            module: "<join>".to_string(),
                            args: Value::Null,
                            when: None,
                            register: None,
                            loop_source: None,
                            loop_var: "item".to_string(),
                            block: None,
                            vars: serde_json::Map::new(),
                            ignore_errors: false,
                        },
                        Err(RunError::internal(format!("task coroutine panicked: {join_err}"))),
                    ),
                };

                match outcome {
                    Ok(TaskResult::Ran(_)) => summary.ran += 1,
                    Ok(TaskResult::Skipped) => summary.skipped += 1,
                    Err(err) => {
                        summary.failed += 1;
                        if task.ignore_errors {
                            warn!(name = %task.display_name(), error = %err, "task failed, ignored");
                        } else if summary.fatal.is_none() {
                            summary.fatal = Some(err);
                        }
                    }
                }
            }

            if expansion_failed || summary.fatal.is_some() {
                break;
            }
        }

        summary
    }

    fn spawn(
        &self,
        task: Task,
        env: Environment,
    ) -> JoinHandle<(Task, Result<TaskResult, RunError>)> {
        let invoker = Arc::clone(&self.invoker);
        let host = self.host.clone();
        let check_mode = self.check_mode;
        let run_id = crate::runid::generate();
        let installs = pre_install(&task, &env);

        tokio::spawn(async move {
            let display_name = task.display_name();
            info!(run_id = %run_id, name = %display_name, module = %task.module, "task started");
            let start = Instant::now();

            let outcome = match installs {
                SlotInstalls::SetFact(completers) => execute_set_fact(&task, &env, completers).await,
                SlotInstalls::Register(completer) => {
                    let outcome = execute_task(&task, &env, &invoker, &host, check_mode).await;
                    complete_register(completer, &outcome, task.ignore_errors);
                    outcome
                }
                SlotInstalls::None => execute_task(&task, &env, &invoker, &host, check_mode).await,
            };
            let elapsed = start.elapsed();

            match &outcome {
                Ok(TaskResult::Ran(_)) => {
                    info!(run_id = %run_id, name = %display_name, elapsed_ms = elapsed.as_millis() as u64, "task ok");
                }
                Ok(TaskResult::Skipped) => {
                    info!(run_id = %run_id, name = %display_name, "task skipped");
                }
                Err(err) => {
                    warn!(run_id = %run_id, name = %display_name, error = %err, "task failed");
                }
            }

            (task, outcome)
        })
    }
}
