//! Module Invoker (C5): runs an external module with prepared arguments, or
//! dispatches one of the small set of modules handled in-process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::RunError;

/// Separator the `module-runner` subprocess protocol uses between its
/// header segment and the JSON result payload.
const RESULT_SEPARATOR: &str = " => ";

/// Abstraction over "run a module and get its result", so the scheduler can
/// be exercised against a fake without spawning real subprocesses.
#[async_trait]
pub trait ModuleRunner: Send + Sync {
    async fn invoke(
        &self,
        module: &str,
        args: &Value,
        extra_vars: &HashMap<String, Value>,
        host: &str,
        check_mode: bool,
    ) -> Result<Value, RunError>;
}

/// Invokes modules by spawning the `module-runner` executable per the wire
/// protocol: JSON-encoded args, an extra-vars file hand-off, stdout split on
/// `" => "`, stderr captured for diagnostics only.
pub struct SubprocessModuleRunner {
    executable: PathBuf,
    temp_dir: PathBuf,
}

impl SubprocessModuleRunner {
    pub fn new(executable: PathBuf, temp_dir: PathBuf) -> Self {
        Self { executable, temp_dir }
    }
}

#[async_trait]
impl ModuleRunner for SubprocessModuleRunner {
    async fn invoke(
        &self,
        module: &str,
        args: &Value,
        extra_vars: &HashMap<String, Value>,
        host: &str,
        check_mode: bool,
    ) -> Result<Value, RunError> {
        if check_mode {
            return Ok(serde_json::json!({"failed": false, "changed": false, "check_mode": true}));
        }

        let args_json = serde_json::to_string(args).map_err(RunError::internal)?;
        let vars_file = write_vars_file(&self.temp_dir, extra_vars).await?;

        let output = Command::new(&self.executable)
            .arg("--module")
            .arg(module)
            .arg("--args")
            .arg(&args_json)
            .arg("--extra-vars-file")
            .arg(&vars_file)
            .arg("--host")
            .arg(host)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RunError::internal(format!("failed to spawn module-runner: {e}")));

        // Best-effort cleanup regardless of spawn outcome.
        let _ = tokio::fs::remove_file(&vars_file).await;
        let output = output?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_subprocess_output(module, &stdout, &stderr)
    }
}

async fn write_vars_file(
    dir: &Path,
    extra_vars: &HashMap<String, Value>,
) -> Result<PathBuf, RunError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RunError::internal(format!("failed to create temp dir: {e}")))?;

    let path = dir.join(format!("vars-{}.json", crate::runid::generate()));
    let body = serde_json::to_vec(extra_vars).map_err(RunError::internal)?;

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| RunError::internal(format!("failed to create vars file: {e}")))?;
    file.write_all(&body)
        .await
        .map_err(|e| RunError::internal(format!("failed to write vars file: {e}")))?;

    Ok(path)
}

fn parse_subprocess_output(module: &str, stdout: &str, stderr: &str) -> Result<Value, RunError> {
    let line = stdout.lines().next().unwrap_or_default();
    let Some((_, payload)) = line.split_once(RESULT_SEPARATOR) else {
        return Err(RunError::subprocess_parse(module, stdout));
    };

    let result: Value =
        serde_json::from_str(payload.trim()).map_err(|_| RunError::subprocess_parse(module, payload))?;

    if result.get("failed").and_then(Value::as_bool).unwrap_or(false) {
        let msg = result
            .get("msg")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| stderr.to_string());
        return Err(RunError::module_failure(module, msg));
    }

    Ok(result)
}

/// `assert`: each entry in `that` is auto-wrapped, rendered to a boolean,
/// and the first false one yields a failure carrying the condition text.
pub fn run_assert(that: &[String], ctx: &HashMap<String, Value>) -> Result<Value, RunError> {
    for condition in that {
        let wrapped = crate::template::auto_wrap(condition);
        let rendered = crate::template::render_str(&wrapped, ctx)?;
        let passed = rendered.as_bool().ok_or_else(|| {
            RunError::render_failure(&wrapped, "assertion did not evaluate to a boolean")
        })?;
        if !passed {
            return Err(RunError::assertion_failure(condition));
        }
    }
    Ok(serde_json::json!({"failed": false, "changed": false}))
}

/// `debug`: renders `var` (auto-wrapped if bare) or `msg` and returns the
/// rendered value for the caller to log; has no side effect of its own.
pub fn run_debug(
    var: Option<&str>,
    msg: Option<&str>,
    ctx: &HashMap<String, Value>,
) -> Result<Value, RunError> {
    if let Some(var) = var {
        crate::template::render_str(&crate::template::auto_wrap(var), ctx)
    } else if let Some(msg) = msg {
        crate::template::render_str(msg, ctx)
    } else {
        Ok(Value::Null)
    }
}

/// `pause`: sleeps for `seconds + 60 * minutes` cooperative-seconds.
pub async fn run_pause(seconds: f64, minutes: f64) {
    let total = seconds + 60.0 * minutes;
    if total > 0.0 {
        tokio::time::sleep(std::time::Duration::from_secs_f64(total)).await;
    }
}

/// `command`: runs its string argument as a shell command on the local host
/// in-process -- the one module with no argument schema for `module-runner`
/// to interpret beyond "run this string".
pub async fn run_command(command: &str) -> Result<Value, RunError> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| RunError::internal(format!("failed to spawn command: {e}")))?;

    let rc = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

    if !output.status.success() {
        return Err(RunError::module_failure("command", format!("exit code {rc}: {stderr}")));
    }

    Ok(serde_json::json!({"failed": false, "rc": rc, "stdout": stdout, "stderr": stderr}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assert_passes_when_all_true() {
        let mut ctx = HashMap::new();
        ctx.insert("n".to_string(), json!(4));
        let result = run_assert(&["n == 4".to_string(), "n > 0".to_string()], &ctx).unwrap();
        assert_eq!(result["failed"], json!(false));
    }

    #[test]
    fn assert_fails_with_condition_text() {
        let mut ctx = HashMap::new();
        ctx.insert("n".to_string(), json!(4));
        let err = run_assert(&["n == 5".to_string()], &ctx).unwrap_err();
        assert_eq!(err.assertion.as_deref(), Some("n == 5"));
    }

    #[tokio::test]
    async fn command_captures_stdout() {
        let result = run_command("echo slow").await.unwrap();
        assert_eq!(result["stdout"], json!("slow"));
        assert_eq!(result["rc"], json!(0));
    }

    #[tokio::test]
    async fn command_failure_is_module_failure() {
        let err = run_command("exit 3").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ModuleFailure);
    }
}
