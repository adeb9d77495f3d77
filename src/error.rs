//! Structured error types for playbook execution.

use serde::Serialize;
use std::fmt;

/// The kinds of failure a task or a template can produce (§7 of the design).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A template references a name not present in the environment.
    UndefinedVariable,
    /// A template failed to render against an otherwise-ready environment
    /// (unknown attribute, bad expression, ...).
    TemplateRenderFailure,
    /// `loop`/`with_items` rendered to something other than a sequence.
    LoopKindFailure,
    /// A module subprocess's stdout did not split on the expected separator
    /// or was not valid JSON.
    SubprocessParseFailure,
    /// The parsed module result had `failed: true`, or an in-process module
    /// raised.
    ModuleFailure,
    /// An `assert.that` expression evaluated false.
    AssertionFailure,
    /// A task mapping could not be parsed: inline `key=value` argument
    /// strings, or a mapping with zero or more than one module key.
    MalformedTask,
    /// Catch-all for I/O and other infrastructural errors (file not found,
    /// process spawn failure, ...).
    InternalError,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::UndefinedVariable => "undefined variable",
            ErrorKind::TemplateRenderFailure => "template render failure",
            ErrorKind::LoopKindFailure => "loop expression is not a sequence",
            ErrorKind::SubprocessParseFailure => "could not parse module output",
            ErrorKind::ModuleFailure => "module failed",
            ErrorKind::AssertionFailure => "assertion failed",
            ErrorKind::MalformedTask => "malformed task",
            ErrorKind::InternalError => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A structured, task-attributable failure.
///
/// Every failure surfaced by the scheduler, the waiter, the expander, or the
/// invoker is one of these rather than a bare string, so the CLI and the
/// test suite can match on `kind` instead of scraping messages.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// The variable name at fault, for `UndefinedVariable`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// The failing `that` expression, for `AssertionFailure`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<String>,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            variable: None,
            assertion: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    pub fn with_assertion(mut self, expr: impl Into<String>) -> Self {
        self.assertion = Some(expr.into());
        self
    }

    // Convenience constructors

    pub fn undefined_variable(name: &str) -> Self {
        Self::new(
            ErrorKind::UndefinedVariable,
            format!("undefined variable: {name}"),
        )
        .with_variable(name)
    }

    pub fn render_failure(template: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::TemplateRenderFailure,
            format!("failed to render '{template}': {reason}"),
        )
    }

    pub fn loop_kind(module: &str) -> Self {
        Self::new(
            ErrorKind::LoopKindFailure,
            format!("loop/with_items on task '{module}' did not render to a sequence"),
        )
    }

    pub fn subprocess_parse(module: &str, raw: &str) -> Self {
        Self::new(
            ErrorKind::SubprocessParseFailure,
            format!("module '{module}' produced unparseable output: {raw:.200}"),
        )
    }

    pub fn module_failure(module: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ModuleFailure,
            format!("module '{module}' failed: {reason}"),
        )
    }

    pub fn assertion_failure(expr: &str) -> Self {
        Self::new(ErrorKind::AssertionFailure, format!("assertion failed: {expr}"))
            .with_assertion(expr)
    }

    pub fn malformed_task(reason: impl fmt::Display) -> Self {
        Self::new(ErrorKind::MalformedTask, format!("malformed task: {reason}"))
    }

    pub fn internal(reason: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InternalError, reason.to_string())
    }

    /// Render this failure as the `{"failed": true, "msg": ...}` record a
    /// downstream template (e.g. `{{ r1.msg }}`) would read from a register
    /// slot whose task was `ignore_errors`.
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "failed": true,
            "msg": self.message,
            "kind": self.kind,
        })
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunError {}

impl From<minijinja::Error> for RunError {
    fn from(err: minijinja::Error) -> Self {
        RunError::new(ErrorKind::TemplateRenderFailure, err.to_string())
    }
}

impl From<serde_yaml::Error> for RunError {
    fn from(err: serde_yaml::Error) -> Self {
        RunError::malformed_task(err)
    }
}

/// Result type for task and template operations.
pub type RunResult<T> = std::result::Result<T, RunError>;
