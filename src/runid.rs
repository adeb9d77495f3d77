//! Opaque run-id labels used to tag a single task coroutine's log lines.

/// Generate a short, human-readable run-id (e.g. `dashing-otter`).
///
/// Run-ids are purely a logging convenience: nothing in the scheduler parses
/// or compares them structurally, so collisions are harmless.
pub fn generate() -> String {
    petname::petname(2, "-").unwrap_or_else(|| "task-run".to_string())
}
