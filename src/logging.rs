//! Structured logging (C10): a thin `tracing_subscriber` setup. Task
//! start/end lines are emitted by the scheduler itself, tagged with the
//! task's run-id; this module only wires up the global dispatcher.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `default_level` is used when
/// `RUST_LOG` is unset; CLI `-v`/`-q` flags are expected to have already
/// been folded into it by the caller.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
