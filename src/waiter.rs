//! Dependency Waiter (C4): the coroutine that drives a template to
//! readiness by awaiting whatever pending slots it still references.

use serde_json::Value;

use crate::environment::{Environment, Slot};
use crate::error::RunError;

/// Probe `value` against `env` until every template inside it is backed by a
/// ready value, then return the ready-only context needed to render it.
///
/// Each iteration re-probes from scratch: a slot that was pending when we
/// last looked may have resolved into a value that itself unblocks templates
/// referencing still other names, so the loop keeps going until the probe
/// reports nothing left to chase.
pub async fn wait_for(value: &Value, env: &Environment) -> Result<(), RunError> {
    loop {
        let ready = env.ready_snapshot();
        let Some(name) = crate::template::first_missing(value, &ready) else {
            return Ok(());
        };

        match env.get(&name) {
            Some(Slot::Pending(promise)) => {
                let value = promise.await_ready().await?;
                // The promise only notifies waiters; the slot itself still
                // reads as Pending until we write the resolved value back,
                // so the next probe would otherwise report `name` missing
                // forever. All pending slots are installed via `set_scoped`,
                // so replacing through the same path lands in the same layer.
                env.set_scoped(name.clone(), Slot::Ready(value));
                // Yield once after a resolution so a burst of simultaneously
                // completing promises doesn't starve the scheduler loop.
                tokio::task::yield_now().await;
            }
            Some(Slot::Ready(_)) => {
                // Resolved between the snapshot and the lookup; loop and
                // re-probe rather than assuming progress.
                tokio::task::yield_now().await;
            }
            None => return Err(RunError::undefined_variable(&name)),
        }
    }
}
