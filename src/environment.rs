//! The variable environment: a mapping from name to slot, where a slot is
//! either a concrete value or a promise for a value produced by an
//! outstanding task coroutine.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::RunError;

/// Outcome a pending slot resolves to: either the rendered value, or a
/// structured failure (installed when the task that owns the slot fails and
/// `ignore_errors` absorbed the failure into a result record instead of
/// aborting the run).
pub type SlotResult = Result<Value, RunError>;

/// A promise for a value that some outstanding task coroutine will produce.
///
/// Backed by a `watch` channel rather than a `oneshot`: several later tasks
/// may each reference the same register name, and `oneshot::Receiver` is not
/// cloneable, so it cannot serve more than one waiter.
#[derive(Debug, Clone)]
pub struct Promise {
    rx: watch::Receiver<Option<SlotResult>>,
}

impl Promise {
    /// Create a linked (promise, completer) pair for a single register slot.
    pub fn new() -> (Promise, Completer) {
        let (tx, rx) = watch::channel(None);
        (Promise { rx }, Completer { tx })
    }

    /// Wait for the producing task to finish and return its outcome.
    ///
    /// Cheap to call repeatedly: once the channel carries a value, every
    /// waiter (including ones that subscribe after completion) observes it
    /// immediately.
    pub async fn await_ready(&self) -> SlotResult {
        let mut rx = self.rx.clone();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(RunError::internal("promise dropped before completion"));
            }
        }
    }
}

/// The producing side of a [`Promise`]; consumed exactly once.
pub struct Completer {
    tx: watch::Sender<Option<SlotResult>>,
}

impl Completer {
    pub fn complete(self, result: SlotResult) {
        let _ = self.tx.send(Some(result));
    }
}

/// A variable slot: either a concrete, ready value, or a promise for one.
#[derive(Debug, Clone)]
pub enum Slot {
    Ready(Value),
    Pending(Promise),
}

impl Slot {
    pub fn ready(value: Value) -> Self {
        Slot::Ready(value)
    }
}

/// A layer of bindings, logically copy-on-write: cloning an `Environment`
/// snapshots the current layer so that writes to the clone never propagate
/// back to the parent.
///
/// Layers are composed in precedence order (lowest first) at lookup time
/// rather than eagerly merged, so a later layer can shadow an earlier one
/// without mutating it. One layer is additionally marked the *scope* layer:
/// the target for `register`/`set_fact` installs, tracked by index rather
/// than always assumed to be the bottom layer, since extra-vars (layer 0)
/// and a playbook's own scoped variables are different layers once a
/// playbook has been entered via [`Environment::child_scope`].
#[derive(Clone)]
pub struct Environment {
    layers: Vec<Arc<Mutex<HashMap<String, Slot>>>>,
    scope_index: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            layers: vec![Arc::new(Mutex::new(HashMap::new()))],
            scope_index: 0,
        }
    }

    /// Push a new, empty writable layer on top (e.g. task-local `vars`).
    /// The new layer shadows all prior ones but does not copy them, and
    /// does not change which layer `register`/`set_fact` write into.
    pub fn child(&self) -> Self {
        let mut layers = self.layers.clone();
        layers.push(Arc::new(Mutex::new(HashMap::new())));
        Self { layers, scope_index: self.scope_index }
    }

    /// Push a new layer and make it the new `register`/`set_fact` scope
    /// (e.g. entering a playbook). Unlike `child()`, this changes where
    /// `set_scoped` writes, so register names installed under the returned
    /// environment are isolated from both the parent's extra-vars layer and
    /// from any sibling scope created by another call to `child_scope()`.
    pub fn child_scope(&self) -> Self {
        let mut layers = self.layers.clone();
        layers.push(Arc::new(Mutex::new(HashMap::new())));
        let scope_index = layers.len() - 1;
        Self { layers, scope_index }
    }

    /// Bind a name in the topmost layer.
    pub fn set(&self, name: impl Into<String>, slot: Slot) {
        let top = self.layers.last().expect("environment always has a layer");
        top.lock().unwrap().insert(name.into(), slot);
    }

    /// Bind a name in the current scope layer (the playbook this environment
    /// was entered from), so later tasks anywhere in that playbook observe
    /// it under `register`, without leaking into sibling playbooks that hold
    /// their own, separately-allocated scope layer.
    pub fn set_scoped(&self, name: impl Into<String>, slot: Slot) {
        let scope = &self.layers[self.scope_index];
        scope.lock().unwrap().insert(name.into(), slot);
    }

    /// Look up a name, searching from the topmost (most local) layer down.
    pub fn get(&self, name: &str) -> Option<Slot> {
        for layer in self.layers.iter().rev() {
            if let Some(slot) = layer.lock().unwrap().get(name) {
                return Some(slot.clone());
            }
        }
        None
    }

    /// A snapshot of every *ready* binding visible from this scope, used by
    /// the Template Probe: pending slots are deliberately omitted so their
    /// names register as missing until they resolve.
    pub fn ready_snapshot(&self) -> HashMap<String, Value> {
        let mut merged = HashMap::new();
        for layer in &self.layers {
            for (name, slot) in layer.lock().unwrap().iter() {
                if let Slot::Ready(value) = slot {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_scoped_targets_the_current_scope_layer_not_the_root() {
        let root = Environment::new();
        root.set("extra", Slot::ready(json!("from-extra-vars")));

        let playbook = root.child_scope();
        playbook.set_scoped("status", Slot::ready(json!("one")));

        assert!(root.get("status").is_none());
        assert!(matches!(playbook.get("status"), Some(Slot::Ready(_))));
    }

    #[test]
    fn sibling_scopes_do_not_share_register_names() {
        let root = Environment::new();

        let playbook_a = root.child_scope();
        playbook_a.set_scoped("status", Slot::ready(json!("a")));

        let playbook_b = root.child_scope();
        playbook_b.set_scoped("status", Slot::ready(json!("b")));

        match playbook_a.get("status") {
            Some(Slot::Ready(v)) => assert_eq!(v, json!("a")),
            other => panic!("expected playbook_a's own binding, got {other:?}"),
        }
        match playbook_b.get("status") {
            Some(Slot::Ready(v)) => assert_eq!(v, json!("b")),
            other => panic!("expected playbook_b's own binding, got {other:?}"),
        }
    }

    #[test]
    fn child_inherits_scope_from_its_parent() {
        let root = Environment::new();
        let playbook = root.child_scope();
        let task = playbook.child();
        task.set_scoped("r1", Slot::ready(json!("task-local-register")));

        assert!(matches!(playbook.get("r1"), Some(Slot::Ready(_))));
    }
}
