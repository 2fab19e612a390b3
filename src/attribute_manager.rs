//! Attribute manager (§4.1, component C3).
//!
//! Mediates every read and write against instance attributes for the
//! duration of one task. Writes go through to the instance immediately
//! (so later reads in the same task observe them) but are also staged
//! so they can be committed into discrete [`AttributeChange`] snapshots
//! between cooperative steps.
//!
//! The graph is shared behind an `Arc<Mutex<..>>` rather than borrowed,
//! because a task's configurator may recursively drive sub-tasks that
//! need their own momentary access to the same graph (§5 "the instance
//! graph is owned by the Runner for the duration of the job"); a single
//! held `&mut` would make that recursion impossible to express.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::instance::{Instance, InstanceGraph, InstanceKey};
use crate::value::{AttributeChange, Value};

/// Shared handle to the live instance graph for one job (and its
/// children). Cheap to clone; every clone refers to the same graph.
pub type SharedGraph = Arc<Mutex<InstanceGraph>>;

pub fn shared_graph(graph: InstanceGraph) -> SharedGraph {
    Arc::new(Mutex::new(graph))
}

/// One task's view onto the live instance graph.
///
/// A task owns exactly one `AttributeManager`; the core guarantees no
/// two tasks hold one concurrently, since execution is single-threaded
/// cooperative (§5) — the lock is only ever briefly contended across a
/// sub-task's own momentary access, never awaited-on under contention.
pub struct AttributeManager {
    graph: SharedGraph,
    staged: Vec<(InstanceKey, AttributeChange)>,
}

impl AttributeManager {
    pub fn new(graph: SharedGraph) -> Self {
        AttributeManager { graph, staged: Vec::new() }
    }

    /// Read the current in-memory value of `key` on `target`. Reads
    /// reflect all writes this task has made before this call, staged
    /// or not (invariant (a) in §4.1).
    pub async fn get(&self, target: &InstanceKey, key: &str) -> Option<Value> {
        let graph = self.graph.lock().await;
        graph.get(target).and_then(|i| i.attribute(key)).cloned()
    }

    /// Write `value` to `key` on `target`, staging the change for the
    /// next commit. Returns the previous value, if any.
    pub async fn set(&mut self, target: &InstanceKey, key: &str, value: Value) -> Option<Value> {
        let mut graph = self.graph.lock().await;
        let instance: &mut Instance = graph.get_mut(target)?;
        let old = instance.write_attribute(key.to_owned(), value.clone());
        drop(graph);
        self.staged.push((
            target.clone(),
            AttributeChange {
                key: key.to_owned(),
                old: old.as_ref().map(Value::serialize),
                new: value.serialize(),
            },
        ));
        old
    }

    /// Snapshot and clear the staging area, returning a
    /// `{instanceKey -> [AttributeChange]}` map suitable for merging
    /// into a task's `changeList` (§4.1). Idempotent on an empty stage.
    pub fn commit_changes(&mut self) -> BTreeMap<InstanceKey, Vec<AttributeChange>> {
        let mut out: BTreeMap<InstanceKey, Vec<AttributeChange>> = BTreeMap::new();
        for (key, change) in self.staged.drain(..) {
            out.entry(key).or_default().push(change);
        }
        out
    }

    pub fn has_staged_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::StubTemplate;
    use crate::instance::Instance;

    fn graph() -> SharedGraph {
        let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        shared_graph(InstanceGraph::new(root))
    }

    #[tokio::test]
    async fn write_then_read_within_task_sees_new_value() {
        let mut mgr = AttributeManager::new(graph());
        mgr.set(&InstanceKey::new("root"), "addr", Value::from("10.0.0.1")).await;
        assert_eq!(mgr.get(&InstanceKey::new("root"), "addr").await, Some(Value::from("10.0.0.1")));
    }

    #[tokio::test]
    async fn commit_clears_staging_and_is_idempotent() {
        let mut mgr = AttributeManager::new(graph());
        mgr.set(&InstanceKey::new("root"), "addr", Value::from("10.0.0.1")).await;
        let first = mgr.commit_changes();
        assert_eq!(first.len(), 1);
        assert!(!mgr.has_staged_changes());
        let second = mgr.commit_changes();
        assert!(second.is_empty());
    }
}
