//! Resource change records (§4.1, component C4).
//!
//! A [`ResourceChanges`] accumulates everything one task did to the
//! graph: attribute writes, collapsed to one delta per attribute key
//! per instance (later writes win, §4.1 invariant (c)), plus any
//! instances the task added as children of its target.

use std::collections::BTreeMap;

use crate::instance::InstanceKey;
use crate::value::AttributeChange;

/// Everything one task changed, keyed by the instance it touched, then
/// by attribute name. Writing the same attribute twice within a task
/// collapses to a single entry: the earliest `old` value and the
/// latest `new` value.
#[derive(Debug, Clone, Default)]
pub struct ResourceChanges {
    attributes: BTreeMap<InstanceKey, BTreeMap<String, AttributeChange>>,
    added_instances: Vec<InstanceKey>,
}

impl ResourceChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge in a batch of staged attribute changes, e.g. from
    /// [`crate::attribute_manager::AttributeManager::commit_changes`].
    /// A later change to the same `(instance, key)` pair overwrites the
    /// recorded `new` value but keeps the originally recorded `old`.
    pub fn merge_attributes(&mut self, batch: BTreeMap<InstanceKey, Vec<AttributeChange>>) {
        for (instance, changes) in batch {
            let entry = self.attributes.entry(instance).or_default();
            for change in changes {
                match entry.get_mut(&change.key) {
                    Some(existing) => existing.new = change.new,
                    None => {
                        entry.insert(change.key.clone(), change);
                    }
                }
            }
        }
    }

    pub fn record_added_instance(&mut self, key: InstanceKey) {
        self.added_instances.push(key);
    }

    /// Merge another task's recorded changes into this one (e.g. a
    /// job's running total, §4.6 `Job.stats`), with the same
    /// later-write-wins collapsing [`Self::merge_attributes`] applies.
    pub fn merge_from(&mut self, other: &ResourceChanges) {
        for (instance, deltas) in &other.attributes {
            let entry = self.attributes.entry(instance.clone()).or_default();
            for delta in deltas.values() {
                match entry.get_mut(&delta.key) {
                    Some(existing) => existing.new = delta.new.clone(),
                    None => {
                        entry.insert(delta.key.clone(), delta.clone());
                    }
                }
            }
        }
        self.added_instances.extend(other.added_instances.iter().cloned());
    }

    pub fn attributes(&self) -> &BTreeMap<InstanceKey, BTreeMap<String, AttributeChange>> {
        &self.attributes
    }

    pub fn added_instances(&self) -> &[InstanceKey] {
        &self.added_instances
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.added_instances.is_empty()
    }

    /// Number of individual attribute deltas recorded, across every
    /// touched instance — used by [`crate::job::JobOutcome::stats`].
    pub fn attribute_change_count(&self) -> usize {
        self.attributes.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_across_calls() {
        let mut changes = ResourceChanges::new();
        let mut first = BTreeMap::new();
        first.insert(
            InstanceKey::new("root.server"),
            vec![AttributeChange { key: "addr".into(), old: None, new: serde_json::json!("10.0.0.1") }],
        );
        changes.merge_attributes(first);

        let mut second = BTreeMap::new();
        second.insert(
            InstanceKey::new("root.server"),
            vec![AttributeChange { key: "port".into(), old: None, new: serde_json::json!(22) }],
        );
        changes.merge_attributes(second);

        assert_eq!(changes.attributes()[&InstanceKey::new("root.server")].len(), 2);
        assert_eq!(changes.attribute_change_count(), 2);
    }

    #[test]
    fn repeated_write_to_same_key_collapses_to_one_delta() {
        let mut changes = ResourceChanges::new();
        let mut batch = BTreeMap::new();
        batch.insert(
            InstanceKey::new("root.server"),
            vec![
                AttributeChange { key: "addr".into(), old: None, new: serde_json::json!("10.0.0.1") },
                AttributeChange { key: "addr".into(), old: Some(serde_json::json!("10.0.0.1")), new: serde_json::json!("10.0.0.2") },
            ],
        );
        changes.merge_attributes(batch);

        assert_eq!(changes.attribute_change_count(), 1);
        let delta = &changes.attributes()[&InstanceKey::new("root.server")]["addr"];
        assert_eq!(delta.old, None);
        assert_eq!(delta.new, serde_json::json!("10.0.0.2"));
    }

    #[test]
    fn empty_changes_report_empty() {
        assert!(ResourceChanges::new().is_empty());
    }
}
