//! Instance graph (§3 `Instance`, component C2).
//!
//! An [`InstanceGraph`] is the in-memory tree of live instances the
//! planner walks and the attribute manager reads and writes against.
//! Instances hold a weak `parent` relation (never ownership) — the
//! graph is the sole owner, keyed by [`InstanceKey`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};

use crate::changeid::ChangeId;
use crate::error::{Error, Result};
use crate::status::Status;
use crate::value::Value;

/// Stable path-like identity of an instance, unique within its parent
/// and unique across the whole graph (e.g. `root.network.subnet-a`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn new(key: impl Into<String>) -> Self {
        InstanceKey(key.into())
    }

    pub fn child(&self, name: &str) -> Self {
        InstanceKey(format!("{}.{}", self.0, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceKey {
    fn from(s: &str) -> Self {
        InstanceKey(s.to_owned())
    }
}

/// The static description of an instance's type: declared operations,
/// capabilities, and input properties. Produced by the external
/// manifest loader (§6); the core only ever reads it.
pub trait Template: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn is_compatible_type(&self, name: &str) -> bool {
        self.type_name() == name
    }

    /// Capability groups this template's instances belong to, e.g. for
    /// required-dependency resolution during planning.
    fn groups(&self) -> &[String];

    /// Declared static input properties, merged with per-operation
    /// inputs when a [`crate::spec::ConfigurationSpec`] is built.
    fn properties(&self) -> &BTreeMap<String, Value>;

    /// Keys of instances this template's instances require to be
    /// operational before their own operations may run (§4.5 step 1).
    fn required_dependencies(&self) -> &[InstanceKey] {
        &[]
    }

    /// The configurator `class_name` this template declares for
    /// `operation`, if it implements that operation at all (§4.5 step
    /// 2 "resolve an operation from the topology"). Produced by the
    /// external manifest loader (§6), same as the rest of this trait.
    fn configurator_for(&self, operation: crate::spec::Operation) -> Option<String>;
}

/// A node in the live instance graph.
#[derive(Getters, Setters)]
pub struct Instance {
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    key: InstanceKey,
    #[getset(get = "pub")]
    parent: Option<InstanceKey>,
    #[getset(get = "pub")]
    children: Vec<InstanceKey>,
    attributes: BTreeMap<String, Value>,
    #[getset(get = "pub", set = "pub")]
    local_status: Status,
    /// Last time any operation targeted this instance.
    #[getset(get = "pub")]
    last_config_change: Option<ChangeId>,
    /// Last time this instance's state/attributes actually changed.
    #[getset(get = "pub")]
    last_state_change: Option<ChangeId>,
    #[getset(get = "pub")]
    template: Arc<dyn Template>,
    /// Whether any operation has ever targeted this instance — set once
    /// a task finishes on it, never cleared.
    touched: bool,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("key", &self.key)
            .field("local_status", &self.local_status)
            .field("template", &self.template.type_name())
            .finish()
    }
}

impl Instance {
    pub fn new(name: impl Into<String>, key: InstanceKey, parent: Option<InstanceKey>, template: Arc<dyn Template>) -> Self {
        Instance {
            name: name.into(),
            key,
            parent,
            children: Vec::new(),
            attributes: template.properties().clone(),
            local_status: Status::Unknown,
            last_config_change: None,
            last_state_change: None,
            template,
            touched: false,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Direct write used by the attribute manager once it commits a
    /// staged change. Never called directly outside of a task.
    pub(crate) fn write_attribute(&mut self, name: String, value: Value) -> Option<Value> {
        self.attributes.insert(name, value)
    }

    pub(crate) fn add_child(&mut self, key: InstanceKey) {
        self.children.push(key);
    }

    /// Stamp `_lastConfigChange` the first time any operation touches
    /// this instance (§4.6 `_updateLastChange`), and `_lastStateChange`
    /// whenever it actually changed.
    pub(crate) fn record_change(&mut self, change_id: ChangeId, state_changed: bool) {
        if !self.touched {
            self.last_config_change = Some(change_id);
            self.touched = true;
        }
        if state_changed {
            self.last_state_change = Some(change_id);
        }
    }
}

/// The in-memory tree of instances for one running deployment.
pub struct InstanceGraph {
    instances: BTreeMap<InstanceKey, Instance>,
    root: InstanceKey,
}

impl InstanceGraph {
    pub fn new(root: Instance) -> Self {
        let root_key = root.key().clone();
        let mut instances = BTreeMap::new();
        instances.insert(root_key.clone(), root);
        InstanceGraph { instances, root: root_key }
    }

    pub fn root_key(&self) -> &InstanceKey {
        &self.root
    }

    pub fn root(&self) -> &Instance {
        self.get(&self.root).expect("root always present")
    }

    pub fn get(&self, key: &InstanceKey) -> Option<&Instance> {
        self.instances.get(key)
    }

    pub fn get_mut(&mut self, key: &InstanceKey) -> Option<&mut Instance> {
        self.instances.get_mut(key)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Instance> {
        self.instances.values().find(|i| i.name() == name)
    }

    pub fn insert(&mut self, instance: Instance) -> Result<()> {
        let key = instance.key().clone();
        if self.instances.contains_key(&key) {
            return Err(Error::DuplicateInstance(key));
        }
        if let Some(parent_key) = instance.parent().clone() {
            if let Some(parent) = self.instances.get_mut(&parent_key) {
                parent.add_child(key.clone());
            }
        }
        self.instances.insert(key, instance);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Derived status of an instance: its own `localStatus` merged with
    /// the statuses of the instances its template declares as required
    /// dependencies (§3 Instance invariant).
    pub fn derived_status(&self, key: &InstanceKey) -> Status {
        let Some(instance) = self.get(key) else {
            return Status::Unknown;
        };
        let dep_statuses: Vec<Status> = instance
            .template()
            .required_dependencies()
            .iter()
            .map(|dep_key| self.derived_status(dep_key))
            .collect();
        Status::merge(*instance.local_status(), &dep_statuses)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug)]
    pub(crate) struct StubTemplate {
        pub type_name: String,
        pub groups: Vec<String>,
        pub properties: BTreeMap<String, Value>,
        pub required: Vec<InstanceKey>,
    }

    impl StubTemplate {
        pub(crate) fn compute(name: &str) -> Arc<dyn Template> {
            Arc::new(StubTemplate {
                type_name: name.to_string(),
                groups: vec![],
                properties: BTreeMap::new(),
                required: vec![],
            })
        }
    }

    impl Template for StubTemplate {
        fn type_name(&self) -> &str {
            &self.type_name
        }

        fn groups(&self) -> &[String] {
            &self.groups
        }

        fn properties(&self) -> &BTreeMap<String, Value> {
            &self.properties
        }

        fn required_dependencies(&self) -> &[InstanceKey] {
            &self.required
        }

        fn configurator_for(&self, _operation: crate::spec::Operation) -> Option<String> {
            None
        }
    }

    #[test]
    fn insert_links_parent_child() {
        let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        let mut graph = InstanceGraph::new(root);
        let child = Instance::new(
            "server",
            InstanceKey::new("root.server"),
            Some(InstanceKey::new("root")),
            StubTemplate::compute("Compute"),
        );
        graph.insert(child).unwrap();
        assert_eq!(graph.root().children(), &[InstanceKey::new("root.server")]);
    }

    #[test]
    fn duplicate_insert_errors() {
        let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        let mut graph = InstanceGraph::new(root);
        let dup = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        assert!(graph.insert(dup).is_err());
    }

    #[test]
    fn derived_status_merges_required_dependency() {
        let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        let mut graph = InstanceGraph::new(root);

        let dep_template = StubTemplate { type_name: "Net".into(), groups: vec![], properties: BTreeMap::new(), required: vec![] };
        let dep = Instance::new("net", InstanceKey::new("root.net"), Some(InstanceKey::new("root")), Arc::new(dep_template));
        graph.insert(dep).unwrap();
        graph.get_mut(&InstanceKey::new("root.net")).unwrap().set_local_status(Status::Error);

        let server_template = StubTemplate { type_name: "Compute".into(), groups: vec![], properties: BTreeMap::new(), required: vec![InstanceKey::new("root.net")] };
        let server = Instance::new("server", InstanceKey::new("root.server"), Some(InstanceKey::new("root")), Arc::new(server_template));
        graph.insert(server).unwrap();
        graph.get_mut(&InstanceKey::new("root.server")).unwrap().set_local_status(Status::Ok);

        assert_eq!(graph.derived_status(&InstanceKey::new("root.server")), Status::Error);
    }
}
