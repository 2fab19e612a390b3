//! Configuration spec (§3 `ConfigurationSpec`, component C5).
//!
//! Immutable once built: the planner constructs and caches one per
//! declared operation, and equality across every field decides whether
//! a task needs to be (re-)scheduled (§4.5 step 2).

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use typed_builder::TypedBuilder;

use crate::instance::InstanceKey;
use crate::value::Value;

/// Isolation and variable-passing policy for a configurator's
/// environment (mirrors `unfurl.configurator.Environment`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Environment {
    pub vars: BTreeMap<String, String>,
    pub isolate: bool,
    pub pass_vars: Option<Vec<String>>,
    pub add_inputs: bool,
}

/// The standard operations the deploy workflow plans for, in the order
/// §4.5 step 2 requires them to run on a single instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Create,
    Configure,
    Start,
    Check,
    Stop,
    Delete,
    Discover,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Configure => "configure",
            Operation::Start => "start",
            Operation::Check => "check",
            Operation::Stop => "stop",
            Operation::Delete => "delete",
            Operation::Discover => "discover",
        }
    }
}

/// Named planning strategy: `deploy`, `undeploy`, `discover`, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Workflow(pub String);

impl Workflow {
    pub fn deploy() -> Self {
        Workflow("deploy".to_string())
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Workflow::deploy()
    }
}

/// Immutable parameters of one operation invocation. Two specs are
/// equal iff every field below is equal (§3).
#[derive(Debug, Clone, TypedBuilder)]
pub struct ConfigurationSpec {
    pub name: String,
    pub operation: Operation,
    /// Name of the configurator to instantiate from the registry (§6).
    pub class_name: String,
    #[builder(default = 0)]
    pub major_version: u32,
    #[builder(default)]
    pub minor_version: String,
    #[builder(default)]
    pub workflow: Workflow,
    #[builder(default, setter(strip_option))]
    pub timeout: Option<std::time::Duration>,
    #[builder(default)]
    pub environment: Environment,
    #[builder(default)]
    pub inputs: BTreeMap<String, Value>,
    #[builder(default, setter(strip_option))]
    pub input_schema: Option<JsonValue>,
    #[builder(default, setter(strip_option))]
    pub pre_conditions: Option<JsonValue>,
    #[builder(default, setter(strip_option))]
    pub post_conditions: Option<JsonValue>,
    /// Template binding this spec was resolved from, if any.
    #[builder(default, setter(strip_option))]
    pub installer: Option<InstanceKey>,
}

impl PartialEq for ConfigurationSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.operation == other.operation
            && self.class_name == other.class_name
            && self.major_version == other.major_version
            && self.minor_version == other.minor_version
            && self.workflow == other.workflow
            && self.timeout == other.timeout
            && self.environment == other.environment
            && self.inputs == other.inputs
            && self.input_schema == other.input_schema
            && self.pre_conditions == other.pre_conditions
            && self.post_conditions == other.post_conditions
            && self.installer == other.installer
    }
}

impl ConfigurationSpec {
    /// Build a copy of this spec with some fields overridden, the way
    /// `ConfigurationSpec.copy(**mods)` does. With no overrides the
    /// result compares equal to the original (§8 round-trip property).
    pub fn with_inputs(&self, inputs: BTreeMap<String, Value>) -> Self {
        ConfigurationSpec { inputs, ..self.clone() }
    }

    /// A placeholder spec used when resolving an operation from the
    /// topology failed; carries an error message instead of a usable
    /// `class_name` so the engine can record a failure instead of
    /// silently skipping (§4.5 step 3).
    pub fn error_placeholder(name: impl Into<String>, operation: Operation, reason: impl Into<String>) -> Self {
        ConfigurationSpec::builder()
            .name(name.into())
            .operation(operation)
            .class_name(format!("<error: {}>", reason.into()))
            .build()
    }

    pub fn is_error_placeholder(&self) -> bool {
        self.class_name.starts_with("<error:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigurationSpec {
        ConfigurationSpec::builder()
            .name("create-server".to_string())
            .operation(Operation::Create)
            .class_name("demo::SetAttribute".to_string())
            .build()
    }

    #[test]
    fn copy_with_no_mods_is_equal() {
        let spec = base();
        let copy = spec.with_inputs(spec.inputs.clone());
        assert_eq!(spec, copy);
    }

    #[test]
    fn differing_inputs_are_not_equal() {
        let spec = base();
        let mut inputs = BTreeMap::new();
        inputs.insert("x".to_string(), Value::Int(1));
        let copy = spec.with_inputs(inputs);
        assert_ne!(spec, copy);
    }

    #[test]
    fn error_placeholder_is_recognizable() {
        let spec = ConfigurationSpec::error_placeholder("broken", Operation::Create, "could not resolve template");
        assert!(spec.is_error_placeholder());
    }
}
