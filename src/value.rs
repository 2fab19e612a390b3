//! Deep attribute values (design note: "replace chained dynamic
//! collection wrappers with a single tagged-union value type").
//!
//! Values may be scalars, nested mappings/sequences, or weak references
//! to other instances. References and externally-resolved values can
//! report whether they have changed since a dependency was baselined,
//! which [`crate::dependency::Dependency::has_changed`] walks into.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::changeid::ChangeId;
use crate::instance::InstanceKey;

/// Capability for values that know how to report their own staleness
/// against a changeset, without the dependency tracker needing to know
/// their concrete type (§3 Dependency: "any value within the result ...
/// reports `hasChanged(changeset)`").
pub trait ChangeAware: fmt::Debug + Send + Sync {
    fn has_changed(&self, since: ChangeId) -> bool;
}

/// An externally-resolved value (e.g. a secret, a cloud API lookup)
/// whose staleness the core cannot determine on its own; it defers to
/// the value's own [`ChangeAware`] implementation.
#[derive(Clone)]
pub struct ExternalValue {
    pub serialized: serde_json::Value,
    inner: Arc<dyn ChangeAware>,
}

impl ExternalValue {
    pub fn new(serialized: serde_json::Value, inner: Arc<dyn ChangeAware>) -> Self {
        ExternalValue { serialized, inner }
    }
}

impl fmt::Debug for ExternalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalValue({})", self.serialized)
    }
}

impl PartialEq for ExternalValue {
    fn eq(&self, other: &Self) -> bool {
        self.serialized == other.serialized
    }
}

/// A value living in an instance's attribute map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A weak reference to another instance: relation + lookup, never
    /// ownership (§3 Instance.Attributes invariant).
    Reference(InstanceKey),
    External(ExternalValue),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::String(s) => s.is_empty(),
            Value::List(v) => v.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Recursively walk this value looking for a [`ChangeAware`]
    /// element that reports having changed since `since`. Mirrors
    /// `Dependency.hasValueChanged` in the original implementation.
    pub fn has_changed_since(&self, since: ChangeId) -> bool {
        match self {
            Value::External(ext) => ext.inner.has_changed(since),
            Value::List(items) => items.iter().any(|v| v.has_changed_since(since)),
            Value::Map(map) => map.values().any(|v| v.has_changed_since(since)),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Inverse of [`Value::serialize`], for values round-tripped through
    /// JSON storage (e.g. the input snapshot used by
    /// `hasInputsChanged`). References and externally-resolved values
    /// cannot be reconstructed from plain JSON and come back as plain
    /// scalars/collections instead.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }

    pub fn serialize(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::serialize).collect()),
            Value::Map(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.serialize())).collect())
            }
            Value::Reference(key) => serde_json::Value::String(format!("::{key}")),
            Value::External(ext) => ext.serialized.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A single recorded attribute write: `(key, old, new)`, as staged by
/// the [`crate::attribute_manager::AttributeManager`] (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeChange {
    pub key: String,
    pub old: Option<serde_json::Value>,
    pub new: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AlwaysChanged;
    impl ChangeAware for AlwaysChanged {
        fn has_changed(&self, _since: ChangeId) -> bool {
            true
        }
    }

    #[test]
    fn external_recursion_detects_change() {
        let ext = Value::External(ExternalValue::new(serde_json::json!("x"), Arc::new(AlwaysChanged)));
        let list = Value::List(vec![Value::Int(1), ext]);
        assert!(list.has_changed_since(ChangeId::ZERO));
    }

    #[test]
    fn scalars_never_report_changed() {
        let map = Value::Map(BTreeMap::from([("a".to_string(), Value::Int(1))]));
        assert!(!map.has_changed_since(ChangeId::ZERO));
    }
}
