//! External collaborators the core treats as black boxes (§6): the
//! expression evaluator (`Ref.resolve`) and the schema validator.
//!
//! Both are out of scope for this crate's implementation — a real
//! deployment wires in a concrete evaluator (e.g. one that understands
//! `::node::attr`-style references against the live graph) — but the
//! dependency tracker and attribute manager need *some* trait object to
//! call, so this module pins the contract.

use std::collections::BTreeMap;

use crate::instance::InstanceKey;
use crate::value::Value;

/// Evaluation scope for one expression: the target instance plus any
/// reserved variables (`val`, `changeId`, `inputs`, ...).
#[derive(Debug, Clone)]
pub struct RefContext {
    pub target: InstanceKey,
    pub vars: BTreeMap<String, Value>,
}

impl RefContext {
    pub fn new(target: InstanceKey) -> Self {
        RefContext { target, vars: BTreeMap::new() }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }
}

/// The expression-language evaluator and schema validator, bundled
/// behind one trait object since both are consumed purely as external
/// collaborators (§1 Out of scope, §6 Ref / Schema validator).
pub trait Evaluator: Send + Sync {
    /// Resolve `expr` against `ctx`. `want_list` controls whether the
    /// result is coerced to a sequence; `strict` controls whether an
    /// unresolved reference is an error or an empty result.
    fn resolve(&self, expr: &str, ctx: &RefContext, want_list: bool, strict: bool) -> anyhow::Result<Value>;

    /// Recursively evaluate any embedded expressions within `value`.
    fn map_value(&self, value: &Value, ctx: &RefContext) -> Value;

    fn validate_schema(&self, value: &serde_json::Value, schema: &serde_json::Value) -> bool;

    fn find_schema_errors(&self, value: &serde_json::Value, schema: &serde_json::Value) -> Vec<String> {
        if self.validate_schema(value, schema) {
            Vec::new()
        } else {
            vec!["value does not match schema".to_string()]
        }
    }
}

/// An evaluator that resolves nothing and validates everything; useful
/// for planning paths that never actually touch dependencies (e.g.
/// `planOnly`) and as a test double.
#[derive(Debug, Default)]
pub struct NullEvaluator;

impl Evaluator for NullEvaluator {
    fn resolve(&self, _expr: &str, _ctx: &RefContext, want_list: bool, _strict: bool) -> anyhow::Result<Value> {
        Ok(if want_list { Value::List(Vec::new()) } else { Value::Null })
    }

    fn map_value(&self, value: &Value, _ctx: &RefContext) -> Value {
        value.clone()
    }

    fn validate_schema(&self, _value: &serde_json::Value, _schema: &serde_json::Value) -> bool {
        true
    }
}
