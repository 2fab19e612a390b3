//! Dependency tracker (§4.2, component C6).
//!
//! Binds a symbolic expression to an observed value; re-evaluating it
//! against the current graph decides whether a task needs to be
//! rescheduled on a later run.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::changeid::ChangeId;
use crate::eval::{Evaluator, RefContext};
use crate::instance::InstanceKey;
use crate::value::Value;

/// A registered dependency: `(expr, expected, schema, required, wantList)`
/// keyed by `name or expr` (§4.2).
#[derive(Debug, Clone)]
pub struct Dependency {
    pub expr: String,
    pub expected: Option<Value>,
    pub schema: Option<JsonValue>,
    pub required: bool,
    pub want_list: bool,
}

impl Dependency {
    pub fn new(expr: impl Into<String>) -> Self {
        Dependency { expr: expr.into(), expected: None, schema: None, required: false, want_list: false }
    }

    pub fn expected(mut self, value: Value) -> Self {
        self.expected = Some(value);
        self
    }

    pub fn schema(mut self, schema: JsonValue) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn want_list(mut self, want_list: bool) -> Self {
        self.want_list = want_list;
        self
    }

    fn context(&self, target: &InstanceKey, change_id: ChangeId) -> RefContext {
        let mut ctx = RefContext::new(target.clone());
        if let Some(expected) = &self.expected {
            ctx = ctx.with_var("val", expected.clone());
        }
        ctx = ctx.with_var("changeId", Value::Int(change_id.get() as i64));
        ctx
    }

    /// Has this dependency changed since it was registered or last
    /// refreshed? Evaluated against `target` at `change_id` (§4.2 "The
    /// change test").
    pub fn has_changed(&self, target: &InstanceKey, change_id: ChangeId, evaluator: &dyn Evaluator) -> anyhow::Result<bool> {
        let ctx = self.context(target, change_id);
        let result = evaluator.resolve(&self.expr, &ctx, self.want_list, false)?;

        if let Some(schema) = &self.schema {
            return Ok(!evaluator.validate_schema(&result.serialize(), schema));
        }

        if let Some(expected) = &self.expected {
            let mapped_expected = evaluator.map_value(expected, &ctx);
            if result != mapped_expected {
                return Ok(true);
            }
        } else if result.is_empty() {
            return Ok(true);
        }

        Ok(result.has_changed_since(change_id))
    }

    /// Re-evaluate and store the new baseline (§4.2 `refresh`).
    pub fn refresh(&mut self, target: &InstanceKey, change_id: ChangeId, evaluator: &dyn Evaluator) -> anyhow::Result<()> {
        if self.expected.is_some() {
            let ctx = self.context(target, change_id);
            self.expected = Some(evaluator.resolve(&self.expr, &ctx, self.want_list, false)?);
        }
        Ok(())
    }
}

/// Per-task registry of dependencies, populated explicitly via
/// [`DependencyTracker::add`] or implicitly whenever a configurator
/// queries an expression with `dependency = true`.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    dependencies: BTreeMap<String, Dependency>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: Option<String>, dependency: Dependency) {
        let key = name.unwrap_or_else(|| dependency.expr.clone());
        self.dependencies.insert(key, dependency);
    }

    pub fn remove(&mut self, name: &str) -> Option<Dependency> {
        self.dependencies.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Dependency)> {
        self.dependencies.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// True if any registered dependency has changed (§4.2 `hasChanged`).
    pub fn any_changed(&self, target: &InstanceKey, change_id: ChangeId, evaluator: &dyn Evaluator) -> anyhow::Result<bool> {
        for dep in self.dependencies.values() {
            if dep.has_changed(target, change_id, evaluator)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn refresh_all(&mut self, target: &InstanceKey, change_id: ChangeId, evaluator: &dyn Evaluator) -> anyhow::Result<()> {
        for dep in self.dependencies.values_mut() {
            dep.refresh(target, change_id, evaluator)?;
        }
        Ok(())
    }
}
