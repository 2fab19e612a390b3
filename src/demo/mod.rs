//! A minimal, in-memory manifest and configurator, good enough for the
//! CLI to run an end-to-end job without a real manifest backend. Not
//! production material — a real deployment supplies its own
//! [`crate::manifest::ManifestLoader`] and configurators (§6).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::configurator::{CanRun, Configurator, ConfiguratorRegistry, ConfiguratorResult, TaskHandle};
use crate::error::Result;
use crate::instance::{Instance, InstanceGraph, InstanceKey, Template};
use crate::manifest::{Manifest, ManifestLoader};
use crate::spec::Operation;
use crate::value::Value;

/// A template with a fixed, hard-coded set of properties and no
/// required dependencies — just enough to stand a demo graph up.
#[derive(Debug)]
pub struct StaticTemplate {
    type_name: String,
    properties: BTreeMap<String, Value>,
    required: Vec<InstanceKey>,
}

impl StaticTemplate {
    pub fn new(type_name: impl Into<String>) -> Arc<dyn Template> {
        Arc::new(StaticTemplate { type_name: type_name.into(), properties: BTreeMap::new(), required: Vec::new() })
    }

    pub fn requiring(type_name: impl Into<String>, required: Vec<InstanceKey>) -> Arc<dyn Template> {
        Arc::new(StaticTemplate { type_name: type_name.into(), properties: BTreeMap::new(), required })
    }
}

impl Template for StaticTemplate {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn groups(&self) -> &[String] {
        &[]
    }

    fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    fn required_dependencies(&self) -> &[InstanceKey] {
        &self.required
    }

    fn configurator_for(&self, operation: Operation) -> Option<String> {
        matches!(operation, Operation::Create | Operation::Configure).then(|| "demo::SetAttribute".to_string())
    }
}

/// Writes its spec's `inputs` onto the target instance and reports
/// success — the simplest possible configurator, the equivalent of
/// `unfurl`'s `TemplateConfigurator` used in its own test suite.
#[derive(Debug, Default)]
pub struct SetAttributeConfigurator;

#[async_trait]
impl Configurator for SetAttributeConfigurator {
    async fn run(&self, task: &mut TaskHandle<'_>) -> Result<ConfiguratorResult> {
        let inputs = task.inputs().clone();
        for (key, value) in inputs {
            task.set(&key, value).await;
        }
        Ok(ConfiguratorResult::finish(true))
    }

    fn can_dry_run(&self, _task: &TaskHandle<'_>) -> bool {
        true
    }

    fn can_run(&self, _task: &TaskHandle<'_>) -> CanRun {
        CanRun::Yes
    }
}

pub fn demo_registry() -> ConfiguratorRegistry {
    let mut registry = ConfiguratorRegistry::new();
    registry.register("demo::SetAttribute", Arc::new(|| Arc::new(SetAttributeConfigurator) as Arc<dyn Configurator>));
    registry
}

/// A [`ManifestLoader`] that hands back a fixed, hard-coded graph: one
/// root plus one `network` instance and one `server` instance that
/// requires it.
#[derive(Debug, Default)]
pub struct InMemoryManifestLoader;

#[async_trait]
impl ManifestLoader for InMemoryManifestLoader {
    async fn load(&self) -> Result<Manifest> {
        let root = Instance::new("root", InstanceKey::new("root"), None, StaticTemplate::new("Root"));
        let mut graph = InstanceGraph::new(root);

        let network = Instance::new(
            "network",
            InstanceKey::new("root.network"),
            Some(InstanceKey::new("root")),
            StaticTemplate::new("Network"),
        );
        graph.insert(network)?;

        let server = Instance::new(
            "server",
            InstanceKey::new("root.server"),
            Some(InstanceKey::new("root")),
            StaticTemplate::requiring("Compute", vec![InstanceKey::new("root.network")]),
        );
        graph.insert(server)?;

        Ok(Manifest { graph, registry: demo_registry() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use crate::runner::{AlwaysClean, Runner};

    #[tokio::test]
    async fn demo_graph_deploys_end_to_end() {
        let mut runner = Runner::new(
            Arc::new(InMemoryManifestLoader),
            Arc::new(AlwaysClean),
            Arc::new(crate::eval::NullEvaluator),
        );
        let options = JobOptions::builder().all(true).build();
        let outcome = runner.run(options).await.unwrap();

        // Three instances (root, network, server) x two configured
        // operations (create, configure) each.
        assert_eq!(outcome.tasks_run, 6);
        assert!(outcome.success());
    }

    /// With every flag left at its default, `add`/`update` already
    /// default to true (spec.md §3), so a fresh graph's brand-new
    /// instances still get created and configured without `--all`.
    #[tokio::test]
    async fn demo_graph_deploys_with_plain_defaults() {
        let mut runner = Runner::new(
            Arc::new(InMemoryManifestLoader),
            Arc::new(AlwaysClean),
            Arc::new(crate::eval::NullEvaluator),
        );
        let outcome = runner.run(JobOptions::builder().build()).await.unwrap();

        assert_eq!(outcome.tasks_run, 6);
        assert!(outcome.success());
    }
}
