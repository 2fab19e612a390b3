//! Planning (§4.5, component C9): turns the current instance graph plus
//! a [`crate::job::JobOptions`] selection into an ordered list of task
//! requests.

pub mod deploy;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::configurator::TaskRequest;
use crate::error::{Error, Result};
use crate::instance::InstanceGraph;
use crate::job::JobOptions;

pub use deploy::DeployPlanner;

/// A named planning strategy (`workflow`, §3). The core ships exactly
/// one ([`DeployPlanner`]); other workflows (`undeploy`, `discover`,
/// ...) are a manifest-loader concern (§6) and out of scope here.
pub trait Planner: Send + Sync {
    /// Produce the ordered task requests for this run. Order matters:
    /// callers execute requests in the order returned (§4.5 step 2).
    fn plan(&self, graph: &InstanceGraph, options: &JobOptions) -> Vec<TaskRequest>;
}

/// Maps `workflow` names to planner instances, the equivalent of
/// `createJob(opts)` "selects a planner class for `opts.workflow`"
/// (§4.6). `"deploy"` is registered by default; a manifest loader or
/// deployment-specific build registers whatever else it supports.
#[derive(Clone)]
pub struct PlannerRegistry {
    planners: BTreeMap<String, Arc<dyn Planner>>,
}

impl PlannerRegistry {
    /// A registry with just the `deploy` workflow registered.
    pub fn new() -> Self {
        let mut planners: BTreeMap<String, Arc<dyn Planner>> = BTreeMap::new();
        planners.insert("deploy".to_string(), Arc::new(DeployPlanner));
        PlannerRegistry { planners }
    }

    pub fn register(&mut self, workflow: impl Into<String>, planner: Arc<dyn Planner>) {
        self.planners.insert(workflow.into(), planner);
    }

    pub fn lookup(&self, workflow: &str) -> Result<Arc<dyn Planner>> {
        self.planners.get(workflow).cloned().ok_or_else(|| Error::UnknownWorkflow(workflow.to_string()))
    }
}

impl Default for PlannerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
