//! Runner (§4.6, component C11): owns the change-id sequence across
//! however many jobs run against one manifest, and gates each job on
//! the working tree being clean unless the caller overrides it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::attribute_manager::shared_graph;
use crate::changeid::{shared_change_ids, ChangeIdService, SharedChangeIds};
use crate::config::RunnerConfig;
use crate::configurator::ConfiguratorRegistry;
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::job::{Job, JobOptions, JobOutcome};
use crate::manifest::ManifestLoader;
use crate::planner::PlannerRegistry;

/// Whether the backing store a manifest was loaded from has
/// uncommitted changes. Real deployments back this with their VCS;
/// [`AlwaysClean`] is the default for manifests with no such backing
/// (e.g. the in-memory demo).
#[async_trait]
pub trait RepositoryStatus: Send + Sync {
    async fn is_dirty(&self) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct AlwaysClean;

#[async_trait]
impl RepositoryStatus for AlwaysClean {
    async fn is_dirty(&self) -> Result<bool> {
        Ok(false)
    }
}

pub struct Runner {
    loader: Arc<dyn ManifestLoader>,
    repository: Arc<dyn RepositoryStatus>,
    evaluator: Arc<dyn Evaluator>,
    change_ids: SharedChangeIds,
    planners: Arc<PlannerRegistry>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(loader: Arc<dyn ManifestLoader>, repository: Arc<dyn RepositoryStatus>, evaluator: Arc<dyn Evaluator>) -> Self {
        Runner {
            loader,
            repository,
            evaluator,
            change_ids: shared_change_ids(ChangeIdService::starting_from(0)),
            planners: Arc::new(PlannerRegistry::new()),
            config: RunnerConfig::default(),
        }
    }

    /// Apply a loaded `RunnerConfig`'s defaults (workflow, repair
    /// threshold, nested-subtask limit) and register any extra
    /// workflow planners it names.
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_planners(mut self, planners: Arc<PlannerRegistry>) -> Self {
        self.planners = planners;
        self
    }

    /// Load the manifest, gate on a clean working tree, then plan and
    /// run one job (§4.6 `Runner.run`). The job selects its own planner
    /// from `options.workflow` (component C9). An error from the job
    /// itself is logged and surfaced rather than silently swallowed —
    /// `unfurl.job.Runner.run`'s "unexpected abort" path.
    pub async fn run(&mut self, options: JobOptions) -> Result<JobOutcome> {
        if !options.dirty && self.repository.is_dirty().await? {
            return Err(Error::DirtyRepository);
        }

        let options = self.config.apply_defaults(options, &[]);
        let manifest = self.loader.load().await?;
        let change_id = {
            let mut service = self.change_ids.lock().await;
            service.increment()
        };
        let graph = shared_graph(manifest.graph);
        let registry = Arc::new(manifest.registry);

        let mut job = Job::new(options, graph, change_id, self.change_ids.clone(), self.evaluator.clone(), registry, self.planners.clone())
            .with_max_nested_subtasks(self.config.max_nested_subtasks());
        match job.run().await {
            Ok(outcome) => {
                info!(tasks_run = outcome.tasks_run, tasks_failed = outcome.tasks_failed, "job finished");
                Ok(outcome)
            }
            Err(err) => {
                error!(error = %err, "job aborted unexpectedly");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NullEvaluator;
    use crate::instance::tests::StubTemplate;
    use crate::instance::{Instance, InstanceGraph, InstanceKey};

    struct EmptyLoader;

    #[async_trait]
    impl ManifestLoader for EmptyLoader {
        async fn load(&self) -> Result<crate::manifest::Manifest> {
            let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
            Ok(crate::manifest::Manifest { graph: InstanceGraph::new(root), registry: ConfiguratorRegistry::new() })
        }
    }

    #[derive(Debug, Default)]
    struct AlwaysDirty;

    #[async_trait]
    impl RepositoryStatus for AlwaysDirty {
        async fn is_dirty(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn dirty_repository_blocks_run_without_override() {
        let mut runner = Runner::new(Arc::new(EmptyLoader), Arc::new(AlwaysDirty), Arc::new(NullEvaluator));
        let options = JobOptions::builder().all(true).build();
        let result = runner.run(options).await;
        assert!(matches!(result, Err(Error::DirtyRepository)));
    }

    #[tokio::test]
    async fn dirty_override_lets_job_run() {
        let mut runner = Runner::new(Arc::new(EmptyLoader), Arc::new(AlwaysDirty), Arc::new(NullEvaluator));
        let options = JobOptions::builder().all(true).dirty(true).build();
        let outcome = runner.run(options).await.unwrap();
        assert_eq!(outcome.tasks_run, 0);
    }

    #[tokio::test]
    async fn runner_config_sets_default_workflow() {
        let mut runner = Runner::new(Arc::new(EmptyLoader), Arc::new(crate::runner::AlwaysClean), Arc::new(NullEvaluator))
            .with_config(RunnerConfig::from_toml_str("workflow = \"deploy\"\n").unwrap());
        let options = JobOptions::builder().build();
        let outcome = runner.run(options).await.unwrap();
        assert_eq!(outcome.tasks_run, 0);
    }
}
