//! Job runner (§4.6, component C10): drives a planned set of tasks to
//! completion, one at a time, single-threaded and cooperative (§5).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{info, instrument, warn};
use typed_builder::TypedBuilder;

use crate::attribute_manager::{AttributeManager, SharedGraph};
use crate::change::ResourceChanges;
use crate::changeid::{ChangeId, SharedChangeIds};
use crate::configurator::{ConfiguratorRegistry, ConfiguratorResult, JobRequest, SubtaskDriver, TaskRequest};
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::instance::InstanceKey;
use crate::planner::{Planner, PlannerRegistry};
use crate::spec::Workflow;
use crate::status::{Priority, RepairThreshold, Status};
use crate::task::{Task, TaskOutcome};

/// A sub-task nesting depth past which the engine refuses to recurse
/// further, guarding against a misbehaving configurator that yields
/// sub-tasks forever (mirrors `unfurl.job.Job.MAX_NESTED_SUBTASKS`).
/// Overridable per job via [`Job::with_max_nested_subtasks`] (a
/// `RunnerConfig` override, see `src/config.rs`).
pub const MAX_NESTED_SUBTASKS: usize = 100;

/// User-facing run selection, the equivalent of `unfurl.job.JobOptions`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct JobOptions {
    /// Create instances that don't exist yet. Defaults to true (spec.md
    /// §3: "`add` ... default true.").
    #[builder(default = true)]
    pub add: bool,
    /// Re-run configurations whose inputs or dependencies changed.
    /// Defaults to true (spec.md §3: "`update` ... default true.").
    #[builder(default = true)]
    pub update: bool,
    #[builder(default)]
    pub upgrade: bool,
    #[builder(default)]
    pub repair: RepairThreshold,
    #[builder(default)]
    pub all: bool,
    #[builder(default)]
    pub verify: bool,
    #[builder(default)]
    pub readonly: bool,
    #[builder(default)]
    pub required_only: bool,
    #[builder(default)]
    pub dryrun: bool,
    #[builder(default)]
    pub plan_only: bool,
    /// Restrict the run to this single instance, by name.
    #[builder(default, setter(strip_option))]
    pub instance: Option<String>,
    /// Restrict the run to these instances, by key. Empty means "every
    /// instance the workflow would otherwise select".
    #[builder(default)]
    pub instances: Vec<InstanceKey>,
    #[builder(default)]
    pub workflow: Workflow,
    #[builder(default)]
    pub commit: bool,
    /// Caller already knows the working tree is dirty and wants to
    /// proceed anyway (§4.6 `Runner.run` dirty-repository gate).
    #[builder(default)]
    pub dirty: bool,
}

impl JobOptions {
    pub fn selects(&self, key: &InstanceKey) -> bool {
        if let Some(name) = &self.instance {
            return key.as_str() == name || key.as_str().ends_with(&format!(".{name}"));
        }
        if !self.instances.is_empty() {
            return self.instances.contains(key);
        }
        true
    }

    /// Which boolean flags differ from their defaults, for inclusion in
    /// a persisted job record (`JobOptions.getUserSettings()` in the
    /// original implementation).
    pub fn user_settings(&self) -> BTreeMap<&'static str, bool> {
        let defaults = JobOptions::builder().build();
        let mut settings = BTreeMap::new();
        for (name, value, default) in [
            ("add", self.add, defaults.add),
            ("update", self.update, defaults.update),
            ("upgrade", self.upgrade, defaults.upgrade),
            ("all", self.all, defaults.all),
            ("verify", self.verify, defaults.verify),
            ("readonly", self.readonly, defaults.readonly),
            ("requiredOnly", self.required_only, defaults.required_only),
            ("dryrun", self.dryrun, defaults.dryrun),
            ("planOnly", self.plan_only, defaults.plan_only),
            ("commit", self.commit, defaults.commit),
            ("dirty", self.dirty, defaults.dirty),
        ] {
            if value != default {
                settings.insert(name, value);
            }
        }
        settings
    }
}

/// Summary of one completed job (§4.6 `Job.stats` / `Job.summary`).
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub tasks_run: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    pub changes: ResourceChanges,
    pub outcomes: Vec<TaskOutcome>,
    /// Flags that differed from their defaults for this run
    /// (`JobOptions::user_settings`), carried through for persistence.
    pub user_settings: BTreeMap<&'static str, bool>,
    /// When `Job::run` finished, for inclusion in a persisted job
    /// record alongside the change-id (§3 `ChangeRecord`).
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobOutcome {
    /// One line per task, the equivalent of `Job.summary()`.
    pub fn summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "no tasks ran".to_string();
        }
        self.outcomes
            .iter()
            .map(|o| format!("{} {}: {}", o.target, o.spec_name, if o.success { "ok" } else { "failed" }))
            .join("\n")
    }

    pub fn stats(&self) -> BTreeMap<&'static str, usize> {
        BTreeMap::from([
            ("tasksRun", self.tasks_run),
            ("tasksFailed", self.tasks_failed),
            ("tasksSkipped", self.tasks_skipped),
            ("changes", self.changes.attribute_change_count()),
        ])
    }

    pub fn success(&self) -> bool {
        self.tasks_failed == 0
    }
}

/// One run of a planner's output against the live graph.
pub struct Job {
    options: JobOptions,
    graph: SharedGraph,
    change_id: ChangeId,
    change_ids: SharedChangeIds,
    evaluator: Arc<dyn Evaluator>,
    registry: Arc<ConfiguratorRegistry>,
    planners: Arc<PlannerRegistry>,
    max_nested_subtasks: usize,
    outcome: JobOutcome,
    depth: usize,
}

impl Job {
    pub fn new(
        options: JobOptions,
        graph: SharedGraph,
        change_id: ChangeId,
        change_ids: SharedChangeIds,
        evaluator: Arc<dyn Evaluator>,
        registry: Arc<ConfiguratorRegistry>,
        planners: Arc<PlannerRegistry>,
    ) -> Self {
        let mut outcome = JobOutcome::default();
        outcome.user_settings = options.user_settings();
        Job {
            options,
            graph,
            change_id,
            change_ids,
            evaluator,
            registry,
            planners,
            max_nested_subtasks: MAX_NESTED_SUBTASKS,
            outcome,
            depth: 0,
        }
    }

    /// Override the recursion guard, e.g. from a `RunnerConfig`.
    pub fn with_max_nested_subtasks(mut self, limit: usize) -> Self {
        self.max_nested_subtasks = limit;
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Select a planner for `options.workflow`, then drive each
    /// resulting request to completion in order (§4.6 `Job.run`,
    /// `createJob(opts)` selecting a planner class for `opts.workflow`).
    /// `planOnly` stops short of touching the graph, but still
    /// finalizes each planned task as a successful, recorded no-op
    /// (§8 scenario 3).
    #[instrument(level = "info", skip_all)]
    pub async fn run(&mut self) -> Result<JobOutcome> {
        let planner = self.planners.lookup(&self.options.workflow.0)?;
        let requests = {
            let graph = self.graph.lock().await;
            planner.plan(&graph, &self.options)
        };

        info!(count = requests.len(), "planned tasks");

        if self.options.plan_only {
            for request in &requests {
                info!(target = %request.target, spec = %request.spec.name, "would run (plan-only)");
                let outcome = self.synthesize_outcome(request.target.clone(), request.spec.name.clone(), true, Status::Ok, None).await;
                self.outcome.tasks_run += 1;
                self.outcome.outcomes.push(outcome);
            }
            self.outcome.finished_at = Some(Utc::now());
            return Ok(std::mem::take(&mut self.outcome));
        }

        for request in requests {
            if !self.should_run_task(&request).await? {
                self.outcome.tasks_skipped += 1;
                continue;
            }
            let target = request.target.clone();
            let spec_name = request.spec.name.clone();
            let outcome = match self.run_task(request).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "task errored before it could finalize");
                    self.synthesize_outcome(target, spec_name, false, Status::Error, Some(err.to_string())).await
                }
            };

            if !outcome.success {
                self.outcome.tasks_failed += 1;
            }
            self.outcome.tasks_run += 1;
            self.outcome.changes.merge_from(&outcome.changes);
            self.record_instance_outcome(&outcome).await;
            self.outcome.outcomes.push(outcome);
        }

        self.outcome.finished_at = Some(Utc::now());
        Ok(std::mem::take(&mut self.outcome))
    }

    /// Equivalent of `Job.filterConfig` + `Job.shouldRunTask`:
    /// readonly/verify/add/update/upgrade/repair gating before a
    /// planned request is even attempted (§4.5 step 2, §4.6).
    async fn should_run_task(&self, request: &TaskRequest) -> Result<bool> {
        if request.spec.is_error_placeholder() {
            return Ok(true);
        }
        if self.options.readonly && !matches!(request.spec.operation, crate::spec::Operation::Check | crate::spec::Operation::Discover) {
            return Ok(false);
        }

        let graph = self.graph.lock().await;
        let status = graph.derived_status(&request.target);
        drop(graph);

        let is_new = status == Status::Unknown || status == Status::NotPresent;
        if is_new {
            return Ok(self.options.add || self.options.all);
        }
        if self.options.repair.triggers(status) {
            return Ok(true);
        }
        Ok(self.options.update || self.options.upgrade || self.options.all)
    }

    #[instrument(level = "debug", skip_all, fields(target = %request.target, spec = %request.spec.name))]
    async fn run_task(&mut self, request: TaskRequest) -> Result<TaskOutcome> {
        if request.spec.is_error_placeholder() {
            let reason = format!("could not resolve a configurator ({})", request.spec.class_name);
            return Ok(self.synthesize_outcome(request.target, request.spec.name.clone(), false, Status::Error, Some(reason)).await);
        }

        let configurator = self.registry.lookup(&request.spec.class_name)?;
        let mut task = Task::from_request(request);
        let mut attrs = AttributeManager::new(self.graph.clone());
        let evaluator = self.evaluator.clone();
        let dryrun = self.options.dryrun;
        let change_ids = self.change_ids.clone();
        task.run(configurator, &mut attrs, evaluator, self, dryrun, &change_ids).await
    }

    /// Build a finalized task outcome with no configurator invocation
    /// and no attribute writes — used for plan-only reporting,
    /// unresolved-template placeholders, and engine-level failures that
    /// happen before a `Task` can be constructed. Still stamps a
    /// change-id so it participates in the job's timeline like any
    /// other finalized task.
    async fn synthesize_outcome(&self, target: InstanceKey, spec_name: String, success: bool, status: Status, error: Option<String>) -> TaskOutcome {
        let change_id = {
            let mut service = self.change_ids.lock().await;
            service.increment()
        };
        TaskOutcome {
            target,
            spec_name,
            success,
            status,
            changes: ResourceChanges::new(),
            priority: Priority::Required,
            change_id,
            error,
        }
    }

    /// Write a finalized task's status and change-id back onto its
    /// target instance (§3 "`_lastConfigChange` is non-null once any
    /// operation has targeted the instance", "`status` is a
    /// deterministic function of `localStatus`..."). Plan-only outcomes
    /// never reach here, since `run` returns before this loop for them.
    async fn record_instance_outcome(&self, outcome: &TaskOutcome) {
        let mut graph = self.graph.lock().await;
        if let Some(instance) = graph.get_mut(&outcome.target) {
            instance.set_local_status(outcome.status);
            instance.record_change(outcome.change_id, !outcome.changes.is_empty());
        }
    }
}

#[async_trait]
impl SubtaskDriver for Job {
    async fn run_subtask(&mut self, request: TaskRequest) -> Result<ConfiguratorResult> {
        if self.depth >= self.max_nested_subtasks {
            return Err(Error::TooManySubtasks { limit: self.max_nested_subtasks });
        }
        self.depth += 1;
        let result = self.run_subtask_inner(request).await;
        self.depth -= 1;
        result
    }

    async fn run_subjob(&mut self, request: JobRequest) -> Result<JobOutcome> {
        if self.depth >= self.max_nested_subtasks {
            return Err(Error::TooManySubtasks { limit: self.max_nested_subtasks });
        }
        self.depth += 1;
        let result = self.run_subjob_inner(request).await;
        self.depth -= 1;
        result
    }
}

impl Job {
    async fn run_subtask_inner(&mut self, request: TaskRequest) -> Result<ConfiguratorResult> {
        let configurator = self.registry.lookup(&request.spec.class_name)?;
        let mut task = Task::from_request(request);
        let mut attrs = AttributeManager::new(self.graph.clone());
        let evaluator = self.evaluator.clone();
        let dryrun = self.options.dryrun;
        let change_ids = self.change_ids.clone();
        let outcome = task.run(configurator, &mut attrs, evaluator, self, dryrun, &change_ids).await?;
        self.record_instance_outcome(&outcome).await;
        Ok(ConfiguratorResult {
            success: outcome.success,
            result: None,
            config_changed: !outcome.changes.is_empty(),
            state_changed: !outcome.changes.is_empty(),
            status: Some(outcome.status),
            priority: Some(outcome.priority),
        })
    }

    /// Run a nested job over `request.instances`, honoring
    /// `request.workflow` when set rather than always replanning with
    /// the deploy workflow (§6 component C9, `JobRequest.workflow`).
    async fn run_subjob_inner(&mut self, request: JobRequest) -> Result<JobOutcome> {
        let mut sub_options = self.options.clone();
        sub_options.instances = request.instances;
        if let Some(workflow) = request.workflow {
            sub_options.workflow = Workflow(workflow);
        }
        let mut sub_job = Job::new(
            sub_options,
            self.graph.clone(),
            self.change_id,
            self.change_ids.clone(),
            self.evaluator.clone(),
            self.registry.clone(),
            self.planners.clone(),
        )
        .with_max_nested_subtasks(self.max_nested_subtasks);
        sub_job.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeid::{shared_change_ids, ChangeIdService};
    use crate::eval::NullEvaluator;
    use crate::instance::tests::StubTemplate;
    use crate::instance::{Instance, InstanceGraph};

    fn empty_registry() -> Arc<ConfiguratorRegistry> {
        Arc::new(ConfiguratorRegistry::new())
    }

    fn fresh_change_ids() -> SharedChangeIds {
        shared_change_ids(ChangeIdService::starting_from(0))
    }

    #[tokio::test]
    async fn plan_only_reports_without_running() {
        let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        let graph = crate::attribute_manager::shared_graph(InstanceGraph::new(root));

        struct EmptyPlanner;
        impl Planner for EmptyPlanner {
            fn plan(&self, _graph: &InstanceGraph, _options: &JobOptions) -> Vec<TaskRequest> {
                Vec::new()
            }
        }
        let mut planners = PlannerRegistry::new();
        planners.register("test-empty", Arc::new(EmptyPlanner));

        let options = JobOptions::builder().plan_only(true).all(true).workflow(Workflow("test-empty".to_string())).build();
        let mut job = Job::new(options, graph, ChangeId::ZERO, fresh_change_ids(), Arc::new(NullEvaluator), empty_registry(), Arc::new(planners));

        let outcome = job.run().await.unwrap();
        assert_eq!(outcome.tasks_run, 0);
    }

    #[tokio::test]
    async fn plan_only_synthesizes_successful_tasks_without_running_configurator() {
        let root = Instance::new("root", InstanceKey::new("root"), None, StubTemplate::compute("Root"));
        let graph = crate::attribute_manager::shared_graph(InstanceGraph::new(root));

        struct OneTaskPlanner;
        impl Planner for OneTaskPlanner {
            fn plan(&self, _graph: &InstanceGraph, _options: &JobOptions) -> Vec<TaskRequest> {
                vec![TaskRequest::new(
                    crate::spec::ConfigurationSpec::builder()
                        .name("create-server".to_string())
                        .operation(crate::spec::Operation::Create)
                        .class_name("demo::SetAttribute".to_string())
                        .build(),
                    InstanceKey::new("root"),
                )]
            }
        }
        let mut planners = PlannerRegistry::new();
        planners.register("test-one", Arc::new(OneTaskPlanner));

        let options = JobOptions::builder().plan_only(true).workflow(Workflow("test-one".to_string())).build();
        let mut job = Job::new(options, graph, ChangeId::ZERO, fresh_change_ids(), Arc::new(NullEvaluator), empty_registry(), Arc::new(planners));

        let outcome = job.run().await.unwrap();
        assert_eq!(outcome.tasks_run, 1);
        assert!(outcome.success());
        assert!(outcome.outcomes[0].changes.is_empty());
    }

    #[test]
    fn selects_matches_exact_instance_name() {
        let options = JobOptions::builder().instance("server".to_string()).build();
        assert!(options.selects(&InstanceKey::new("root.server")));
        assert!(!options.selects(&InstanceKey::new("root.network")));
    }

    #[test]
    fn add_and_update_default_to_true() {
        let options = JobOptions::builder().build();
        assert!(options.add);
        assert!(options.update);
    }
}
