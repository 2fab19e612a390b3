//! Configurator contract (§6, component C7).
//!
//! `unfurl`'s configurators are Python generators: they `yield` task and
//! job *requests* and receive results back at the `yield` point. Rust
//! has no stable resumable generators, so this crate models the same
//! protocol as a task-and-channel pattern instead (see SPEC_FULL.md
//! "Cooperative execution without generators"): a configurator is an
//! async function that is handed a [`TaskHandle`] it calls back into for
//! every sub-request, rather than a coroutine the engine resumes.
//! Recursion happens through ordinary `.await`, not a hand-rolled state
//! machine, and the single-threaded cooperative guarantee (§5) holds
//! because nothing here is ever spawned onto another task.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::attribute_manager::AttributeManager;
use crate::dependency::{Dependency, DependencyTracker};
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::instance::InstanceKey;
use crate::job::JobOutcome;
use crate::spec::ConfigurationSpec;
use crate::status::{Priority, Status};
use crate::value::Value;

/// A request to run one nested task, the equivalent of `yield
/// TaskRequest(configSpec, target)` in the original generator protocol.
/// Carries its own `id` so logs and persisted job records can correlate
/// a request with the task it spawned, the same role `uuid::Uuid` plays
/// for job/task identity in the teacher.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub id: Uuid,
    pub spec: ConfigurationSpec,
    pub target: InstanceKey,
}

impl TaskRequest {
    pub fn new(spec: ConfigurationSpec, target: InstanceKey) -> Self {
        TaskRequest { id: Uuid::new_v4(), spec, target }
    }
}

/// A request to run a nested job over a set of instances, the
/// equivalent of `yield JobRequest(instances)`.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: Uuid,
    pub instances: Vec<InstanceKey>,
    pub workflow: Option<String>,
}

impl JobRequest {
    pub fn new(instances: Vec<InstanceKey>) -> Self {
        JobRequest { id: Uuid::new_v4(), instances, workflow: None }
    }
}

/// What a configurator hands back once it has finished, the equivalent
/// of `unfurl.configurator.ConfiguratorResult`.
#[derive(Debug, Clone)]
pub struct ConfiguratorResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    /// Whether the operation touched the instance's config at all.
    pub config_changed: bool,
    /// Whether it actually changed observable state (drives
    /// `_lastStateChange`, §4.6 `_updateLastChange`).
    pub state_changed: bool,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
}

impl ConfiguratorResult {
    /// Convenience constructor for the common case — success, both
    /// config and state changed, no status override.
    pub fn finish(success: bool) -> Self {
        ConfiguratorResult {
            success,
            result: None,
            config_changed: true,
            state_changed: success,
            status: None,
            priority: None,
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn unchanged(success: bool) -> Self {
        ConfiguratorResult { config_changed: false, state_changed: false, ..Self::finish(success) }
    }
}

/// Recursive driver a [`TaskHandle`] calls back into to run sub-tasks
/// and sub-jobs. Implemented by [`crate::job::Job`]; kept as a trait so
/// `configurator.rs` does not need to depend on the job module's
/// internals, only this narrow seam.
#[async_trait]
pub trait SubtaskDriver: Send {
    async fn run_subtask(&mut self, request: TaskRequest) -> Result<ConfiguratorResult>;
    async fn run_subjob(&mut self, request: JobRequest) -> Result<JobOutcome>;
}

/// A configurator's view of the one task it is driving: attribute
/// access, dependency registration, and the ability to recurse into
/// sub-tasks or sub-jobs.
pub struct TaskHandle<'a> {
    target: InstanceKey,
    spec: ConfigurationSpec,
    attrs: &'a mut AttributeManager,
    dependencies: &'a mut DependencyTracker,
    evaluator: Arc<dyn Evaluator>,
    driver: &'a mut dyn SubtaskDriver,
}

impl<'a> TaskHandle<'a> {
    pub fn new(
        target: InstanceKey,
        spec: ConfigurationSpec,
        attrs: &'a mut AttributeManager,
        dependencies: &'a mut DependencyTracker,
        evaluator: Arc<dyn Evaluator>,
        driver: &'a mut dyn SubtaskDriver,
    ) -> Self {
        TaskHandle { target, spec, attrs, dependencies, evaluator, driver }
    }

    pub fn target(&self) -> &InstanceKey {
        &self.target
    }

    pub fn spec(&self) -> &ConfigurationSpec {
        &self.spec
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.spec.inputs
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.attrs.get(&self.target, key).await
    }

    pub async fn get_on(&self, target: &InstanceKey, key: &str) -> Option<Value> {
        self.attrs.get(target, key).await
    }

    pub async fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.attrs.set(&self.target, key, value).await
    }

    pub async fn set_on(&mut self, target: &InstanceKey, key: &str, value: Value) -> Option<Value> {
        self.attrs.set(target, key, value).await
    }

    /// Register a dependency, the equivalent of `TaskView.query(expr,
    /// dependency=True)` (§4.2).
    pub fn add_dependency(&mut self, name: Option<String>, dependency: Dependency) {
        self.dependencies.add(name, dependency);
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    pub async fn run_subtask(&mut self, spec: ConfigurationSpec, target: InstanceKey) -> Result<ConfiguratorResult> {
        self.driver.run_subtask(TaskRequest::new(spec, target)).await
    }

    pub async fn run_subjob(&mut self, instances: Vec<InstanceKey>) -> Result<JobOutcome> {
        self.driver.run_subjob(JobRequest::new(instances)).await
    }
}

/// Whether a configurator is willing to run at all, the equivalent of
/// `Configurator.canRun` returning `bool | str` (an error message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanRun {
    Yes,
    No(String),
}

impl CanRun {
    pub fn is_yes(&self) -> bool {
        matches!(self, CanRun::Yes)
    }
}

/// One concrete operation implementation, looked up by
/// `ConfigurationSpec::class_name` (§6).
#[async_trait]
pub trait Configurator: Send + Sync {
    async fn run(&self, task: &mut TaskHandle<'_>) -> Result<ConfiguratorResult>;

    fn can_dry_run(&self, _task: &TaskHandle<'_>) -> bool {
        false
    }

    fn can_run(&self, _task: &TaskHandle<'_>) -> CanRun {
        CanRun::Yes
    }

    /// How urgently this operation should run relative to others
    /// targeting the same instance (§4.5 step 2 ordering ties).
    fn should_run(&self, _task: &TaskHandle<'_>) -> Priority {
        Priority::Required
    }
}

type ConfiguratorFactory = Arc<dyn Fn() -> Arc<dyn Configurator> + Send + Sync>;

/// Maps `class_name` strings to configurator instances, the equivalent
/// of `unfurl.configurator.Configurator.lookupClass` /
/// `AutoRegisterClass` (§6 Design Note).
#[derive(Clone, Default)]
pub struct ConfiguratorRegistry {
    factories: BTreeMap<String, ConfiguratorFactory>,
}

impl ConfiguratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, factory: ConfiguratorFactory) {
        self.factories.insert(class_name.into(), factory);
    }

    pub fn lookup(&self, class_name: &str) -> Result<Arc<dyn Configurator>> {
        self.factories
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownConfigurator(class_name.to_string()))
    }
}
