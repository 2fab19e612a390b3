//! Config task (§4.1/§4.6, component C8).
//!
//! A [`Task`] is one run of a [`ConfigurationSpec`] against a target
//! instance: it owns the dependency tracker and resource-change log for
//! that run and drives the configurator through [`Task::run`].

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::attribute_manager::AttributeManager;
use crate::change::ResourceChanges;
use crate::changeid::{ChangeId, SharedChangeIds};
use crate::configurator::{CanRun, Configurator, SubtaskDriver, TaskHandle, TaskRequest};
use crate::dependency::DependencyTracker;
use crate::error::Result;
use crate::eval::Evaluator;
use crate::instance::InstanceKey;
use crate::spec::ConfigurationSpec;
use crate::status::{Priority, Status};

/// Reserved attribute key a task's input snapshot is stored under, so
/// the next run against the same spec name can detect whether its
/// inputs changed (§9 Open Question: "hasInputsChanged" / when
/// `_lastConfigChange`'s snapshot is taken — resolved in SPEC_FULL.md to
/// "at the moment a task finishes").
fn inputs_snapshot_key(spec_name: &str) -> String {
    format!("_lastInputs:{spec_name}")
}

/// Outcome of driving one task to completion.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub target: InstanceKey,
    pub spec_name: String,
    pub success: bool,
    pub status: Status,
    pub changes: ResourceChanges,
    pub priority: Priority,
    /// Stamped at finalization, strictly greater than the job's own id
    /// and any nested work this task waited on (§8 "∀ tasks t:
    /// t.changeId > t.job.changeId").
    pub change_id: ChangeId,
    /// Set when the task finalized because its configurator returned an
    /// error (§7 `TaskError`): attached to the task, not propagated.
    pub error: Option<String>,
}

/// One operation run against one target instance.
pub struct Task {
    id: Uuid,
    spec: ConfigurationSpec,
    target: InstanceKey,
    dependencies: DependencyTracker,
    changes: ResourceChanges,
    change_id: Option<ChangeId>,
}

impl Task {
    pub fn new(spec: ConfigurationSpec, target: InstanceKey) -> Self {
        Task { id: Uuid::new_v4(), spec, target, dependencies: DependencyTracker::new(), changes: ResourceChanges::new(), change_id: None }
    }

    /// Build a task from a planned or configurator-issued request,
    /// keeping its correlation id for tracing.
    pub fn from_request(request: TaskRequest) -> Self {
        Task {
            id: request.id,
            spec: request.spec,
            target: request.target,
            dependencies: DependencyTracker::new(),
            changes: ResourceChanges::new(),
            change_id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &ConfigurationSpec {
        &self.spec
    }

    pub fn target(&self) -> &InstanceKey {
        &self.target
    }

    /// True when this spec's `inputs` differ from the snapshot stored
    /// the last time a task for this spec name completed on this
    /// target (§4.6 `ConfigTask.hasInputsChanged`).
    pub async fn has_inputs_changed(&self, attrs: &AttributeManager) -> bool {
        let key = inputs_snapshot_key(&self.spec.name);
        match attrs.get(&self.target, &key).await {
            None => !self.spec.inputs.is_empty(),
            Some(stored) => stored.serialize() != self.inputs_snapshot(),
        }
    }

    fn inputs_snapshot(&self) -> serde_json::Value {
        serde_json::Value::Object(self.spec.inputs.iter().map(|(k, v)| (k.clone(), v.serialize())).collect())
    }

    /// True if any registered dependency changed since it was last
    /// refreshed (§4.6 `ConfigTask.hasDependenciesChanged`).
    pub fn has_dependencies_changed(&self, change_id: ChangeId, evaluator: &dyn Evaluator) -> Result<bool> {
        Ok(self.dependencies.any_changed(&self.target, change_id, evaluator)?)
    }

    pub fn refresh_dependencies(&mut self, change_id: ChangeId, evaluator: &dyn Evaluator) -> Result<()> {
        Ok(self.dependencies.refresh_all(&self.target, change_id, evaluator)?)
    }

    /// Drive `configurator` to completion, then stage this run's input
    /// snapshot and fold the attribute manager's staged writes into this
    /// task's change log (§4.1 `ConfigTask.commitChanges`). Staged
    /// writes are committed whether the configurator succeeds or
    /// errors, so a partial run before a failure is never silently
    /// discarded (§4.1: "a task commits its staging between every
    /// cooperative step so that ... partial attribute writes are
    /// preserved as discrete change snapshots"). A configurator error is
    /// attached to the task rather than propagated (§7 `TaskError`): the
    /// task still finalizes, with `success=false`.
    #[instrument(level = "debug", skip_all, fields(task_id = %self.id, target = %self.target, spec = %self.spec.name))]
    pub async fn run(
        &mut self,
        configurator: Arc<dyn Configurator>,
        attrs: &mut AttributeManager,
        evaluator: Arc<dyn Evaluator>,
        driver: &mut dyn SubtaskDriver,
        dryrun: bool,
        change_ids: &SharedChangeIds,
    ) -> Result<TaskOutcome> {
        let (priority, can_dry_run, can_run) = {
            let mut handle = TaskHandle::new(
                self.target.clone(),
                self.spec.clone(),
                attrs,
                &mut self.dependencies,
                evaluator.clone(),
                driver,
            );
            (configurator.should_run(&handle), configurator.can_dry_run(&handle), configurator.can_run(&handle))
        };

        if let CanRun::No(reason) = can_run {
            debug!(reason = %reason, "task skipped: configurator cannot run");
            let change_id = self.finalize_change_id(change_ids).await;
            return Ok(TaskOutcome {
                target: self.target.clone(),
                spec_name: self.spec.name.clone(),
                success: false,
                status: Status::Error,
                changes: ResourceChanges::new(),
                priority,
                change_id,
                error: Some(reason),
            });
        }

        if dryrun && !can_dry_run {
            debug!("task skipped: dryrun requested but configurator cannot dry-run");
            let change_id = self.finalize_change_id(change_ids).await;
            return Ok(TaskOutcome {
                target: self.target.clone(),
                spec_name: self.spec.name.clone(),
                success: true,
                status: Status::Pending,
                changes: ResourceChanges::new(),
                priority,
                change_id,
                error: None,
            });
        }

        if priority == Priority::Ignore {
            debug!("task skipped: priority is Ignore");
            let change_id = self.finalize_change_id(change_ids).await;
            return Ok(TaskOutcome {
                target: self.target.clone(),
                spec_name: self.spec.name.clone(),
                success: true,
                status: Status::Ok,
                changes: ResourceChanges::new(),
                priority,
                change_id,
                error: None,
            });
        }

        let result = {
            let mut handle = TaskHandle::new(
                self.target.clone(),
                self.spec.clone(),
                attrs,
                &mut self.dependencies,
                evaluator,
                driver,
            );
            configurator.run(&mut handle).await
        };

        // Commit whatever was staged regardless of outcome, then stamp
        // this task's own change-id last so it is always higher than
        // anything nested work stamped while this task ran.
        self.commit_changes(attrs).await;
        let change_id = self.finalize_change_id(change_ids).await;

        match result {
            Ok(result) => {
                let status = result.status.unwrap_or(if result.success { Status::Ok } else { Status::Error });
                Ok(TaskOutcome {
                    target: self.target.clone(),
                    spec_name: self.spec.name.clone(),
                    success: result.success,
                    status,
                    changes: self.changes.clone(),
                    priority: result.priority.unwrap_or(priority),
                    change_id,
                    error: None,
                })
            }
            Err(err) => Ok(TaskOutcome {
                target: self.target.clone(),
                spec_name: self.spec.name.clone(),
                success: false,
                status: Status::Error,
                changes: self.changes.clone(),
                priority,
                change_id,
                error: Some(err.to_string()),
            }),
        }
    }

    /// Fold the attribute manager's staged writes into this task's
    /// change log and persist the input snapshot for the next run's
    /// `hasInputsChanged` check (§4.1).
    async fn commit_changes(&mut self, attrs: &mut AttributeManager) {
        let staged = attrs.commit_changes();
        self.changes.merge_attributes(staged);

        let key = inputs_snapshot_key(&self.spec.name);
        let snapshot = self.inputs_snapshot();
        attrs.set(&self.target, &key, crate::value::Value::from_json(snapshot)).await;
        // The snapshot write above is itself staged; fold it in too so
        // callers see one coherent changeset per `run`.
        let staged = attrs.commit_changes();
        self.changes.merge_attributes(staged);
    }

    /// Stamp this task's change-id from the shared, job-wide sequence,
    /// at the moment it finalizes (§4.6 `finished(result)`).
    async fn finalize_change_id(&mut self, change_ids: &SharedChangeIds) -> ChangeId {
        let mut service = change_ids.lock().await;
        let id = service.increment();
        self.change_id = Some(id);
        id
    }
}
