//! Change-id service (§4.6 / component C11).
//!
//! Change-ids are a single, process-wide monotonic counter owned by a
//! [`crate::runner::Runner`]. They stamp every [`crate::task::Task`] and
//! [`crate::job::Job`], giving the whole system one linear timeline that
//! dependency comparisons and persisted change records key off of.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// A monotonic stamp uniquely identifying a change (§3 `ChangeRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(u64);

impl ChangeId {
    pub const ZERO: ChangeId = ChangeId(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues strictly increasing [`ChangeId`]s. Owned exclusively by one
/// [`crate::runner::Runner`] run; never shared or cloned across
/// separate runners. Within one run it is shared (via [`SharedChangeIds`])
/// between the job and every task and nested sub-task/sub-job it spawns,
/// so every stamp issued during that run is strictly ordered — a task
/// that recurses into sub-work always finalizes with a higher id than
/// anything it waited on (§4.6 `finished(result)`).
#[derive(Debug)]
pub struct ChangeIdService {
    last: ChangeId,
}

impl ChangeIdService {
    /// Start the counter from a manifest's last recorded change-id, so
    /// ids stay unique across runs of the same deployment.
    pub fn starting_from(last: u64) -> Self {
        ChangeIdService { last: ChangeId(last) }
    }

    pub fn current(&self) -> ChangeId {
        self.last
    }

    /// Returns the next id, after bumping the internal counter. Mirrors
    /// `Runner.incrementChangeId`.
    pub fn increment(&mut self) -> ChangeId {
        self.last = ChangeId(self.last.0 + 1);
        self.last
    }
}

/// Shared handle to one run's change-id counter, so a job's tasks (and
/// their nested sub-tasks/sub-jobs) can each stamp their own id off the
/// same sequence the job's own id came from.
pub type SharedChangeIds = Arc<Mutex<ChangeIdService>>;

pub fn shared_change_ids(service: ChangeIdService) -> SharedChangeIds {
    Arc::new(Mutex::new(service))
}
