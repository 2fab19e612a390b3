//! Status & Priority model (§3 of the design, component C1).
//!
//! `Status` is the operational state of an instance or task result;
//! `Priority` ranks how much a configuration matters when deciding
//! whether to run it at all.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Operational status of an instance, task, or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unknown,
    Ok,
    Degraded,
    Error,
    Pending,
    NotApplied,
    NotPresent,
    Absent,
}

impl Status {
    /// Relative severity used to merge a local status with the statuses
    /// of required dependencies, and to compare against a repair
    /// threshold. Higher is worse.
    fn severity(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::NotApplied => 0,
            Status::Pending => 1,
            Status::Unknown => 2,
            Status::Degraded => 3,
            Status::NotPresent => 4,
            Status::Error => 5,
            Status::Absent => 6,
        }
    }

    /// Combine a local status with the statuses of required operational
    /// dependencies, yielding the status an observer of the whole
    /// instance would report (§3 `Instance.status` invariant: "status is
    /// a deterministic function of localStatus and required-dependency
    /// statuses").
    pub fn merge<'a, I: IntoIterator<Item = &'a Status>>(local: Status, dependencies: I) -> Status {
        dependencies
            .into_iter()
            .copied()
            .fold(local, |acc, dep| if dep.severity() > acc.severity() { dep } else { acc })
    }

    pub fn is_operational(self) -> bool {
        matches!(self, Status::Ok | Status::Degraded | Status::Pending)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Unknown => "unknown",
            Status::Ok => "ok",
            Status::Degraded => "degraded",
            Status::Error => "error",
            Status::Pending => "pending",
            Status::NotApplied => "notapplied",
            Status::NotPresent => "notpresent",
            Status::Absent => "absent",
        };
        write!(f, "{s}")
    }
}

/// The lowest level of brokenness that `JobOptions.repair` schedules a
/// repair task for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairThreshold {
    None,
    Missing,
    Degraded,
    Error,
}

impl RepairThreshold {
    /// The minimum [`Status::severity`] this threshold reacts to.
    fn floor(self) -> Option<u8> {
        match self {
            RepairThreshold::None => None,
            RepairThreshold::Missing => Some(Status::NotPresent.severity()),
            RepairThreshold::Degraded => Some(Status::Degraded.severity()),
            RepairThreshold::Error => Some(Status::Error.severity()),
        }
    }

    /// Whether an instance in `status` is broken enough to warrant a
    /// repair task under this threshold (§4.5 step 2c).
    pub fn triggers(self, status: Status) -> bool {
        match self.floor() {
            None => false,
            Some(floor) => status.severity() >= floor,
        }
    }
}

impl Default for RepairThreshold {
    fn default() -> Self {
        RepairThreshold::Error
    }
}

/// Priority rank for a configuration: whether it matters enough to run,
/// and how severely its failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Ignore,
    Optional,
    Required,
    Critical,
}

impl Priority {
    pub fn from_bool(required: bool) -> Self {
        if required {
            Priority::Required
        } else {
            Priority::Ignore
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Required
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Ignore => "ignore",
            Priority::Optional => "optional",
            Priority::Required => "required",
            Priority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.severity().cmp(&other.severity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_picks_worst_dependency() {
        let merged = Status::merge(Status::Ok, &[Status::Degraded, Status::Pending]);
        assert_eq!(merged, Status::Degraded);
    }

    #[test]
    fn merge_keeps_local_when_worse() {
        let merged = Status::merge(Status::Error, &[Status::Ok, Status::Degraded]);
        assert_eq!(merged, Status::Error);
    }

    #[test]
    fn repair_threshold_error_ignores_degraded() {
        assert!(!RepairThreshold::Error.triggers(Status::Degraded));
        assert!(RepairThreshold::Error.triggers(Status::Error));
    }

    #[test]
    fn repair_threshold_none_never_triggers() {
        assert!(!RepairThreshold::None.triggers(Status::Absent));
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Ignore < Priority::Optional);
        assert!(Priority::Optional < Priority::Required);
        assert!(Priority::Required < Priority::Critical);
    }
}
