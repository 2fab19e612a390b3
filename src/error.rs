//! Structured error types for the orchestration engine.

use thiserror::Error;

use crate::instance::InstanceKey;

/// Errors raised by the core job planning and execution engine.
///
/// Concrete configurators and manifest loaders report their own failures
/// through [`anyhow::Error`]; this enum only covers failures the engine
/// itself is responsible for (§7 of the design: TaskError, UnfurlError /
/// ValidationError, unexpected abort).
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("duplicate instance key: {0}")]
    DuplicateInstance(InstanceKey),

    #[error("task error on {target}: {reason}")]
    Task { target: InstanceKey, reason: String },

    #[error("error adding resource: {0}")]
    AddingResource(String),

    #[error("too many nested subtasks (limit is {limit})")]
    TooManySubtasks { limit: usize },

    #[error("repository is dirty; re-run with --dirty to override")]
    DirtyRepository,

    #[error("configurator {0} is not registered")]
    UnknownConfigurator(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
