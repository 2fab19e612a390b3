//! Runner configuration (ambient config surface): a small TOML file the
//! CLI reads for defaults that apply across runs of one deployment —
//! which workflow to plan with when the CLI doesn't say, the repair
//! threshold, and an override for the nested-subtask recursion guard.
//! `JobOptions` (§3) remains the stable per-run surface; this only
//! supplies its defaults, the same way the teacher's own `config`-crate
//! usage layers a file of defaults under explicit CLI flags.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::job::{JobOptions, MAX_NESTED_SUBTASKS};
use crate::status::RepairThreshold;

/// Defaults loaded from a `forgec.toml` (or similar) config file.
/// Every field is optional: an absent field means "use the built-in
/// default", not "zero it out".
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RunnerConfig {
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub repair: Option<RepairThreshold>,
    #[serde(default)]
    pub max_nested_subtasks: Option<usize>,
}

impl RunnerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|err| Error::Other(err.into()))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| Error::Other(err.into()))?;
        Self::from_toml_str(&text)
    }

    pub fn max_nested_subtasks(&self) -> usize {
        self.max_nested_subtasks.unwrap_or(MAX_NESTED_SUBTASKS)
    }

    /// Apply this config's defaults onto `options`, without overriding
    /// anything the caller already set explicitly via `overrides`
    /// (fields named in `overrides` came from an explicit CLI flag and
    /// win regardless of what the config file says).
    pub fn apply_defaults(&self, mut options: JobOptions, overrides: &[&str]) -> JobOptions {
        if !overrides.contains(&"workflow") {
            if let Some(workflow) = &self.workflow {
                options.workflow = crate::spec::Workflow(workflow.clone());
            }
        }
        if !overrides.contains(&"repair") {
            if let Some(repair) = self.repair {
                options.repair = repair;
            }
        }
        options
    }
}
