//! Command-line surface (§7 ambient stack: CLI). Flags mirror
//! [`crate::job::JobOptions`] field-for-field; `commands::run` is the
//! only subcommand this crate ships since the manifest format and its
//! loader are an external seam (§6) — a real deployment adds its own
//! subcommands for manifest inspection, status, etc.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use indoc::indoc;

use crate::job::JobOptions;
use crate::status::RepairThreshold;

#[derive(Debug, Parser)]
#[command(
    name = "forgec",
    about = "Declarative infrastructure orchestrator",
    long_about = indoc! {"
        Declarative infrastructure orchestrator.

        Plans a set of operations (create, configure, start, check) over an
        instance graph loaded from a manifest, then drives them to
        completion one at a time against configurators registered for each
        instance's type. Re-running a job only repeats work whose inputs,
        dependencies, or status call for it, unless told to run everything.
    "},
    version
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan and run a job against a manifest.
    Run(RunArgs),
    /// Run the bundled in-memory demo manifest end to end.
    Demo(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Path to the manifest to load. Ignored by `demo`.
    pub manifest: Option<PathBuf>,

    /// Path to a `RunnerConfig` TOML file (workflow default, repair
    /// threshold, nested-subtask limit override).
    #[arg(long = "config")]
    pub config_path: Option<PathBuf>,

    /// Create instances that don't exist yet. On by default; pass
    /// `--no-add` to skip creating new instances.
    #[arg(long = "no-add", action = clap::ArgAction::SetFalse, default_value_t = true)]
    pub add: bool,

    /// Re-run configurations whose inputs or dependencies changed. On
    /// by default; pass `--no-update` to skip them.
    #[arg(long = "no-update", action = clap::ArgAction::SetFalse, default_value_t = true)]
    pub update: bool,

    /// Re-run configurations even if their major version increased.
    #[arg(long)]
    pub upgrade: bool,

    /// Schedule repair tasks for instances at or below this status.
    #[arg(long, value_enum, default_value = "error")]
    pub repair: RepairArg,

    /// Run every applicable operation regardless of add/update/upgrade.
    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub verify: bool,

    /// Only run read-only operations (check/discover).
    #[arg(long)]
    pub readonly: bool,

    #[arg(long = "required-only")]
    pub required_only: bool,

    #[arg(long)]
    pub dryrun: bool,

    #[arg(long = "plan-only")]
    pub plan_only: bool,

    /// Restrict the run to one instance, by name.
    #[arg(long)]
    pub instance: Option<String>,

    /// Proceed even if the manifest's backing store has uncommitted
    /// changes.
    #[arg(long)]
    pub dirty: bool,

    #[arg(long)]
    pub commit: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum RepairArg {
    None,
    Missing,
    Degraded,
    Error,
}

impl From<RepairArg> for RepairThreshold {
    fn from(arg: RepairArg) -> Self {
        match arg {
            RepairArg::None => RepairThreshold::None,
            RepairArg::Missing => RepairThreshold::Missing,
            RepairArg::Degraded => RepairThreshold::Degraded,
            RepairArg::Error => RepairThreshold::Error,
        }
    }
}

impl From<RunArgs> for JobOptions {
    fn from(args: RunArgs) -> Self {
        let mut options = JobOptions::builder()
            .add(args.add)
            .update(args.update)
            .upgrade(args.upgrade)
            .repair(args.repair.into())
            .all(args.all)
            .verify(args.verify)
            .readonly(args.readonly)
            .required_only(args.required_only)
            .dryrun(args.dryrun)
            .plan_only(args.plan_only)
            .dirty(args.dirty)
            .commit(args.commit)
            .build();
        options.instance = args.instance;
        options
    }
}
