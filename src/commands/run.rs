//! The `run` and `demo` subcommand handlers.

use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::RunArgs;
use crate::demo::InMemoryManifestLoader;
use crate::error::Result;
use crate::eval::NullEvaluator;
use crate::job::JobOptions;
use crate::manifest::ManifestLoader;
use crate::runner::{AlwaysClean, Runner};

/// Run the bundled in-memory demo manifest. There is no real manifest
/// loader in this crate (§6), so this is the only path the CLI can
/// actually exercise end to end.
pub async fn demo(args: RunArgs) -> Result<()> {
    run_with_loader(args, Arc::new(InMemoryManifestLoader)).await
}

/// Run against a real manifest. Since no concrete [`ManifestLoader`]
/// ships with this crate, this always fails with a clear message
/// rather than silently falling back to the demo graph.
pub async fn run(args: RunArgs) -> Result<()> {
    if args.manifest.is_none() {
        anyhow::bail!("no manifest loader is configured; pass a manifest path to a deployment-specific build, or use `forgec demo`");
    }
    run_with_loader(args, Arc::new(InMemoryManifestLoader)).await
}

async fn run_with_loader(args: RunArgs, loader: Arc<dyn ManifestLoader>) -> Result<()> {
    let config_path = args.config_path.clone();
    let options: JobOptions = args.into();
    let plan_only = options.plan_only;

    let progress = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}").context("invalid progress style")?;
    progress.set_style(style);
    progress.set_message("planning");
    progress.enable_steady_tick(std::time::Duration::from_millis(100));

    let mut runner = Runner::new(loader, Arc::new(AlwaysClean), Arc::new(NullEvaluator));
    if let Some(path) = config_path {
        let config = crate::config::RunnerConfig::load_from_path(&path).context("failed to load runner config")?;
        runner = runner.with_config(config);
    }
    let outcome = runner.run(options).await;
    progress.finish_and_clear();

    let outcome = outcome?;
    if plan_only {
        println!("{}", "plan only — no changes were made".yellow());
    }
    println!("{}", outcome.summary());
    for (key, value) in outcome.stats() {
        println!("{key}: {value}");
    }

    if !outcome.success() {
        anyhow::bail!("{} task(s) failed", outcome.tasks_failed);
    }
    Ok(())
}
