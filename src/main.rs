use clap::Parser;
use tracing_subscriber::EnvFilter;

use forgec::cli::{Cli, Command};
use forgec::commands;
use forgec::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "forgec=info",
        1 => "forgec=debug",
        _ => "forgec=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Command::Run(args) => commands::run::run(args).await,
        Command::Demo(args) => commands::run::demo(args).await,
    }
}
