//! wasm-bridge CLI - Load and call sandboxed WebAssembly artifacts

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Probe { artifact } => {
            commands::probe::run(config, artifact.as_deref()).await?;
        }

        Commands::Generate {
            artifact,
            input,
            seed,
            output,
        } => {
            commands::generate::run(config, artifact.as_deref(), &input, &seed, output.as_deref())
                .await?;
        }

        Commands::Inspect { artifact, json } => {
            commands::inspect::run(config, artifact.as_deref(), json).await?;
        }
    }

    Ok(())
}
