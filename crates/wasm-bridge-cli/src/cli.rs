//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// wasm-bridge - Load, activate and call WebAssembly artifacts
#[derive(Parser)]
#[command(name = "wasm-bridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (yaml, toml or json)
    #[arg(short = 'c', long, global = true, env = "WASM_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Activate the artifact and print its probe value
    Probe {
        /// Artifact URL or path (defaults to the configured artifact)
        #[arg(short, long)]
        artifact: Option<String>,
    },

    /// Activate the artifact and run the generation operation
    Generate {
        /// Artifact URL or path (defaults to the configured artifact)
        #[arg(short, long)]
        artifact: Option<String>,

        /// Input text passed to the guest
        #[arg(short, long, default_value = "")]
        input: String,

        /// Seed passed to the guest
        #[arg(short, long, default_value = "hel")]
        seed: String,

        /// Write the result to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile the artifact and list its imports and exports
    Inspect {
        /// Artifact URL or path (defaults to the configured artifact)
        #[arg(short, long)]
        artifact: Option<String>,

        /// Print module information as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_defaults() {
        let cli = Cli::parse_from(["wasm-bridge", "generate", "-a", "lib.wasm"]);
        match cli.command {
            Commands::Generate {
                artifact,
                input,
                seed,
                output,
            } => {
                assert_eq!(artifact.as_deref(), Some("lib.wasm"));
                assert_eq!(input, "");
                assert_eq!(seed, "hel");
                assert!(output.is_none());
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["wasm-bridge", "inspect", "--json", "-v", "-c", "bridge.yml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("bridge.yml")));
        assert!(matches!(cli.command, Commands::Inspect { json: true, .. }));
    }
}
