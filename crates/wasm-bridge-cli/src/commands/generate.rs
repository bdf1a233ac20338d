//! `wasm-bridge generate` command implementation

use anyhow::Context;
use colored::Colorize;
use std::path::Path;
use tracing::debug;
use wasm_bridge::{BridgeConfig, TextCodec};

/// Execute the `wasm-bridge generate` command
pub async fn run(
    config: BridgeConfig,
    artifact: Option<&str>,
    input: &str,
    seed: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let controller = super::start(config, artifact).await?;

    let text = controller.generate(&TextCodec::encode(input), seed).await?;
    debug!("Generated {} bytes", text.len());

    match output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} {}",
                "✓".green(),
                format!("Wrote {} bytes to {}", text.len(), path.display()).bold()
            );
        }
        None => println!("{}", text),
    }
    Ok(())
}
