//! Command implementations

pub mod generate;
pub mod inspect;
pub mod probe;

use anyhow::Context;
use std::path::Path;
use wasm_bridge::{BridgeConfig, BridgeController};

/// Load the bridge configuration, then apply environment overrides
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    let config = match path {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    Ok(config.apply_env())
}

/// Create a controller and bring up an instance of `artifact`
///
/// Falls back to the configured artifact when none is given.
pub async fn start(config: BridgeConfig, artifact: Option<&str>) -> anyhow::Result<BridgeController> {
    let location = artifact.unwrap_or(&config.artifact).to_string();
    let mut controller = BridgeController::new(config)?;
    controller
        .start(&location)
        .await
        .with_context(|| format!("failed to start {}", location))?;
    Ok(controller)
}
