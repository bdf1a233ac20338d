//! `wasm-bridge probe` command implementation

use wasm_bridge::BridgeConfig;

/// Execute the `wasm-bridge probe` command
pub async fn run(config: BridgeConfig, artifact: Option<&str>) -> anyhow::Result<()> {
    let controller = super::start(config, artifact).await?;
    println!("{}", controller.probe().await?);
    Ok(())
}
