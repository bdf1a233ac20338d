//! `wasm-bridge inspect` command implementation
//!
//! Compiles the artifact without instantiating it.

use colored::Colorize;
use wasm_bridge::{BridgeConfig, BridgeController, ModuleInfo, ModuleSymbol};

/// Execute the `wasm-bridge inspect` command
pub async fn run(config: BridgeConfig, artifact: Option<&str>, json: bool) -> anyhow::Result<()> {
    let location = artifact.unwrap_or(&config.artifact).to_string();
    let mut controller = BridgeController::new(config)?;
    let info = controller.load(&location).await?.info();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }
    Ok(())
}

fn print_info(info: &ModuleInfo) {
    println!();
    println!("  {}", "Module".bold());
    println!("    Location: {}", info.location.cyan());
    println!("    Size:     {} bytes", info.size_bytes.to_string().yellow());
    println!("    SHA-256:  {}", info.digest);
    println!("    Compiled: {}ms", info.compile_time_ms.to_string().yellow());
    println!();
    print_symbols("Imports", &info.imports);
    print_symbols("Exports", &info.exports);
}

fn print_symbols(title: &str, symbols: &[ModuleSymbol]) {
    println!("  {} ({})", title.bold(), symbols.len());
    for symbol in symbols {
        println!("    {}", symbol);
    }
    println!();
}
