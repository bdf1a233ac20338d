//! WASM Bridge
//!
//! Host-side bridge that loads a sandboxed WebAssembly artifact and exposes
//! its exported operations as ordinary async Rust calls:
//! - Artifact fetch over HTTP(S) or from the local filesystem
//! - Compilation once per load, any number of instances per module
//! - Explicit capability table for every guest import
//! - Run loop activation before any exported call
//! - UTF-8 text exchange through guest linear memory
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      BridgeController                        │
//! │  ┌──────────────┐   ┌────────────────┐   ┌───────────────┐   │
//! │  │ ModuleLoader │──►│ CompiledModule │──►│InstanceManager│   │
//! │  │ fetch+compile│   │  (shared Arc)  │   │ + Capability  │   │
//! │  └──────────────┘   └────────────────┘   │     Table     │   │
//! │                                          └───────┬───────┘   │
//! │                                                  ▼           │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                 ExecutionInstance                      │  │
//! │  │  Created ──► Activating ──► Ready        (Failed)      │  │
//! │  │      ▲             ▲            │                      │  │
//! │  │      │      RuntimeBridge       ▼                      │  │
//! │  │      │       (run loop)   ExportedOperationProxy       │  │
//! │  │      │                    probe / generate             │  │
//! │  └──────┼─────────────────────────────────────────────────┘  │
//! │         └── reinstantiate / spawn_instance                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use wasm_bridge::{BridgeConfig, BridgeController, TextCodec};
//!
//! # async fn run() -> wasm_bridge::BridgeResult<()> {
//! let mut controller = BridgeController::new(BridgeConfig::default())?;
//! controller.start("https://example.com/app/lib.wasm").await?;
//!
//! let text = controller.generate(&TextCodec::encode("hello"), "hel").await?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

mod bridge;
mod capability;
mod codec;
pub mod config;
mod controller;
mod instance;
mod loader;
mod memory;
mod proxy;
mod types;

pub use bridge::RuntimeBridge;
pub use capability::{
    CapabilityProvider, CapabilityTable, DefaultCapabilities, HOST_MODULE, HostCallback,
    HostCapability, HostState, LogLevel, MAX_OUTPUT_LINE,
};
pub use codec::TextCodec;
pub use config::{
    ARTIFACT_ENV, BridgeConfig, DEFAULT_ARTIFACT, EngineConfig, GuestAbi, LoaderConfig,
    OptimizationLevel,
};
pub use controller::{BridgeController, BridgeStats};
pub use instance::{ExecutionInstance, InstanceManager};
pub use loader::{
    ArtifactLocation, CompiledModule, LoaderStats, ModuleInfo, ModuleLoader, ModuleSymbol,
    SymbolKind,
};
pub use memory::{GuestPtr, GuestSlice, guest_len, read_bytes, write_bytes};
pub use proxy::ExportedOperationProxy;
pub use types::{BridgeError, BridgeResult, InstanceState};
