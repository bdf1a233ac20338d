//! Bridge configuration
//!
//! Engine settings, guest ABI names and loader options. Configuration can be
//! built in code or read from a TOML, YAML or JSON file.

use config::{Config as Cfg, File, FileFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use wasmtime::Config;

use super::types::{BridgeError, BridgeResult};

/// Environment variable overriding [`BridgeConfig::artifact`]
pub const ARTIFACT_ENV: &str = "BRIDGE_ARTIFACT";

/// Default artifact location, relative to the working directory
pub const DEFAULT_ARTIFACT: &str = "app/lib.wasm";

const WASM_PAGE_SIZE: u64 = 65536;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Default artifact location (URL or path)
    pub artifact: String,
    /// Engine configuration
    pub engine: EngineConfig,
    /// Guest export names
    pub abi: GuestAbi,
    /// Loader configuration
    pub loader: LoaderConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            artifact: DEFAULT_ARTIFACT.to_string(),
            engine: EngineConfig::default(),
            abi: GuestAbi::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, artifact: &str) -> Self {
        self.artifact = artifact.to_string();
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_abi(mut self, abi: GuestAbi) -> Self {
        self.abi = abi;
        self
    }

    pub fn with_fuel_limit(mut self, fuel: u64) -> Self {
        self.engine.fuel_limit = Some(fuel);
        self
    }

    /// Load configuration from a file, detecting the format from its extension
    ///
    /// `${VAR}` references in the file are replaced with environment values
    /// before parsing. Missing keys fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::from_str_with_format(&content, format)
    }

    /// Parse configuration from a string in the given format
    pub fn from_str_with_format(content: &str, format: FileFormat) -> BridgeResult<Self> {
        let substituted = substitute_env_vars(content)?;

        Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to parse configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| BridgeError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Apply environment overrides (currently `BRIDGE_ARTIFACT`)
    pub fn apply_env(mut self) -> Self {
        match std::env::var(ARTIFACT_ENV) {
            Ok(artifact) if !artifact.trim().is_empty() => {
                self.artifact = artifact;
            }
            _ => {}
        }
        self
    }
}

/// Optimization level for compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    None,
    Speed,
    SpeedAndSize,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cranelift optimization level
    pub optimization_level: OptimizationLevel,
    /// Fuel budget per instance; `None` disables metering
    pub fuel_limit: Option<u64>,
    /// Emit DWARF debug info for guest code
    pub debug_info: bool,
    /// Maximum linear memory per instance, in 64KiB pages
    pub max_memory_pages: u32,
    /// Compile functions in parallel
    pub parallel_compilation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::Speed,
            fuel_limit: None,
            debug_info: false,
            max_memory_pages: 16384, // 1GiB
            parallel_compilation: true,
        }
    }
}

impl EngineConfig {
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_pages as u64 * WASM_PAGE_SIZE
    }

    /// Convert to wasmtime Config
    ///
    /// Async support is always on: every guest call is an await point.
    pub(crate) fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();

        config.async_support(true);
        config.consume_fuel(self.fuel_limit.is_some());
        config.debug_info(self.debug_info);

        match self.optimization_level {
            OptimizationLevel::None => {
                config.cranelift_opt_level(wasmtime::OptLevel::None);
            }
            OptimizationLevel::Speed => {
                config.cranelift_opt_level(wasmtime::OptLevel::Speed);
            }
            OptimizationLevel::SpeedAndSize => {
                config.cranelift_opt_level(wasmtime::OptLevel::SpeedAndSize);
            }
        }

        config.parallel_compilation(self.parallel_compilation);

        config
    }
}

/// Names of the guest exports the bridge binds to
///
/// These are part of the module's contract and must match its exports exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestAbi {
    /// Linear memory export
    pub memory: String,
    /// Allocator: `(len: i32) -> i32`
    pub alloc: String,
    /// Run loop start: `() -> ()`
    pub run: String,
    /// Liveness probe: `() -> i64` packed text
    pub probe: String,
    /// Generation: `(ptr, len, seed_ptr, seed_len: i32) -> i64` packed text
    pub generate: String,
}

impl Default for GuestAbi {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            alloc: "alloc".to_string(),
            run: "_start".to_string(),
            probe: "probe".to_string(),
            generate: "generate".to_string(),
        }
    }
}

/// Artifact loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// HTTP connect timeout in seconds; no overall request timeout is applied
    pub connect_timeout_secs: u64,
    /// User agent sent with HTTP requests
    pub user_agent: String,
    /// Largest artifact accepted, in bytes
    pub max_artifact_bytes: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            user_agent: concat!("wasm-bridge/", env!("CARGO_PKG_VERSION")).to_string(),
            max_artifact_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Detect configuration format from file extension
pub fn detect_format(path: &Path) -> BridgeResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| BridgeError::Config(format!("No file extension: {}", path.display())))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(BridgeError::Config(format!("Unsupported format: {}", ext))),
    }
}

/// Substitute `${VAR_NAME}` references with environment values
///
/// Unset variables are left as written.
pub fn substitute_env_vars(content: &str) -> BridgeResult<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| BridgeError::Internal(e.to_string()))?;

    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned())
}
