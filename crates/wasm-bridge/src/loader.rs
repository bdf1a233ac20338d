//! Module loader
//!
//! Fetches a binary artifact and compiles it into a [`CompiledModule`]. Each
//! call to [`ModuleLoader::load`] issues exactly one fetch; instances are later
//! created from the shared compiled module without touching the network again.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;
use wasmtime::{Engine, ExternType, Module};

use super::config::LoaderConfig;
use super::types::{BridgeError, BridgeResult};

/// Where an artifact lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// `http://` or `https://` URL
    Remote(Url),
    /// Filesystem path (plain or `file://`)
    Local(PathBuf),
}

impl ArtifactLocation {
    /// Parse a location string
    ///
    /// Anything that is not an `http`, `https` or `file` URL is treated as a
    /// path relative to the working directory.
    pub fn parse(location: &str) -> BridgeResult<Self> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Self::Remote(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| BridgeError::fetch(location, "invalid file URL")),
            _ => Ok(Self::Local(PathBuf::from(location))),
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{}", url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Compiled module with metadata
///
/// Immutable once created; shared between instances through `Arc`.
pub struct CompiledModule {
    /// Artifact location the module was loaded from
    pub location: String,
    /// Compiled wasmtime module
    pub module: Module,
    /// Compilation time
    pub compile_time_ms: u64,
    /// Artifact size in bytes
    pub size_bytes: usize,
    /// SHA-256 of the artifact bytes, hex encoded
    pub digest: String,
    /// Compilation timestamp (unix seconds)
    pub compiled_at: u64,
}

impl CompiledModule {
    pub fn new(location: &str, module: Module, source_bytes: &[u8], compile_time_ms: u64) -> Self {
        Self {
            location: location.to_string(),
            module,
            compile_time_ms,
            size_bytes: source_bytes.len(),
            digest: hex::encode(Sha256::digest(source_bytes)),
            compiled_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Imports the module requires from its capability table
    pub fn imports(&self) -> Vec<ModuleSymbol> {
        self.module
            .imports()
            .map(|import| ModuleSymbol {
                module: Some(import.module().to_string()),
                name: import.name().to_string(),
                kind: extern_kind(&import.ty()),
            })
            .collect()
    }

    /// Exports the module offers
    pub fn exports(&self) -> Vec<ModuleSymbol> {
        self.module
            .exports()
            .map(|export| ModuleSymbol {
                module: None,
                name: export.name().to_string(),
                kind: extern_kind(&export.ty()),
            })
            .collect()
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.module.get_export(name).is_some()
    }

    /// Serializable summary
    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            location: self.location.clone(),
            size_bytes: self.size_bytes,
            digest: self.digest.clone(),
            compile_time_ms: self.compile_time_ms,
            compiled_at: self.compiled_at,
            imports: self.imports(),
            exports: self.exports(),
        }
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("location", &self.location)
            .field("size_bytes", &self.size_bytes)
            .field("digest", &self.digest)
            .field("compile_time_ms", &self.compile_time_ms)
            .finish_non_exhaustive()
    }
}

fn extern_kind(ty: &ExternType) -> SymbolKind {
    match ty {
        ExternType::Func(_) => SymbolKind::Function,
        ExternType::Memory(_) => SymbolKind::Memory,
        ExternType::Table(_) => SymbolKind::Table,
        ExternType::Global(_) => SymbolKind::Global,
        _ => SymbolKind::Other,
    }
}

/// Import or export kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Memory,
    Table,
    Global,
    Other,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "func"),
            SymbolKind::Memory => write!(f, "memory"),
            SymbolKind::Table => write!(f, "table"),
            SymbolKind::Global => write!(f, "global"),
            SymbolKind::Other => write!(f, "other"),
        }
    }
}

/// Module import or export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSymbol {
    /// Import module (`None` for exports)
    pub module: Option<String>,
    pub name: String,
    pub kind: SymbolKind,
}

impl fmt::Display for ModuleSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{}.{} ({})", module, self.name, self.kind),
            None => write!(f, "{} ({})", self.name, self.kind),
        }
    }
}

/// Compiled module summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub location: String,
    pub size_bytes: usize,
    pub digest: String,
    pub compile_time_ms: u64,
    pub compiled_at: u64,
    pub imports: Vec<ModuleSymbol>,
    pub exports: Vec<ModuleSymbol>,
}

/// Loader statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderStats {
    /// Fetches issued (successful or not)
    pub fetches: u64,
    /// Failed fetches
    pub failed_fetches: u64,
    /// Bytes received
    pub bytes_fetched: u64,
    /// Modules compiled successfully
    pub modules_compiled: u64,
    /// Total compilation time in milliseconds
    pub total_compile_time_ms: u64,
}

/// Fetches and compiles binary artifacts
pub struct ModuleLoader {
    engine: Engine,
    client: reqwest::Client,
    max_artifact_bytes: u64,
    stats: RwLock<LoaderStats>,
}

impl ModuleLoader {
    /// Create a loader compiling for `engine`
    pub fn new(engine: &Engine, config: &LoaderConfig) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BridgeError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            engine: engine.clone(),
            client,
            max_artifact_bytes: config.max_artifact_bytes,
            stats: RwLock::new(LoaderStats::default()),
        })
    }

    /// Get the wasmtime engine modules are compiled for
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Fetch the artifact at `location` and compile it
    pub async fn load(&self, location: &str) -> BridgeResult<Arc<CompiledModule>> {
        let parsed = ArtifactLocation::parse(location)?;
        info!("Loading module from {}", parsed);

        let bytes = match self.fetch(&parsed).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.write().await.failed_fetches += 1;
                warn!("Fetch failed: {}", e);
                return Err(e);
            }
        };

        self.compile(location, bytes).await
    }

    /// Compile artifact bytes that were obtained elsewhere
    pub async fn compile(&self, location: &str, bytes: Vec<u8>) -> BridgeResult<Arc<CompiledModule>> {
        let engine = self.engine.clone();
        let start = Instant::now();

        let (module, bytes) = tokio::task::spawn_blocking(move || {
            let module = Module::new(&engine, &bytes);
            (module, bytes)
        })
        .await
        .map_err(|e| BridgeError::Internal(format!("Compilation task failed: {}", e)))?;

        let module = module.map_err(|e| {
            warn!("Compilation of {} failed: {:#}", location, e);
            BridgeError::CompileFailure(format!("{:#}", e))
        })?;
        let compile_time = start.elapsed().as_millis() as u64;

        {
            let mut stats = self.stats.write().await;
            stats.modules_compiled += 1;
            stats.total_compile_time_ms += compile_time;
        }

        let compiled = CompiledModule::new(location, module, &bytes, compile_time);
        info!(
            "Compiled module {} in {}ms ({} bytes, sha256 {})",
            location,
            compile_time,
            compiled.size_bytes,
            &compiled.digest[..12]
        );

        Ok(Arc::new(compiled))
    }

    /// Get loader statistics
    pub async fn stats(&self) -> LoaderStats {
        self.stats.read().await.clone()
    }

    async fn fetch(&self, location: &ArtifactLocation) -> BridgeResult<Vec<u8>> {
        self.stats.write().await.fetches += 1;

        let bytes = match location {
            ArtifactLocation::Remote(url) => self.fetch_remote(url).await?,
            ArtifactLocation::Local(path) => self.fetch_local(path).await?,
        };

        self.stats.write().await.bytes_fetched += bytes.len() as u64;
        Ok(bytes)
    }

    async fn fetch_remote(&self, url: &Url) -> BridgeResult<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BridgeError::fetch(url, e))?;

        if !response.status().is_success() {
            return Err(BridgeError::fetch(url, format!("HTTP {}", response.status())));
        }

        if let Some(total_size) = response.content_length() {
            debug!("Artifact size: {} bytes", total_size);
            self.check_size(url, total_size)?;
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BridgeError::fetch(url, e))?;
            self.check_size(url, (bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }

    async fn fetch_local(&self, path: &Path) -> BridgeResult<Vec<u8>> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| BridgeError::fetch(path.display(), e))?;
        self.check_size(path.display(), metadata.len())?;

        tokio::fs::read(path)
            .await
            .map_err(|e| BridgeError::fetch(path.display(), e))
    }

    fn check_size(&self, location: impl fmt::Display, size: u64) -> BridgeResult<()> {
        if size > self.max_artifact_bytes {
            return Err(BridgeError::fetch(
                location,
                format!(
                    "artifact of {} bytes exceeds limit of {} bytes",
                    size, self.max_artifact_bytes
                ),
            ));
        }
        Ok(())
    }
}
