//! Bridge controller
//!
//! Owns the engine, the loaded module and the current execution instance, and
//! exposes the whole lifecycle as explicit method calls:
//!
//! ```text
//! load ──► instantiate ──► activate ──► probe / generate
//!   │            ▲
//!   │            └── reinstantiate / spawn_instance (no fetch, no compile)
//!   └── one fetch per call
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use wasmtime::Engine;

use super::bridge::RuntimeBridge;
use super::capability::{CapabilityProvider, DefaultCapabilities};
use super::config::BridgeConfig;
use super::instance::{ExecutionInstance, InstanceManager};
use super::loader::{CompiledModule, LoaderStats, ModuleLoader};
use super::types::{BridgeError, BridgeResult, InstanceState};

/// Controller statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Loader statistics
    pub loader: LoaderStats,
    /// Instances created
    pub instances_created: u64,
    /// Successful activations
    pub activations: u64,
    /// Failed activations
    pub failed_activations: u64,
}

/// Explicit owner of one module and its instances
pub struct BridgeController {
    config: BridgeConfig,
    engine: Engine,
    loader: ModuleLoader,
    manager: InstanceManager,
    provider: Arc<dyn CapabilityProvider>,
    module: Option<Arc<CompiledModule>>,
    current: Option<ExecutionInstance>,
    stats: BridgeStats,
}

impl BridgeController {
    /// Create a controller with the built-in capabilities
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        Self::with_capabilities(config, Arc::new(DefaultCapabilities))
    }

    /// Create a controller whose instances get capabilities from `provider`
    pub fn with_capabilities(
        config: BridgeConfig,
        provider: Arc<dyn CapabilityProvider>,
    ) -> BridgeResult<Self> {
        let engine = Engine::new(&config.engine.to_wasmtime_config())
            .map_err(|e| BridgeError::Internal(format!("Failed to create engine: {}", e)))?;
        let loader = ModuleLoader::new(&engine, &config.loader)?;
        let manager = InstanceManager::new(&engine, &config.engine, &config.abi);

        info!(
            "Bridge controller created (optimization {:?}, fuel {:?})",
            config.engine.optimization_level, config.engine.fuel_limit
        );

        Ok(Self {
            config,
            engine,
            loader,
            manager,
            provider,
            module: None,
            current: None,
            stats: BridgeStats::default(),
        })
    }

    /// Get the wasmtime engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Loaded module, if any
    pub fn module(&self) -> Option<&Arc<CompiledModule>> {
        self.module.as_ref()
    }

    /// Current instance, if any
    pub fn current(&self) -> Option<&ExecutionInstance> {
        self.current.as_ref()
    }

    /// Fetch and compile the artifact at `location`
    ///
    /// Replaces any previously loaded module and drops the current instance.
    pub async fn load(&mut self, location: &str) -> BridgeResult<Arc<CompiledModule>> {
        let module = self.loader.load(location).await?;
        self.module = Some(module.clone());
        self.current = None;
        Ok(module)
    }

    /// Fetch and compile the configured default artifact
    pub async fn load_default(&mut self) -> BridgeResult<Arc<CompiledModule>> {
        let location = self.config.artifact.clone();
        self.load(&location).await
    }

    /// Create the current instance from the loaded module
    pub async fn instantiate(&mut self) -> BridgeResult<&ExecutionInstance> {
        let instance = self.spawn_instance().await?;
        Ok(self.current.insert(instance))
    }

    /// Replace the current instance with a fresh one from the same module
    ///
    /// The previous instance is dropped. The new one must be activated.
    pub async fn reinstantiate(&mut self) -> BridgeResult<&ExecutionInstance> {
        if let Some(previous) = self.current.take() {
            info!("Dropping instance {}", previous.id());
        }
        self.instantiate().await
    }

    /// Create an additional instance from the loaded module
    ///
    /// The instance is independent of the current one and owned by the caller;
    /// activate it with [`RuntimeBridge::activate`] or [`Self::activate_instance`].
    pub async fn spawn_instance(&mut self) -> BridgeResult<ExecutionInstance> {
        let module = self.module.clone().ok_or(BridgeError::NoModuleLoaded)?;
        let id = uuid::Uuid::now_v7().to_string();
        let capabilities = self.provider.capabilities(&id);

        let instance = self
            .manager
            .instantiate_with_id(&id, &module, &capabilities)
            .await?;
        self.stats.instances_created += 1;
        Ok(instance)
    }

    /// Activate the current instance
    pub async fn activate(&mut self) -> BridgeResult<()> {
        let instance = self.current.as_ref().ok_or(BridgeError::NoInstance)?;
        let result = RuntimeBridge::activate(instance).await;
        self.record_activation(&result);
        result
    }

    /// Activate an instance obtained from [`Self::spawn_instance`]
    pub async fn activate_instance(&mut self, instance: &ExecutionInstance) -> BridgeResult<()> {
        let result = RuntimeBridge::activate(instance).await;
        self.record_activation(&result);
        result
    }

    /// Load, instantiate and activate in one go
    ///
    /// Logs the probe value once the instance is ready.
    pub async fn start(&mut self, location: &str) -> BridgeResult<()> {
        self.load(location).await?;
        self.instantiate().await?;
        self.activate().await?;

        match self.probe().await {
            Ok(value) => info!("Probe: {}", value),
            Err(e) => warn!("Probe failed after activation: {}", e),
        }
        Ok(())
    }

    /// Liveness probe on the current instance
    pub async fn probe(&self) -> BridgeResult<String> {
        self.current_instance()?.exports().probe().await
    }

    /// Generation operation on the current instance
    pub async fn generate(&self, data: &[u8], seed: &str) -> BridgeResult<String> {
        self.current_instance()?.exports().generate(data, seed).await
    }

    /// Current instance state
    pub async fn state(&self) -> Option<InstanceState> {
        match &self.current {
            Some(instance) => Some(instance.state().await),
            None => None,
        }
    }

    /// Get statistics
    pub async fn stats(&self) -> BridgeStats {
        let mut stats = self.stats.clone();
        stats.loader = self.loader.stats().await;
        stats
    }

    fn current_instance(&self) -> BridgeResult<&ExecutionInstance> {
        self.current.as_ref().ok_or(BridgeError::NoInstance)
    }

    fn record_activation(&mut self, result: &BridgeResult<()>) {
        match result {
            Ok(()) => self.stats.activations += 1,
            Err(BridgeError::AlreadyActive(_)) => {}
            Err(_) => self.stats.failed_activations += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityTable, HostCapability};
    use std::io::Write;
    use wasmtime::{Val, ValType};

    const GUEST_WAT: &str = include_str!("../tests/fixtures/guest.wat");

    fn guest_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".wat").tempfile().unwrap();
        file.write_all(GUEST_WAT.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_operations_require_module_and_instance() {
        let mut controller = BridgeController::new(BridgeConfig::default()).unwrap();

        assert!(matches!(
            controller.instantiate().await,
            Err(BridgeError::NoModuleLoaded)
        ));
        assert!(matches!(controller.activate().await, Err(BridgeError::NoInstance)));
        assert!(matches!(controller.probe().await, Err(BridgeError::NoInstance)));
        assert!(controller.state().await.is_none());
    }

    #[tokio::test]
    async fn test_start_from_file() {
        let file = guest_file();
        let mut controller = BridgeController::new(BridgeConfig::default()).unwrap();

        controller
            .start(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(controller.state().await, Some(InstanceState::Ready));
        assert_eq!(controller.probe().await.unwrap(), "Hello World");
        assert_eq!(
            controller.generate(b"hello", "hel").await.unwrap(),
            "hellohel"
        );

        let stats = controller.stats().await;
        assert_eq!(stats.loader.fetches, 1);
        assert_eq!(stats.instances_created, 1);
        assert_eq!(stats.activations, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["loader"]["modules_compiled"], 1);
        assert_eq!(json["failed_activations"], 0);

        let info = serde_json::to_value(controller.module().unwrap().info()).unwrap();
        assert_eq!(info["imports"][0]["module"], "env");
        assert_eq!(info["imports"][0]["kind"], "function");
        assert!(info["exports"][0]["module"].is_null());
    }

    #[tokio::test]
    async fn test_reinstantiate_replaces_current() {
        let file = guest_file();
        let mut controller = BridgeController::new(BridgeConfig::default()).unwrap();
        controller.start(file.path().to_str().unwrap()).await.unwrap();
        let first_id = controller.current().unwrap().id().to_string();

        let second_id = controller.reinstantiate().await.unwrap().id().to_string();
        assert_ne!(first_id, second_id);
        assert_eq!(controller.state().await, Some(InstanceState::Created));
        assert!(matches!(
            controller.generate(b"x", "y").await,
            Err(BridgeError::RuntimeNotReady { .. })
        ));

        controller.activate().await.unwrap();
        assert_eq!(controller.generate(b"x", "y").await.unwrap(), "xy");

        let stats = controller.stats().await;
        assert_eq!(stats.loader.fetches, 1);
        assert_eq!(stats.loader.modules_compiled, 1);
        assert_eq!(stats.instances_created, 2);
        assert_eq!(stats.activations, 2);
    }

    #[tokio::test]
    async fn test_custom_capability_provider() {
        let wat = r#"
            (module
                (import "host" "answer" (func $answer (result i32)))
                (memory (export "memory") 1)
                (global $value (mut i32) (i32.const 0))
                (data (i32.const 0) "0123456789")
                (func (export "_start") (global.set $value (call $answer)))
                (func (export "probe") (result i64)
                    (i64.or
                        (i64.shl
                            (i64.extend_i32_u (i32.rem_u (global.get $value) (i32.const 10)))
                            (i64.const 32))
                        (i64.const 1)))
            )
        "#;
        let mut file = tempfile::Builder::new().suffix(".wat").tempfile().unwrap();
        file.write_all(wat.as_bytes()).unwrap();

        let provider = |_id: &str| {
            CapabilityTable::new().with(
                "host",
                "answer",
                HostCapability::new(vec![], vec![ValType::I32], |_c, _p, r| {
                    r[0] = Val::I32(42);
                    Ok(())
                }),
            )
        };
        let mut controller =
            BridgeController::with_capabilities(BridgeConfig::default(), Arc::new(provider))
                .unwrap();

        controller.start(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(controller.probe().await.unwrap(), "2");

        // the default table does not satisfy this module
        let mut plain = BridgeController::new(BridgeConfig::default()).unwrap();
        plain.load(file.path().to_str().unwrap()).await.unwrap();
        assert!(matches!(
            plain.instantiate().await,
            Err(BridgeError::InstantiationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_activation_counted() {
        let mut file = tempfile::Builder::new().suffix(".wat").tempfile().unwrap();
        file.write_all(br#"(module (func (export "_start") unreachable))"#)
            .unwrap();

        let mut controller = BridgeController::new(BridgeConfig::default()).unwrap();
        let err = controller
            .start(file.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::GuestTrap { .. }));
        assert_eq!(controller.state().await, Some(InstanceState::Failed));

        let stats = controller.stats().await;
        assert_eq!(stats.activations, 0);
        assert_eq!(stats.failed_activations, 1);
    }
}
