//! Instance management
//!
//! Turns a compiled module and a capability table into an execution instance.
//! Instantiation never fetches or compiles; the same [`CompiledModule`] can back
//! any number of independent instances.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use wasmtime::{Engine, Instance, Linker, Store, StoreLimitsBuilder};

use super::capability::{CapabilityTable, HostState};
use super::config::{EngineConfig, GuestAbi};
use super::loader::CompiledModule;
use super::proxy::ExportedOperationProxy;
use super::types::{BridgeError, BridgeResult, InstanceState};

/// Store and instance, locked together for every guest call
pub(crate) struct InstanceInner {
    pub(crate) store: Store<HostState>,
    pub(crate) instance: Instance,
    fuel_limit: Option<u64>,
}

impl InstanceInner {
    /// Reset the fuel budget before entering the guest
    ///
    /// The limit bounds each host-initiated operation, not the instance's
    /// lifetime.
    pub(crate) fn refuel(&mut self) -> BridgeResult<()> {
        if let Some(fuel) = self.fuel_limit {
            self.store
                .set_fuel(fuel)
                .map_err(|e| BridgeError::Internal(format!("Failed to set fuel: {}", e)))?;
        }
        Ok(())
    }
}

/// One running context bound to a compiled module and a capability table
pub struct ExecutionInstance {
    id: String,
    module: Arc<CompiledModule>,
    abi: GuestAbi,
    state: RwLock<InstanceState>,
    inner: Mutex<InstanceInner>,
    run_loop_starts: AtomicU32,
}

impl ExecutionInstance {
    /// Instance ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Compiled module backing this instance
    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.module
    }

    /// Guest ABI this instance binds to
    pub fn abi(&self) -> &GuestAbi {
        &self.abi
    }

    /// Get current state
    pub async fn state(&self) -> InstanceState {
        *self.state.read().await
    }

    /// Number of times the guest run loop has been entered
    pub fn run_loop_starts(&self) -> u32 {
        self.run_loop_starts.load(Ordering::SeqCst)
    }

    /// Typed access to the guest's exported operations
    pub fn exports(&self) -> ExportedOperationProxy<'_> {
        ExportedOperationProxy::new(self)
    }

    /// Move `Created -> Activating`; any other state is rejected
    pub(crate) async fn begin_activation(&self) -> BridgeResult<()> {
        let mut state = self.state.write().await;
        if *state != InstanceState::Created {
            return Err(BridgeError::AlreadyActive(self.id.clone()));
        }
        *state = InstanceState::Activating;
        Ok(())
    }

    pub(crate) async fn finish_activation(&self, success: bool) {
        *self.state.write().await = if success {
            InstanceState::Ready
        } else {
            InstanceState::Failed
        };
    }

    pub(crate) fn record_run_loop_start(&self) {
        self.run_loop_starts.fetch_add(1, Ordering::SeqCst);
    }

    /// Fail with `RuntimeNotReady` unless the instance is `Ready`
    pub(crate) async fn ensure_ready(&self) -> BridgeResult<()> {
        let state = self.state().await;
        if state.is_ready() {
            Ok(())
        } else {
            Err(BridgeError::RuntimeNotReady {
                instance_id: self.id.clone(),
                state,
            })
        }
    }

    pub(crate) fn inner(&self) -> &Mutex<InstanceInner> {
        &self.inner
    }
}

impl std::fmt::Debug for ExecutionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionInstance")
            .field("id", &self.id)
            .field("module", &self.module.location)
            .field("run_loop_starts", &self.run_loop_starts())
            .finish_non_exhaustive()
    }
}

/// Creates execution instances from compiled modules
pub struct InstanceManager {
    engine: Engine,
    engine_config: EngineConfig,
    abi: GuestAbi,
}

impl InstanceManager {
    pub fn new(engine: &Engine, engine_config: &EngineConfig, abi: &GuestAbi) -> Self {
        Self {
            engine: engine.clone(),
            engine_config: engine_config.clone(),
            abi: abi.clone(),
        }
    }

    /// Instantiate `module` against `capabilities`
    ///
    /// Every import of the module must be present in the table; the first
    /// missing one fails with `InstantiationFailure`. The returned instance is
    /// in `Created` state and must be activated before use.
    pub async fn instantiate(
        &self,
        module: &Arc<CompiledModule>,
        capabilities: &CapabilityTable,
    ) -> BridgeResult<ExecutionInstance> {
        let id = uuid::Uuid::now_v7().to_string();
        self.instantiate_with_id(&id, module, capabilities).await
    }

    /// Instantiate with a caller-chosen instance ID
    pub async fn instantiate_with_id(
        &self,
        id: &str,
        module: &Arc<CompiledModule>,
        capabilities: &CapabilityTable,
    ) -> BridgeResult<ExecutionInstance> {
        if !Engine::same(module.module.engine(), &self.engine) {
            return Err(BridgeError::InstantiationFailure(
                "module was compiled for a different engine".to_string(),
            ));
        }

        for import in module.module.imports() {
            if !capabilities.contains(import.module(), import.name()) {
                return Err(BridgeError::InstantiationFailure(format!(
                    "missing capability {}.{}",
                    import.module(),
                    import.name()
                )));
            }
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.engine_config.max_memory_bytes() as usize)
            .build();
        let mut store = Store::new(&self.engine, HostState::new(id, &self.abi.memory, limits));
        store.limiter(|state| &mut state.limits);

        // covers start functions run during instantiation
        if let Some(fuel) = self.engine_config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| BridgeError::Internal(format!("Failed to set fuel: {}", e)))?;
        }

        let mut linker = Linker::new(&self.engine);
        capabilities.link(&self.engine, &mut linker)?;

        let instance = linker
            .instantiate_async(&mut store, &module.module)
            .await
            .map_err(|e| BridgeError::InstantiationFailure(format!("{:#}", e)))?;

        debug!(
            "Linked {} capabilities for instance {}",
            capabilities.len(),
            id
        );
        info!("Created instance {} from module {}", id, module.location);

        Ok(ExecutionInstance {
            id: id.to_string(),
            module: module.clone(),
            abi: self.abi.clone(),
            state: RwLock::new(InstanceState::Created),
            inner: Mutex::new(InstanceInner {
                store,
                instance,
                fuel_limit: self.engine_config.fuel_limit,
            }),
            run_loop_starts: AtomicU32::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DefaultCapabilities;
    use crate::capability::CapabilityProvider;
    use crate::config::LoaderConfig;
    use crate::loader::ModuleLoader;

    const GUEST_WAT: &str = include_str!("../tests/fixtures/guest.wat");

    async fn setup() -> (Engine, Arc<CompiledModule>, InstanceManager) {
        let engine = Engine::new(&EngineConfig::default().to_wasmtime_config()).unwrap();
        let loader = ModuleLoader::new(&engine, &LoaderConfig::default()).unwrap();
        let module = loader
            .compile("guest.wat", GUEST_WAT.as_bytes().to_vec())
            .await
            .unwrap();
        let manager = InstanceManager::new(&engine, &EngineConfig::default(), &GuestAbi::default());
        (engine, module, manager)
    }

    #[tokio::test]
    async fn test_instantiate_creates_independent_instances() {
        let (_engine, module, manager) = setup().await;

        let a = manager
            .instantiate(&module, &DefaultCapabilities.capabilities("a"))
            .await
            .unwrap();
        let b = manager
            .instantiate(&module, &DefaultCapabilities.capabilities("b"))
            .await
            .unwrap();

        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(a.module(), b.module()));
        assert_eq!(a.state().await, InstanceState::Created);
        assert_eq!(b.state().await, InstanceState::Created);
        assert_eq!(a.run_loop_starts(), 0);
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let (_engine, module, manager) = setup().await;

        let err = manager
            .instantiate(&module, &CapabilityTable::new())
            .await
            .unwrap_err();
        match err {
            BridgeError::InstantiationFailure(msg) => assert!(msg.contains("env.host_")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_engine_rejected() {
        let (_engine, module, _manager) = setup().await;
        let other = Engine::new(&EngineConfig::default().to_wasmtime_config()).unwrap();
        let manager = InstanceManager::new(&other, &EngineConfig::default(), &GuestAbi::default());

        let err = manager
            .instantiate(&module, &DefaultCapabilities.capabilities("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InstantiationFailure(_)));
    }

    #[tokio::test]
    async fn test_begin_activation_only_once() {
        let (_engine, module, manager) = setup().await;
        let instance = manager
            .instantiate(&module, &DefaultCapabilities.capabilities("x"))
            .await
            .unwrap();

        instance.begin_activation().await.unwrap();
        assert_eq!(instance.state().await, InstanceState::Activating);
        assert!(matches!(
            instance.ensure_ready().await,
            Err(BridgeError::RuntimeNotReady {
                state: InstanceState::Activating,
                ..
            })
        ));
        assert!(matches!(
            instance.begin_activation().await,
            Err(BridgeError::AlreadyActive(_))
        ));
    }
}
