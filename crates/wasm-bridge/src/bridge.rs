//! Runtime bridge
//!
//! Starts an instance's run loop. No exported operation may be called until
//! activation has completed.

use tracing::{error, info};

use super::instance::ExecutionInstance;
use super::types::{BridgeError, BridgeResult};

/// Drives instance activation
pub struct RuntimeBridge;

impl RuntimeBridge {
    /// Start the instance's run loop
    ///
    /// `Created -> Activating -> Ready`. Returns `AlreadyActive` for an
    /// instance that has been activated before (successfully or not) without
    /// entering the guest again. A missing or trapping run loop export leaves
    /// the instance `Failed`.
    pub async fn activate(instance: &ExecutionInstance) -> BridgeResult<()> {
        instance.begin_activation().await?;

        let result = Self::start_run_loop(instance).await;
        instance.finish_activation(result.is_ok()).await;

        match &result {
            Ok(()) => info!("Instance {} ready", instance.id()),
            Err(e) => error!("Activation of instance {} failed: {}", instance.id(), e),
        }
        result
    }

    async fn start_run_loop(instance: &ExecutionInstance) -> BridgeResult<()> {
        let run = instance.abi().run.clone();
        let mut inner = instance.inner().lock().await;
        let inner = &mut *inner;

        let func = inner
            .instance
            .get_func(&mut inner.store, &run)
            .ok_or_else(|| BridgeError::ExportNotFound(run.clone()))?;
        let func = func
            .typed::<(), ()>(&inner.store)
            .map_err(|e| BridgeError::TypeMismatch {
                expected: format!("{}: () -> ()", run),
                actual: e.to_string(),
            })?;

        inner.refuel()?;
        instance.record_run_loop_start();
        let result = func
            .call_async(&mut inner.store, ())
            .await
            .map_err(|e| BridgeError::trap(&run, format!("{:#}", e)));
        inner.store.data_mut().flush_output();
        result
    }
}
