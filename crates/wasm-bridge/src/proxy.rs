//! Exported operation proxy
//!
//! Typed wrappers around the guest's `probe` and `generate` exports. Every call
//! is refused with `RuntimeNotReady` unless the owning instance is `Ready`, so
//! the guest is never entered before its run loop has started.

use std::time::Instant;
use tracing::debug;
use wasmtime::{TypedFunc, WasmParams, WasmResults};

use super::codec::TextCodec;
use super::instance::{ExecutionInstance, InstanceInner};
use super::memory::{GuestPtr, GuestSlice, guest_len, read_bytes, write_bytes};
use super::types::{BridgeError, BridgeResult};

/// Proxy for one instance's exported operations
pub struct ExportedOperationProxy<'a> {
    instance: &'a ExecutionInstance,
}

impl<'a> ExportedOperationProxy<'a> {
    pub fn new(instance: &'a ExecutionInstance) -> Self {
        Self { instance }
    }

    /// Liveness probe
    pub async fn probe(&self) -> BridgeResult<String> {
        self.instance.ensure_ready().await?;

        let abi = self.instance.abi();
        let mut inner = self.instance.inner().lock().await;
        let inner = &mut *inner;
        inner.refuel()?;

        let probe = typed_export::<(), i64>(inner, &abi.probe, "() -> i64")?;
        let packed = probe
            .call_async(&mut inner.store, ())
            .await
            .map_err(|e| BridgeError::trap(&abi.probe, format!("{:#}", e)))?;

        read_text(inner, &abi.memory, GuestSlice::unpack(packed))
    }

    /// Opaque generation operation
    ///
    /// `data` and the UTF-8 bytes of `seed` are copied into guest memory
    /// through the guest allocator; the returned text is copied back out.
    /// Neither side is interpreted by the bridge.
    pub async fn generate(&self, data: &[u8], seed: &str) -> BridgeResult<String> {
        self.instance.ensure_ready().await?;

        let abi = self.instance.abi();
        let start = Instant::now();
        let mut inner = self.instance.inner().lock().await;
        let inner = &mut *inner;
        inner.refuel()?;

        let data_slice = copy_in(inner, &abi.alloc, &abi.memory, data).await?;
        let seed_slice = copy_in(inner, &abi.alloc, &abi.memory, &TextCodec::encode(seed)).await?;

        let generate = typed_export::<(i32, i32, i32, i32), i64>(
            inner,
            &abi.generate,
            "(i32, i32, i32, i32) -> i64",
        )?;
        let (data_ptr, data_len) = data_slice.to_raw()?;
        let (seed_ptr, seed_len) = seed_slice.to_raw()?;
        let packed = generate
            .call_async(&mut inner.store, (data_ptr, data_len, seed_ptr, seed_len))
            .await
            .map_err(|e| BridgeError::trap(&abi.generate, format!("{:#}", e)));
        inner.store.data_mut().flush_output();

        let text = read_text(inner, &abi.memory, GuestSlice::unpack(packed?))?;
        debug!(
            "generate on {} returned {} bytes in {:?}",
            self.instance.id(),
            text.len(),
            start.elapsed()
        );
        Ok(text)
    }
}

fn typed_export<P, R>(
    inner: &mut InstanceInner,
    name: &str,
    signature: &str,
) -> BridgeResult<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    let func = inner
        .instance
        .get_func(&mut inner.store, name)
        .ok_or_else(|| BridgeError::ExportNotFound(name.to_string()))?;

    func.typed::<P, R>(&inner.store)
        .map_err(|e| BridgeError::TypeMismatch {
            expected: format!("{}: {}", name, signature),
            actual: e.to_string(),
        })
}

fn guest_memory(inner: &mut InstanceInner, name: &str) -> BridgeResult<wasmtime::Memory> {
    inner
        .instance
        .get_memory(&mut inner.store, name)
        .ok_or_else(|| BridgeError::ExportNotFound(name.to_string()))
}

/// Allocate `bytes.len()` bytes in the guest and copy `bytes` there
async fn copy_in(
    inner: &mut InstanceInner,
    alloc: &str,
    memory_name: &str,
    bytes: &[u8],
) -> BridgeResult<GuestSlice> {
    let len = guest_len(bytes.len())?;
    let alloc_fn = typed_export::<i32, i32>(inner, alloc, "(i32) -> i32")?;
    let ptr = alloc_fn
        .call_async(&mut inner.store, len)
        .await
        .map_err(|e| BridgeError::trap(alloc, format!("{:#}", e)))?;

    let memory = guest_memory(inner, memory_name)?;
    write_bytes(&memory, &mut inner.store, GuestPtr::from(ptr), bytes)
}

fn read_text(inner: &mut InstanceInner, memory_name: &str, slice: GuestSlice) -> BridgeResult<String> {
    let memory = guest_memory(inner, memory_name)?;
    let bytes = read_bytes(&memory, &inner.store, slice)?;
    TextCodec::decode(&bytes)
}
