//! Host capabilities
//!
//! The capability table is the set of host functions a guest module may
//! import. A fresh table is built for every instantiation and handed to the
//! instance manager by reference; nothing keeps it around globally.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use wasmtime::{Caller, Engine, FuncType, Linker, StoreLimits, Val, ValType};

use super::codec::TextCodec;
use super::memory::{GuestSlice, guest_len, read_bytes};
use super::types::{BridgeError, BridgeResult};

/// Import module name used by the built-in capabilities
pub const HOST_MODULE: &str = "env";

/// Longest guest output line buffered before it is logged unterminated
pub const MAX_OUTPUT_LINE: usize = 4096;

/// Per-instance state stored in the wasmtime `Store`
pub struct HostState {
    /// Owning instance ID, attached to guest log output
    pub instance_id: String,
    /// Name of the guest memory export
    pub memory_export: String,
    /// Store resource limits
    pub limits: StoreLimits,
    /// Partial output lines written by the guest, per descriptor
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl HostState {
    pub fn new(instance_id: &str, memory_export: &str, limits: StoreLimits) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            memory_export: memory_export.to_string(),
            limits,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Buffer guest output and log every completed line
    pub fn write_output(&mut self, fd: i32, bytes: &[u8]) {
        let buffer = if fd == 2 {
            &mut self.stderr
        } else {
            &mut self.stdout
        };
        buffer.extend_from_slice(bytes);

        loop {
            let line: Vec<u8> = match buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
                    line.pop();
                    line
                }
                None if buffer.len() >= MAX_OUTPUT_LINE => {
                    buffer.drain(..MAX_OUTPUT_LINE).collect()
                }
                None => break,
            };
            let line = TextCodec::decode_lossy(&line);
            if fd == 2 {
                warn!(instance_id = %self.instance_id, "guest: {}", line);
            } else {
                debug!(instance_id = %self.instance_id, "guest: {}", line);
            }
        }
    }

    /// Emit any unterminated output still buffered
    pub fn flush_output(&mut self) {
        for fd in [1, 2] {
            let pending = if fd == 2 {
                std::mem::take(&mut self.stderr)
            } else {
                std::mem::take(&mut self.stdout)
            };
            if !pending.is_empty() {
                let mut line = pending;
                line.push(b'\n');
                self.write_output(fd, &line);
            }
        }
    }
}

/// Log level for guest logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl From<i32> for LogLevel {
    fn from(v: i32) -> Self {
        match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

/// Host callback invoked when the guest calls an imported function
pub type HostCallback = Arc<
    dyn Fn(Caller<'_, HostState>, &[Val], &mut [Val]) -> wasmtime::Result<()> + Send + Sync,
>;

/// A single host-provided function
#[derive(Clone)]
pub struct HostCapability {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
    callback: HostCallback,
}

impl HostCapability {
    pub fn new<F>(params: Vec<ValType>, results: Vec<ValType>, callback: F) -> Self
    where
        F: Fn(Caller<'_, HostState>, &[Val], &mut [Val]) -> wasmtime::Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            params,
            results,
            callback: Arc::new(callback),
        }
    }

    fn func_type(&self, engine: &Engine) -> FuncType {
        FuncType::new(engine, self.params.iter().cloned(), self.results.iter().cloned())
    }
}

impl fmt::Debug for HostCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCapability")
            .field("params", &self.params)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

/// Import key: `(module, name)`
pub type CapabilityKey = (String, String);

/// Host capabilities offered to one instantiation
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: BTreeMap<CapabilityKey, HostCapability>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under `module.name`, replacing any previous entry
    pub fn insert(&mut self, module: &str, name: &str, capability: HostCapability) {
        self.entries
            .insert((module.to_string(), name.to_string()), capability);
    }

    pub fn with(mut self, module: &str, name: &str, capability: HostCapability) -> Self {
        self.insert(module, name, capability);
        self
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&HostCapability> {
        self.entries.get(&(module.to_string(), name.to_string()))
    }

    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.get(module, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capability names as `module.name`
    pub fn names(&self) -> Vec<String> {
        self.entries
            .keys()
            .map(|(module, name)| format!("{}.{}", module, name))
            .collect()
    }

    /// Define every capability in a linker
    pub(crate) fn link(&self, engine: &Engine, linker: &mut Linker<HostState>) -> BridgeResult<()> {
        for ((module, name), capability) in &self.entries {
            let callback = capability.callback.clone();
            linker
                .func_new(
                    module,
                    name,
                    capability.func_type(engine),
                    move |caller, params, results| callback(caller, params, results),
                )
                .map_err(|e| {
                    BridgeError::InstantiationFailure(format!(
                        "cannot link {}.{}: {}",
                        module, name, e
                    ))
                })?;
        }
        Ok(())
    }
}

/// Builds the capability table for each new instance
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self, instance_id: &str) -> CapabilityTable;
}

/// Built-in capabilities: `env.host_log`, `env.host_now_ms`, `env.host_write`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCapabilities;

impl CapabilityProvider for DefaultCapabilities {
    fn capabilities(&self, _instance_id: &str) -> CapabilityTable {
        CapabilityTable::new()
            .with(HOST_MODULE, "host_log", host_log())
            .with(HOST_MODULE, "host_now_ms", host_now_ms())
            .with(HOST_MODULE, "host_write", host_write())
    }
}

impl<F> CapabilityProvider for F
where
    F: Fn(&str) -> CapabilityTable + Send + Sync,
{
    fn capabilities(&self, instance_id: &str) -> CapabilityTable {
        self(instance_id)
    }
}

fn arg_i32(params: &[Val], index: usize) -> wasmtime::Result<i32> {
    params
        .get(index)
        .and_then(Val::i32)
        .ok_or_else(|| wasmtime::Error::msg(format!("expected i32 argument at {}", index)))
}

/// Read `len` bytes at `ptr` from the calling instance's memory
fn caller_bytes(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<Vec<u8>> {
    let export = caller.data().memory_export.clone();
    let memory = caller
        .get_export(&export)
        .and_then(|e| e.into_memory())
        .ok_or_else(|| wasmtime::Error::msg(format!("guest has no memory export '{}'", export)))?;

    read_bytes(&memory, &*caller, GuestSlice::from_raw(ptr, len))
        .map_err(|e| wasmtime::Error::msg(e.to_string()))
}

fn host_log() -> HostCapability {
    HostCapability::new(
        vec![ValType::I32, ValType::I32, ValType::I32],
        vec![],
        |mut caller, params, _results| {
            let level = LogLevel::from(arg_i32(params, 0)?);
            let bytes = caller_bytes(&mut caller, arg_i32(params, 1)?, arg_i32(params, 2)?)?;
            let message = TextCodec::decode_lossy(&bytes);
            let instance_id = caller.data().instance_id.as_str();

            match level {
                LogLevel::Trace => tracing::trace!(instance_id, "{}", message),
                LogLevel::Debug => tracing::debug!(instance_id, "{}", message),
                LogLevel::Info => tracing::info!(instance_id, "{}", message),
                LogLevel::Warn => tracing::warn!(instance_id, "{}", message),
                LogLevel::Error => tracing::error!(instance_id, "{}", message),
            }
            Ok(())
        },
    )
}

fn host_now_ms() -> HostCapability {
    HostCapability::new(vec![], vec![ValType::I64], |_caller, _params, results| {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        results[0] = Val::I64(now);
        Ok(())
    })
}

fn host_write() -> HostCapability {
    HostCapability::new(
        vec![ValType::I32, ValType::I32, ValType::I32],
        vec![ValType::I32],
        |mut caller, params, results| {
            let fd = arg_i32(params, 0)?;
            let bytes = caller_bytes(&mut caller, arg_i32(params, 1)?, arg_i32(params, 2)?)?;
            caller.data_mut().write_output(fd, &bytes);
            let written =
                guest_len(bytes.len()).map_err(|e| wasmtime::Error::msg(e.to_string()))?;
            results[0] = Val::I32(written);
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::from(0), LogLevel::Trace);
        assert_eq!(LogLevel::from(2), LogLevel::Info);
        assert_eq!(LogLevel::from(99), LogLevel::Error);
        assert_eq!(LogLevel::from(-1), LogLevel::Error);
    }

    #[test]
    fn test_default_capabilities() {
        let table = DefaultCapabilities.capabilities("test");

        assert_eq!(table.len(), 3);
        assert!(table.contains("env", "host_log"));
        assert!(table.contains("env", "host_now_ms"));
        assert!(table.contains("env", "host_write"));
        assert!(!table.contains("env", "host_alloc"));
        assert_eq!(
            table.names(),
            vec!["env.host_log", "env.host_now_ms", "env.host_write"]
        );
    }

    #[test]
    fn test_closure_provider() {
        let provider = |_id: &str| {
            CapabilityTable::new().with(
                "custom",
                "answer",
                HostCapability::new(vec![], vec![ValType::I32], |_c, _p, r| {
                    r[0] = Val::I32(42);
                    Ok(())
                }),
            )
        };

        let table = provider.capabilities("any");
        let cap = table.get("custom", "answer").unwrap();
        assert!(cap.params.is_empty());
        assert_eq!(cap.results.len(), 1);
    }

    #[test]
    fn test_output_line_buffering() {
        let mut state = HostState::new("i-1", "memory", StoreLimits::default());

        state.write_output(1, b"partial");
        assert_eq!(state.stdout, b"partial");

        state.write_output(1, b" line\nnext");
        assert_eq!(state.stdout, b"next");

        state.flush_output();
        assert!(state.stdout.is_empty());
        assert!(state.stderr.is_empty());
    }

    #[test]
    fn test_unterminated_output_is_bounded() {
        let mut state = HostState::new("i-1", "memory", StoreLimits::default());

        for _ in 0..100 {
            state.write_output(2, &[b'x'; 1000]);
            assert!(state.stderr.len() < MAX_OUTPUT_LINE);
        }
        assert_eq!(state.stderr.len(), 100_000 % MAX_OUTPUT_LINE);

        state.write_output(2, b"\n");
        assert!(state.stderr.is_empty());
    }
}
