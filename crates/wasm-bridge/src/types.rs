//! Bridge type definitions
//!
//! Error taxonomy and instance lifecycle state shared by every component

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Bridge errors
///
/// Every failure is scoped to a single load, instantiate, activate or call
/// attempt. None of them poison the controller; the host may retry by running
/// the same sequence again.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to fetch artifact {location}: {reason}")]
    FetchFailure { location: String, reason: String },

    #[error("Failed to compile WASM module: {0}")]
    CompileFailure(String),

    #[error("Failed to instantiate WASM module: {0}")]
    InstantiationFailure(String),

    #[error("Instance {0} has already been activated")]
    AlreadyActive(String),

    #[error("Runtime not ready: instance {instance_id} is {state}")]
    RuntimeNotReady {
        instance_id: String,
        state: InstanceState,
    },

    #[error("Text encoding error: {0}")]
    EncodingFailure(String),

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Guest trapped in {export}: {reason}")]
    GuestTrap { export: String, reason: String },

    #[error("Memory access out of bounds: offset={offset}, size={size}")]
    MemoryOutOfBounds { offset: u64, size: u64 },

    #[error("No module loaded")]
    NoModuleLoaded,

    #[error("No instance created")]
    NoInstance,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub(crate) fn fetch(location: impl fmt::Display, reason: impl fmt::Display) -> Self {
        BridgeError::FetchFailure {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn trap(export: &str, err: impl fmt::Display) -> Self {
        BridgeError::GuestTrap {
            export: export.to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether the failure happened while obtaining the module, before any
    /// instance existed. The host surfaces these to the user.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::FetchFailure { .. } | BridgeError::CompileFailure(_)
        )
    }
}

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Execution instance lifecycle state
///
/// `Created -> Activating -> Ready`. An activation that errors leaves the
/// instance in `Failed`. There is no explicit disposal: dropping the instance
/// releases its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Instantiated, run loop not started
    #[default]
    Created,
    /// Run loop is starting
    Activating,
    /// Exported operations may be called
    Ready,
    /// Run loop failed to start
    Failed,
}

impl InstanceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, InstanceState::Ready)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Created => write!(f, "created"),
            InstanceState::Activating => write!(f, "activating"),
            InstanceState::Ready => write!(f, "ready"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_default() {
        let state = InstanceState::default();
        assert_eq!(state, InstanceState::Created);
        assert!(!state.is_ready());
        assert!(InstanceState::Ready.is_ready());
    }

    #[test]
    fn test_load_failure_classification() {
        assert!(BridgeError::fetch("app/lib.wasm", "not found").is_load_failure());
        assert!(BridgeError::CompileFailure("bad magic".into()).is_load_failure());
        assert!(!BridgeError::AlreadyActive("abc".into()).is_load_failure());
    }

    #[test]
    fn test_error_messages() {
        let err = BridgeError::RuntimeNotReady {
            instance_id: "i-1".into(),
            state: InstanceState::Activating,
        };
        assert_eq!(
            err.to_string(),
            "Runtime not ready: instance i-1 is activating"
        );

        let err = BridgeError::trap("generate", "unreachable");
        assert_eq!(err.to_string(), "Guest trapped in generate: unreachable");
    }
}
