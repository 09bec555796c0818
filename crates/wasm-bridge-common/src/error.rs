//! Error types for wasm-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Engine and runner failures (compilation, traps, limits)
//! - [`BridgeError`]: Failures of the host-call protocol itself
//! - [`CapabilityError`]: Rejections and failures reported by the capability policy

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur while compiling,
/// instantiating and running a guest module.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// WebAssembly compilation or instantiation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The guest does not export a required function.
    #[error("Entry point not found: {name}")]
    EntryPointNotFound {
        /// Name of the missing export.
        name: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// Execution exceeded the configured timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The host-call protocol failed outside of a guest call.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors of the host-call protocol.
///
/// Resolution-time variants are turned into a negative status code for the
/// guest; none of them is ever allowed to escape a host call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The identifier is not registered (never issued, or already released).
    #[error("instance does not exist: {ident}")]
    UnknownInstance {
        /// The identifier supplied by the guest.
        ident: i32,
    },

    /// A result-producing call was issued before the previous result was drained.
    #[error("cannot use instance for host call with existing call in progress")]
    ResultInProgress,

    /// The guest tried to drain a result slot that holds nothing.
    #[error("no pending result to consume")]
    NoPendingResult,

    /// The VM could not satisfy a guest memory read or write.
    #[error("memory access failed: {reason}")]
    MemoryAccess {
        /// Description of the failed access.
        reason: String,
    },

    /// The OS random source could not produce an identifier.
    #[error("failed to generate instance identifier: {reason}")]
    IdentifierGeneration {
        /// Description of the randomness failure.
        reason: String,
    },

    /// A result is too large to be described by an i32 size.
    #[error("result of {len} bytes does not fit the FFI size")]
    ResultTooLarge {
        /// The byte length of the result.
        len: usize,
    },

    /// Invalid argument was passed to a host function.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },
}

/// Errors reported by the capability policy.
///
/// The display text of these errors is what a guest reads back when it drains
/// an error result, so the messages are part of the guest-visible contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The capability is switched off in configuration.
    #[error("capability is not enabled")]
    NotEnabled,

    /// The capability is on, but this operation on it is not.
    #[error("operation not allowed: {operation}")]
    NotAllowed {
        /// The rejected operation.
        operation: String,
    },

    /// The requested key does not exist.
    #[error("key not found")]
    KeyNotFound,

    /// The guest passed an unknown field type discriminant.
    #[error("invalid field type: {0}")]
    InvalidFieldType(i32),

    /// The field type cannot be written.
    #[error("field type {field} is read-only")]
    ReadOnlyField {
        /// Name of the field type.
        field: String,
    },

    /// No ambient request is attached to the call.
    #[error("request is not set")]
    RequestNotSet,

    /// A key, or a value of a text field, is not valid UTF-8.
    #[error("{what} is not valid UTF-8")]
    InvalidUtf8 {
        /// What was being decoded (`key`, `header value`, ...).
        what: String,
    },

    /// Any other policy failure.
    #[error("{0}")]
    Policy(String),
}

impl RuntimeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `EntryPointNotFound` error.
    pub fn entry_point_not_found(name: impl Into<String>) -> Self {
        Self::EntryPointNotFound { name: name.into() }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::ExecutionTimeout { .. })
    }
}

impl BridgeError {
    /// Create a new `MemoryAccess` error.
    pub fn memory_access(reason: impl Into<String>) -> Self {
        Self::MemoryAccess {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the guest broke the two-phase result protocol.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(self, Self::ResultInProgress | Self::NoPendingResult)
    }
}

impl CapabilityError {
    /// Create a new `Policy` error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }

    /// Create a new `InvalidUtf8` error.
    pub fn invalid_utf8(what: impl Into<String>) -> Self {
        Self::InvalidUtf8 { what: what.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::UnknownInstance { ident: 42 };
        assert_eq!(err.to_string(), "instance does not exist: 42");

        let err = RuntimeError::FuelExhausted;
        assert_eq!(err.to_string(), "Fuel exhausted: CPU limit exceeded");
    }

    #[test]
    fn test_disabled_capability_message_is_fixed() {
        assert_eq!(
            CapabilityError::NotEnabled.to_string(),
            "capability is not enabled"
        );
    }

    #[test]
    fn test_invalid_utf8_names_the_input() {
        assert_eq!(
            CapabilityError::invalid_utf8("key").to_string(),
            "key is not valid UTF-8"
        );
    }

    #[test]
    fn test_error_from_bridge() {
        let runtime_err: RuntimeError = BridgeError::ResultInProgress.into();
        assert!(matches!(
            runtime_err,
            RuntimeError::Bridge(BridgeError::ResultInProgress)
        ));
    }

    #[test]
    fn test_is_protocol_misuse() {
        assert!(BridgeError::ResultInProgress.is_protocol_misuse());
        assert!(BridgeError::NoPendingResult.is_protocol_misuse());
        assert!(!BridgeError::UnknownInstance { ident: 1 }.is_protocol_misuse());
        assert!(!BridgeError::memory_access("oob").is_protocol_misuse());
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::ExecutionTimeout { duration_ms: 100 }.is_resource_limit());
        assert!(!RuntimeError::trap("unreachable").is_resource_limit());
    }
}
