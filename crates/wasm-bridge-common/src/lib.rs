//! Common types, errors, and configuration for wasm-bridge.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, execution and capabilities
//! - The ambient [`CoordinatedRequest`] guests read and write through host calls

pub mod config;
pub mod config_file;
pub mod error;
pub mod request;

pub use config::{
    CapabilityConfig, EngineConfig, ExecutionConfig, LoggerConfig, RequestConfig, RuntimeConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, LogFormat, LoggingConfig};
pub use error::{BridgeError, CapabilityError, RuntimeError};
pub use request::CoordinatedRequest;
