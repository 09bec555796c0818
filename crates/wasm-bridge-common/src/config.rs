//! Configuration structures for wasm-bridge.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, interruption)
//! - [`ExecutionConfig`]: Per-instance execution limits and entry point
//! - [`CapabilityConfig`]: Which host capabilities guests may use

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-instance execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Capability policy configuration.
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global engine shared by every instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast instance creation.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable epoch-based interruption.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Per-instance execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per execution.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Enable fuel metering.
    ///
    /// When disabled the store is given unlimited fuel.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Execution timeout in milliseconds, measured in epoch ticks.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Exported guest function called as `(input_ptr, input_len, ident)`.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Link WASI preview1 imports for guests built against `wasm32-wasip1`.
    #[serde(default = "defaults::wasi")]
    pub wasi: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            fuel_metering: defaults::fuel_metering(),
            timeout_ms: defaults::timeout_ms(),
            entry_point: defaults::entry_point(),
            wasi: defaults::wasi(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Capability policy configuration.
///
/// Every capability can be switched off without recompiling guests; a guest
/// calling into a disabled capability receives an error result instead.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CapabilityConfig {
    /// Access to the ambient request (`request_get_field` / `request_set_field`).
    #[serde(default)]
    pub request: RequestConfig,

    /// Guest logging (`log_msg`).
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl CapabilityConfig {
    /// A configuration with every capability switched off.
    pub fn disabled() -> Self {
        Self {
            request: RequestConfig {
                enabled: false,
                ..RequestConfig::default()
            },
            logger: LoggerConfig { enabled: false },
        }
    }
}

/// Request capability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestConfig {
    /// Master switch for the capability.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Allow guests to read request fields.
    #[serde(default = "defaults::enabled")]
    pub allow_get_field: bool,

    /// Allow guests to write request fields.
    #[serde(default = "defaults::enabled")]
    pub allow_set_field: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            allow_get_field: defaults::enabled(),
            allow_set_field: defaults::enabled(),
        }
    }
}

/// Logger capability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    /// Master switch for the capability.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn timeout_ms() -> u64 {
        100
    }

    pub fn entry_point() -> String {
        "run_e".to_string()
    }

    pub const fn wasi() -> bool {
        true
    }

    pub const fn enabled() -> bool {
        true
    }
}
