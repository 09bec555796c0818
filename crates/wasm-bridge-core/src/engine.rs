//! Wasmtime engine configuration and creation.
//!
//! One [`WasmEngine`] is created at host startup and shared by every guest
//! instance. It is configured for:
//! - async execution, so guests run on the embedder's tokio workers
//! - fuel metering, for deterministic CPU limits
//! - optional epoch interruption, as a wall-clock backstop
//! - optional pooling allocation, for cheap instantiation

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, OptLevel, PoolingAllocationConfig};

use wasm_bridge_common::{EngineConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new engine with the given configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let engine = Engine::new(&Self::wasmtime_config(config)).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            pooling_allocator = config.pooling_allocator,
            epoch_interruption = config.epoch_interruption,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    fn wasmtime_config(config: &EngineConfig) -> Config {
        let mut wasmtime_config = Config::new();
        wasmtime_config
            .async_support(true)
            .consume_fuel(true)
            .epoch_interruption(config.epoch_interruption)
            .cranelift_opt_level(OptLevel::Speed);

        if config.pooling_allocator {
            let mut pooling = PoolingAllocationConfig::default();
            pooling
                .total_core_instances(config.max_instances)
                .total_memories(config.max_instances)
                .total_tables(config.max_instances)
                .max_memory_size((config.instance_memory_mb as usize) * 1024 * 1024);

            wasmtime_config.allocation_strategy(InstanceAllocationStrategy::Pooling(pooling));
        }

        wasmtime_config
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Advance the epoch counter by one tick.
    ///
    /// Stores created by [`create_store`](crate::store::create_store) count
    /// their timeout in ticks, so this should be driven once per millisecond.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}
