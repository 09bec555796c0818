//! Wasmtime store data and store creation.
//!
//! The [`WorkerContext`] is the store's data: the WASI context plus the
//! bookkeeping the runner needs. Bridge state that host functions share with
//! the guest lives in the [`CallContext`](crate::CallContext) reached through
//! the instance registry, not here.

use std::time::{Duration, Instant};

use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::registry::InstanceId;
use wasm_bridge_common::{ExecutionConfig, RuntimeError};

/// Per-execution store data.
pub struct WorkerContext {
    /// WASI preview1 context for guests built against `wasm32-wasip1`.
    pub(crate) wasi: WasiP1Ctx,

    /// Request identifier used for tracing.
    pub request_id: String,

    /// Identifier assigned by the registry once the instance is registered.
    pub ident: Option<InstanceId>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    start_time: Instant,
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution.
    pub fuel_consumed: u64,

    /// Total execution duration.
    pub duration: Option<Duration>,
}

impl WorkerContext {
    /// Create a context with stdout/stderr inherited from the host.
    pub fn new(request_id: String) -> Self {
        let wasi = WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        Self {
            wasi,
            request_id,
            ident: None,
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("request_id", &self.request_id)
            .field("ident", &self.ident)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Create a new store with fuel and epoch limits applied.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    request_id: String,
) -> Result<Store<WorkerContext>, RuntimeError> {
    let mut store = Store::new(engine.inner(), WorkerContext::new(request_id));

    // The engine always meters fuel; "unmetered" means an unlimited budget
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;

    // One epoch tick per millisecond, driven by the embedder
    if engine.config().epoch_interruption {
        store.set_epoch_deadline(config.timeout_ms);
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<WorkerContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<WorkerContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bridge_common::EngineConfig;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_worker_context_creation() {
        let ctx = WorkerContext::new("req-1".into());

        assert_eq!(ctx.request_id, "req-1");
        assert!(ctx.ident.is_none());
        assert_eq!(ctx.metrics.fuel_consumed, 0);
    }

    #[test]
    fn test_store_fuel() {
        let exec_config = ExecutionConfig {
            max_fuel: 1000,
            fuel_metering: true,
            ..Default::default()
        };

        let store = create_store(&engine(), &exec_config, "test".into()).unwrap();
        assert_eq!(get_remaining_fuel(&store), Some(1000));
    }

    #[test]
    fn test_store_unmetered() {
        let exec_config = ExecutionConfig {
            fuel_metering: false,
            ..Default::default()
        };

        let store = create_store(&engine(), &exec_config, "test".into()).unwrap();
        let remaining = get_remaining_fuel(&store).unwrap();
        assert!(remaining > ExecutionConfig::default().max_fuel);
    }
}
