//! Guest instance lifecycle.
//!
//! [`InstanceRunner`] drives one guest invocation end to end:
//!
//! 1. Instantiate the module against the linker's host functions
//! 2. Register an [`InstanceHandle`] and obtain the guest's identifier
//! 3. Copy the input into guest memory through the `allocate` export
//! 4. Call the entry point as `(input_ptr, input_len, ident)`
//! 5. Collect output, logs and the (possibly modified) request
//! 6. Release the identifier, on every exit path

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Engine, Instance, Linker, Store, Trap};

use crate::CompiledModule;
use crate::context::{CallContext, GuestOutput, LogEntry};
use crate::registry::{InstanceHandle, InstanceId, InstanceRegistry, Registration};
use crate::store::{WorkerContext, calculate_fuel_consumed, get_remaining_fuel};
use wasm_bridge_common::{BridgeError, CoordinatedRequest, RuntimeError};

/// Export the runner calls to reserve guest memory for the input.
pub const ALLOCATE_EXPORT: &str = "allocate";

/// Result of executing a guest module.
#[derive(Debug)]
pub enum ExecutionResult {
    /// Execution completed successfully.
    Success,

    /// Execution completed with a trap (runtime error).
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },
}

impl ExecutionResult {
    /// Returns `true` if execution was successful.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }

    /// Returns `true` if execution trapped.
    pub fn is_trap(&self) -> bool {
        matches!(self, ExecutionResult::Trap { .. })
    }
}

/// Everything a finished invocation leaves behind.
#[derive(Debug)]
pub struct Execution {
    /// How the entry point returned.
    pub result: ExecutionResult,
    /// Identifier the instance ran under (already released).
    pub ident: InstanceId,
    /// Response set through `return_result` / `return_error`.
    pub output: Option<GuestOutput>,
    /// Logs emitted through `log_msg`.
    pub logs: Vec<LogEntry>,
    /// The ambient request, including fields the guest set.
    pub request: Option<CoordinatedRequest>,
}

/// Instance lifecycle manager.
///
/// The runner shares its [`InstanceRegistry`] with the host functions linked
/// into it; each execution uses its own [`Store`].
pub struct InstanceRunner {
    engine: Engine,
    linker: Linker<WorkerContext>,
    registry: Arc<InstanceRegistry>,
}

impl InstanceRunner {
    /// Create a runner. With `wasi`, WASI preview1 imports are linked.
    pub fn new(
        engine: &Engine,
        registry: Arc<InstanceRegistry>,
        wasi: bool,
    ) -> Result<Self, RuntimeError> {
        let mut linker = Linker::new(engine);

        if wasi {
            wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |cx: &mut WorkerContext| {
                &mut cx.wasi
            })
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to link WASI: {e}")))?;
        }

        Ok(Self {
            engine: engine.clone(),
            linker,
            registry,
        })
    }

    /// Get a mutable reference to the linker, to register host functions.
    pub fn linker_mut(&mut self) -> &mut Linker<WorkerContext> {
        &mut self.linker
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `entry_point` of `module` on behalf of `request`.
    #[instrument(skip_all, fields(entry_point = %entry_point))]
    pub async fn execute(
        &self,
        module: &CompiledModule,
        store: &mut Store<WorkerContext>,
        entry_point: &str,
        request: Option<CoordinatedRequest>,
        input: &[u8],
    ) -> Result<Execution, RuntimeError> {
        let start = Instant::now();
        let initial_fuel = get_remaining_fuel(store).unwrap_or(0);

        let instance = self
            .linker
            .instantiate_async(&mut *store, module.inner())
            .await
            .map_err(|e| RuntimeError::compilation_failed(format!("Instantiation failed: {e}")))?;

        let handle = Arc::new(InstanceHandle::new(CallContext::new(request)));
        let registration = Registration::new(&self.registry, Arc::clone(&handle))?;
        let ident = registration.ident();
        store.data_mut().ident = Some(ident);

        debug!(ident, "Instance registered, calling entry point");

        let entry = instance
            .get_typed_func::<(i32, i32, i32), ()>(&mut *store, entry_point)
            .map_err(|_| RuntimeError::entry_point_not_found(entry_point))?;

        let (input_ptr, input_len) = write_input(&instance, store, input).await?;
        let call = entry
            .call_async(&mut *store, (input_ptr, input_len, ident))
            .await;

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, store);
        store.data_mut().metrics.fuel_consumed = fuel_consumed;
        store.data_mut().finalize_metrics();

        let (output, logs, request) = {
            let mut ctx = handle.context();
            (ctx.take_output(), ctx.take_logs(), ctx.take_request())
        };
        drop(registration);

        let duration = start.elapsed();

        let result = match call {
            Ok(()) => {
                info!(
                    ident,
                    duration_ms = duration.as_millis(),
                    fuel_consumed,
                    "Execution completed successfully"
                );
                ExecutionResult::Success
            }
            Err(trap) => {
                if let Some(err) = classify_limit(&trap, store) {
                    warn!(
                        ident,
                        duration_ms = duration.as_millis(),
                        fuel_consumed,
                        error = %err,
                        "Execution terminated by resource limit"
                    );
                    return Err(err);
                }

                let (message, code) = extract_trap_info(&trap);
                error!(
                    ident,
                    duration_ms = duration.as_millis(),
                    trap_message = %message,
                    "Execution trapped"
                );
                ExecutionResult::Trap { message, code }
            }
        };

        Ok(Execution {
            result,
            ident,
            output,
            logs,
            request,
        })
    }
}

/// Copy `input` into guest memory, returning the `(ptr, len)` handed to the entry point.
async fn write_input(
    instance: &Instance,
    store: &mut Store<WorkerContext>,
    input: &[u8],
) -> Result<(i32, i32), RuntimeError> {
    if input.is_empty() {
        return Ok((0, 0));
    }

    let len = i32::try_from(input.len()).map_err(|_| {
        BridgeError::invalid_argument(format!("input of {} bytes is too large", input.len()))
    })?;

    let allocate = instance
        .get_typed_func::<i32, i32>(&mut *store, ALLOCATE_EXPORT)
        .map_err(|_| RuntimeError::entry_point_not_found(ALLOCATE_EXPORT))?;
    let ptr = allocate
        .call_async(&mut *store, len)
        .await
        .map_err(|e| RuntimeError::trap(format!("allocate failed: {e}")))?;

    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or_else(|| BridgeError::memory_access("memory export not found in guest module"))?;
    let offset = usize::try_from(ptr)
        .map_err(|_| BridgeError::memory_access(format!("allocate returned {ptr}")))?;
    memory
        .write(&mut *store, offset, input)
        .map_err(|e| BridgeError::memory_access(format!("write input at {offset}: {e}")))?;

    Ok((ptr, len))
}

/// Map resource-limit traps to their dedicated errors.
fn classify_limit(error: &wasmtime::Error, store: &Store<WorkerContext>) -> Option<RuntimeError> {
    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => Some(RuntimeError::FuelExhausted),
        Some(Trap::Interrupt) => Some(RuntimeError::ExecutionTimeout {
            duration_ms: store
                .data()
                .metrics
                .duration
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }),
        _ => None,
    }
}

/// Extract human-readable trap information.
fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = error.to_string();
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
    (message, code)
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner")
            .field("registered_instances", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WasmEngine, create_store};
    use wasm_bridge_common::{EngineConfig, ExecutionConfig};

    async fn run_wat(
        wat: &str,
        input: &[u8],
    ) -> (Result<Execution, RuntimeError>, Arc<InstanceRegistry>) {
        let engine = WasmEngine::new(&EngineConfig {
            pooling_allocator: false,
            epoch_interruption: false,
            ..EngineConfig::default()
        })
        .unwrap();
        let registry = Arc::new(InstanceRegistry::new());
        let runner = InstanceRunner::new(engine.inner(), Arc::clone(&registry), false).unwrap();
        let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();
        let mut store = create_store(&engine, &ExecutionConfig::default(), "unit".into()).unwrap();

        let result = runner
            .execute(&module, &mut store, "run_e", None, input)
            .await;
        (result, registry)
    }

    #[test]
    fn test_execution_result_success() {
        let result = ExecutionResult::Success;
        assert!(result.is_success());
        assert!(!result.is_trap());
    }

    #[test]
    fn test_execution_result_trap() {
        let result = ExecutionResult::Trap {
            message: "unreachable".into(),
            code: Some("UnreachableCodeReached".into()),
        };
        assert!(!result.is_success());
        assert!(result.is_trap());
    }

    #[tokio::test]
    async fn test_execute_passes_identifier_and_releases_it() {
        // Traps unless the identifier is non-negative
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "run_e") (param i32 i32 i32)
                    (if (i32.lt_s (local.get 2) (i32.const 0)) (then unreachable))
                )
            )
        "#;

        let (result, registry) = run_wat(wat, &[]).await;
        let execution = result.unwrap();

        assert!(execution.result.is_success());
        assert!(execution.ident >= 0);
        assert!(execution.output.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_input_requires_allocate_export() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "run_e") (param i32 i32 i32))
            )
        "#;

        let (result, registry) = run_wat(wat, b"payload").await;

        assert!(matches!(
            result,
            Err(RuntimeError::EntryPointNotFound { ref name }) if name == ALLOCATE_EXPORT
        ));
        assert!(registry.is_empty());
    }
}
