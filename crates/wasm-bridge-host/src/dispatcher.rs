//! Host function registration for Wasmtime linkers.
//!
//! Every host function is described by a [`HostFn`]: its import name, its
//! arity, and whether it may block. All of them take `i32` arguments with the
//! caller's instance identifier last, and return a single `i32`.
//!
//! # Failure handling
//!
//! A host function never traps the guest. Errors and panics inside an
//! operation are logged with the operation name and instance identifier and
//! reported to the guest as `-1`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error, warn};
use wasmtime::{FuncType, Linker, Val, ValType};

use wasm_bridge_common::{BridgeError, RuntimeError};
use wasm_bridge_core::{CallerMemory, GuestMemory, WorkerContext};

use crate::api::HostApi;

/// Import module all host functions are linked under.
pub const HOST_MODULE: &str = "env";

/// Status returned to the guest when a host call fails.
pub const CALL_FAILED: i32 = -1;

/// The host functions guests can import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFn {
    /// `request_get_field(field_type, key_ptr, key_len, ident) -> size`
    RequestGetField,
    /// `request_set_field(field_type, key_ptr, key_len, val_ptr, val_len, ident) -> size`
    RequestSetField,
    /// `get_ffi_result(dest_ptr, ident) -> 0`
    GetFfiResult,
    /// `log_msg(msg_ptr, msg_len, level, ident) -> 0`
    LogMsg,
    /// `return_result(ptr, len, ident) -> 0`
    ReturnResult,
    /// `return_error(code, ptr, len, ident) -> 0`
    ReturnError,
}

impl HostFn {
    pub const ALL: [HostFn; 6] = [
        HostFn::RequestGetField,
        HostFn::RequestSetField,
        HostFn::GetFfiResult,
        HostFn::LogMsg,
        HostFn::ReturnResult,
        HostFn::ReturnError,
    ];

    /// Import name under [`HOST_MODULE`].
    pub fn name(self) -> &'static str {
        match self {
            HostFn::RequestGetField => "request_get_field",
            HostFn::RequestSetField => "request_set_field",
            HostFn::GetFfiResult => "get_ffi_result",
            HostFn::LogMsg => "log_msg",
            HostFn::ReturnResult => "return_result",
            HostFn::ReturnError => "return_error",
        }
    }

    /// Number of `i32` parameters, including the trailing identifier.
    pub fn arity(self) -> usize {
        match self {
            HostFn::GetFfiResult => 2,
            HostFn::ReturnResult => 3,
            HostFn::RequestGetField | HostFn::LogMsg | HostFn::ReturnError => 4,
            HostFn::RequestSetField => 6,
        }
    }

    /// Whether the operation may block the calling thread.
    pub fn is_blocking(self) -> bool {
        false
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Run the operation on already-coerced arguments.
    pub fn invoke(
        self,
        api: &HostApi,
        memory: &mut dyn GuestMemory,
        args: &[i32],
    ) -> Result<i32, BridgeError> {
        match (self, args) {
            (HostFn::RequestGetField, &[field_type, key_ptr, key_len, ident]) => {
                api.request_get_field(&*memory, field_type, key_ptr, key_len, ident)
            }
            (HostFn::RequestSetField, &[field_type, key_ptr, key_len, val_ptr, val_len, ident]) => {
                api.request_set_field(
                    &*memory, field_type, key_ptr, key_len, val_ptr, val_len, ident,
                )
            }
            (HostFn::GetFfiResult, &[dest_ptr, ident]) => {
                api.get_ffi_result(memory, dest_ptr, ident)
            }
            (HostFn::LogMsg, &[msg_ptr, msg_len, level, ident]) => {
                api.log_msg(&*memory, msg_ptr, msg_len, level, ident)
            }
            (HostFn::ReturnResult, &[ptr, len, ident]) => {
                api.return_result(&*memory, ptr, len, ident)
            }
            (HostFn::ReturnError, &[code, ptr, len, ident]) => {
                api.return_error(&*memory, code, ptr, len, ident)
            }
            _ => Err(BridgeError::invalid_argument(format!(
                "{} expects {} arguments, got {}",
                self.name(),
                self.arity(),
                args.len()
            ))),
        }
    }

    /// Run the operation, isolating the guest from errors and panics.
    pub fn call(self, api: &HostApi, memory: &mut dyn GuestMemory, args: &[i32]) -> i32 {
        let ident = args.last().copied();

        match catch_unwind(AssertUnwindSafe(|| self.invoke(api, memory, args))) {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                // Out-of-order calls are guest bugs the guest already sees as -1
                if err.is_protocol_misuse() {
                    debug!(host_fn = self.name(), ident, error = %err, "Host call rejected");
                } else {
                    warn!(host_fn = self.name(), ident, error = %err, "Host call failed");
                }
                CALL_FAILED
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(host_fn = self.name(), ident, panic = %message, "Host call panicked");
                CALL_FAILED
            }
        }
    }
}

impl std::fmt::Display for HostFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Register every [`HostFn`] on a core module linker.
///
/// # Errors
///
/// Returns an error if a function is already defined on the linker.
pub fn register_all(
    linker: &mut Linker<WorkerContext>,
    api: Arc<HostApi>,
) -> Result<(), RuntimeError> {
    for host_fn in HostFn::ALL {
        register(linker, Arc::clone(&api), host_fn)?;
    }
    Ok(())
}

/// Register a single host function as `env::<name>`.
pub fn register(
    linker: &mut Linker<WorkerContext>,
    api: Arc<HostApi>,
    host_fn: HostFn,
) -> Result<(), RuntimeError> {
    let ty = FuncType::new(
        linker.engine(),
        std::iter::repeat(ValType::I32).take(host_fn.arity()),
        [ValType::I32],
    );

    linker
        .func_new(HOST_MODULE, host_fn.name(), ty, move |mut caller, params, results| {
            let args: Vec<i32> = params.iter().filter_map(Val::i32).collect();

            let status = match CallerMemory::new(&mut caller) {
                Ok(mut memory) => host_fn.call(&api, &mut memory, &args),
                Err(err) => {
                    warn!(
                        host_fn = host_fn.name(),
                        ident = args.last().copied(),
                        error = %err,
                        "Host call failed"
                    );
                    CALL_FAILED
                }
            };

            if let Some(slot) = results.first_mut() {
                *slot = Val::I32(status);
            }
            Ok(())
        })
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register {host_fn}: {e}"))
        })?;

    Ok(())
}
