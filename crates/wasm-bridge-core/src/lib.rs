//! Instance registry, call context and Wasmtime runner for wasm-bridge.
//!
//! This crate holds the state host functions operate on:
//! - [`InstanceRegistry`]: Process-wide identifier → [`InstanceHandle`] map
//! - [`CallContext`]: Per-instance request, pending-result slot, logs and output
//! - [`FfiResult`]: The tagged outcome a guest drains in a second call
//! - [`GuestMemory`]: Offset/length access to the calling instance's memory
//!
//! and the Wasmtime plumbing that runs guests against it:
//! - [`WasmEngine`], [`CompiledModule`], [`InstanceRunner`]
//!
//! # Architecture
//!
//! ```text
//!   guest ──(i32 args, ident)──▶ host function
//!                                   │
//!                                   ▼
//!                         InstanceRegistry::resolve(ident)
//!                                   │
//!                                   ▼
//!                    InstanceHandle ─▶ CallContext ─▶ pending FfiResult
//!                                   │
//!   guest ◀──(size / status)────────┘
//!   guest ──(dest ptr, ident)──▶ get_ffi_result ─▶ bytes written, slot cleared
//! ```

pub mod context;
pub mod engine;
pub mod instance;
pub mod memory;
pub mod module;
pub mod registry;
pub mod store;

pub use context::{CallContext, FfiResult, GuestOutput, LogEntry, LogLevel};
pub use engine::WasmEngine;
pub use instance::{Execution, ExecutionResult, InstanceRunner};
pub use memory::{BufferMemory, CallerMemory, GuestMemory};
pub use module::CompiledModule;
pub use registry::{InstanceHandle, InstanceId, InstanceRegistry, Registration};
pub use store::{ExecutionMetrics, WorkerContext, create_store};
