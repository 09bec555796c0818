//! Host functions for wasm-bridge guests.
//!
//! Guests import these from the `env` module. Every function takes `i32`
//! arguments ending with the caller's instance identifier and returns an
//! `i32` status or size.
//!
//! # Interfaces
//!
//! - [`request`]: Capability-gated access to the ambient request
//! - [`ffi_result`]: Draining the pending result of the previous call
//! - [`logging`]: Structured logging from guest code
//! - [`response`]: The guest's own result or error
//!
//! # Two-phase results
//!
//! Operations that produce data store it in the instance's single
//! pending-result slot and return its size. The guest reserves that many
//! bytes and calls `get_ffi_result` to copy them out, which clears the slot.
//! A second producing call before the drain is rejected.
//!
//! # Security Model
//!
//! Request access goes through [`capabilities::RequestHandler`], which
//! enforces the static [`CapabilityConfig`](wasm_bridge_common::CapabilityConfig):
//! a disabled capability or disallowed operation is reported to the guest
//! as an error result, never as a trap.

pub mod api;
pub mod capabilities;
pub mod dispatcher;
pub mod ffi_result;
pub mod logging;
pub mod request;
pub mod response;

pub use api::HostApi;
pub use capabilities::{FieldType, RequestHandler};
pub use dispatcher::{CALL_FAILED, HOST_MODULE, HostFn, register, register_all};
pub use request::FieldOp;
