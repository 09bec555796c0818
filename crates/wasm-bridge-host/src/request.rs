//! `request_get_field` / `request_set_field`.
//!
//! Both operations follow the two-phase protocol: the outcome is stored in
//! the instance's pending-result slot and the guest receives its size, then
//! drains the bytes with `get_ffi_result`.

use tracing::{debug, error};

use wasm_bridge_common::{BridgeError, CapabilityError};
use wasm_bridge_core::{FfiResult, GuestMemory, InstanceId};

use crate::api::HostApi;
use crate::capabilities::RequestHandler;

/// Which field operation produced a policy outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Get,
    Set,
}

impl FieldOp {
    /// Turn a policy outcome into the result stored for the guest.
    ///
    /// A missing key on read is an empty payload, so guests can check for
    /// optional fields. Every other failure is reported to the guest as text.
    pub fn normalize(self, outcome: Result<Vec<u8>, CapabilityError>) -> FfiResult {
        match (self, outcome) {
            (_, Ok(bytes)) => FfiResult::Payload(bytes),
            (FieldOp::Get, Err(CapabilityError::KeyNotFound)) => FfiResult::empty(),
            (_, Err(err)) => FfiResult::Error(err.to_string()),
        }
    }
}

impl HostApi {
    /// Look up `key` in the caller's request and stage the value.
    ///
    /// Returns the staged result's size.
    pub fn request_get_field(
        &self,
        memory: &dyn GuestMemory,
        field_type: i32,
        key_ptr: i32,
        key_len: i32,
        ident: InstanceId,
    ) -> Result<i32, BridgeError> {
        let handle = self.registry.resolve(ident, true)?;
        let key = memory.read(key_ptr, key_len)?;

        let mut ctx = handle.context();
        if ctx.request().is_none() {
            error!(ident, field_type, "request_get_field without an ambient request");
        }

        let outcome = RequestHandler::new(&self.capabilities.request, ctx.request_mut())
            .get_field(field_type, &key);
        let result = FieldOp::Get.normalize(outcome);
        if result.is_error() {
            debug!(
                ident,
                field_type,
                key = %String::from_utf8_lossy(&key),
                "request_get_field failed"
            );
        }

        ctx.set_ffi_result(result)
    }

    /// Write `value` under `key` in the caller's request.
    ///
    /// Stages an empty payload on success or the failure text otherwise, and
    /// returns its size.
    #[allow(clippy::too_many_arguments)]
    pub fn request_set_field(
        &self,
        memory: &dyn GuestMemory,
        field_type: i32,
        key_ptr: i32,
        key_len: i32,
        val_ptr: i32,
        val_len: i32,
        ident: InstanceId,
    ) -> Result<i32, BridgeError> {
        let handle = self.registry.resolve(ident, true)?;
        let key = memory.read(key_ptr, key_len)?;
        let value = memory.read(val_ptr, val_len)?;

        let mut ctx = handle.context();
        if ctx.request().is_none() {
            error!(ident, field_type, "request_set_field without an ambient request");
        }

        let outcome = RequestHandler::new(&self.capabilities.request, ctx.request_mut())
            .set_field(field_type, &key, &value)
            .map(|()| Vec::new());
        let result = FieldOp::Set.normalize(outcome);
        if result.is_error() {
            debug!(
                ident,
                field_type,
                key = %String::from_utf8_lossy(&key),
                "request_set_field failed"
            );
        }

        ctx.set_ffi_result(result)
    }
}
