//! `get_ffi_result`: second phase of every result-producing call.

use tracing::trace;

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::{GuestMemory, InstanceId};

use crate::api::HostApi;

impl HostApi {
    /// Copy the pending result to `dest_ptr` and clear the slot.
    ///
    /// The guest must have reserved at least the size the producing call
    /// returned. On a failed write the result is dropped all the same.
    pub fn get_ffi_result(
        &self,
        memory: &mut dyn GuestMemory,
        dest_ptr: i32,
        ident: InstanceId,
    ) -> Result<i32, BridgeError> {
        let handle = self.registry.resolve(ident, false)?;
        let result = handle.context().take_ffi_result()?;

        trace!(
            ident,
            len = result.as_bytes().len(),
            error = result.is_error(),
            "Draining result"
        );
        memory.write(dest_ptr, result.as_bytes())?;

        Ok(0)
    }
}
