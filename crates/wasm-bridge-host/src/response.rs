//! `return_result` / `return_error`: the guest's response to its invocation.

use tracing::{debug, warn};

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::{CallContext, GuestMemory, GuestOutput, InstanceId};

use crate::api::{HostApi, read_string};

impl HostApi {
    /// Capture the guest's response bytes.
    pub fn return_result(
        &self,
        memory: &dyn GuestMemory,
        ptr: i32,
        len: i32,
        ident: InstanceId,
    ) -> Result<i32, BridgeError> {
        let handle = self.registry.resolve(ident, false)?;
        let bytes = memory.read(ptr, len)?;

        debug!(ident, len = bytes.len(), "Guest returned result");
        record_output(ident, &mut handle.context(), GuestOutput::Result(bytes));
        Ok(0)
    }

    /// Capture a guest-reported failure.
    pub fn return_error(
        &self,
        memory: &dyn GuestMemory,
        code: i32,
        ptr: i32,
        len: i32,
        ident: InstanceId,
    ) -> Result<i32, BridgeError> {
        let handle = self.registry.resolve(ident, false)?;
        let message = read_string(memory, ptr, len)?;

        debug!(ident, code, message = %message, "Guest returned error");
        record_output(
            ident,
            &mut handle.context(),
            GuestOutput::Error { code, message },
        );
        Ok(0)
    }
}

fn record_output(ident: InstanceId, ctx: &mut CallContext, output: GuestOutput) {
    if ctx.set_output(output).is_some() {
        warn!(ident, "Guest response replaced an earlier one");
    }
}
