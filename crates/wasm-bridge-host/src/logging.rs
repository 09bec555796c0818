//! `log_msg`: structured logging from guest code.
//!
//! Messages are both:
//! 1. Stored in the instance's [`CallContext`](wasm_bridge_core::CallContext)
//!    and returned with the execution
//! 2. Emitted through `tracing`, tagged with the instance identifier

use tracing::{debug, error, info, warn};

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::{GuestMemory, InstanceId, LogLevel};

use crate::api::{HostApi, read_string};

impl HostApi {
    /// Record a guest log message.
    ///
    /// Returns 0, or -1 when the logger capability is disabled. `level` uses
    /// 0=debug, 1=info, 2=warn, 3=error; anything else logs at info.
    pub fn log_msg(
        &self,
        memory: &dyn GuestMemory,
        msg_ptr: i32,
        msg_len: i32,
        level: i32,
        ident: InstanceId,
    ) -> Result<i32, BridgeError> {
        if !self.capabilities.logger.enabled {
            debug!(ident, "Guest log dropped: logger capability disabled");
            return Ok(-1);
        }

        let handle = self.registry.resolve(ident, false)?;
        let message = read_string(memory, msg_ptr, msg_len)?;
        let level = LogLevel::from_i32(level);

        match level {
            LogLevel::Debug => debug!(ident, guest_log = true, "{}", message),
            LogLevel::Info => info!(ident, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(ident, guest_log = true, "{}", message),
            LogLevel::Error => error!(ident, guest_log = true, "{}", message),
        }
        handle.context().log(level, message);

        Ok(0)
    }
}
