//! Shared state behind every host function.

use std::sync::Arc;

use wasm_bridge_common::{BridgeError, CapabilityConfig};
use wasm_bridge_core::{GuestMemory, InstanceRegistry};

/// Host-side entry point for guest calls.
///
/// Each operation takes the calling instance's memory plus the raw `i32`
/// arguments the guest passed, and returns the `i32` the guest receives.
/// Failures surface as [`BridgeError`]; the dispatcher turns them into `-1`.
#[derive(Debug)]
pub struct HostApi {
    pub(crate) registry: Arc<InstanceRegistry>,
    pub(crate) capabilities: CapabilityConfig,
}

impl HostApi {
    pub fn new(registry: Arc<InstanceRegistry>, capabilities: CapabilityConfig) -> Self {
        Self {
            registry,
            capabilities,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn capabilities(&self) -> &CapabilityConfig {
        &self.capabilities
    }
}

/// Read a guest log or error message. Invalid UTF-8 is replaced rather than
/// rejected; field keys and values go through the raw bytes instead.
pub(crate) fn read_string(
    memory: &dyn GuestMemory,
    ptr: i32,
    len: i32,
) -> Result<String, BridgeError> {
    let bytes = memory.read(ptr, len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bridge_core::BufferMemory;

    #[test]
    fn test_read_string() {
        let mut memory = BufferMemory::new(32);
        let (ptr, len) = memory.place(4, b"hello").unwrap();

        assert_eq!(read_string(&memory, ptr, len).unwrap(), "hello");
        assert_eq!(read_string(&memory, ptr, 0).unwrap(), "");
    }

    #[test]
    fn test_read_string_lossy() {
        let mut memory = BufferMemory::new(8);
        let (ptr, len) = memory.place(0, &[b'a', 0xff, b'b']).unwrap();

        assert_eq!(read_string(&memory, ptr, len).unwrap(), "a\u{fffd}b");
    }

    #[test]
    fn test_read_string_rejects_negative_range() {
        let memory = BufferMemory::new(8);
        assert!(matches!(
            read_string(&memory, -1, 2),
            Err(BridgeError::MemoryAccess { .. })
        ));
    }
}
