//! Guest linear memory access.
//!
//! Host functions receive offsets and lengths as raw `i32` values. The
//! [`GuestMemory`] trait turns those into checked reads and writes over the
//! calling instance's memory. Range validation beyond rejecting negative
//! values is left to the implementation (for Wasmtime, the engine itself).

use wasm_bridge_common::BridgeError;
use wasmtime::{Caller, Extern, Memory};

use crate::store::WorkerContext;

/// Read/write access to one instance's linear memory.
pub trait GuestMemory {
    /// Read `len` bytes starting at `offset`.
    fn read(&self, offset: i32, len: i32) -> Result<Vec<u8>, BridgeError>;

    /// Write `data` starting at `offset`.
    fn write(&mut self, offset: i32, data: &[u8]) -> Result<(), BridgeError>;
}

/// Convert a guest `(offset, len)` pair into a host range start and length.
fn to_range(offset: i32, len: i32) -> Result<(usize, usize), BridgeError> {
    let start = usize::try_from(offset)
        .map_err(|_| BridgeError::memory_access(format!("negative offset {offset}")))?;
    let len = usize::try_from(len)
        .map_err(|_| BridgeError::memory_access(format!("negative length {len}")))?;
    Ok((start, len))
}

/// Memory of the instance currently calling into the host.
///
/// Wasmtime only grants memory access through the store, so this is bound to
/// the [`Caller`] of a single host call.
pub struct CallerMemory<'a, 'c> {
    caller: &'a mut Caller<'c, WorkerContext>,
    memory: Memory,
}

impl<'a, 'c> CallerMemory<'a, 'c> {
    /// Bind to the guest's exported `memory`.
    pub fn new(caller: &'a mut Caller<'c, WorkerContext>) -> Result<Self, BridgeError> {
        let memory = caller
            .get_export("memory")
            .and_then(Extern::into_memory)
            .ok_or_else(|| BridgeError::memory_access("memory export not found in guest module"))?;

        Ok(Self { caller, memory })
    }
}

impl GuestMemory for CallerMemory<'_, '_> {
    fn read(&self, offset: i32, len: i32) -> Result<Vec<u8>, BridgeError> {
        let (start, len) = to_range(offset, len)?;
        let mut buf = vec![0u8; len];
        self.memory
            .read(&*self.caller, start, &mut buf)
            .map_err(|e| BridgeError::memory_access(format!("read {len} bytes at {start}: {e}")))?;
        Ok(buf)
    }

    fn write(&mut self, offset: i32, data: &[u8]) -> Result<(), BridgeError> {
        let (start, _) = to_range(offset, 0)?;
        self.memory.write(&mut *self.caller, start, data).map_err(|e| {
            BridgeError::memory_access(format!("write {} bytes at {start}: {e}", data.len()))
        })
    }
}

/// A plain byte buffer standing in for guest memory.
///
/// Lets host operations be driven without a running VM, e.g. from tools
/// that replay guest calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferMemory {
    bytes: Vec<u8>,
}

impl BufferMemory {
    /// Create a zeroed buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    /// Copy `data` to `offset`, returning the `(offset, len)` pair a guest would pass.
    pub fn place(&mut self, offset: i32, data: &[u8]) -> Result<(i32, i32), BridgeError> {
        self.write(offset, data)?;
        let len = i32::try_from(data.len())
            .map_err(|_| BridgeError::invalid_argument("data does not fit an i32 length"))?;
        Ok((offset, len))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl GuestMemory for BufferMemory {
    fn read(&self, offset: i32, len: i32) -> Result<Vec<u8>, BridgeError> {
        let (start, len) = to_range(offset, len)?;
        start
            .checked_add(len)
            .and_then(|end| self.bytes.get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                BridgeError::memory_access(format!(
                    "read of {len} bytes at {start} exceeds memory size {}",
                    self.bytes.len()
                ))
            })
    }

    fn write(&mut self, offset: i32, data: &[u8]) -> Result<(), BridgeError> {
        let (start, _) = to_range(offset, 0)?;
        let size = self.bytes.len();
        let target = start
            .checked_add(data.len())
            .and_then(|end| self.bytes.get_mut(start..end))
            .ok_or_else(|| {
                BridgeError::memory_access(format!(
                    "write of {} bytes at {start} exceeds memory size {size}",
                    data.len()
                ))
            })?;
        target.copy_from_slice(data);
        Ok(())
    }
}
