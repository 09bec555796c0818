//! Per-instance call context and the pending-result slot.
//!
//! This module provides:
//! - [`FfiResult`]: The tagged outcome of a result-producing host call
//! - [`CallContext`]: Ambient request, result slot, guest logs and guest output
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`GuestOutput`]: What the guest handed back through `return_result` / `return_error`

use std::time::Instant;

use wasm_bridge_common::{BridgeError, CoordinatedRequest};

/// Outcome of a host operation, waiting to be drained by the guest.
///
/// The guest only learns the size from the first call and the bytes from
/// the drain call, so a result is either a payload or an error text, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfiResult {
    /// Successful operation with its (possibly empty) payload.
    Payload(Vec<u8>),
    /// Failed operation with a diagnostic for the guest.
    Error(String),
}

impl FfiResult {
    /// An empty successful payload.
    pub fn empty() -> Self {
        Self::Payload(Vec::new())
    }

    /// Returns `true` if this result carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The bytes the drain call writes into guest memory.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Payload(bytes) => bytes,
            Self::Error(message) => message.as_bytes(),
        }
    }

    /// Serialized size reported to the guest before it drains the slot.
    pub fn ffi_size(&self) -> Result<i32, BridgeError> {
        let len = self.as_bytes().len();
        i32::try_from(len).map_err(|_| BridgeError::ResultTooLarge { len })
    }

    /// Consume the result, yielding the bytes to write into guest memory.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Payload(bytes) => bytes,
            Self::Error(message) => message.into_bytes(),
        }
    }
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Decode the guest-side level (0=debug, 1=info, 2=warn, 3=error).
    ///
    /// Unknown values default to `Info`.
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => Self::Debug,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Response handed back by the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestOutput {
    /// The guest completed and returned these bytes.
    Result(Vec<u8>),
    /// The guest reported a failure.
    Error {
        /// Guest-defined error code.
        code: i32,
        /// Guest-supplied message.
        message: String,
    },
}

/// State attached to one instance for the duration of an invocation.
///
/// Only host functions running on behalf of the owning instance touch it.
#[derive(Debug, Default)]
pub struct CallContext {
    request: Option<CoordinatedRequest>,
    pending: Option<FfiResult>,
    output: Option<GuestOutput>,
    logs: Vec<LogEntry>,
}

impl CallContext {
    /// Create a context carrying the given ambient request.
    pub fn new(request: Option<CoordinatedRequest>) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    pub fn request(&self) -> Option<&CoordinatedRequest> {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> Option<&mut CoordinatedRequest> {
        self.request.as_mut()
    }

    /// Detach the ambient request, including any changes guests made to it.
    pub fn take_request(&mut self) -> Option<CoordinatedRequest> {
        self.request.take()
    }

    /// Returns `true` if a result is waiting to be drained.
    pub fn has_pending_result(&self) -> bool {
        self.pending.is_some()
    }

    /// Place a result into the slot and return its FFI size.
    ///
    /// Fails with [`BridgeError::ResultInProgress`] if the previous result has
    /// not been drained; the stored result is left untouched in that case.
    pub fn set_ffi_result(&mut self, result: FfiResult) -> Result<i32, BridgeError> {
        if self.pending.is_some() {
            return Err(BridgeError::ResultInProgress);
        }

        let size = result.ffi_size()?;
        self.pending = Some(result);
        Ok(size)
    }

    /// Remove and return the pending result.
    pub fn take_ffi_result(&mut self) -> Result<FfiResult, BridgeError> {
        self.pending.take().ok_or(BridgeError::NoPendingResult)
    }

    /// Add a guest log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }

    /// Record the guest's response. Returns the response it replaced, if any.
    pub fn set_output(&mut self, output: GuestOutput) -> Option<GuestOutput> {
        self.output.replace(output)
    }

    pub fn output(&self) -> Option<&GuestOutput> {
        self.output.as_ref()
    }

    pub fn take_output(&mut self) -> Option<GuestOutput> {
        self.output.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_size_matches_drained_bytes() {
        let ok = FfiResult::Payload(b"hello".to_vec());
        assert_eq!(ok.ffi_size().unwrap(), 5);
        assert_eq!(ok.into_bytes(), b"hello");

        let err = FfiResult::Error("capability is not enabled".into());
        assert!(err.is_error());
        assert_eq!(err.ffi_size().unwrap(), 25);
        assert_eq!(err.as_bytes(), b"capability is not enabled");
    }

    #[test]
    fn test_slot_rejects_second_result() {
        let mut ctx = CallContext::default();

        assert_eq!(ctx.set_ffi_result(FfiResult::Payload(b"one".to_vec())), Ok(3));
        assert!(ctx.has_pending_result());

        let second = ctx.set_ffi_result(FfiResult::Payload(b"two!".to_vec()));
        assert_eq!(second, Err(BridgeError::ResultInProgress));

        // The first result survives the rejected write
        assert_eq!(
            ctx.take_ffi_result(),
            Ok(FfiResult::Payload(b"one".to_vec()))
        );
    }

    #[test]
    fn test_take_empties_slot() {
        let mut ctx = CallContext::default();
        ctx.set_ffi_result(FfiResult::empty()).unwrap();

        assert!(ctx.take_ffi_result().is_ok());
        assert!(!ctx.has_pending_result());
        assert_eq!(ctx.take_ffi_result(), Err(BridgeError::NoPendingResult));

        // Slot is reusable after draining
        assert_eq!(ctx.set_ffi_result(FfiResult::Error("x".into())), Ok(1));
    }

    #[test]
    fn test_request_access() {
        let mut ctx = CallContext::new(Some(CoordinatedRequest::new("GET", "/", Vec::new())));
        assert_eq!(ctx.request().map(|r| r.method.as_str()), Some("GET"));

        if let Some(req) = ctx.request_mut() {
            req.method = "POST".into();
        }
        assert_eq!(ctx.take_request().map(|r| r.method), Some("POST".to_string()));
        assert!(ctx.request().is_none());
    }

    #[test]
    fn test_logs_and_output() {
        let mut ctx = CallContext::default();
        ctx.log(LogLevel::Info, "Hello".into());
        ctx.log(LogLevel::Error, "World".into());

        assert_eq!(ctx.logs().len(), 2);
        assert_eq!(ctx.logs()[1].level, LogLevel::Error);
        assert_eq!(ctx.take_logs().len(), 2);
        assert!(ctx.logs().is_empty());

        assert!(ctx.set_output(GuestOutput::Result(b"a".to_vec())).is_none());
        let replaced = ctx.set_output(GuestOutput::Result(b"b".to_vec()));
        assert_eq!(replaced, Some(GuestOutput::Result(b"a".to_vec())));
        assert_eq!(ctx.take_output(), Some(GuestOutput::Result(b"b".to_vec())));
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(LogLevel::from_i32(0), LogLevel::Debug);
        assert_eq!(LogLevel::from_i32(1), LogLevel::Info);
        assert_eq!(LogLevel::from_i32(2), LogLevel::Warn);
        assert_eq!(LogLevel::from_i32(3), LogLevel::Error);
        assert_eq!(LogLevel::from_i32(99), LogLevel::Info);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }
}
