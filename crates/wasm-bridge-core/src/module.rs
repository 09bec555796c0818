//! Guest module compilation.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, Module};

use wasm_bridge_common::RuntimeError;

/// A compiled core WebAssembly module, cheap to clone and share.
#[derive(Clone)]
pub struct CompiledModule {
    module: Module,
    content_hash: String,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        validate_wasm_header(bytes)?;
        Self::compile(engine, bytes)
    }

    /// Read and compile a `.wasm` file.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(engine, &bytes)
    }

    /// Compile a module from WebAssembly text format.
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        Self::compile(engine, wat.as_bytes())
    }

    fn compile(engine: &Engine, source: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, source)
            .map_err(|e| RuntimeError::compilation_failed(format!("Module compilation failed: {e}")))?;

        let content_hash = compute_hash(source);
        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            module,
            content_hash,
        })
    }

    pub fn inner(&self) -> &Module {
        &self.module
    }

    /// Hash of the source the module was compiled from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Returns `true` if the module exports a function named `name`.
    pub fn exports_function(&self, name: &str) -> bool {
        self.module
            .exports()
            .any(|export| export.name() == name && export.ty().func().is_some())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Core module binary format version 1, little endian.
const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Check the `\0asm` magic number and version header.
fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
    if bytes.len() < 8 {
        return Err(RuntimeError::compilation_failed(
            "Invalid Wasm: file too small",
        ));
    }

    if &bytes[0..4] != b"\0asm" {
        return Err(RuntimeError::compilation_failed(
            "Invalid Wasm: bad magic number",
        ));
    }

    if bytes[4..8] != WASM_VERSION {
        return Err(RuntimeError::compilation_failed(
            "Invalid Wasm: unsupported module version",
        ));
    }

    Ok(())
}

fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
