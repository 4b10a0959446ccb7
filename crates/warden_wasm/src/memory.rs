//! Linear-memory ceiling enforcement.
//!
//! Implemented as a store resource limiter: a growth request past the
//! ceiling is refused (the guest sees `memory.grow` return -1) and the
//! refusal is recorded so the run is classified as a resource violation
//! rather than a fault.

use warden_core::limits::WASM_PAGE_BYTES;

/// Per-store memory ceiling with peak tracking
#[derive(Debug)]
pub struct MemoryCeiling {
    max_bytes: usize,
    peak_bytes: usize,
    denied: bool,
}

impl MemoryCeiling {
    /// Create a ceiling in bytes
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes: usize::try_from(max_bytes).unwrap_or(usize::MAX),
            peak_bytes: 0,
            denied: false,
        }
    }

    /// Peak linear memory observed, in 64 KiB pages (rounded up)
    #[must_use]
    pub fn peak_pages(&self) -> u64 {
        (self.peak_bytes as u64).div_ceil(WASM_PAGE_BYTES)
    }

    /// Whether a growth request was refused
    #[must_use]
    pub const fn denied(&self) -> bool {
        self.denied
    }
}

impl wasmtime::ResourceLimiter for MemoryCeiling {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_bytes {
            self.denied = true;
            return Ok(false);
        }
        self.peak_bytes = self.peak_bytes.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        _desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(true)
    }
}
