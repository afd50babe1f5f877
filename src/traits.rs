//! Core traits and shared types for VRAM testing.
//!
//! `ComputeBackend` is the seam between the test logic and a concrete GPU
//! API; `ProgressSink` is where progress and diagnostics go.

use crate::error::{BackendError, MemtestError};
use crate::patterns::Pattern;

/// Default number of outer test iterations.
pub const DEFAULT_ITERATIONS: u32 = 10;

/// Default stride: 2^16 machine words of 8 bytes.
pub const DEFAULT_STRIDE_SIZE: u64 = 512 * 1024;

/// Default step for the allocation search (64 MB).
pub const DEFAULT_DECREMENT: u64 = 64 * 1024 * 1024;

/// Progress is reported every this many strides.
pub const DEFAULT_REPORT_INTERVAL: u64 = 1000;

/// Largest accepted stride (1 GiB). Both staging buffers are this size on
/// the host.
pub const MAX_STRIDE_SIZE: u64 = 1024 * 1024 * 1024;

/// Information about the device under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Platform or API the device is driven through.
    pub platform_name: String,
    /// Device name (e.g., "NVIDIA GeForce RTX 4090").
    pub device_name: String,
    /// Global memory as reported by the backend, in bytes.
    pub global_memory: u64,
}

/// A compute backend able to allocate and transfer device memory.
///
/// `write` and `read` block until the transfer has landed. Implementations
/// must not reorder a read ahead of a preceding write to the same buffer.
pub trait ComputeBackend {
    /// Handle to one device buffer.
    type Buffer;

    /// Returns the device this backend is bound to.
    fn device(&self) -> &DeviceInfo;

    /// Creates a read/write device buffer of `size` bytes.
    fn create_buffer(&mut self, size: u64) -> Result<Self::Buffer, BackendError>;

    /// Copies `data` into `buffer` at `offset`.
    fn write(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Copies `out.len()` bytes from `buffer` at `offset` into `out`.
    fn read(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), BackendError>;

    /// Blocks until all queued work has completed.
    fn finish(&mut self) -> Result<(), BackendError>;

    /// Releases a buffer.
    fn release(&mut self, buffer: Self::Buffer);
}

/// Receives progress and diagnostics from a test run.
pub trait ProgressSink {
    /// Reports how far through the allocation `pattern` has got.
    fn report(&mut self, fraction_complete: f64, pattern: Pattern);

    /// Called when a run starts on `device`.
    fn device_opened(&mut self, _device: &DeviceInfo) {}

    /// Called before each allocation attempt.
    fn allocation_attempt(&mut self, _size: u64) {}

    /// Called once the allocation search has settled on a size.
    fn allocated(&mut self, _size: u64) {}

    /// Called when a stride reads back differently from what was written.
    fn mismatch(&mut self, _offset: u64, _pattern: Pattern) {}
}

/// Configuration for a test run.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Number of outer iterations.
    pub iterations: u32,
    /// Bytes per write/read/compare cycle.
    pub stride_size: u64,
    /// Step the allocation search shrinks by after a failure.
    pub decrement: u64,
    /// Seed for the allocation search; `None` uses the device's reported memory.
    pub initial_size: Option<u64>,
    /// Patterns to test, in order.
    pub patterns: Vec<Pattern>,
    /// Strides between progress reports.
    pub report_interval: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            stride_size: DEFAULT_STRIDE_SIZE,
            decrement: DEFAULT_DECREMENT,
            initial_size: None,
            patterns: Pattern::all_patterns(),
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl TestConfig {
    /// Checks the configuration for values the test loop cannot run with.
    pub fn validate(&self) -> Result<(), MemtestError> {
        if self.iterations == 0 {
            return Err(MemtestError::Config("iterations must be at least 1".into()));
        }
        if self.stride_size == 0 || self.stride_size % 4 != 0 {
            return Err(MemtestError::Config(format!(
                "stride size must be a non-zero multiple of 4 bytes, got {}",
                self.stride_size
            )));
        }
        if self.stride_size > MAX_STRIDE_SIZE {
            return Err(MemtestError::Config(format!(
                "stride size {} exceeds the {} byte maximum",
                self.stride_size, MAX_STRIDE_SIZE
            )));
        }
        if self.decrement == 0 {
            return Err(MemtestError::Config("decrement must be non-zero".into()));
        }
        if self.initial_size == Some(0) {
            return Err(MemtestError::Config("memory size must be non-zero".into()));
        }
        if let Some(initial) = self.initial_size {
            if self.stride_size > initial {
                return Err(MemtestError::Config(format!(
                    "stride size {} is larger than the {} byte memory size",
                    self.stride_size, initial
                )));
            }
        }
        if self.patterns.is_empty() {
            return Err(MemtestError::Config("at least one pattern is required".into()));
        }
        if self.report_interval == 0 {
            return Err(MemtestError::Config("report interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// The first stride that read back differently from what was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Byte offset of the stride's start.
    pub offset: u64,
    /// Pattern active when the mismatch was found.
    pub pattern: Pattern,
}

/// Result of one allocate-and-verify cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Size of the allocation that was tested.
    pub allocated_bytes: u64,
    /// The first mismatch, if any.
    pub mismatch: Option<Mismatch>,
}

impl TestOutcome {
    /// True if any stride failed to read back.
    pub fn error_found(&self) -> bool {
        self.mismatch.is_some()
    }
}
