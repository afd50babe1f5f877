//! Error types for VRAM testing.
//!
//! A detected memory mismatch is not an error: it is reported through
//! [`TestOutcome`](crate::traits::TestOutcome). The types here cover backend
//! failures, allocation exhaustion and bad configuration.

use thiserror::Error;

/// Unified error type for vramtest operations.
#[derive(Error, Debug)]
pub enum MemtestError {
    /// A backend call failed outside the allocation search.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// No candidate size down to zero could be allocated and written.
    #[error(
        "Allocation exhausted: no size up to {initial} bytes was usable \
         ({attempts} attempts, {decrement} byte steps)"
    )]
    AllocationExhausted {
        initial: u64,
        decrement: u64,
        attempts: u64,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures reported by a compute backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No GPU adapter found.
    #[error("No GPU adapter found")]
    NoAdapter,

    /// Specified GPU adapter not found.
    #[error("GPU adapter {index} not found (available: {available:?})")]
    AdapterNotFound {
        index: usize,
        available: Vec<String>,
    },

    /// Failed to request GPU device.
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(String),

    /// Device buffer creation failed.
    #[error("Buffer creation of {size} bytes failed: {reason}")]
    BufferCreation { size: u64, reason: String },

    /// A host/device transfer or queue finish failed.
    #[error("{op} failed at offset {offset}: {reason}")]
    Transfer {
        op: &'static str,
        offset: u64,
        reason: String,
    },

    /// Buffer mapping failed.
    #[error("Buffer mapping failed: {0}")]
    BufferMapping(String),

    /// GPU operation timed out.
    #[error("GPU operation timed out after {0} seconds")]
    Timeout(u64),
}

impl BackendError {
    /// True for failures that mean the buffer was too large: creation was
    /// refused or the device rejected a write into it. The allocation search
    /// steps down on these and aborts on anything else.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            BackendError::BufferCreation { .. } | BackendError::Transfer { op: "write", .. }
        )
    }
}
