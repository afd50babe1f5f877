//! Allocation sizing.
//!
//! Drivers reserve part of the memory they report, so the reported size is
//! only a starting point. The allocator steps down from it until a buffer
//! is both created and accepts a stride-sized write.

use log::{debug, info, warn};

use crate::error::{BackendError, MemtestError};
use crate::stats::RunStats;
use crate::traits::{ComputeBackend, ProgressSink};

/// A device buffer that has accepted at least one stride write.
#[derive(Debug)]
pub struct Allocation<B> {
    buffer: B,
    size: u64,
}

impl<B> Allocation<B> {
    /// Returns the device buffer.
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Returns the size of the allocation in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Gives up the buffer, for release.
    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

/// Finds the largest usable allocation by stepping down on failure.
#[derive(Debug, Clone, Copy)]
pub struct BufferAllocator {
    decrement: u64,
}

impl BufferAllocator {
    /// Creates an allocator that shrinks by `decrement` bytes per failure.
    pub fn new(decrement: u64) -> Self {
        Self { decrement }
    }

    /// Upper bound on attempts for a search starting at `initial`.
    pub fn max_attempts(&self, initial: u64) -> u64 {
        initial.div_ceil(self.decrement)
    }

    /// Allocates the largest buffer, at most `initial` bytes, that accepts
    /// `probe` written at offset 0.
    ///
    /// # Errors
    ///
    /// Returns `MemtestError::AllocationExhausted` once the candidate size
    /// would drop to zero, and `MemtestError::Config` for a zero `initial`
    /// or decrement. Backend failures other than a refused create or write
    /// (a timed out `finish`, a lost device) end the search as
    /// `MemtestError::Backend`.
    pub fn allocate<B: ComputeBackend>(
        &self,
        backend: &mut B,
        initial: u64,
        probe: &[u8],
        sink: &mut dyn ProgressSink,
        stats: &mut RunStats,
    ) -> Result<Allocation<B::Buffer>, MemtestError> {
        if initial == 0 {
            return Err(MemtestError::Config("initial allocation size is zero".into()));
        }
        if self.decrement == 0 {
            return Err(MemtestError::Config("allocation decrement is zero".into()));
        }

        debug!(
            "Sizing from {} bytes in {} byte steps, at most {} attempts",
            initial,
            self.decrement,
            self.max_attempts(initial)
        );

        let mut size = initial;
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            stats.add_allocation_attempt();
            sink.allocation_attempt(size);
            debug!("Allocation attempt {} at {} bytes", attempts, size);

            match Self::try_allocate(backend, size, probe) {
                Ok(buffer) => {
                    info!("Allocated {} bytes after {} attempts", size, attempts);
                    sink.allocated(size);
                    return Ok(Allocation { buffer, size });
                }
                Err(e) if e.is_allocation_failure() => {
                    warn!("Allocation of {} bytes failed: {}", size, e)
                }
                Err(e) => return Err(e.into()),
            }

            if size <= self.decrement {
                return Err(MemtestError::AllocationExhausted {
                    initial,
                    decrement: self.decrement,
                    attempts,
                });
            }
            size -= self.decrement;
        }
    }

    /// Creates a buffer and pushes one write through it, releasing the
    /// buffer again if the write or finish fails.
    fn try_allocate<B: ComputeBackend>(
        backend: &mut B,
        size: u64,
        probe: &[u8],
    ) -> Result<B::Buffer, BackendError> {
        let buffer = backend.create_buffer(size)?;
        let probed = backend
            .write(&buffer, 0, probe)
            .and_then(|()| backend.finish());

        match probed {
            Ok(()) => Ok(buffer),
            Err(e) => {
                backend.release(buffer);
                Err(e)
            }
        }
    }
}
