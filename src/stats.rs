//! Statistics tracking for VRAM testing.

/// Counters accumulated across all iterations of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    allocation_attempts: u64,
    strides_verified: u64,
    bytes_verified: u64,
    patterns_completed: u64,
}

impl RunStats {
    /// Creates a RunStats instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one allocation attempt.
    pub fn add_allocation_attempt(&mut self) {
        self.allocation_attempts += 1;
    }

    /// Counts one stride that read back correctly.
    pub fn add_stride(&mut self, bytes: u64) {
        self.strides_verified += 1;
        self.bytes_verified += bytes;
    }

    /// Counts one pattern that covered the whole allocation.
    pub fn add_pattern(&mut self) {
        self.patterns_completed += 1;
    }

    pub fn allocation_attempts(&self) -> u64 {
        self.allocation_attempts
    }

    pub fn strides_verified(&self) -> u64 {
        self.strides_verified
    }

    pub fn bytes_verified(&self) -> u64 {
        self.bytes_verified
    }

    pub fn patterns_completed(&self) -> u64 {
        self.patterns_completed
    }
}
