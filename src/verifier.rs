//! Stride-by-stride pattern verification.

use log::{debug, warn};
use rand::RngCore;

use crate::allocator::Allocation;
use crate::error::BackendError;
use crate::patterns::Pattern;
use crate::stats::RunStats;
use crate::traits::{ComputeBackend, Mismatch, ProgressSink};

/// Host-side buffers for one stride, reused for every stride of a run.
#[derive(Debug)]
pub struct StagingBuffers {
    /// Pattern about to be written.
    input: Vec<u8>,
    /// Receives the readback.
    output: Vec<u8>,
}

impl StagingBuffers {
    /// Allocates both buffers at `stride_size` bytes.
    pub fn new(stride_size: usize) -> Self {
        Self {
            input: vec![0u8; stride_size],
            output: vec![0u8; stride_size],
        }
    }

    /// Returns the input buffer, which doubles as the sizing probe.
    pub fn input(&self) -> &[u8] {
        &self.input
    }
}

/// Writes, reads back and compares every stride of an allocation.
#[derive(Debug, Clone, Copy)]
pub struct StrideVerifier {
    stride_size: u64,
    report_interval: u64,
}

impl StrideVerifier {
    /// Creates a verifier that reports progress every `report_interval`
    /// strides.
    pub fn new(stride_size: u64, report_interval: u64) -> Self {
        Self {
            stride_size,
            report_interval: report_interval.max(1),
        }
    }

    /// Number of whole strides that fit in `allocation_size` bytes.
    pub fn stride_count(&self, allocation_size: u64) -> u64 {
        allocation_size / self.stride_size
    }

    /// Runs `pattern` over every stride of `allocation`.
    ///
    /// Returns the first mismatching stride, or `None` after a clean pass.
    /// Stops at the first mismatch; nothing after it is written.
    ///
    /// # Errors
    ///
    /// Any failed write, read or finish is returned as-is. Transfer failures
    /// are not retried.
    #[allow(clippy::too_many_arguments)]
    pub fn verify<B, R>(
        &self,
        backend: &mut B,
        allocation: &Allocation<B::Buffer>,
        pattern: Pattern,
        staging: &mut StagingBuffers,
        rng: &mut R,
        sink: &mut dyn ProgressSink,
        stats: &mut RunStats,
    ) -> Result<Option<Mismatch>, BackendError>
    where
        B: ComputeBackend,
        R: RngCore + ?Sized,
    {
        debug_assert_eq!(staging.input.len() as u64, self.stride_size);

        let buffer = allocation.buffer();
        let total = allocation.size() as f64;
        let strides = self.stride_count(allocation.size());
        debug!("{}: {} strides of {} bytes", pattern, strides, self.stride_size);

        for index in 0..strides {
            let offset = index * self.stride_size;

            // Stale output could already hold the expected bytes.
            rng.fill_bytes(&mut staging.output);
            pattern.fill(&mut staging.input, rng);

            backend.write(buffer, offset, &staging.input)?;
            backend.finish()?;
            backend.read(buffer, offset, &mut staging.output)?;
            backend.finish()?;

            if staging.input != staging.output {
                warn!("{}: readback mismatch in stride at offset {}", pattern, offset);
                sink.mismatch(offset, pattern);
                return Ok(Some(Mismatch { offset, pattern }));
            }
            stats.add_stride(self.stride_size);

            if index % self.report_interval == 0 {
                sink.report(offset as f64 / total, pattern);
            }
        }

        sink.report(1.0, pattern);
        stats.add_pattern();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::BufferAllocator;
    use crate::sim::{RecordingSink, SimBuffer, SimulatedBackend};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const STRIDE: u64 = 4096;

    fn allocate(backend: &mut SimulatedBackend, size: u64) -> Allocation<SimBuffer> {
        let probe = vec![0u8; STRIDE as usize];
        let allocation = BufferAllocator::new(STRIDE)
            .allocate(
                backend,
                size,
                &probe,
                &mut RecordingSink::default(),
                &mut RunStats::new(),
            )
            .unwrap();
        backend.writes.clear();
        backend.reads.clear();
        allocation
    }

    fn verify(
        backend: &mut SimulatedBackend,
        allocation: &Allocation<SimBuffer>,
        pattern: Pattern,
        sink: &mut RecordingSink,
        stats: &mut RunStats,
    ) -> Result<Option<Mismatch>, BackendError> {
        let mut staging = StagingBuffers::new(STRIDE as usize);
        let mut rng = StdRng::seed_from_u64(2024);
        StrideVerifier::new(STRIDE, 1000).verify(
            backend,
            allocation,
            pattern,
            &mut staging,
            &mut rng,
            sink,
            stats,
        )
    }

    #[test]
    fn test_clean_backend_passes_every_pattern() {
        let mut backend = SimulatedBackend::new(64 * STRIDE);
        let allocation = allocate(&mut backend, 64 * STRIDE);
        let mut stats = RunStats::new();

        for pattern in Pattern::all_patterns() {
            let mut sink = RecordingSink::default();
            let result = verify(&mut backend, &allocation, pattern, &mut sink, &mut stats);
            assert_eq!(result.unwrap(), None, "{} reported a false mismatch", pattern);
            assert_eq!(sink.reports.last(), Some(&(1.0, pattern)));
            assert!(sink.mismatches.is_empty());
        }

        assert_eq!(backend.writes.len(), 5 * 64);
        assert_eq!(stats.strides_verified(), 5 * 64);
        assert_eq!(stats.bytes_verified(), 5 * 64 * STRIDE);
        assert_eq!(stats.patterns_completed(), 5);
    }

    #[test]
    fn test_corrupt_stride_reported_and_stops() {
        // 10 strides; stride 7 starts at 28672.
        let mut backend = SimulatedBackend::new(40960).corrupt_byte_at(28672 + 1234);
        let allocation = allocate(&mut backend, 40960);
        let mut sink = RecordingSink::default();
        let mut stats = RunStats::new();

        let result = verify(
            &mut backend,
            &allocation,
            Pattern::AllOneBits,
            &mut sink,
            &mut stats,
        );

        assert_eq!(
            result.unwrap(),
            Some(Mismatch {
                offset: 28672,
                pattern: Pattern::AllOneBits,
            })
        );
        let expected: Vec<u64> = (0..=7).map(|i| i * STRIDE).collect();
        assert_eq!(backend.writes, expected);
        assert_eq!(backend.reads, expected);
        assert_eq!(sink.mismatches, vec![(28672, Pattern::AllOneBits)]);
        assert_eq!(stats.strides_verified(), 7);
        assert_eq!(stats.patterns_completed(), 0);
    }

    #[test]
    fn test_every_pattern_catches_single_bit_flip() {
        for pattern in Pattern::all_patterns() {
            let mut backend = SimulatedBackend::new(16 * STRIDE).corrupt_byte_at(5 * STRIDE);
            let allocation = allocate(&mut backend, 16 * STRIDE);
            let mut sink = RecordingSink::default();

            let result = verify(
                &mut backend,
                &allocation,
                pattern,
                &mut sink,
                &mut RunStats::new(),
            );

            let mismatch = result.unwrap().expect("bit flip went unnoticed");
            assert_eq!(mismatch.offset, 5 * STRIDE);
            assert_eq!(mismatch.pattern, pattern);
        }
    }

    #[test]
    fn test_reads_that_never_land_are_caught() {
        let mut backend = SimulatedBackend::new(8 * STRIDE).drop_reads();
        let allocation = allocate(&mut backend, 8 * STRIDE);
        let mut sink = RecordingSink::default();

        let result = verify(
            &mut backend,
            &allocation,
            Pattern::AllZeroBits,
            &mut sink,
            &mut RunStats::new(),
        );

        assert_eq!(result.unwrap().map(|m| m.offset), Some(0));
    }

    #[test]
    fn test_transfer_failure_is_fatal() {
        let mut backend = SimulatedBackend::new(8 * STRIDE).fail_read_at(2 * STRIDE);
        let allocation = allocate(&mut backend, 8 * STRIDE);
        let mut sink = RecordingSink::default();

        let result = verify(
            &mut backend,
            &allocation,
            Pattern::Random,
            &mut sink,
            &mut RunStats::new(),
        );

        assert!(matches!(
            result,
            Err(BackendError::Transfer { op: "read", offset, .. }) if offset == 2 * STRIDE
        ));
        assert_eq!(backend.writes, vec![0, STRIDE, 2 * STRIDE]);
    }

    #[test]
    fn test_write_read_finish_ordering() {
        let mut backend = SimulatedBackend::new(3 * STRIDE);
        let allocation = allocate(&mut backend, 3 * STRIDE);
        let finishes_before = backend.finishes;

        verify(
            &mut backend,
            &allocation,
            Pattern::AlternatingBits01,
            &mut RecordingSink::default(),
            &mut RunStats::new(),
        )
        .unwrap();

        // One finish after each write and each read.
        assert_eq!(backend.finishes - finishes_before, 2 * 3);
        assert_eq!(backend.writes, backend.reads);
    }

    #[test]
    fn test_progress_reported_at_interval() {
        let mut backend = SimulatedBackend::new(10 * STRIDE);
        let allocation = allocate(&mut backend, 10 * STRIDE);
        let mut sink = RecordingSink::default();
        let mut staging = StagingBuffers::new(STRIDE as usize);
        let mut rng = StdRng::seed_from_u64(1);

        StrideVerifier::new(STRIDE, 4)
            .verify(
                &mut backend,
                &allocation,
                Pattern::AllZeroBits,
                &mut staging,
                &mut rng,
                &mut sink,
                &mut RunStats::new(),
            )
            .unwrap();

        let fractions: Vec<f64> = sink.reports.iter().map(|(f, _)| *f).collect();
        assert_eq!(fractions, vec![0.0, 0.4, 0.8, 1.0]);
    }

    #[test]
    fn test_partial_tail_stride_skipped() {
        let verifier = StrideVerifier::new(STRIDE, 1000);
        assert_eq!(verifier.stride_count(10 * STRIDE), 10);
        assert_eq!(verifier.stride_count(10 * STRIDE + 100), 10);
        assert_eq!(verifier.stride_count(STRIDE - 1), 0);
    }
}
