//! Test orchestration.
//!
//! One run sizes an allocation, sweeps it with every configured pattern and
//! releases it. `run_iterations` repeats that against a freshly opened
//! backend until an iteration finds a mismatch.

use log::{debug, info};
use rand::RngCore;

use crate::allocator::{Allocation, BufferAllocator};
use crate::error::{BackendError, MemtestError};
use crate::patterns::Pattern;
use crate::stats::RunStats;
use crate::traits::{ComputeBackend, Mismatch, ProgressSink, TestConfig, TestOutcome};
use crate::verifier::{StagingBuffers, StrideVerifier};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Sizing,
    Allocated,
    Testing(Pattern),
    Error,
    Done,
    Released,
}

/// Result of the outer iteration loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations that ran to completion, including a failing one.
    pub iterations_completed: u32,
    /// Zero-based iteration and mismatch of the first failure.
    pub failure: Option<(u32, Mismatch)>,
}

impl RunSummary {
    /// True if any iteration found a mismatch.
    pub fn error_found(&self) -> bool {
        self.failure.is_some()
    }
}

/// Drives allocation and verification across patterns and iterations.
pub struct ErrorTestOrchestrator<R, S> {
    config: TestConfig,
    rng: R,
    sink: S,
    stats: RunStats,
    state: RunState,
}

impl<R: RngCore, S: ProgressSink> ErrorTestOrchestrator<R, S> {
    /// Creates an orchestrator drawing random bytes from `rng` and reporting
    /// to `sink`.
    pub fn new(config: TestConfig, rng: R, sink: S) -> Self {
        Self {
            config,
            rng,
            sink,
            stats: RunStats::new(),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs up to `config.iterations` allocate-and-verify cycles.
    ///
    /// `open` is called once per iteration to discover the device and create
    /// its context and queue; the backend is dropped when the iteration
    /// ends. Stops at the first iteration that finds a mismatch.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure or allocation exhaustion.
    pub fn run_iterations<B, F>(&mut self, mut open: F) -> Result<RunSummary, MemtestError>
    where
        B: ComputeBackend,
        F: FnMut(u32) -> Result<B, BackendError>,
    {
        self.config.validate()?;

        let iterations = self.config.iterations;
        for iteration in 0..iterations {
            info!("Iteration {}/{}", iteration + 1, iterations);
            let mut backend = open(iteration)?;
            let outcome = self.find_errors(&mut backend)?;
            drop(backend);
            info!(
                "Iteration {} {} on {} bytes (state {:?})",
                iteration + 1,
                if outcome.error_found() { "failed" } else { "passed" },
                outcome.allocated_bytes,
                self.state()
            );

            if let Some(mismatch) = outcome.mismatch {
                return Ok(RunSummary {
                    iterations_completed: iteration + 1,
                    failure: Some((iteration, mismatch)),
                });
            }
        }

        Ok(RunSummary {
            iterations_completed: iterations,
            failure: None,
        })
    }

    /// Sizes an allocation on `backend`, tests every configured pattern
    /// against it and releases it.
    ///
    /// The allocation is released on every path out, including backend
    /// failures during verification.
    pub fn find_errors<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
    ) -> Result<TestOutcome, MemtestError> {
        self.state = RunState::Idle;
        let stride_size = usize::try_from(self.config.stride_size).map_err(|_| {
            MemtestError::Config(format!(
                "stride size {} does not fit in host memory",
                self.config.stride_size
            ))
        })?;
        self.sink.device_opened(backend.device());
        let initial = self
            .config
            .initial_size
            .unwrap_or(backend.device().global_memory);

        self.transition(RunState::Sizing);
        let mut staging = StagingBuffers::new(stride_size);
        let allocator = BufferAllocator::new(self.config.decrement);
        let allocation = match allocator.allocate(
            backend,
            initial,
            staging.input(),
            &mut self.sink,
            &mut self.stats,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.transition(RunState::Error);
                self.transition(RunState::Released);
                return Err(e);
            }
        };
        self.transition(RunState::Allocated);

        let allocated_bytes = allocation.size();
        let result = self.sweep_patterns(backend, &allocation, &mut staging);
        match &result {
            Ok(None) => self.transition(RunState::Done),
            Ok(Some(_)) | Err(_) => self.transition(RunState::Error),
        }

        backend.release(allocation.into_buffer());
        self.transition(RunState::Released);

        let mismatch = result?;
        Ok(TestOutcome {
            allocated_bytes,
            mismatch,
        })
    }

    fn sweep_patterns<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        allocation: &Allocation<B::Buffer>,
        staging: &mut StagingBuffers,
    ) -> Result<Option<Mismatch>, BackendError> {
        let verifier = StrideVerifier::new(self.config.stride_size, self.config.report_interval);
        let patterns = self.config.patterns.clone();

        for pattern in patterns {
            self.transition(RunState::Testing(pattern));
            let mismatch = verifier.verify(
                backend,
                allocation,
                pattern,
                staging,
                &mut self.rng,
                &mut self.sink,
                &mut self.stats,
            )?;
            if mismatch.is_some() {
                return Ok(mismatch);
            }
        }
        Ok(None)
    }
}
