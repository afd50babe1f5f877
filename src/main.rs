#![cfg_attr(not(feature = "gpu"), allow(dead_code))]

mod allocator;
mod error;
#[cfg(feature = "gpu")]
mod gpu;
mod orchestrator;
mod patterns;
mod progress;
#[cfg(test)]
mod sim;
mod stats;
mod traits;
mod verifier;

use std::time::Duration;

use bytesize::ByteSize;
use clap::error::ErrorKind;
use clap::Parser;
use error::MemtestError;
use orchestrator::RunSummary;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stats::RunStats;
use traits::{TestConfig, DEFAULT_DECREMENT, DEFAULT_ITERATIONS, DEFAULT_STRIDE_SIZE};

#[cfg(feature = "gpu")]
use std::time::Instant;

#[cfg(feature = "gpu")]
use gpu::{enumerate_gpus, select_gpu, WgpuBackend};

#[cfg(feature = "gpu")]
use orchestrator::ErrorTestOrchestrator;

#[cfg(feature = "gpu")]
use progress::ConsoleProgress;

const MB: u64 = 1024 * 1024;

/// All iterations completed without a mismatch.
const EXIT_CLEAN: i32 = 0;
/// Backend failure, exhausted allocation search or bad configuration.
const EXIT_FAILURE: i32 = 1;
/// A stride read back differently from what was written.
const EXIT_MEMORY_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "GPU VRAM retention tester", long_about = None)]
struct Args {
    /// Number of test iterations
    #[arg(default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,

    /// Bytes per write/read/compare cycle, in KiB
    #[arg(long, default_value_t = DEFAULT_STRIDE_SIZE / 1024)]
    stride_kib: u64,

    /// Step the allocation search shrinks by after a failure, in MB
    #[arg(long, default_value_t = DEFAULT_DECREMENT / MB)]
    decrement_mb: u64,

    /// Start the allocation search here instead of at the reported size
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Seed for the random pattern (default: from entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Select GPU by index (use --list-gpus to see available)
    #[arg(long)]
    gpu_index: Option<usize>,

    /// List available GPUs and exit
    #[arg(long, default_value_t = false)]
    list_gpus: bool,

    /// Timeout per GPU operation in seconds
    #[arg(long, default_value_t = 30)]
    gpu_timeout: u64,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn test_config(&self) -> TestConfig {
        TestConfig {
            iterations: self.iterations,
            stride_size: self.stride_kib.saturating_mul(1024),
            decrement: self.decrement_mb.saturating_mul(MB),
            initial_size: self.memory_mb.map(|mb| mb.saturating_mul(MB)),
            ..Default::default()
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn exit_code(result: &Result<RunSummary, MemtestError>) -> i32 {
    match result {
        Ok(summary) if summary.error_found() => EXIT_MEMORY_ERROR,
        Ok(_) => EXIT_CLEAN,
        Err(_) => EXIT_FAILURE,
    }
}

/// Exit status for a command line clap refused. Help and version requests
/// are clean exits; clap's own status 2 would read as a memory error.
fn parse_error_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_CLEAN,
        _ => EXIT_FAILURE,
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(parse_error_exit_code(&e));
        }
    };
    init_logging(args.verbose);

    // Handle --list-gpus early
    if args.list_gpus {
        #[cfg(feature = "gpu")]
        {
            let gpus = enumerate_gpus();
            if gpus.is_empty() {
                println!("No GPUs found.");
            } else {
                println!("Available GPUs:");
                for gpu_info in &gpus {
                    println!("  {}", gpu_info);
                }
                println!();
                println!("Use --gpu-index N to select a specific GPU");
            }
        }
        #[cfg(not(feature = "gpu"))]
        {
            println!("GPU support not compiled. Build with: cargo build --features gpu");
        }
        std::process::exit(EXIT_CLEAN);
    }

    #[cfg(feature = "gpu")]
    {
        std::process::exit(run_gpu_test(&args));
    }

    #[cfg(not(feature = "gpu"))]
    {
        eprintln!("Error: GPU support not compiled.");
        eprintln!("Build with: cargo build --features gpu");
        std::process::exit(EXIT_FAILURE);
    }
}

#[cfg(feature = "gpu")]
fn run_gpu_test(args: &Args) -> i32 {
    let config = args.test_config();

    println!("GPU Memory Retention Test");
    println!("=========================");
    println!("Iterations: {}", config.iterations);
    println!("Stride: {}", ByteSize::b(config.stride_size));
    println!("Allocation step: {}", ByteSize::b(config.decrement));
    if let Some(seed) = args.seed {
        println!("Seed: {}", seed);
    }
    println!();

    let start_time = Instant::now();
    let mut tester =
        ErrorTestOrchestrator::new(config, make_rng(args.seed), ConsoleProgress::new());

    let result = tester.run_iterations(|iteration| {
        let (adapter, gpu_info) = select_gpu(args.gpu_index)?;
        log::debug!("Iteration {} on {}", iteration + 1, gpu_info);
        WgpuBackend::open(&adapter, &gpu_info, args.gpu_timeout)
    });
    tester.sink_mut().finish();

    print_summary(&result, tester.stats(), start_time.elapsed());
    exit_code(&result)
}

fn print_summary(result: &Result<RunSummary, MemtestError>, stats: &RunStats, elapsed: Duration) {
    println!();
    println!("Test Complete");
    println!("=============");
    if let Ok(summary) = result {
        println!("Iterations completed: {}", summary.iterations_completed);
    }
    println!("Allocation attempts: {}", stats.allocation_attempts());
    println!("Patterns completed: {}", stats.patterns_completed());
    println!(
        "Total bytes verified: {} ({} strides)",
        ByteSize::b(stats.bytes_verified()),
        stats.strides_verified()
    );
    println!(
        "Duration: {}",
        humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
    );

    match result {
        Ok(RunSummary {
            failure: Some((iteration, mismatch)),
            ..
        }) => {
            println!();
            println!(
                "Found possible error: iteration {}, pattern {}, offset {} (0x{:X})",
                iteration + 1,
                mismatch.pattern,
                mismatch.offset,
                mismatch.offset
            );
        }
        Ok(_) => {
            println!();
            println!("SUCCESS: No GPU memory errors detected!");
        }
        Err(e) => {
            eprintln!();
            eprintln!("GPU test error: {}", e);
        }
    }
}
