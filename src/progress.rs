//! Console progress reporting.

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::patterns::Pattern;
use crate::traits::{DeviceInfo, ProgressSink};

/// Bar resolution: one step per tenth of a percent.
const PROGRESS_STEPS: u64 = 1000;

/// Renders one progress bar per pattern and prints run diagnostics.
pub struct ConsoleProgress {
    bar: Option<(Pattern, ProgressBar)>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self { bar: None }
    }

    /// Returns the bar for `pattern`, replacing the bar of the previous one.
    fn bar_for(&mut self, pattern: Pattern) -> &ProgressBar {
        if self.bar.as_ref().is_some_and(|(p, _)| *p != pattern) {
            self.finish();
        }
        let (_, bar) = self
            .bar
            .get_or_insert_with(|| (pattern, new_bar(pattern)));
        bar
    }

    /// Finishes the current bar, leaving it on screen.
    pub fn finish(&mut self) {
        if let Some((_, bar)) = self.bar.take() {
            bar.finish();
        }
    }

    /// Prints a line without tearing an active bar.
    fn println(&self, line: String) {
        match &self.bar {
            Some((_, bar)) if !bar.is_hidden() => bar.println(line),
            _ => println!("{}", line),
        }
    }
}

fn new_bar(pattern: Pattern) -> ProgressBar {
    let bar = ProgressBar::new(PROGRESS_STEPS);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(pattern.name());
    bar
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&mut self, fraction_complete: f64, pattern: Pattern) {
        let position = (fraction_complete.clamp(0.0, 1.0) * PROGRESS_STEPS as f64).round() as u64;
        self.bar_for(pattern).set_position(position);
    }

    fn device_opened(&mut self, device: &DeviceInfo) {
        self.finish();
        println!("Platform: {}", device.platform_name);
        println!("Device: {}", device.device_name);
        println!(
            "Memory: {} bytes ({})",
            device.global_memory,
            ByteSize::b(device.global_memory)
        );
    }

    fn allocation_attempt(&mut self, size: u64) {
        println!("Trying to allocate: {} bytes ({})", size, ByteSize::b(size));
    }

    fn allocated(&mut self, size: u64) {
        println!("Successfully allocated: {} bytes ({})", size, ByteSize::b(size));
    }

    fn mismatch(&mut self, offset: u64, pattern: Pattern) {
        self.println(format!("Bad memory at offset {} ({})", offset, pattern));
    }
}
