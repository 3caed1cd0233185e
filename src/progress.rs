//! Progress reporting for a sync run
//!
//! Provides a live spinner using indicatif and the end-of-run summary.

use crate::walker::{SyncProgress, SyncReport};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner showing the run counters
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &SyncProgress) {
        self.bar.set_message(progress_line(progress));
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn progress_line(progress: &SyncProgress) -> String {
    format!(
        "Dirs: {} | Files: {} | Uploaded: {} ({}) | In sync: {} | Errors: {} | Rate: {:.0}/s",
        format_number(progress.dirs),
        format_number(progress.files),
        format_number(progress.uploaded),
        format_size(progress.bytes_uploaded, BINARY),
        format_number(progress.in_sync),
        format_number(progress.errors),
        progress.entries_per_second(),
    )
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(report: &SyncReport) {
    let stats = &report.stats;
    let duration_secs = report.duration.as_secs_f64();

    println!();
    if report.completed {
        println!("{}", style("Sync Complete").green().bold());
    } else {
        println!("{}", style("Sync Interrupted").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Directories:").bold(), format_number(stats.dirs));
    println!("  {} {}", style("Files:").bold(), format_number(stats.files));
    println!(
        "  {} {} ({})",
        style("Uploaded:").bold(),
        format_number(stats.uploaded),
        format_size(stats.bytes_uploaded, BINARY)
    );
    println!("  {} {}", style("In sync:").bold(), format_number(stats.in_sync));
    if stats.skipped > 0 {
        println!("  {} {}", style("Skipped:").bold(), format_number(stats.skipped));
    }
    if report.retries > 0 {
        println!("  {} {}", style("Retries:").bold(), format_number(report.retries));
    }
    println!(
        "  {} {:.1}s ({:.0} entries/sec)",
        style("Duration:").bold(),
        duration_secs,
        stats.entries_per_second()
    );
    if stats.errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(stats.errors)
        );
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(source: &str, destination: &str, workers: usize) {
    println!();
    println!(
        "{} {}",
        style("s3-tree-sync").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    println!("  {} {}", style("Destination:").bold(), destination);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_progress_line() {
        let progress = SyncProgress {
            files: 1500,
            dirs: 12,
            uploaded: 1024,
            bytes_uploaded: 2048,
            in_sync: 488,
            errors: 3,
            ..Default::default()
        };

        let line = progress_line(&progress);
        assert!(line.contains("Files: 1,500"));
        assert!(line.contains("Uploaded: 1,024 (2 KiB)"));
        assert!(line.contains("Errors: 3"));
    }
}
