//! s3-tree-sync - one-way sync of a local tree into S3
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use s3_tree_sync::cli;
use s3_tree_sync::shutdown::Shutdown;
use std::process::ExitCode;

fn main() -> ExitCode {
    let shutdown = Shutdown::new();

    if let Err(e) = install_signal_handler(shutdown.clone()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::from(cli::run(std::env::args_os().skip(1), None, shutdown))
}

/// Ctrl-C stops new work; in-flight uploads are allowed to finish
fn install_signal_handler(shutdown: Shutdown) -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown.trigger();
    })
    .context("Failed to set signal handler")
}
