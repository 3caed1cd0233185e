//! Command-line driver
//!
//! [`run`] turns an argument list into a process exit code. The object store
//! can be injected, which is how the integration tests drive the whole
//! binary path against [`MemoryStore`](crate::store::MemoryStore).

use crate::config::{CliArgs, SyncConfig};
use crate::error::{Result, SyncError, EXIT_FAILURE, EXIT_SUCCESS, EXIT_USAGE};
use crate::progress::{print_header, print_summary, ProgressReporter};
use crate::shutdown::Shutdown;
use crate::store::ObjectStore;
use crate::walker::{SyncReport, SyncRun};
use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Program name used in usage output
const BIN_NAME: &str = "s3-tree-sync";

/// How often the spinner reads the counters
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Parse `args` (without the program name), sync, and return the exit code
///
/// With `store` unset the S3 transport is built from the environment.
pub fn run<I, T>(args: I, store: Option<Arc<dyn ObjectStore>>, shutdown: Shutdown) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let argv = std::iter::once(OsString::from(BIN_NAME))
        .chain(args.into_iter().map(Into::<OsString>::into));

    let args = match CliArgs::try_parse_from(argv) {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            return code;
        }
    };

    setup_logging(args.verbose);

    let config = match SyncConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => return report_error(&e),
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_FAILURE;
        }
    };

    runtime.block_on(run_async(config, store, shutdown))
}

/// Async entry point for callers that already own a runtime
pub async fn run_async(
    config: SyncConfig,
    store: Option<Arc<dyn ObjectStore>>,
    shutdown: Shutdown,
) -> u8 {
    match execute(config, store, shutdown).await {
        Ok(report) if report.completed => EXIT_SUCCESS,
        Ok(_) => {
            warn!("Sync was interrupted before completion");
            EXIT_FAILURE
        }
        Err(e) => report_error(&e),
    }
}

async fn execute(
    config: SyncConfig,
    store: Option<Arc<dyn ObjectStore>>,
    shutdown: Shutdown,
) -> Result<SyncReport> {
    let store = match store {
        Some(store) => store,
        None => connect_store(&config).await?,
    };

    if config.progress {
        print_header(
            &config.source.display_path().display().to_string(),
            &config.destination.to_display_string(),
            config.workers,
        );
    }

    let show_progress = config.progress;
    let run = SyncRun::new(config, store, shutdown);

    let reporter = show_progress.then(|| Arc::new(ProgressReporter::new()));
    let ticker = reporter.as_ref().map(|reporter| spawn_ticker(Arc::clone(reporter), &run));

    let result = run.run().await;

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    if let Some(reporter) = &reporter {
        match &result {
            Ok(report) if report.completed => reporter.finish("Sync completed"),
            Ok(_) => reporter.finish("Sync interrupted"),
            Err(_) => reporter.finish_and_clear(),
        }
    }

    let report = result?;
    print_summary(&report);

    if report.stats.errors > 0 {
        info!(errors = report.stats.errors, "Sync completed with errors");
    }

    Ok(report)
}

fn spawn_ticker(reporter: Arc<ProgressReporter>, run: &SyncRun) -> JoinHandle<()> {
    let stats = run.stats();
    let start = Instant::now();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        loop {
            interval.tick().await;
            reporter.update(&stats.snapshot(start.elapsed()));
        }
    })
}

#[cfg(feature = "s3")]
async fn connect_store(config: &SyncConfig) -> Result<Arc<dyn ObjectStore>> {
    let store =
        crate::store::S3Store::connect(config.region.clone(), config.profile.clone()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
async fn connect_store(_config: &SyncConfig) -> Result<Arc<dyn ObjectStore>> {
    Err(crate::error::ConfigError::BackendUnavailable.into())
}

fn report_error(e: &SyncError) -> u8 {
    error!("{}", e);
    eprintln!("Error: {}", e);
    e.exit_code()
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")
}

/// Install the stderr subscriber. `RUST_LOG` wins over the verbosity flag.
fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("s3_tree_sync=debug,warn")
        } else {
            EnvFilter::new("s3_tree_sync=info,warn")
        }
    });

    // A subscriber may already be installed when driven from tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> u8 {
        run(args.iter().copied(), None, Shutdown::new())
    }

    #[test]
    fn test_help_exits_zero() {
        assert_eq!(run_args(&["--help"]), EXIT_SUCCESS);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        assert_eq!(run_args(&["--frobnicate", "/src", "s3://b"]), EXIT_USAGE);
    }

    #[test]
    fn test_positional_errors() {
        assert_eq!(run_args(&[]), EXIT_USAGE);
        assert_eq!(run_args(&["/src"]), EXIT_USAGE);
        assert_eq!(run_args(&["/src", "s3://b", "extra"]), EXIT_USAGE);
    }

    #[test]
    fn test_invalid_destination() {
        assert_eq!(run_args(&["/src", "not-an-s3-url"]), EXIT_USAGE);
    }

    #[cfg(feature = "s3")]
    #[tokio::test]
    async fn test_default_build_connects_s3_transport() {
        use crate::config::{DestinationUrl, SourceSpec};

        let mut config = SyncConfig::new(
            SourceSpec::parse("/src"),
            DestinationUrl::parse("s3://bucket").unwrap(),
        );
        config.region = Some("us-east-1".to_string());

        assert!(connect_store(&config).await.is_ok());
    }

    #[test]
    fn test_invalid_option_value() {
        assert_eq!(
            run_args(&["/src", "s3://b", "--encryption-algorithm", "rot13"]),
            EXIT_FAILURE
        );
    }
}
