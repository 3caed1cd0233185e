//! Configuration types for s3-tree-sync
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Destination URL parsing and rsync-style source splitting

use crate::error::{ConfigError, SyncError};
use crate::metadata::RootSquash;
use crate::store::{Encryption, StorageClass};
use crate::upload::DEFAULT_PART_SIZE;
use clap::{ArgAction, Parser};
use regex::Regex;
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 1024;

/// One file upload takes this many limiter slots
const MIN_CONCURRENCY: u32 = crate::limiter::UPLOAD_WEIGHT;

/// Account whose ids replace root under root squashing
pub const ROOT_SQUASH_USER: &str = "nfsnobody";

/// Regex for parsing destination URLs
static S3_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: s3://bucket or s3://bucket/prefix/...
    Regex::new(r"^s3://([^/]+)(?:/(.*))?$").expect("Invalid S3 URL regex")
});

/// One piece of a Go-style duration such as `1m30s` or `1.5m`
static DURATION_PART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*\.?[0-9]*)(ns|us|µs|μs|ms|s|m|h)").expect("Invalid duration regex")
});

/// One-way sync of a local tree into S3 with File Gateway metadata
#[derive(Parser, Debug, Clone)]
#[command(
    name = "s3-tree-sync",
    version,
    about = "One-way sync of a local directory tree into S3 with File Gateway metadata",
    long_about = "Copies a local directory tree into an S3 bucket, recording POSIX ownership,\n\
                  permissions and timestamps in the object metadata schema used by AWS Storage\n\
                  Gateway file shares.\n\n\
                  Entries whose remote metadata (and content digest, when present) already match\n\
                  are left alone, so repeated runs only upload what changed.\n\n\
                  Like rsync, a SOURCE without a trailing slash creates a top-level directory\n\
                  object named after it; with a trailing slash only its contents are copied.",
    after_help = "EXAMPLES:\n    \
        s3-tree-sync /data/projects s3://archive-bucket\n    \
        s3-tree-sync /data/projects/ s3://archive-bucket/projects -p\n    \
        s3-tree-sync /srv/share s3://gw-bucket --root-squash --storage-class STANDARD_IA\n    \
        s3-tree-sync /srv/share s3://gw-bucket --encryption-algorithm aws:kms --kms-key alias/gw"
)]
pub struct CliArgs {
    /// Source directory and s3://bucket[/prefix] destination
    #[arg(value_name = "SOURCE DESTINATION")]
    pub paths: Vec<String>,

    /// Storage class for new objects
    #[arg(long, default_value = "STANDARD", value_name = "CLASS")]
    pub storage_class: String,

    /// Server-side encryption algorithm (AES256 or aws:kms)
    #[arg(long, default_value = "AES256", value_name = "ALG")]
    pub encryption_algorithm: String,

    /// KMS key id, used with aws:kms
    #[arg(long, default_value = "aws/s3", value_name = "KEY")]
    pub kms_key: String,

    /// Skip the ctime/mtime comparison
    #[arg(long)]
    pub ignore_timestamps: bool,

    /// Concurrent S3 request budget
    #[arg(long, default_value = "30", value_name = "NUM")]
    pub max_concurrent: u32,

    /// Maximum attempts per S3 request (0 disables retrying)
    #[arg(long, default_value = "10", value_name = "NUM", allow_negative_numbers = true)]
    pub max_retries: i64,

    /// Ceiling for the exponential retry backoff (e.g. 60s, 1m30s, 500ms)
    #[arg(long, default_value = "60s", value_name = "DURATION")]
    pub max_backoff_delay: String,

    /// Record root-owned entries as the nfsnobody user and group
    #[arg(long)]
    pub root_squash: bool,

    /// Substitute uid for root squashing (overrides the nfsnobody lookup)
    #[arg(long, value_name = "UID")]
    pub root_uid: Option<u32>,

    /// Substitute gid for root squashing (overrides the nfsnobody lookup)
    #[arg(long, value_name = "GID")]
    pub root_gid: Option<u32>,

    /// Number of entry workers
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Verify the bucket exists before walking
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub check_bucket: bool,

    /// AWS region override
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,

    /// AWS shared config profile
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Show a progress spinner
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_workers() -> usize {
    // Entries spend most of their time waiting on S3, so oversubscribe
    num_cpus::get() * 2
}

/// Parsed `s3://bucket[/prefix]` destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationUrl {
    pub bucket: String,

    /// Empty, or without a leading `/` and with exactly one trailing `/`
    pub prefix: String,
}

impl DestinationUrl {
    pub fn parse(url: &str) -> Result<Self, SyncError> {
        let caps = S3_URL_REGEX
            .captures(url)
            .ok_or_else(|| SyncError::InvalidDestination(url.to_string()))?;

        let bucket = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SyncError::InvalidDestination(url.to_string()))?;

        let prefix = caps
            .get(2)
            .map(|m| m.as_str().trim_matches('/'))
            .unwrap_or_default();
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        Ok(Self { bucket, prefix })
    }

    pub fn to_display_string(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Source argument split rsync-style into a base directory and a filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Directory the walk starts in
    pub base: PathBuf,

    /// Only this child of `base` is synced at the top level
    pub filter: Option<String>,
}

impl SourceSpec {
    /// `/data/dir` syncs `dir` itself, `/data/dir/` syncs its contents
    pub fn parse(source: &str) -> Self {
        let (base, filter) = match source.rfind('/') {
            Some(idx) => (&source[..=idx], &source[idx + 1..]),
            None => ("", source),
        };

        let base = if base.is_empty() { "." } else { base };
        let filter = match filter {
            "" | "." => None,
            name => Some(name.to_string()),
        };

        Self {
            base: PathBuf::from(base),
            filter,
        }
    }

    /// The path as given, for display
    pub fn display_path(&self) -> PathBuf {
        match &self.filter {
            Some(name) => self.base.join(name),
            None => self.base.clone(),
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: SourceSpec,
    pub destination: DestinationUrl,
    pub storage_class: StorageClass,
    pub encryption: Encryption,

    /// Substitute owner for root-owned entries, `None` when disabled
    pub root_squash: Option<RootSquash>,

    pub ignore_timestamps: bool,

    /// Admission limiter slots
    pub max_concurrent: u32,

    /// Attempts per backend call; 0 means a single attempt
    pub max_retries: u32,

    pub max_backoff: Duration,

    /// Entry worker pool size
    pub workers: usize,

    /// Multipart threshold and part size
    pub part_size: usize,

    pub check_bucket: bool,
    pub verbose: bool,
    pub progress: bool,
    pub region: Option<String>,
    pub profile: Option<String>,
}

impl SyncConfig {
    /// Defaults for library callers
    pub fn new(source: SourceSpec, destination: DestinationUrl) -> Self {
        Self {
            source,
            destination,
            storage_class: StorageClass::default(),
            encryption: Encryption::default(),
            root_squash: None,
            ignore_timestamps: false,
            max_concurrent: 30,
            max_retries: 10,
            max_backoff: Duration::from_secs(60),
            workers: default_workers(),
            part_size: DEFAULT_PART_SIZE,
            check_bucket: true,
            verbose: false,
            progress: false,
            region: None,
            profile: None,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, SyncError> {
        let (source, destination) = match args.paths.as_slice() {
            [] => return Err(SyncError::Usage("Missing source and destination".into())),
            [_] => return Err(SyncError::Usage("Missing destination".into())),
            [source, destination] => (source, destination),
            [_, _, extra, ..] => {
                return Err(SyncError::Usage(format!("Unexpected argument: {}", extra)))
            }
        };

        let destination = DestinationUrl::parse(destination)?;
        let source = SourceSpec::parse(source);

        let storage_class: StorageClass = args.storage_class.parse()?;
        let encryption = Encryption::parse(&args.encryption_algorithm, &args.kms_key)?;

        if args.max_retries < 0 {
            return Err(ConfigError::InvalidMaxRetries(args.max_retries).into());
        }
        let max_retries = u32::try_from(args.max_retries).unwrap_or(u32::MAX);

        let max_backoff = parse_duration(&args.max_backoff_delay)
            .ok_or_else(|| ConfigError::InvalidBackoffDelay(args.max_backoff_delay.clone()))?;
        if max_retries > 0 && max_backoff.is_zero() {
            return Err(ConfigError::InvalidBackoffDelay(args.max_backoff_delay.clone()).into());
        }

        if args.max_concurrent < MIN_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: args.max_concurrent,
                min: MIN_CONCURRENCY,
            }
            .into());
        }

        // Validate worker count
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            }
            .into());
        }

        let root_squash = if args.root_squash {
            Some(resolve_root_squash(args.root_uid, args.root_gid)?)
        } else {
            None
        };

        Ok(Self {
            source,
            destination,
            storage_class,
            encryption,
            root_squash,
            ignore_timestamps: args.ignore_timestamps,
            max_concurrent: args.max_concurrent,
            max_retries,
            max_backoff,
            workers: args.workers,
            part_size: DEFAULT_PART_SIZE,
            check_bucket: args.check_bucket,
            verbose: args.verbose,
            progress: args.progress,
            region: args.region,
            profile: args.profile,
        })
    }
}

/// Explicit ids win; anything missing comes from the nfsnobody account
fn resolve_root_squash(uid: Option<u32>, gid: Option<u32>) -> Result<RootSquash, ConfigError> {
    if let (Some(uid), Some(gid)) = (uid, gid) {
        return Ok(RootSquash { uid, gid });
    }

    let account = lookup_user(ROOT_SQUASH_USER)?;
    Ok(RootSquash {
        uid: uid.unwrap_or(account.uid),
        gid: gid.unwrap_or(account.gid),
    })
}

/// uid and primary gid of a local account
fn lookup_user(name: &str) -> Result<RootSquash, ConfigError> {
    let lookup_error = |reason: &str| ConfigError::RootSquashLookup {
        user: name.to_string(),
        reason: reason.to_string(),
    };

    let c_name = CString::new(name).map_err(|_| lookup_error("name contains a NUL byte"))?;

    // SAFETY: c_name is a valid NUL-terminated string. The returned record
    // lives in static storage and is copied out before any other call.
    let entry = unsafe { libc::getpwnam(c_name.as_ptr()) };
    if entry.is_null() {
        return Err(lookup_error("no such user"));
    }

    let (uid, gid) = unsafe { ((*entry).pw_uid, (*entry).pw_gid) };
    Ok(RootSquash { uid, gid })
}

/// Parse a duration like `60s`, `1m30s`, `1.5m` or `500ms`
///
/// A bare `0` is accepted; every other component needs a unit.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input == "0" {
        return Some(Duration::ZERO);
    }
    if input.is_empty() || input.starts_with('-') {
        return None;
    }

    let mut rest = input.strip_prefix('+').unwrap_or(input);
    let mut total_nanos: f64 = 0.0;

    while !rest.is_empty() {
        let caps = DURATION_PART_REGEX.captures(rest)?;
        let whole = caps.get(0)?;
        let number = caps.get(1)?.as_str();
        if number.is_empty() || number == "." {
            return None;
        }

        let value: f64 = number.parse().ok()?;
        let scale = match caps.get(2)?.as_str() {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };

        total_nanos += value * scale;
        rest = &rest[whole.end()..];
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}
