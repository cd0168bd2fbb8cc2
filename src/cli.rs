//! Command-line interface definitions for mediasift.
//!
//! The default invocation deduplicates one or more source roots into a
//! target root; the `diff` subcommand compares two folders. Options that
//! affect scanning and hashing are global so they work with both.
//!
//! # Example
//!
//! ```bash
//! # Plan only (the default): nothing is copied
//! mediasift /backups/phone /backups/laptop /sorted --output-json plan.json
//!
//! # Copy survivors into month folders
//! mediasift /backups/phone /sorted --output-json run.json --no-dryrun --layout month
//!
//! # What is in A but not in B, and vice versa
//! mediasift diff /backups/2019 /backups/2019-copy --output-json diff.json
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

use crate::classify::Layout;
use crate::config::SettingsOverrides;
use crate::pipeline::CacheMode;

/// Deduplicate media backups and copy unique files into date folders.
///
/// Source trees are only ever read. Without --no-dryrun the run writes
/// nothing but the JSON report.
#[derive(Debug, Parser)]
#[command(name = "mediasift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level; overrides -v and -q
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Print fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (TOML)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub scan: ScanArgs,

    /// Source roots followed by the target root
    #[arg(value_name = "PATH", num_args = 2.., required = true)]
    pub paths: Vec<PathBuf>,

    /// Where to write the JSON report
    #[arg(long, value_name = "PATH", required = true)]
    pub output_json: Option<PathBuf>,

    /// Perform the copies instead of only planning them
    #[arg(long)]
    pub no_dryrun: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List files that exist only in one of two folders
    Diff(DiffArgs),
}

/// Arguments for the diff subcommand.
#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Folder A
    #[arg(value_name = "A")]
    pub folder_a: PathBuf,

    /// Folder B
    #[arg(value_name = "B")]
    pub folder_b: PathBuf,

    /// Where to write the JSON report
    #[arg(long, value_name = "PATH")]
    pub output_json: PathBuf,
}

/// Scanning, hashing and cache options shared by every command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Path to the fingerprint cache database
    ///
    /// If not specified, a default platform-specific path is used.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache: Option<PathBuf>,

    /// Keep fingerprints in memory only
    #[arg(long, conflicts_with = "cache", global = true)]
    pub no_cache: bool,

    /// Empty the fingerprint cache before scanning
    #[arg(long, global = true)]
    pub clear_cache: bool,

    /// Gitignore-style pattern to exclude (can be specified multiple times)
    ///
    /// Added to the configured list, which defaults to .DS_Store, Thumbs.db,
    /// desktop.ini and ._* files.
    #[arg(short, long, value_name = "PATTERN", global = true)]
    pub exclude: Vec<String>,

    /// Worker threads per stage (default: 4)
    ///
    /// Lower values reduce disk thrashing on HDDs.
    #[arg(long, value_name = "N", global = true)]
    pub io_threads: Option<usize>,

    /// Read buffer size for hashing and comparison (e.g., 64KiB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size, global = true)]
    pub chunk_size: Option<u64>,

    /// Destination folder layout
    #[arg(long, value_enum, global = true)]
    pub layout: Option<Layout>,

    /// Include symlinked files whose target stays inside the same root
    #[arg(long, global = true)]
    pub follow_symlinks: bool,
}

impl Cli {
    /// Settings given on the command line, for the top configuration layer.
    #[must_use]
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            io_threads: self.scan.io_threads,
            chunk_size: self
                .scan
                .chunk_size
                .map(|s| usize::try_from(s).unwrap_or(usize::MAX)),
            layout: self.scan.layout,
            follow_symlinks: self.scan.follow_symlinks.then_some(true),
            cache_path: self.scan.cache.clone(),
            extra_excludes: self.scan.exclude.clone(),
        }
    }

    /// Cache behaviour requested by the flags.
    #[must_use]
    pub fn cache_mode(&self) -> CacheMode {
        if self.scan.no_cache {
            CacheMode::Disabled
        } else if self.scan.clear_cache {
            CacheMode::Cleared
        } else {
            CacheMode::Enabled
        }
    }

    /// Explicit log level, if one was given.
    #[must_use]
    pub fn level_filter(&self) -> Option<LevelFilter> {
        self.log_level.map(LevelFilter::from)
    }
}

/// Values accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging
    Off,
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Progress summaries
    Info,
    /// Per-stage detail
    Debug,
    /// Per-file detail
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use mediasift::cli::parse_size;
///
/// assert_eq!(parse_size("65536").unwrap(), 65536);
/// assert_eq!(parse_size("64KiB").unwrap(), 65536);
/// assert_eq!(parse_size("1MB").unwrap(), 1_000_000);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    if num < 0.0 {
        return Err("Size cannot be negative".to_string());
    }

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
