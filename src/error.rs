//! Exit codes, structured errors and per-file failure records.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::ConfigError;
use crate::pipeline::PipelineError;
use crate::scanner::ScanError;

/// Exit codes for the mediasift binary.
///
/// - 0: Success (every file processed)
/// - 1: General error (unexpected failure)
/// - 2: Configuration error (bad roots, unwritable target, bad config file)
/// - 3: Partial failure (run completed, some files failed)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// The run completed and no file failed.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The run could not start because of its configuration.
    ConfigError = 2,
    /// The run completed but some files failed.
    PartialFailure = 3,
    /// The run was interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "MS000",
            Self::GeneralError => "MS001",
            Self::ConfigError => "MS002",
            Self::PartialFailure => "MS003",
            Self::Interrupted => "MS130",
        }
    }

    /// Pick the exit code for a fatal error returned by the application.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<PipelineError>() {
                return match e {
                    PipelineError::Interrupted => Self::Interrupted,
                    PipelineError::Config(_)
                    | PipelineError::InvalidRoot(_)
                    | PipelineError::TargetNotWritable { .. }
                    | PipelineError::OverlapsSourceRoot { .. } => Self::ConfigError,
                    _ => Self::GeneralError,
                };
            }
            if cause.downcast_ref::<ConfigError>().is_some()
                || cause.downcast_ref::<ScanError>().is_some()
            {
                return Self::ConfigError;
            }
        }
        Self::GeneralError
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "MS002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

/// Pipeline stage in which a single file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Could not be read while walking the source roots
    Scan,
    /// Could not be fingerprinted
    Hash,
    /// Could not be compared byte for byte
    Verify,
    /// Could not be copied to its destination
    Copy,
}

/// A non-fatal, per-file failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// File the failure relates to
    pub path: PathBuf,
    /// Stage that failed
    pub stage: FailureStage,
    /// Human-readable error message
    pub error: String,
}

impl FileFailure {
    /// Create a failure record.
    #[must_use]
    pub fn new(path: PathBuf, stage: FailureStage, error: impl std::fmt::Display) -> Self {
        Self {
            path,
            stage,
            error: error.to_string(),
        }
    }
}
