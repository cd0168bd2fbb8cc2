//! Layered application configuration.
//!
//! Settings are merged with figment, lowest priority first:
//! 1. Built-in defaults
//! 2. TOML file (`--config PATH`, or `config.toml` in the platform config dir)
//! 3. Environment variables prefixed `MEDIASIFT_` (`__` separates nested keys)
//! 4. Command-line flags
//!
//! Exclusion patterns given on the command line are appended to the merged
//! list rather than replacing it.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CHECKPOINT_INTERVAL;
use crate::classify::Layout;
use crate::scanner::{DEFAULT_CHUNK_SIZE, DEFAULT_EXCLUDES, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MEDIASIFT_";

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or had the wrong shape.
    #[error("Invalid configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A setting parsed but its value is out of range.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// What is wrong with it
        message: String,
    },
}

/// Effective settings for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gitignore-style patterns that are never scanned or copied
    pub exclude: Vec<String>,
    /// Worker threads for hashing, verification, classification and copying
    pub io_threads: usize,
    /// Read buffer size in bytes
    pub chunk_size: usize,
    /// Destination folder layout
    pub layout: Layout,
    /// Include in-root symlinked files
    pub follow_symlinks: bool,
    /// Fingerprint cache location; platform cache dir when unset
    pub cache_path: Option<PathBuf>,
    /// New cache records between checkpoints
    pub checkpoint_interval: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect(),
            io_threads: 4,
            chunk_size: DEFAULT_CHUNK_SIZE,
            layout: Layout::Day,
            follow_symlinks: false,
            cache_path: None,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// Command-line values that override every other layer.
///
/// Unset fields are skipped so lower layers show through.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsOverrides {
    /// `--io-threads`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_threads: Option<usize>,
    /// `--chunk-size`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    /// `--layout`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    /// `--follow-symlinks`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_symlinks: Option<bool>,
    /// `--cache`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// `--exclude`, appended to the merged list
    #[serde(skip)]
    pub extra_excludes: Vec<String>,
}

impl Settings {
    /// Platform-specific default config file location.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "mediasift", "mediasift")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build the layered figment without extracting it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `config_file` is given but missing.
    pub fn figment(
        config_file: Option<&Path>,
        overrides: &SettingsOverrides,
    ) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        match config_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_config_path().filter(|p| p.is_file()) {
                    log::debug!("Using config file {}", path.display());
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides)))
    }

    /// Load and validate the effective settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing explicit config file, an
    /// unparseable layer, or out-of-range values.
    pub fn load(
        config_file: Option<&Path>,
        overrides: &SettingsOverrides,
    ) -> Result<Self, ConfigError> {
        let mut settings: Settings = Self::figment(config_file, overrides)?
            .extract()
            .map_err(Box::new)?;
        settings
            .exclude
            .extend(overrides.extra_excludes.iter().cloned());
        settings.validate()?;
        log::debug!("Effective settings: {:?}", settings);
        Ok(settings)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.io_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "io_threads",
                message: "must be at least 1".to_string(),
            });
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidValue {
                key: "chunk_size",
                message: format!(
                    "{} is outside {}..={} bytes",
                    self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
                ),
            });
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::InvalidValue {
                key: "checkpoint_interval",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
