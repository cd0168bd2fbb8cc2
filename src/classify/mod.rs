//! Date classification of survivors.
//!
//! - [`classifier`]: Picks a date bucket per file, in parallel
//! - [`metadata`]: The embedded-date capability and its default reader
//!
//! Category dispatch is closed: every extension maps to exactly one
//! [`FileCategory`], and each category has one extraction strategy.

pub mod classifier;
pub mod metadata;

use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use classifier::{Classification, ClassifyError, DateClassifier, DateSource};
pub use metadata::{EmbeddedMetadata, MetadataError, MetadataReader};

/// Folder name for files without any usable timestamp.
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Media category inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    /// Still images (EXIF capture date)
    Image,
    /// Audio recordings (ID3 recording date)
    Audio,
    /// Video clips (movie header creation time)
    Video,
    /// Everything else (filesystem time only)
    Other,
}

impl FileCategory {
    /// Lowercase extensions belonging to this category.
    #[must_use]
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => &[
                "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "heic", "heif", "webp", "raw",
                "dng", "cr2", "nef", "arw",
            ],
            Self::Audio => &["mp3", "wav", "aac", "flac", "ogg", "wma", "m4a"],
            Self::Video => &["mp4", "m4v", "mov", "3gp", "avi", "mkv", "flv", "wmv", "webm"],
            Self::Other => &[],
        }
    }

    /// Category for a path, by case-insensitive extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        else {
            return Self::Other;
        };
        [Self::Image, Self::Audio, Self::Video]
            .into_iter()
            .find(|c| c.extensions().contains(&ext.as_str()))
            .unwrap_or(Self::Other)
    }
}

/// Destination folder layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One folder per day (`YYYY-MM-DD`)
    #[default]
    Day,
    /// One folder per month (`YYYY-MM`)
    Month,
    /// No date folders
    Flat,
}

/// Date a survivor is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateBucket {
    /// A known calendar date
    Date(NaiveDate),
    /// No usable timestamp
    Unknown,
}

impl DateBucket {
    /// Day-granularity label, independent of layout.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
            Self::Unknown => UNKNOWN_BUCKET.to_string(),
        }
    }

    /// Folder name under the target root, `None` for the flat layout.
    #[must_use]
    pub fn folder(&self, layout: Layout) -> Option<String> {
        match (layout, self) {
            (Layout::Flat, _) => None,
            (_, Self::Unknown) => Some(UNKNOWN_BUCKET.to_string()),
            (Layout::Day, Self::Date(date)) => Some(date.format("%Y-%m-%d").to_string()),
            (Layout::Month, Self::Date(date)) => Some(date.format("%Y-%m").to_string()),
        }
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
