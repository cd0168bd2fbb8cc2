//! Embedded capture dates.
//!
//! [`MetadataReader`] is the seam between classification and container
//! parsing. [`EmbeddedMetadata`] is the default reader; tests swap in
//! fixed answers.
//!
//! Images go through kamadak-exif, video through the `mp4` movie header
//! reader and audio through the `id3` tag reader.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use exif::{In, Tag, Value};
use id3::TagLike;

use super::FileCategory;

/// Seconds between 1904-01-01, the movie header epoch, and 1970-01-01.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Errors raised while reading embedded metadata.
///
/// Never fatal: classification falls back to filesystem timestamps.
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    /// The file could not be opened or read.
    #[error("Failed to read metadata from {path}: {source}")]
    Io {
        /// The file being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The EXIF block was present but unreadable.
    #[error("Invalid EXIF data in {path}: {source}")]
    Exif {
        /// The file being read
        path: PathBuf,
        /// The underlying EXIF error
        #[source]
        source: exif::Error,
    },

    /// The MP4 / QuickTime container was malformed.
    #[error("Invalid movie container in {path}: {source}")]
    Movie {
        /// The file being read
        path: PathBuf,
        /// The underlying parser error
        #[source]
        source: mp4::Error,
    },

    /// The ID3 tag was present but unreadable.
    #[error("Invalid ID3 tag in {path}: {source}")]
    Id3 {
        /// The file being read
        path: PathBuf,
        /// The underlying tag error
        #[source]
        source: id3::Error,
    },
}

/// Source of embedded capture dates.
pub trait MetadataReader: Send + Sync {
    /// Capture date recorded inside the file, if any.
    ///
    /// `category` has already been derived from the extension; readers use
    /// it to pick one extraction strategy.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the file cannot be read or parsed.
    /// Absent metadata is `Ok(None)`, not an error.
    fn capture_date(
        &self,
        path: &Path,
        category: FileCategory,
    ) -> Result<Option<NaiveDate>, MetadataError>;
}

/// Default reader: EXIF for images, movie header for video, ID3 for audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedMetadata;

/// EXIF date tags in order of preference.
const EXIF_DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

impl EmbeddedMetadata {
    fn open(path: &Path) -> Result<BufReader<File>, MetadataError> {
        File::open(path)
            .map(BufReader::new)
            .map_err(|source| MetadataError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> MetadataError + '_ {
        move |source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn exif_date(path: &Path) -> Result<Option<NaiveDate>, MetadataError> {
        let mut reader = Self::open(path)?;
        let exif = match exif::Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) => return Ok(None),
            Err(exif::Error::Io(source)) => {
                return Err(MetadataError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(source) => {
                return Err(MetadataError::Exif {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(EXIF_DATE_TAGS.iter().find_map(|tag| {
            let field = exif.get_field(*tag, In::PRIMARY)?;
            match field.value {
                Value::Ascii(ref parts) => parts
                    .first()
                    .and_then(|raw| exif::DateTime::from_ascii(raw).ok())
                    .and_then(|dt| {
                        NaiveDate::from_ymd_opt(
                            i32::from(dt.year),
                            u32::from(dt.month),
                            u32::from(dt.day),
                        )
                    }),
                _ => None,
            }
        }))
    }

    fn movie_date(path: &Path) -> Result<Option<NaiveDate>, MetadataError> {
        let reader = Self::open(path)?;
        let size = reader
            .get_ref()
            .metadata()
            .map_err(Self::io_err(path))?
            .len();

        let movie = match mp4::Mp4Reader::read_header(reader, size) {
            Ok(movie) => movie,
            Err(mp4::Error::BoxNotFound(_)) => return Ok(None),
            Err(mp4::Error::IoError(source)) if source.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(mp4::Error::IoError(source)) => {
                return Err(MetadataError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(source) => {
                return Err(MetadataError::Movie {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(movie_creation_time(movie.moov.mvhd.creation_time)
            .map(|utc| utc.with_timezone(&Local).date_naive()))
    }

    fn audio_date(path: &Path) -> Result<Option<NaiveDate>, MetadataError> {
        match id3::Tag::read_from_path(path) {
            Ok(tag) => {
                if let Some(date) = recording_date(&tag) {
                    return Ok(Some(date));
                }
            }
            Err(e) => match e.kind {
                id3::ErrorKind::NoTag => {}
                id3::ErrorKind::Io(source) => {
                    return Err(MetadataError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
                _ => {
                    return Err(MetadataError::Id3 {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            },
        }
        if is_mp4_audio(path) {
            return Self::movie_date(path);
        }
        Ok(None)
    }
}

/// Movie header creation time; zero means the field was never set.
fn movie_creation_time(seconds_since_1904: u64) -> Option<DateTime<Utc>> {
    if seconds_since_1904 == 0 {
        return None;
    }
    let unix = i64::try_from(seconds_since_1904).ok()? - MAC_EPOCH_OFFSET;
    DateTime::from_timestamp(unix, 0)
}

/// Full recording date from `TDRC`, or from `TYER` + `TDAT` in v2.3 tags.
///
/// A bare year is not precise enough for a date folder.
fn recording_date(tag: &id3::Tag) -> Option<NaiveDate> {
    if let Some(stamp) = tag.date_recorded() {
        if let (Some(month), Some(day)) = (stamp.month, stamp.day) {
            return NaiveDate::from_ymd_opt(stamp.year, u32::from(month), u32::from(day));
        }
    }

    let year: i32 = text_frame(tag, "TYER")?.parse().ok()?;
    let ddmm = text_frame(tag, "TDAT")?;
    if ddmm.len() != 4 || !ddmm.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day = ddmm[..2].parse().ok()?;
    let month = ddmm[2..].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn text_frame<'a>(tag: &'a id3::Tag, id: &str) -> Option<&'a str> {
    tag.get(id)?.content().text().map(str::trim)
}

fn is_mp4_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("m4a"))
}

impl MetadataReader for EmbeddedMetadata {
    fn capture_date(
        &self,
        path: &Path,
        category: FileCategory,
    ) -> Result<Option<NaiveDate>, MetadataError> {
        match category {
            FileCategory::Image => Self::exif_date(path),
            FileCategory::Video => Self::movie_date(path),
            FileCategory::Audio => Self::audio_date(path),
            FileCategory::Other => Ok(None),
        }
    }
}
