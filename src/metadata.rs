//! Per-image metadata needed by the index: capture time and EXIF orientation.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{Local, NaiveDateTime};
use exif::{In, Tag, Value};
use tracing::debug;

use crate::error::MetadataError;

/// Capture time and orientation for one image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Seconds since the unix epoch, `None` when the capture time is unknown.
    pub timestamp: Option<i64>,
    /// EXIF orientation code in `1..=8`; 1 means no correction.
    pub orientation: u16,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            timestamp: None,
            orientation: 1,
        }
    }
}

/// Source of [`ImageMetadata`] for files found during a directory scan.
///
/// An `Err` drops the file from its directory's playlist entirely. Missing or
/// garbled metadata should instead be reported as `Ok` with unknown fields.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ImageMetadata, MetadataError>;
}

/// The EXIF tags the extractor reads, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifTags {
    pub date: Tag,
    pub orientation: Tag,
}

impl Default for ExifTags {
    fn default() -> Self {
        Self {
            date: Tag::DateTimeOriginal,
            orientation: Tag::Orientation,
        }
    }
}

/// Reads capture date and orientation from EXIF (JPEG only).
#[derive(Debug, Clone, Default)]
pub struct ExifExtractor {
    tags: ExifTags,
}

impl ExifExtractor {
    pub fn new(tags: ExifTags) -> Self {
        Self { tags }
    }
}

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, path: &Path) -> Result<ImageMetadata, MetadataError> {
        let file = File::open(path).map_err(|source| MetadataError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut meta = ImageMetadata::default();
        if !has_exif_container(path) {
            return Ok(meta);
        }

        let mut buf = BufReader::new(file);
        let reader = match exif::Reader::new().read_from_container(&mut buf) {
            Ok(reader) => reader,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no readable exif");
                return Ok(meta);
            }
        };

        if let Some(field) = reader.get_field(self.tags.date, In::PRIMARY) {
            if let Value::Ascii(ref parts) = field.value {
                meta.timestamp = parts
                    .first()
                    .and_then(|bytes| std::str::from_utf8(bytes).ok())
                    .and_then(parse_exif_timestamp);
            }
        }

        if let Some(field) = reader.get_field(self.tags.orientation, In::PRIMARY) {
            meta.orientation = field
                .value
                .get_uint(0)
                .and_then(|v| u16::try_from(v).ok())
                .map_or(1, normalize_orientation);
        }

        Ok(meta)
    }
}

fn has_exif_container(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            ext == "jpg" || ext == "jpeg"
        })
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` string as local time.
pub fn parse_exif_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim_end_matches('\0').trim();
    let naive = NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S").ok()?;
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Clamp an orientation code into `1..=8`, falling back to 1.
#[inline]
pub fn normalize_orientation(v: u16) -> u16 {
    if (1..=8).contains(&v) { v } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_exif_dates() {
        let ts = parse_exif_timestamp("2021:01:25 21:42:05").unwrap();
        let back = parse_exif_timestamp("2021:01:25 21:42:06").unwrap();
        assert_eq!(back - ts, 1);
        assert!(parse_exif_timestamp("not a date").is_none());
        assert!(parse_exif_timestamp("2021:01:25 21:42:05\0").is_some());
    }

    #[test]
    fn out_of_range_orientation_is_identity() {
        assert_eq!(normalize_orientation(6), 6);
        assert_eq!(normalize_orientation(0), 1);
        assert_eq!(normalize_orientation(9), 1);
    }

    #[test]
    fn jpeg_without_exif_keeps_unknown_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();
        let meta = ExifExtractor::default().extract(&path).unwrap();
        assert_eq!(meta, ImageMetadata::default());
    }

    #[test]
    fn png_is_not_parsed_for_exif() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        fs::write(&path, b"x").unwrap();
        let meta = ExifExtractor::default().extract(&path).unwrap();
        assert_eq!(meta.timestamp, None);
        assert_eq!(meta.orientation, 1);
    }

    #[test]
    fn unopenable_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = ExifExtractor::default()
            .extract(&dir.path().join("missing.jpg"))
            .unwrap_err();
        assert!(matches!(err, MetadataError::Open { .. }));
    }
}
