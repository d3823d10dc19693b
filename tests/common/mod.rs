#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use frame_playback::error::MetadataError;
use frame_playback::index::ImageIndex;
use frame_playback::metadata::{ImageMetadata, MetadataExtractor};

/// Reads the capture time from the file body instead of EXIF.
///
/// - a decimal number is the unix timestamp
/// - `corrupt` fails the read
/// - anything else yields unknown metadata
pub struct BodyExtractor;

impl MetadataExtractor for BodyExtractor {
    fn extract(&self, path: &Path) -> Result<ImageMetadata, MetadataError> {
        let body = fs::read_to_string(path).map_err(|source| MetadataError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let body = body.trim();
        if body == "corrupt" {
            return Err(MetadataError::Open {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidData, "corrupt"),
            });
        }
        Ok(ImageMetadata {
            timestamp: body.parse().ok(),
            orientation: 1,
        })
    }
}

/// Create `dir` (and parents) under `root` holding empty image files.
pub fn make_dir(root: &Path, dir: &str, files: &[&str]) -> PathBuf {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    for f in files {
        fs::write(path.join(f), b"").unwrap();
    }
    path
}

pub fn index_of(root: &Path) -> ImageIndex {
    let mut index = ImageIndex::new();
    index.add_root(root, &BodyExtractor).unwrap();
    index
}
