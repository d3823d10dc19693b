use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or persisting the image index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// `add_directory` was handed something that is not an existing directory.
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Listing a directory failed, typically because it vanished mid-scan.
    #[error("failed to read directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file could not be read or written.
    #[error("snapshot io error at {}: {source}", path.display())]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot contents were not valid JSON for an index.
    #[error(transparent)]
    Snapshot(#[from] serde_json::Error),
}

/// Recoverable conditions reported by the playlist scheduler.
///
/// None of these are fatal: the display retries or falls back to the
/// placeholder image.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Every directory is either masked out or has no images.
    #[error("no eligible playlists")]
    NoEligiblePlaylists,

    /// A directory that had to supply an image has none.
    #[error("directory has no images: {}", path.display())]
    EmptyDirectory { path: PathBuf },

    /// `play_now` named a directory the index does not know.
    #[error("directory is not indexed: {}", path.display())]
    InvalidDirectory { path: PathBuf },

    /// `play_now` was handed an explicit, empty image list.
    #[error("play-now image list is empty")]
    EmptyPlaylist,

    /// The selected file disappeared since the directory was scanned.
    #[error("image file is missing: {}", path.display())]
    MissingImage { path: PathBuf },
}

/// Per-file metadata failures; the file is skipped, the scan continues.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to open image {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
