//! The index and scheduler behind one lock, shared by the rescan task, the
//! display loop, and the control surface.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{IndexError, PlaybackError};
use crate::index::{DirStats, ImageIndex, ImageRecord, normalize_path, scan_tree};
use crate::metadata::MetadataExtractor;
use crate::playlist::{ImageSelection, PlayMode, Scheduler};

/// Where the display pulls its next image from.
pub trait SelectionSource {
    fn is_ready(&self) -> bool;
    fn next_selection(&self) -> Result<ImageSelection, PlaybackError>;
}

struct LibraryState {
    index: ImageIndex,
    scheduler: Scheduler,
}

/// Cheap-to-clone handle to the shared index and scheduler.
#[derive(Clone)]
pub struct Library {
    state: Arc<Mutex<LibraryState>>,
    ready: Arc<AtomicBool>,
}

/// Outcome of one [`Library::rescan_root`].
#[derive(Debug, Default)]
pub struct RescanSummary {
    pub directories: usize,
    pub images: usize,
    pub failed: usize,
    pub removed: Vec<PathBuf>,
}

impl Library {
    pub fn new(index: ImageIndex, scheduler: Scheduler) -> Self {
        Self {
            state: Arc::new(Mutex::new(LibraryState { index, scheduler })),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    // Every critical section leaves index and cursor consistent, so a
    // poisoned lock still guards valid state.
    fn lock(&self) -> MutexGuard<'_, LibraryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!("library ready");
        }
    }

    pub fn advance(&self) -> Result<ImageSelection, PlaybackError> {
        let mut guard = self.lock();
        let LibraryState { index, scheduler } = &mut *guard;
        scheduler.advance(index)
    }

    pub fn play_now(
        &self,
        path: &Path,
        images: Option<Vec<ImageRecord>>,
    ) -> Result<(), PlaybackError> {
        let mut guard = self.lock();
        let LibraryState { index, scheduler } = &mut *guard;
        scheduler.play_now(index, path, images)
    }

    pub fn set_enabled(&self, path: &Path, enabled: bool) -> bool {
        let mut guard = self.lock();
        if !enabled && !guard.index.contains(&normalize_path(path)) {
            warn!(path = %path.display(), "disabling a directory that is not indexed");
        }
        guard.scheduler.set_enabled(path, enabled)
    }

    /// Disabled mask entries that name no indexed directory.
    pub fn unindexed_disabled(&self) -> Vec<PathBuf> {
        let guard = self.lock();
        let mut paths: Vec<PathBuf> = guard
            .scheduler
            .mask()
            .disabled()
            .filter(|p| !guard.index.contains(p))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn is_enabled(&self, path: &Path) -> bool {
        self.lock().scheduler.is_enabled(path)
    }

    pub fn set_mode(&self, mode: PlayMode) {
        self.lock().scheduler.set_mode(mode);
    }

    pub fn stats(&self, path: &Path) -> Option<DirStats> {
        self.lock().index.stats(path)
    }

    /// Run `f` against the index while holding the lock.
    pub fn with_index<T>(&self, f: impl FnOnce(&ImageIndex) -> T) -> T {
        f(&self.lock().index)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), IndexError> {
        let snapshot = self.lock().index.clone();
        snapshot.save_snapshot(path)
    }

    /// Rescan `root` and fold the result into the index.
    ///
    /// The filesystem walk runs without the lock; each fresh node is swapped
    /// in under its own short critical section. Directories no longer present
    /// are removed afterwards; ones that failed to scan keep their old node.
    ///
    /// # Errors
    /// Fails only if `root` itself cannot be scanned.
    pub fn rescan_root(
        &self,
        root: &Path,
        extractor: &dyn MetadataExtractor,
    ) -> Result<RescanSummary, IndexError> {
        let scan = scan_tree(root, extractor)?;

        let mut seen: HashSet<PathBuf> = scan.failed.iter().map(|f| f.path.clone()).collect();
        let mut summary = RescanSummary {
            failed: scan.failed.len(),
            ..RescanSummary::default()
        };
        for node in scan.nodes {
            summary.directories += 1;
            summary.images += node.images.len();
            seen.insert(node.path.clone());
            self.lock().index.insert_node(node);
        }

        let mut guard = self.lock();
        guard.index.register_root(&scan.root);
        summary.removed = guard.index.prune_missing(&scan.root, &seen);
        drop(guard);

        for path in &summary.removed {
            debug!(path = %path.display(), "directory vanished; removed from index");
        }
        Ok(summary)
    }
}

impl SelectionSource for Library {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn next_selection(&self) -> Result<ImageSelection, PlaybackError> {
        let selection = self.advance()?;
        let path = selection.path();
        if !path.is_file() {
            return Err(PlaybackError::MissingImage { path });
        }
        Ok(selection)
    }
}
