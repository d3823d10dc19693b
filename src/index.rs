//! In-memory forest of image directories.
//!
//! Every directory beneath a configured root becomes a [`DirectoryNode`]
//! keyed by its absolute path. A node carries its playable images sorted by
//! case-insensitive filename plus a derived date score. Scanning a directory
//! never touches the index itself, so callers can build nodes without holding
//! any lock and swap them in afterwards.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::IndexError;
use crate::metadata::MetadataExtractor;

/// Extensions (lowercase, without dot) the index treats as playable.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "heif", "heic"];

/// One playable image within a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    /// Capture time in unix seconds; `None` when unknown.
    pub timestamp: Option<i64>,
    pub orientation: u16,
}

impl ImageRecord {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            timestamp: None,
            orientation: 1,
        }
    }
}

/// Indexed representation of one filesystem directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub path: PathBuf,
    pub name: String,
    pub parent: Option<PathBuf>,
    pub children: BTreeSet<PathBuf>,
    pub images: Vec<ImageRecord>,
    /// Mean of valid image timestamps; `None` when no image has one.
    pub date_score: Option<f64>,
    /// Allow-listed files dropped because their metadata could not be read.
    pub failed_reads: usize,
    /// `false` for nodes restored from a snapshot and not yet rescanned.
    pub updated: bool,
    pub updated_at: SystemTime,
}

impl DirectoryNode {
    pub fn image_path(&self, image: &ImageRecord) -> PathBuf {
        self.path.join(&image.filename)
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Mean of the known timestamps, or `None` if there are none.
pub fn date_score(images: &[ImageRecord]) -> Option<f64> {
    let (sum, n) = images
        .iter()
        .filter_map(|img| img.timestamp)
        .fold((0.0_f64, 0_usize), |(sum, n), ts| (sum + ts as f64, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Return `true` if `name` is a visible file with an allow-listed extension.
#[must_use]
pub fn is_supported_image(name: &str) -> bool {
    if name.starts_with('.') {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// The key a directory is indexed under: `path` made absolute against the
/// working directory, without resolving symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn absolute(path: &Path) -> Result<PathBuf, IndexError> {
    std::path::absolute(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Scan one directory into a fresh node without touching any index.
///
/// # Errors
/// [`IndexError::NotADirectory`] if `path` is not an existing directory,
/// [`IndexError::Io`] if it cannot be listed.
pub fn scan_directory(
    path: &Path,
    extractor: &dyn MetadataExtractor,
) -> Result<DirectoryNode, IndexError> {
    if !path.is_dir() {
        return Err(IndexError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    let path = absolute(path)?;
    let listing = fs::read_dir(&path).map_err(|source| IndexError::Io {
        path: path.clone(),
        source,
    })?;

    let mut children = BTreeSet::new();
    let mut names = Vec::new();
    for entry in listing {
        let entry = entry.map_err(|source| IndexError::Io {
            path: path.clone(),
            source,
        })?;
        let child = entry.path();
        if child.is_dir() {
            if !is_hidden(&child) {
                children.insert(child);
            }
        } else if let Some(name) = entry.file_name().to_str() {
            if is_supported_image(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort_by_key(|n| n.to_lowercase());

    let mut images = Vec::with_capacity(names.len());
    let mut failed_reads = 0;
    for name in names {
        match extractor.extract(&path.join(&name)) {
            Ok(meta) => images.push(ImageRecord {
                filename: name,
                timestamp: meta.timestamp,
                orientation: meta.orientation,
            }),
            Err(err) => {
                warn!(error = %err, "skipping unreadable image");
                failed_reads += 1;
            }
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    debug!(path = %path.display(), images = images.len(), children = children.len(), "scanned directory");

    Ok(DirectoryNode {
        name,
        parent: path.parent().map(Path::to_path_buf),
        date_score: date_score(&images),
        children,
        images,
        failed_reads,
        updated: true,
        updated_at: SystemTime::now(),
        path,
    })
}

/// A directory that could not be scanned; its siblings are unaffected.
#[derive(Debug)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: IndexError,
}

/// Nodes produced by scanning a whole tree.
#[derive(Debug)]
pub struct TreeScan {
    pub root: PathBuf,
    pub nodes: Vec<DirectoryNode>,
    pub failed: Vec<ScanFailure>,
}

/// Scan `root` and every visible directory beneath it, parents first.
///
/// Only the root failing is an error; any other directory that fails is
/// logged and recorded in [`TreeScan::failed`].
pub fn scan_tree(root: &Path, extractor: &dyn MetadataExtractor) -> Result<TreeScan, IndexError> {
    let root_node = scan_directory(root, extractor)?;
    let root = root_node.path.clone();
    let mut nodes = vec![root_node];
    let mut failed = Vec::new();

    for entry in WalkDir::new(&root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !should_skip_dir(e))
    {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => {
                match scan_directory(entry.path(), extractor) {
                    Ok(node) => nodes.push(node),
                    Err(error) => {
                        warn!(path = %entry.path().display(), %error, "directory scan failed");
                        failed.push(ScanFailure {
                            path: entry.path().to_path_buf(),
                            error,
                        });
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                warn!(path = %path.display(), error = %err, "directory walk failed");
                failed.push(ScanFailure {
                    error: IndexError::Io {
                        path: path.clone(),
                        source: err.into(),
                    },
                    path,
                });
            }
        }
    }

    Ok(TreeScan {
        root,
        nodes,
        failed,
    })
}

fn should_skip_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with('.'))
}

/// Outcome of [`ImageIndex::add_root`].
#[derive(Debug)]
pub struct ScanReport {
    pub root: PathBuf,
    pub directories: usize,
    pub images: usize,
    pub failed: Vec<ScanFailure>,
}

/// Recursive image/folder counts for a subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStats {
    pub pics: usize,
    pub folders: usize,
}

/// Mapping from absolute directory path to node, plus the ordered roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageIndex {
    nodes: BTreeMap<PathBuf, DirectoryNode>,
    roots: Vec<PathBuf>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn get(&self, path: &Path) -> Option<&DirectoryNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    /// Directory paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DirectoryNode> {
        self.nodes.values()
    }

    /// Scan `path` and insert or replace its node.
    ///
    /// # Errors
    /// [`IndexError::NotADirectory`] if `path` is not an existing directory.
    pub fn add_directory(
        &mut self,
        path: &Path,
        extractor: &dyn MetadataExtractor,
    ) -> Result<&DirectoryNode, IndexError> {
        let node = scan_directory(path, extractor)?;
        let key = node.path.clone();
        self.insert_node(node);
        Ok(&self.nodes[&key])
    }

    /// Insert a pre-built node, returning the one it replaced.
    pub fn insert_node(&mut self, node: DirectoryNode) -> Option<DirectoryNode> {
        self.nodes.insert(node.path.clone(), node)
    }

    /// Register `root` and index every directory beneath it.
    ///
    /// # Errors
    /// Fails only if `root` itself cannot be scanned.
    pub fn add_root(
        &mut self,
        root: &Path,
        extractor: &dyn MetadataExtractor,
    ) -> Result<ScanReport, IndexError> {
        let scan = scan_tree(root, extractor)?;
        self.register_root(&scan.root);
        let directories = scan.nodes.len();
        let images = scan.nodes.iter().map(|n| n.images.len()).sum();
        for node in scan.nodes {
            self.insert_node(node);
        }
        info!(
            root = %scan.root.display(),
            directories,
            images,
            failed = scan.failed.len(),
            "indexed root"
        );
        Ok(ScanReport {
            root: scan.root,
            directories,
            images,
            failed: scan.failed,
        })
    }

    pub fn register_root(&mut self, root: &Path) {
        if !self.roots.iter().any(|r| r == root) {
            self.roots.push(root.to_path_buf());
        }
    }

    /// Remove `path` and every node beneath it. No-op if absent.
    pub fn remove_directory(&mut self, path: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .nodes
            .keys()
            .filter(|k| k.starts_with(path))
            .cloned()
            .collect();
        for key in &doomed {
            self.nodes.remove(key);
        }
        if let Some(parent) = path.parent().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(path);
        }
        self.roots.retain(|r| !r.starts_with(path));
        doomed.len()
    }

    /// Drop nodes under `root` that a rescan did not see.
    pub fn prune_missing(&mut self, root: &Path, seen: &HashSet<PathBuf>) -> Vec<PathBuf> {
        let stale: Vec<PathBuf> = self
            .nodes
            .keys()
            .filter(|k| k.starts_with(root) && !seen.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            self.nodes.remove(key);
        }
        stale
    }

    /// Recursive picture and folder counts for the subtree at `path`.
    pub fn stats(&self, path: &Path) -> Option<DirStats> {
        self.get(path)?;
        Some(self.walk(path).fold(DirStats::default(), |acc, p| DirStats {
            pics: acc.pics + self.nodes[p].images.len(),
            folders: acc.folders + 1,
        }))
    }

    /// Depth-first, parent-before-children traversal of the tree at `root`.
    pub fn walk<'a>(&'a self, root: &Path) -> Walk<'a> {
        let stack = self
            .nodes
            .get_key_value(root)
            .map(|(k, _)| vec![k.as_path()])
            .unwrap_or_default();
        Walk { index: self, stack }
    }

    /// Write the index as JSON.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).map_err(|source| IndexError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read an index written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// Every restored node is marked stale until the next rescan replaces it.
    pub fn load_snapshot(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path).map_err(|source| IndexError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut index: Self = serde_json::from_slice(&bytes)?;
        for node in index.nodes.values_mut() {
            node.updated = false;
        }
        Ok(index)
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, path: &Path, level: usize) -> fmt::Result {
        let Some(node) = self.get(path) else {
            return Ok(());
        };
        let score = node
            .date_score
            .map_or_else(|| "unknown".to_string(), |s| format!("{s:e}"));
        writeln!(
            f,
            "{}{}, Pics: {}, Date Score: {}",
            "   ".repeat(level),
            node.name,
            node.images.len(),
            score
        )?;
        for child in &node.children {
            self.fmt_tree(f, child, level + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ImageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Image Index ============")?;
        writeln!(f, "- Roots: {}", self.roots.len())?;
        writeln!(f, "- Folders: {}", self.nodes.len())?;
        for (i, root) in self.roots.iter().enumerate() {
            let stats = self.stats(root).unwrap_or_default();
            writeln!(f)?;
            writeln!(f, "Root {} at: {}", i + 1, root.display())?;
            writeln!(f, "Folders: {}, Pictures: {}", stats.folders, stats.pics)?;
            writeln!(f, "{}", "-".repeat(30))?;
            self.fmt_tree(f, root, 0)?;
        }
        write!(f, "{}", "=".repeat(37))
    }
}

/// Lazy traversal returned by [`ImageIndex::walk`].
///
/// Child paths always extend their parent's path, so the walk is finite.
/// Children that are not indexed are skipped.
pub struct Walk<'a> {
    index: &'a ImageIndex,
    stack: Vec<&'a Path>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Path;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.stack.pop()?;
        if let Some(node) = self.index.nodes.get(path) {
            for child in node.children.iter().rev() {
                if let Some((key, _)) = self.index.nodes.get_key_value(child) {
                    self.stack.push(key.as_path());
                }
            }
        }
        Some(path)
    }
}
