use std::collections::HashMap;
use std::mem;
use std::path::{Path, PathBuf};

use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::index::{DirectoryNode, ImageIndex, ImageRecord, normalize_path};

/// Automatic selection policies.
///
/// Rules:
/// - `UniformRandom`: every enabled image is equally likely on every call.
/// - `RandomPlaylist`: pick a random playlist, play it front to back, repeat.
/// - `RandomPlaylistShuffled`: pick a random playlist, play one shuffled lap of it, repeat.
/// - Playlist pickers never choose the playlist that just finished unless it is the only one left.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum PlayMode {
    UniformRandom,
    RandomPlaylist,
    #[default]
    RandomPlaylistShuffled,
}

/// Which policy `advance` currently dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Auto(PlayMode),
    PlayNow,
}

/// The scheduler's position within the current playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayCursor {
    pub directory: Option<PathBuf>,
    pub image: Option<usize>,
    /// Shuffled image order for `RandomPlaylistShuffled`.
    pub permutation: Vec<usize>,
    /// Position within `permutation` (or within a play-now list).
    pub counter: usize,
}

/// Enable/disable overlay restricting which directories automatic policies may pick.
///
/// Directories are enabled unless explicitly disabled.
#[derive(Debug, Clone, Default)]
pub struct PlayMask {
    flags: HashMap<PathBuf, bool>,
}

impl PlayMask {
    /// Returns `true` if the call changed the mask.
    pub fn set(&mut self, path: &Path, enabled: bool) -> bool {
        let before = self.is_enabled(path);
        self.flags.insert(path.to_path_buf(), enabled);
        before != enabled
    }

    pub fn is_enabled(&self, path: &Path) -> bool {
        self.flags.get(path).copied().unwrap_or(true)
    }

    pub fn disabled(&self) -> impl Iterator<Item = &PathBuf> {
        self.flags
            .iter()
            .filter(|(_, enabled)| !**enabled)
            .map(|(p, _)| p)
    }
}

/// State saved when a play-now request preempts automatic playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptFrame {
    pub cursor: PlayCursor,
    pub mode: PlayMode,
}

#[derive(Debug, Clone)]
struct Interrupt {
    frame: InterruptFrame,
    directory: PathBuf,
    images: Vec<ImageRecord>,
}

/// One image chosen for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSelection {
    pub directory: PathBuf,
    pub image: ImageRecord,
}

impl ImageSelection {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.image.filename)
    }
}

/// Chooses the next image to show from an [`ImageIndex`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    mode: PlayMode,
    cursor: PlayCursor,
    mask: PlayMask,
    interrupt: Option<Interrupt>,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(mode: PlayMode, rng: StdRng) -> Self {
        Self {
            mode,
            cursor: PlayCursor::default(),
            mask: PlayMask::default(),
            interrupt: None,
            rng,
        }
    }

    pub fn seeded(mode: PlayMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::new(mode, rng)
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn policy(&self) -> Policy {
        if self.interrupt.is_some() {
            Policy::PlayNow
        } else {
            Policy::Auto(self.mode)
        }
    }

    pub fn cursor(&self) -> &PlayCursor {
        &self.cursor
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_some()
    }

    /// The frame a running play-now request will restore.
    pub fn interrupt_frame(&self) -> Option<&InterruptFrame> {
        self.interrupt.as_ref().map(|i| &i.frame)
    }

    pub fn mask(&self) -> &PlayMask {
        &self.mask
    }

    /// Switch automatic policy. Playback restarts with a fresh playlist; a
    /// running play-now request finishes first and then resumes in `mode`.
    pub fn set_mode(&mut self, mode: PlayMode) {
        info!(?mode, "play mode changed");
        match self.interrupt.as_mut() {
            Some(active) => {
                active.frame = InterruptFrame {
                    cursor: PlayCursor::default(),
                    mode,
                };
            }
            None => {
                self.mode = mode;
                self.cursor = PlayCursor::default();
            }
        }
    }

    /// Relative paths are resolved the same way the index resolves roots.
    pub fn set_enabled(&mut self, path: &Path, enabled: bool) -> bool {
        let path = normalize_path(path);
        let changed = self.mask.set(&path, enabled);
        if changed {
            info!(path = %path.display(), enabled, "playlist mask changed");
        }
        changed
    }

    pub fn is_enabled(&self, path: &Path) -> bool {
        self.mask.is_enabled(&normalize_path(path))
    }

    /// Preempt automatic playback with `images` (or the whole directory) in order.
    ///
    /// Only one frame is held: calling this while a play-now list is running
    /// replaces that list and keeps the automatic state saved by the first call.
    ///
    /// # Errors
    /// [`PlaybackError::InvalidDirectory`] if `path` is not indexed,
    /// [`PlaybackError::EmptyPlaylist`] for an explicit empty list,
    /// [`PlaybackError::EmptyDirectory`] if no list is given and the directory has no images.
    pub fn play_now(
        &mut self,
        index: &ImageIndex,
        path: &Path,
        images: Option<Vec<ImageRecord>>,
    ) -> Result<(), PlaybackError> {
        let path = normalize_path(path);
        let node = index
            .get(&path)
            .ok_or_else(|| PlaybackError::InvalidDirectory { path: path.clone() })?;
        let images = match images {
            Some(list) if list.is_empty() => return Err(PlaybackError::EmptyPlaylist),
            Some(list) => list,
            None if !node.has_images() => {
                return Err(PlaybackError::EmptyDirectory { path });
            }
            None => node.images.clone(),
        };

        let frame = match self.interrupt.take() {
            Some(active) => {
                warn!(
                    replaced = %active.directory.display(),
                    "play-now already running; replacing its list"
                );
                active.frame
            }
            None => InterruptFrame {
                cursor: mem::take(&mut self.cursor),
                mode: self.mode,
            },
        };

        info!(path = %path.display(), images = images.len(), "play now");
        self.cursor = PlayCursor {
            directory: Some(node.path.clone()),
            ..PlayCursor::default()
        };
        self.interrupt = Some(Interrupt {
            frame,
            directory: node.path.clone(),
            images,
        });
        Ok(())
    }

    /// Choose the next image.
    ///
    /// # Errors
    /// [`PlaybackError::NoEligiblePlaylists`] when every directory is masked
    /// or empty. Both are recoverable; the caller retries later.
    pub fn advance(&mut self, index: &ImageIndex) -> Result<ImageSelection, PlaybackError> {
        if let Some(selection) = self.step_play_now() {
            return Ok(selection);
        }
        if let Some(done) = self.interrupt.take() {
            info!(
                path = %done.directory.display(),
                mode = ?done.frame.mode,
                "play-now finished; resuming"
            );
            self.cursor = done.frame.cursor;
            self.mode = done.frame.mode;
        }

        let selection = match self.mode {
            PlayMode::UniformRandom => self.uniform_random(index),
            PlayMode::RandomPlaylist => self.random_playlist(index),
            PlayMode::RandomPlaylistShuffled => self.random_playlist_shuffled(index),
        }?;
        debug!(path = %selection.path().display(), "selected");
        Ok(selection)
    }

    fn step_play_now(&mut self) -> Option<ImageSelection> {
        let active = self.interrupt.as_ref()?;
        let position = self.cursor.image.map_or(0, |i| i + 1);
        let image = active.images.get(position)?.clone();
        self.cursor.image = Some(position);
        self.cursor.counter = position;
        Some(ImageSelection {
            directory: active.directory.clone(),
            image,
        })
    }

    fn uniform_random(&mut self, index: &ImageIndex) -> Result<ImageSelection, PlaybackError> {
        let candidates = eligible(index, &self.mask);
        let weights: Vec<usize> = candidates.iter().map(|n| n.images.len()).collect();
        let pick = weighted_index(&weights, &mut self.rng)
            .ok_or(PlaybackError::NoEligiblePlaylists)?;
        let node = candidates[pick];
        let image = self.rng.random_range(0..node.images.len());
        self.cursor = PlayCursor {
            directory: Some(node.path.clone()),
            image: Some(image),
            ..PlayCursor::default()
        };
        select(node, image)
    }

    fn random_playlist(&mut self, index: &ImageIndex) -> Result<ImageSelection, PlaybackError> {
        let next = self
            .current_node(index)
            .zip(self.cursor.image)
            .and_then(|(node, i)| (i + 1 < node.images.len()).then_some(i + 1));

        match next {
            Some(i) => self.cursor.image = Some(i),
            None => {
                let node = self.choose_playlist(index)?;
                self.cursor = PlayCursor {
                    directory: Some(node.path.clone()),
                    image: Some(0),
                    ..PlayCursor::default()
                };
            }
        }
        self.selection_at_cursor(index)
    }

    fn random_playlist_shuffled(
        &mut self,
        index: &ImageIndex,
    ) -> Result<ImageSelection, PlaybackError> {
        let permutation_len = self.cursor.permutation.len();
        let next = self
            .current_node(index)
            .filter(|node| node.images.len() == permutation_len)
            .and_then(|_| (self.cursor.counter + 1 < permutation_len).then_some(self.cursor.counter + 1));

        match next {
            Some(counter) => {
                self.cursor.counter = counter;
                self.cursor.image = Some(self.cursor.permutation[counter]);
            }
            None => {
                let node = self.choose_playlist(index)?;
                let mut permutation: Vec<usize> = (0..node.images.len()).collect();
                permutation.shuffle(&mut self.rng);
                self.cursor = PlayCursor {
                    directory: Some(node.path.clone()),
                    image: permutation.first().copied(),
                    permutation,
                    counter: 0,
                };
            }
        }
        self.selection_at_cursor(index)
    }

    /// The cursor's directory, if it is still indexed and enabled.
    fn current_node<'a>(&self, index: &'a ImageIndex) -> Option<&'a DirectoryNode> {
        let dir = self.cursor.directory.as_deref()?;
        if !self.mask.is_enabled(dir) {
            return None;
        }
        index.get(dir)
    }

    /// Pick a new playlist uniformly, avoiding the current one when possible.
    fn choose_playlist<'a>(
        &mut self,
        index: &'a ImageIndex,
    ) -> Result<&'a DirectoryNode, PlaybackError> {
        let mut candidates = eligible(index, &self.mask);
        if candidates.len() > 1 {
            if let Some(current) = self.cursor.directory.as_deref() {
                candidates.retain(|n| n.path != current);
            }
        }
        let node = *candidates
            .choose(&mut self.rng)
            .ok_or(PlaybackError::NoEligiblePlaylists)?;
        info!(path = %node.path.display(), images = node.images.len(), "now playing");
        Ok(node)
    }

    fn selection_at_cursor(&self, index: &ImageIndex) -> Result<ImageSelection, PlaybackError> {
        let dir = self
            .cursor
            .directory
            .as_deref()
            .ok_or(PlaybackError::NoEligiblePlaylists)?;
        let node = index.get(dir).ok_or(PlaybackError::NoEligiblePlaylists)?;
        select(node, self.cursor.image.unwrap_or(0))
    }
}

fn select(node: &DirectoryNode, image: usize) -> Result<ImageSelection, PlaybackError> {
    let image = node
        .images
        .get(image)
        .cloned()
        .ok_or_else(|| PlaybackError::EmptyDirectory {
            path: node.path.clone(),
        })?;
    Ok(ImageSelection {
        directory: node.path.clone(),
        image,
    })
}

/// Enabled directories with at least one image, in path order.
fn eligible<'a>(index: &'a ImageIndex, mask: &PlayMask) -> Vec<&'a DirectoryNode> {
    index
        .nodes()
        .filter(|n| n.has_images() && mask.is_enabled(&n.path))
        .collect()
}

/// Inverse-CDF weighted choice: the first slot whose running total exceeds a
/// uniform draw in `[0, total)`. `None` when all weights are zero.
pub fn weighted_index<R: Rng>(weights: &[usize], rng: &mut R) -> Option<usize> {
    let cumulative: Vec<usize> = weights
        .iter()
        .scan(0_usize, |total, w| {
            *total += w;
            Some(*total)
        })
        .collect();
    let total = cumulative.last().copied().unwrap_or(0);
    if total == 0 {
        return None;
    }
    let x = rng.random_range(0..total);
    Some(cumulative.partition_point(|&c| c <= x))
}

/// Run the scheduler `iterations` times without a display, stopping at the
/// first error.
pub fn simulate(
    index: &ImageIndex,
    mode: PlayMode,
    seed: Option<u64>,
    iterations: usize,
) -> Vec<ImageSelection> {
    let mut scheduler = Scheduler::seeded(mode, seed);
    let mut plan = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        match scheduler.advance(index) {
            Ok(selection) => plan.push(selection),
            Err(err) => {
                warn!(%err, "simulation stopped");
                break;
            }
        }
    }
    plan
}
