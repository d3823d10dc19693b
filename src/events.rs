use std::path::{Path, PathBuf};

use crate::playlist::ImageSelection;

/// Asynchronous requests for the display loop, applied at the top of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    /// Also sent for "play".
    Resume,
    TransitionNow,
    Sleep,
    Wake,
    /// Wake if asleep, otherwise sleep.
    ToggleSleep,
}

/// What the renderer needs to draw one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub path: PathBuf,
    pub orientation: u16,
    pub placeholder: bool,
}

impl RenderRequest {
    pub fn placeholder(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            orientation: 1,
            placeholder: true,
        }
    }
}

impl From<&ImageSelection> for RenderRequest {
    fn from(selection: &ImageSelection) -> Self {
        Self {
            path: selection.path(),
            orientation: selection.image.orientation,
            placeholder: false,
        }
    }
}
