use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::display::DisplayConfig;
use crate::playlist::PlayMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Roots of the image forest; each is indexed independently.
    pub photo_library_paths: Vec<PathBuf>,
    /// Automatic selection policy.
    pub play_mode: PlayMode,
    /// Time an image remains fully visible before the next transition.
    #[serde(with = "humantime_serde")]
    pub display_duration: Duration,
    /// Cross-fade duration.
    #[serde(with = "humantime_serde")]
    pub fade_duration: Duration,
    /// Frames per second while cross-fading.
    pub fps: f64,
    /// Idle sleep between display loop ticks.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Image shown when nothing else can be selected in time.
    pub placeholder_path: PathBuf,
    /// How often the library is rescanned.
    #[serde(with = "humantime_serde")]
    pub rescan_interval: Duration,
    /// Directories excluded from automatic selection at startup.
    pub disabled_playlists: Vec<PathBuf>,
    /// Optional deterministic seed for playlist selection.
    pub playlist_seed: Option<u64>,
    /// Best-effort JSON index snapshot used to start before the first scan finishes.
    pub snapshot_path: Option<PathBuf>,
    /// Ambient light sensor driving sleep/wake.
    pub light_sensor: Option<LightSensorConfig>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.photo_library_paths.is_empty(),
            "photo-library-paths must name at least one directory"
        );
        ensure!(
            !self.display_duration.is_zero(),
            "display-duration must be greater than zero"
        );
        ensure!(
            !self.fade_duration.is_zero(),
            "fade-duration must be greater than zero"
        );
        ensure!(
            self.fps.is_finite() && self.fps > 0.0,
            "fps must be positive"
        );
        ensure!(
            !self.tick_interval.is_zero(),
            "tick-interval must be greater than zero"
        );
        ensure!(
            !self.rescan_interval.is_zero(),
            "rescan-interval must be greater than zero"
        );
        if let Some(sensor) = &self.light_sensor {
            sensor.validate().context("invalid light-sensor configuration")?;
        }
        Ok(self)
    }

    pub fn display(&self) -> DisplayConfig {
        DisplayConfig {
            display: self.display_duration,
            fade: self.fade_duration,
            fps: self.fps,
            placeholder: self.placeholder_path.clone(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_library_paths: Vec::new(),
            play_mode: PlayMode::default(),
            display_duration: Duration::from_secs(10),
            fade_duration: Duration::from_secs(2),
            fps: 20.0,
            tick_interval: Duration::from_millis(10),
            placeholder_path: PathBuf::from("placeholder.png"),
            rescan_interval: Duration::from_secs(5 * 60),
            disabled_playlists: Vec::new(),
            playlist_seed: None,
            snapshot_path: None,
            light_sensor: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LightSensorConfig {
    /// File holding the current illuminance, e.g. an IIO `in_illuminance_input`.
    pub device_path: PathBuf,
    /// Go to sleep when lux falls below this.
    pub sleep_below: f32,
    /// Wake when lux rises above this.
    pub wake_above: f32,
    #[serde(
        default = "LightSensorConfig::default_poll_interval",
        with = "humantime_serde"
    )]
    pub poll_interval: Duration,
}

impl LightSensorConfig {
    const fn default_poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.wake_above >= self.sleep_below,
            "light-sensor.wake-above must be >= light-sensor.sleep-below"
        );
        ensure!(
            !self.poll_interval.is_zero(),
            "light-sensor.poll-interval must be greater than zero"
        );
        Ok(())
    }
}
