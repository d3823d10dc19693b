use std::path::PathBuf;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LightSensorConfig;
use crate::events::ControlSignal;

/// Ambient light source.
pub trait LightSensor: Send {
    fn read_lux(&mut self) -> Result<f32>;
}

/// Reads illuminance from a sysfs-style text file (Linux IIO).
#[derive(Debug, Clone)]
pub struct IioLightSensor {
    path: PathBuf,
}

impl IioLightSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LightSensor for IioLightSensor {
    fn read_lux(&mut self) -> Result<f32> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        raw.trim()
            .parse::<f32>()
            .with_context(|| format!("unexpected sensor value {:?}", raw.trim()))
    }
}

/// Edge-triggered sleep/wake decisions with a dead band between the thresholds.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    sleep_below: f32,
    wake_above: f32,
    asleep: bool,
}

impl Hysteresis {
    pub fn new(sleep_below: f32, wake_above: f32) -> Self {
        Self {
            sleep_below,
            wake_above,
            asleep: false,
        }
    }

    /// Feed one reading; returns a signal only when the state flips.
    pub fn update(&mut self, lux: f32) -> Option<ControlSignal> {
        if !self.asleep && lux < self.sleep_below {
            self.asleep = true;
            Some(ControlSignal::Sleep)
        } else if self.asleep && lux > self.wake_above {
            self.asleep = false;
            Some(ControlSignal::Wake)
        } else {
            None
        }
    }
}

/// Poll `sensor` and forward sleep/wake transitions to the display.
pub async fn run<S: LightSensor>(
    mut sensor: S,
    cfg: LightSensorConfig,
    to_viewer: Sender<ControlSignal>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = Hysteresis::new(cfg.sleep_below, cfg.wake_above);
    loop {
        match sensor.read_lux() {
            Ok(lux) => {
                debug!(lux, "light sensor reading");
                if let Some(signal) = state.update(lux) {
                    info!(lux, ?signal, "light level crossed threshold");
                    if to_viewer.send(signal).is_err() {
                        warn!("viewer channel closed; stopping sensor task");
                        break;
                    }
                }
            }
            Err(err) => warn!("light sensor read failed: {err:#}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(cfg.poll_interval) => {}
        }
    }
    Ok(())
}
