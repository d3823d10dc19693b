use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::events::{ControlSignal, RenderRequest};
use crate::library::SelectionSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Init,
    Display,
    Transition,
}

/// Timing for the display loop.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// How long an image stays fully visible.
    pub display: Duration,
    /// Length of the cross-fade into the next image.
    pub fade: Duration,
    pub fps: f64,
    /// Shown whenever no selection arrives within the retry budget.
    pub placeholder: PathBuf,
}

impl DisplayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    /// Frames in one transition, `ceil(fade * fps)` and at least one.
    pub fn transition_frames(&self) -> u32 {
        let exact = self.fade.as_secs_f64() * self.fps;
        // absorb float noise such as 15.000000000000002
        ((exact - 1e-9).ceil().max(1.0)) as u32
    }

    pub fn blend_step(&self) -> f64 {
        1.0 / (self.fps * self.fade.as_secs_f64())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            budget: self.display / 2,
            backoff: Duration::from_millis(50).min(self.display / 10),
        }
    }
}

/// Bounded retry for fetching the next selection.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub budget: Duration,
    pub backoff: Duration,
}

/// What the renderer draws on one tick.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub current: Option<&'a RenderRequest>,
    /// Image being faded out during a transition.
    pub previous: Option<&'a RenderRequest>,
    /// 0.0 shows only `previous`, 1.0 only `current`.
    pub blend: f64,
    /// Asleep: draw nothing but black.
    pub blank: bool,
}

/// Draws selections. Decoding, orientation, and compositing live here.
pub trait Renderer {
    /// A new image becomes current.
    fn show(&mut self, image: &RenderRequest);
    /// Called once per tick.
    fn draw(&mut self, frame: &Frame<'_>);
}

/// Ask `source` for the next image until it answers or `retry.budget` runs
/// out, then fall back to `placeholder`.
pub fn fetch_with_retry(
    source: &dyn SelectionSource,
    retry: RetryPolicy,
    placeholder: &Path,
) -> RenderRequest {
    let started = Instant::now();
    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        match source.next_selection() {
            Ok(selection) => return RenderRequest::from(&selection),
            Err(err) => {
                if started.elapsed() + retry.backoff > retry.budget {
                    warn!(%err, attempts, placeholder = %placeholder.display(), "no selection; showing placeholder");
                    return RenderRequest::placeholder(placeholder);
                }
                debug!(%err, attempts, "selection failed; retrying");
                thread::sleep(retry.backoff);
            }
        }
    }
}

/// Timed display loop: `Init -> Display <-> Transition`, with orthogonal
/// paused and asleep flags.
///
/// Time is passed in explicitly so the machine can be driven by tests.
pub struct DisplayMachine {
    config: DisplayConfig,
    retry: RetryPolicy,
    state: DisplayState,
    paused_at: Option<Instant>,
    asleep: bool,
    current: Option<RenderRequest>,
    previous: Option<RenderRequest>,
    next_display: Instant,
    next_frame: Instant,
    frames_done: u32,
    blend: f64,
}

impl DisplayMachine {
    pub fn new(config: DisplayConfig, now: Instant) -> Self {
        let retry = config.retry_policy();
        Self {
            config,
            retry,
            state: DisplayState::Init,
            paused_at: None,
            asleep: false,
            current: None,
            previous: None,
            next_display: now,
            next_frame: now,
            frames_done: 0,
            blend: 1.0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn blend(&self) -> f64 {
        self.blend
    }

    pub fn current(&self) -> Option<&RenderRequest> {
        self.current.as_ref()
    }

    pub fn next_display_deadline(&self) -> Instant {
        self.next_display
    }

    /// Leave `Init`: show the first image and arm the display deadline.
    /// Stays in `Init` until `source` reports ready.
    pub fn start(
        &mut self,
        now: Instant,
        source: &dyn SelectionSource,
        renderer: &mut dyn Renderer,
    ) {
        if self.state != DisplayState::Init || !source.is_ready() {
            return;
        }
        self.cut_to_next(now, source, renderer);
        info!(path = ?self.current.as_ref().map(|c| &c.path), "display started");
    }

    pub fn on_signal(
        &mut self,
        signal: ControlSignal,
        now: Instant,
        source: &dyn SelectionSource,
        renderer: &mut dyn Renderer,
    ) {
        debug!(?signal, state = ?self.state, "control signal");
        match signal {
            ControlSignal::Pause => {
                if self.paused_at.is_none() {
                    self.paused_at = Some(now);
                    info!("paused");
                }
            }
            ControlSignal::Resume => {
                if let Some(since) = self.paused_at.take() {
                    let frozen = now.saturating_duration_since(since);
                    self.next_display += frozen;
                    self.next_frame += frozen;
                    info!(paused_for = ?frozen, "resumed");
                }
            }
            ControlSignal::TransitionNow => {
                if !self.asleep && self.state != DisplayState::Init {
                    self.cut_to_next(now, source, renderer);
                }
            }
            ControlSignal::Sleep => {
                if !self.asleep {
                    self.asleep = true;
                    info!("asleep");
                }
            }
            ControlSignal::Wake => {
                if self.asleep {
                    self.asleep = false;
                    info!("awake");
                    if self.state != DisplayState::Init {
                        self.cut_to_next(now, source, renderer);
                    }
                }
            }
            ControlSignal::ToggleSleep => {
                let signal = if self.asleep {
                    ControlSignal::Wake
                } else {
                    ControlSignal::Sleep
                };
                self.on_signal(signal, now, source, renderer);
            }
        }
    }

    pub fn on_tick(
        &mut self,
        now: Instant,
        source: &dyn SelectionSource,
        renderer: &mut dyn Renderer,
    ) {
        if self.state == DisplayState::Init {
            self.start(now, source, renderer);
        }
        if !self.asleep && self.paused_at.is_none() {
            match self.state {
                DisplayState::Display if now > self.next_display => {
                    self.begin_transition(now, source, renderer);
                }
                DisplayState::Transition if now > self.next_frame => {
                    self.step_transition(now);
                }
                _ => {}
            }
        }
        renderer.draw(&self.frame());
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame {
            current: self.current.as_ref(),
            previous: self.previous.as_ref(),
            blend: self.blend,
            blank: self.asleep,
        }
    }

    fn begin_transition(
        &mut self,
        now: Instant,
        source: &dyn SelectionSource,
        renderer: &mut dyn Renderer,
    ) {
        let next = fetch_with_retry(source, self.retry, &self.config.placeholder);
        renderer.show(&next);
        self.previous = self.current.replace(next);
        self.state = DisplayState::Transition;
        self.frames_done = 0;
        self.blend = 0.0;
        self.next_frame = now + self.config.frame_interval();
    }

    fn step_transition(&mut self, now: Instant) {
        self.frames_done += 1;
        self.next_frame += self.config.frame_interval();
        self.blend = (f64::from(self.frames_done) * self.config.blend_step()).min(1.0);
        if self.frames_done >= self.config.transition_frames() {
            self.blend = 1.0;
            self.previous = None;
            self.state = DisplayState::Display;
            self.next_display = now + self.config.display;
        }
    }

    /// Replace the current image immediately, skipping the fade.
    fn cut_to_next(
        &mut self,
        now: Instant,
        source: &dyn SelectionSource,
        renderer: &mut dyn Renderer,
    ) {
        let next = fetch_with_retry(source, self.retry, &self.config.placeholder);
        renderer.show(&next);
        self.current = Some(next);
        self.previous = None;
        self.blend = 1.0;
        self.frames_done = 0;
        self.state = DisplayState::Display;
        self.next_display = now + self.config.display;
        // the fresh deadline is already relative to `now`; resume must only
        // add the pause time that follows
        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
    }
}
