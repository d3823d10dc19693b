use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::display::{DisplayMachine, Frame, Renderer};
use crate::events::{ControlSignal, RenderRequest};
use crate::library::SelectionSource;

/// Drive `machine` until `cancel` fires.
///
/// Blocks the calling thread, which should be the one owning any rendering
/// context. Waits for `source` to become ready before showing anything, then
/// applies every queued signal at the top of each tick.
pub fn run(
    mut machine: DisplayMachine,
    source: &dyn SelectionSource,
    renderer: &mut dyn Renderer,
    signals: &Receiver<ControlSignal>,
    cancel: &CancellationToken,
    tick: Duration,
) {
    while !source.is_ready() {
        if cancel.is_cancelled() {
            return;
        }
        thread::sleep(tick.max(Duration::from_millis(50)));
    }

    machine.start(Instant::now(), source, renderer);

    while !cancel.is_cancelled() {
        let now = Instant::now();
        for signal in signals.try_iter() {
            machine.on_signal(signal, now, source, renderer);
        }
        machine.on_tick(now, source, renderer);
        thread::sleep(tick);
    }
    info!("cancel received; display loop stopped");
}

/// Renderer that only reports what it would draw.
#[derive(Debug, Default)]
pub struct LogRenderer {
    last_blank: bool,
}

impl Renderer for LogRenderer {
    fn show(&mut self, image: &RenderRequest) {
        info!(
            path = %image.path.display(),
            orientation = image.orientation,
            placeholder = image.placeholder,
            "displaying"
        );
    }

    fn draw(&mut self, frame: &Frame<'_>) {
        if frame.blank != self.last_blank {
            info!(blank = frame.blank, "screen");
            self.last_blank = frame.blank;
        }
        trace!(blend = frame.blend, blank = frame.blank, "frame");
    }
}
