//! Pause-aware playback progress tracking.
//!
//! A tracker accumulates unpaused wall-clock time on a 100 ms tick and fires
//! its natural-end callback exactly once when the accumulated time reaches
//! the target duration minus epsilon. Pausing freezes accumulation, so the
//! natural end stretches by exactly the paused duration. Without a target
//! the tracker never fires; completion then arrives via player EOF.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

const TICK: Duration = Duration::from_millis(100);

/// Default tolerance subtracted from the target before firing.
pub const DEFAULT_EPSILON: Duration = Duration::from_millis(60);

enum TrackerCmd {
    Pause,
    Resume,
    Stop,
}

/// Handle to a running tracker task. Dropping the handle stops the task
/// without firing.
pub struct PlaybackTracker {
    tx: mpsc::UnboundedSender<TrackerCmd>,
}

impl PlaybackTracker {
    /// Start tracking. `on_natural_end` runs at most once, on the tracker
    /// task; a panic inside it is confined to that task.
    pub fn start<F>(target: Option<Duration>, epsilon: Duration, on_natural_end: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Some(target) = target else {
                // No declared duration: just hold the callback until stopped.
                while let Some(cmd) = rx.recv().await {
                    if matches!(cmd, TrackerCmd::Stop) {
                        break;
                    }
                }
                return;
            };

            let threshold = target.saturating_sub(epsilon);
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut accumulated = Duration::ZERO;
            let mut last = Instant::now();
            let mut paused = false;
            let mut callback = Some(on_natural_end);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        if !paused {
                            accumulated += now - last;
                        }
                        last = now;
                        if accumulated >= threshold {
                            trace!(?accumulated, ?target, "natural end reached");
                            if let Some(f) = callback.take() {
                                f();
                            }
                            return;
                        }
                    }
                    cmd = rx.recv() => match cmd {
                        Some(TrackerCmd::Pause) => {
                            let now = Instant::now();
                            if !paused {
                                accumulated += now - last;
                            }
                            last = now;
                            paused = true;
                        }
                        Some(TrackerCmd::Resume) => {
                            last = Instant::now();
                            paused = false;
                        }
                        Some(TrackerCmd::Stop) | None => return,
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn pause(&self) {
        let _ = self.tx.send(TrackerCmd::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(TrackerCmd::Resume);
    }

    /// Terminal; the callback will not fire after this.
    pub fn stop(&self) {
        let _ = self.tx.send(TrackerCmd::Stop);
    }
}

impl Drop for PlaybackTracker {
    fn drop(&mut self) {
        let _ = self.tx.send(TrackerCmd::Stop);
    }
}
