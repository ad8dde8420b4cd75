//! Capture session state machine.
//!
//! `Idle → Precountdown → Countdown → Captured → Idle`, with `Aborted`
//! reachable from anywhere. Transitions are decided only by deadlines fixed at
//! state entry, so the number of frames that arrive in between is irrelevant.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::clock::Deadline;
use crate::capture::Rotation;
use crate::inference::ClassificationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Precountdown,
    Countdown,
    Captured,
    Aborted,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Precountdown => "precountdown",
            CaptureState::Countdown => "countdown",
            CaptureState::Captured => "captured",
            CaptureState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What changed while handling one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Step {
    /// State entered on this frame, if any
    pub entered: Option<CaptureState>,
    /// New value of the displayed countdown integer
    pub tick: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTiming {
    pub precountdown: Duration,
    pub countdown: Duration,
}

/// One capture run
#[derive(Debug, Clone)]
pub struct CaptureSession {
    state: CaptureState,
    timing: SessionTiming,
    rotation: Rotation,
    resolution: (u32, u32),
    precountdown: Option<Deadline>,
    countdown: Option<Deadline>,
    precountdown_remaining: Duration,
    countdown_remaining: Duration,
    displayed: Option<u64>,
    last_classification: Option<(String, f32)>,
}

impl CaptureSession {
    pub fn new(timing: SessionTiming, rotation: Rotation, resolution: (u32, u32)) -> Self {
        Self {
            state: CaptureState::Idle,
            timing,
            rotation,
            resolution,
            precountdown: None,
            countdown: None,
            precountdown_remaining: timing.precountdown,
            countdown_remaining: timing.countdown,
            displayed: None,
            last_classification: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn precountdown_remaining(&self) -> Duration {
        self.precountdown_remaining
    }

    pub fn countdown_remaining(&self) -> Duration {
        self.countdown_remaining
    }

    /// Integer shown during the countdown
    pub fn displayed_count(&self) -> Option<u64> {
        self.displayed
    }

    pub fn last_classification(&self) -> Option<(&str, f32)> {
        self.last_classification
            .as_ref()
            .map(|(label, confidence)| (label.as_str(), *confidence))
    }

    /// Keep the arg-max of a successful classification
    pub fn record_classification(&mut self, result: &ClassificationResult) {
        let (label, confidence) = result.top();
        self.last_classification = Some((label.to_string(), confidence));
    }

    /// Leave `Idle`. Returns false if a session is already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state != CaptureState::Idle {
            return false;
        }
        self.precountdown = Some(Deadline::after(now, self.timing.precountdown));
        self.precountdown_remaining = self.timing.precountdown;
        self.countdown_remaining = self.timing.countdown;
        self.state = CaptureState::Precountdown;
        info!(
            "Starting {:.1} second precountdown",
            self.timing.precountdown.as_secs_f64()
        );
        true
    }

    /// Advance on a frame that arrived at `now`.
    pub fn on_frame(&mut self, now: Instant) -> Step {
        let mut step = Step::default();

        if self.state == CaptureState::Precountdown {
            let deadline = self.precountdown.unwrap_or_else(|| Deadline::after(now, Duration::ZERO));
            self.precountdown_remaining = deadline.remaining(now);
            if !deadline.expired(now) {
                return step;
            }

            // The countdown deadline is fixed at the moment of entry
            let countdown = Deadline::after(now, self.timing.countdown);
            self.countdown = Some(countdown);
            self.countdown_remaining = self.timing.countdown;
            self.state = CaptureState::Countdown;
            step.entered = Some(CaptureState::Countdown);
            info!(
                "Starting {:.1} second countdown",
                self.timing.countdown.as_secs_f64()
            );
        }

        if self.state == CaptureState::Countdown {
            let deadline = self.countdown.unwrap_or_else(|| Deadline::after(now, Duration::ZERO));
            let remaining = deadline.remaining(now);
            self.countdown_remaining = remaining;

            if deadline.expired(now) {
                self.state = CaptureState::Captured;
                step.entered = Some(CaptureState::Captured);
                debug!("Countdown elapsed, capturing next frame");
                return step;
            }

            let shown = whole_seconds_ceil(remaining);
            if self.displayed != Some(shown) {
                self.displayed = Some(shown);
                step.tick = Some(shown);
                info!("{}...", shown);
            }
        }

        step
    }

    /// The captured frame has been handed to the sink; ready for a new run
    pub fn complete(&mut self) {
        debug_assert_eq!(self.state, CaptureState::Captured);
        self.reset();
        self.state = CaptureState::Idle;
    }

    pub fn abort(&mut self) {
        if self.state != CaptureState::Aborted {
            info!(from = %self.state, "Session aborted");
        }
        self.reset();
        self.state = CaptureState::Aborted;
    }

    fn reset(&mut self) {
        self.precountdown = None;
        self.countdown = None;
        self.displayed = None;
        self.precountdown_remaining = self.timing.precountdown;
        self.countdown_remaining = self.timing.countdown;
    }
}

fn whole_seconds_ceil(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::{Clock, ManualClock};

    fn session(pre: u64, count: u64) -> CaptureSession {
        CaptureSession::new(
            SessionTiming {
                precountdown: Duration::from_secs(pre),
                countdown: Duration::from_secs(count),
            },
            Rotation::None,
            (640, 480),
        )
    }

    #[test]
    fn start_only_from_idle() {
        let clock = ManualClock::new();
        let mut s = session(2, 3);
        assert!(s.start(clock.now()));
        assert!(!s.start(clock.now()));
        assert_eq!(s.state(), CaptureState::Precountdown);
    }

    #[test]
    fn precountdown_reports_remaining_time() {
        let clock = ManualClock::new();
        let mut s = session(2, 3);
        s.start(clock.now());

        clock.advance(Duration::from_millis(800));
        assert_eq!(s.on_frame(clock.now()), Step::default());
        assert_eq!(s.precountdown_remaining(), Duration::from_millis(1200));
        assert_eq!(s.displayed_count(), None);
    }

    #[test]
    fn zero_durations_capture_on_first_frame() {
        let clock = ManualClock::new();
        let mut s = session(0, 0);
        s.start(clock.now());

        let step = s.on_frame(clock.now());
        assert_eq!(step.entered, Some(CaptureState::Captured));
        assert_eq!(s.state(), CaptureState::Captured);
    }

    #[test]
    fn complete_returns_to_idle_and_allows_restart() {
        let clock = ManualClock::new();
        let mut s = session(0, 0);
        s.start(clock.now());
        s.on_frame(clock.now());
        s.complete();

        assert_eq!(s.state(), CaptureState::Idle);
        assert!(s.start(clock.now()));
    }

    #[test]
    fn abort_is_terminal() {
        let clock = ManualClock::new();
        let mut s = session(2, 3);
        s.start(clock.now());
        s.abort();

        assert_eq!(s.state(), CaptureState::Aborted);
        assert!(!s.start(clock.now()));
        clock.advance(Duration::from_secs(10));
        assert_eq!(s.on_frame(clock.now()), Step::default());
        assert_eq!(s.state(), CaptureState::Aborted);
    }

    #[test]
    fn ceil_of_whole_seconds() {
        assert_eq!(whole_seconds_ceil(Duration::from_secs(3)), 3);
        assert_eq!(whole_seconds_ceil(Duration::from_millis(2001)), 3);
        assert_eq!(whole_seconds_ceil(Duration::from_millis(1)), 1);
        assert_eq!(whole_seconds_ceil(Duration::ZERO), 0);
    }
}
