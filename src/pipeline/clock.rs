//! Monotonic time, deadlines and frame-rate measurement

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time for the capture loop
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Simulated clock that only moves when told to.
///
/// Clones share the same time, so a test can hold one handle while the loop
/// holds another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Simulated time since construction
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// A point in time fixed when a state is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(start: Instant, duration: Duration) -> Self {
        Self {
            at: start + duration,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    /// Time left, zero once the deadline has passed
    pub fn remaining(&self, now: Instant) -> Duration {
        self.at.saturating_duration_since(now)
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }
}

/// Frames per second over fixed wall-clock windows.
///
/// Frames are counted until `window` has elapsed, then the estimate becomes
/// `frames / elapsed` for that window and counting restarts. A single slow
/// frame moves the estimate only by its share of the window.
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    estimate: Option<f64>,
}

impl FrameRateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames: 0,
            estimate: None,
        }
    }

    /// Count one frame arriving at `now` and return the current estimate
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        let Some(start) = self.window_start else {
            // The first frame opens the window; frames are counted after it
            self.window_start = Some(now);
            return self.estimate;
        };

        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window {
            self.estimate = Some(self.frames as f64 / elapsed.as_secs_f64());
            metrics::gauge!("capture_fps").set(self.estimate.unwrap_or_default());
            self.frames = 0;
            self.window_start = Some(now);
        }
        self.estimate
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.frames = 0;
        self.estimate = None;
    }
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let before = other.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now() - before, Duration::from_millis(250));
    }

    #[test]
    fn deadline_counts_down_to_zero() {
        let clock = ManualClock::new();
        let deadline = Deadline::after(clock.now(), Duration::from_secs(2));

        clock.advance(Duration::from_millis(1500));
        assert_eq!(deadline.remaining(clock.now()), Duration::from_millis(500));
        assert!(!deadline.expired(clock.now()));

        clock.advance(Duration::from_millis(600));
        assert_eq!(deadline.remaining(clock.now()), Duration::ZERO);
        assert!(deadline.expired(clock.now()));
    }

    #[test]
    fn meter_converges_to_arrival_rate() {
        let clock = ManualClock::new();
        let mut meter = FrameRateMeter::default();

        for _ in 0..=90 {
            meter.record(clock.now());
            clock.advance(Duration::from_millis(25));
        }

        let fps = meter.estimate().unwrap();
        assert!((fps - 40.0).abs() < 0.5, "fps was {fps}");
    }

    #[test]
    fn single_stall_does_not_collapse_estimate() {
        let clock = ManualClock::new();
        let mut meter = FrameRateMeter::default();

        // 30 fps with one 200 ms hiccup inside the window
        for i in 0..=31 {
            meter.record(clock.now());
            let gap = if i == 10 { 200 } else { 33 };
            clock.advance(Duration::from_millis(gap));
        }

        let fps = meter.estimate().unwrap();
        // Reciprocal of the stalled frame would report 5 fps
        assert!(fps > 20.0, "fps was {fps}");
    }

    #[test]
    fn no_estimate_before_first_window_closes() {
        let clock = ManualClock::new();
        let mut meter = FrameRateMeter::default();
        for _ in 0..10 {
            assert_eq!(meter.record(clock.now()), None);
            clock.advance(Duration::from_millis(50));
        }
    }
}
