#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use shutter::capture::{Frame, FrameSource, Readiness};
use shutter::display::{FrameSink, Hud, Overlay};
use shutter::error::{SinkError, SourceError};
use shutter::pipeline::{CaptureState, ManualClock};

/// Producer that delivers constant frames at a fixed simulated rate.
///
/// Every delivered frame advances the shared clock by one frame interval, so
/// simulated arrival time is independent of how fast the test runs.
pub struct ScriptedSource {
    clock: ManualClock,
    interval: Duration,
    dims: (u32, u32, u8),
    fill: u8,
    frames_left: Option<u64>,
    timeouts_per_frame: u32,
    pending_timeouts: u32,
    poll_timeout_advance: Duration,
    pub delivered: u64,
    pub close_calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(clock: &ManualClock, fps: u32, dims: (u32, u32, u8)) -> Self {
        Self {
            clock: clock.clone(),
            interval: Duration::from_nanos(1_000_000_000 / fps as u64),
            dims,
            fill: 0,
            frames_left: None,
            timeouts_per_frame: 0,
            pending_timeouts: 0,
            poll_timeout_advance: Duration::ZERO,
            delivered: 0,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Close the stream after `n` frames
    pub fn with_limit(mut self, n: u64) -> Self {
        self.frames_left = Some(n);
        self
    }

    pub fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    /// Report `n` poll timeouts before every frame, each costing `advance`
    pub fn with_timeouts(mut self, n: u32, advance: Duration) -> Self {
        self.timeouts_per_frame = n;
        self.pending_timeouts = n;
        self.poll_timeout_advance = advance;
        self
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl FrameSource for ScriptedSource {
    fn dimensions(&self) -> (u32, u32, u8) {
        self.dims
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Readiness, SourceError> {
        if self.close_count() > 0 || self.frames_left == Some(0) {
            return Ok(Readiness::Closed);
        }
        if self.pending_timeouts > 0 {
            self.pending_timeouts -= 1;
            self.clock.advance(self.poll_timeout_advance);
            return Ok(Readiness::Timeout);
        }
        Ok(Readiness::Ready)
    }

    fn read_frame(&mut self) -> Result<Bytes, SourceError> {
        self.clock.advance(self.interval);
        if let Some(left) = self.frames_left.as_mut() {
            *left -= 1;
        }
        self.pending_timeouts = self.timeouts_per_frame;
        self.delivered += 1;
        let (w, h, c) = self.dims;
        Ok(Bytes::from(vec![self.fill; (w * h) as usize * c as usize]))
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub frames: Vec<Frame>,
}

impl FrameSink for RecordingSink {
    fn persist(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

/// One rendered HUD, with the simulated time it was drawn at
#[derive(Debug, Clone)]
pub struct Rendered {
    pub at: Duration,
    pub state: CaptureState,
    pub count: Option<u64>,
    pub fps: Option<f64>,
    pub label: Option<String>,
}

pub struct RecordingOverlay {
    clock: ManualClock,
    pub rendered: Vec<Rendered>,
}

impl RecordingOverlay {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            rendered: Vec::new(),
        }
    }

    /// Simulated time of the first render in `state`
    pub fn first_in(&self, state: CaptureState) -> Option<Duration> {
        self.rendered.iter().find(|r| r.state == state).map(|r| r.at)
    }
}

impl Overlay for RecordingOverlay {
    fn render(&mut self, _frame: &Frame, hud: &Hud<'_>) -> Result<(), SinkError> {
        self.rendered.push(Rendered {
            at: self.clock.elapsed(),
            state: hud.state,
            count: hud.count,
            fps: hud.fps,
            label: hud.classification.map(|(label, _)| label.to_string()),
        });
        Ok(())
    }
}
