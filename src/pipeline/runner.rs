//! The cooperative capture loop.
//!
//! One iteration: check for quit, poll the source, read and decode one frame,
//! advance the session, classify, render. Only the read may block, and only
//! after the poll said data is there.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::clock::{Clock, FrameRateMeter};
use super::state::{CaptureSession, CaptureState};
use crate::capture::decoder::decode_at;
use crate::capture::{Frame, FrameSource, Readiness};
use crate::display::{FrameSink, Hud, Overlay};
use crate::error::{DecodeError, FrameReadError, SinkError, SourceError};
use crate::inference::InferenceAdapter;

/// What happens after a still has been persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// One capture, then return
    Single,
    /// Start a new session after every capture
    Repeat,
    /// No countdown; stream and classify until cancelled
    Live,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub poll_timeout: Duration,
    pub mode: CaptureMode,
    /// Stop repeat mode after this many captures
    pub max_captures: Option<u32>,
    pub draw_fps: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            mode: CaptureMode::Single,
            max_captures: None,
            draw_fps: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum AbortReason {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed { captures: u32, frames: u64 },
    Aborted { captures: u32, frames: u64, reason: AbortReason },
}

impl RunOutcome {
    pub fn captures(&self) -> u32 {
        match self {
            RunOutcome::Completed { captures, .. } | RunOutcome::Aborted { captures, .. } => {
                *captures
            }
        }
    }

    pub fn frames(&self) -> u64 {
        match self {
            RunOutcome::Completed { frames, .. } | RunOutcome::Aborted { frames, .. } => *frames,
        }
    }
}

/// Quit requests from outside the loop, checked once per iteration
pub struct Cancellation {
    rx: flume::Receiver<()>,
    cancelled: bool,
}

/// Sending half of a [`Cancellation`]; cheap to clone
#[derive(Clone)]
pub struct CancelHandle {
    tx: flume::Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // A full channel already carries a pending cancel
        let _ = self.tx.try_send(());
    }
}

impl Cancellation {
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = flume::bounded(1);
        (
            CancelHandle { tx },
            Cancellation {
                rx,
                cancelled: false,
            },
        )
    }

    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancelled && self.rx.try_recv().is_ok() {
            self.cancelled = true;
        }
        self.cancelled
    }
}

pub struct CaptureLoop<S, C, O, K> {
    source: S,
    clock: C,
    overlay: O,
    sink: K,
    session: CaptureSession,
    options: LoopOptions,
    inference: Option<InferenceAdapter>,
    cancel: Option<Cancellation>,
    meter: FrameRateMeter,
    frames: u64,
    captures: u32,
}

impl<S, C, O, K> CaptureLoop<S, C, O, K>
where
    S: FrameSource,
    C: Clock,
    O: Overlay,
    K: FrameSink,
{
    pub fn new(
        source: S,
        clock: C,
        overlay: O,
        sink: K,
        session: CaptureSession,
        options: LoopOptions,
    ) -> Self {
        Self {
            source,
            clock,
            overlay,
            sink,
            session,
            options,
            inference: None,
            cancel: None,
            meter: FrameRateMeter::default(),
            frames: 0,
            captures: 0,
        }
    }

    pub fn with_inference(mut self, adapter: InferenceAdapter) -> Self {
        self.inference = Some(adapter);
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run until the mode is satisfied, the user quits, or the source fails.
    /// The source is closed before this returns, whatever the outcome.
    pub fn run(&mut self) -> RunOutcome {
        let result = self.drive();
        self.source.close();

        let (captures, frames) = (self.captures, self.frames);
        match result {
            Ok(()) => {
                info!(captures, frames, "Capture complete");
                RunOutcome::Completed { captures, frames }
            }
            Err(reason) => {
                self.session.abort();
                match &reason {
                    AbortReason::Cancelled => info!(captures, frames, "Capture cancelled"),
                    other => error!(captures, frames, "Capture aborted: {}", other),
                }
                RunOutcome::Aborted {
                    captures,
                    frames,
                    reason,
                }
            }
        }
    }

    fn drive(&mut self) -> Result<(), AbortReason> {
        if self.options.mode != CaptureMode::Live {
            self.session.start(self.clock.now());
        }

        loop {
            if self.quit_requested() {
                return Err(AbortReason::Cancelled);
            }

            let Some(frame) = self.next_frame()? else {
                continue;
            };

            if self.session.state() == CaptureState::Captured {
                self.emit(&frame)?;
                if self.finished() {
                    return Ok(());
                }
                self.session.start(self.clock.now());
                continue;
            }

            self.process(&frame);
        }
    }

    fn quit_requested(&mut self) -> bool {
        let cancelled = self.cancel.as_mut().is_some_and(Cancellation::is_cancelled);
        cancelled || self.overlay.quit_requested()
    }

    /// Poll then read. `None` means the poll timed out.
    fn next_frame(&mut self) -> Result<Option<Frame>, AbortReason> {
        match self.source.poll(self.options.poll_timeout)? {
            Readiness::Timeout => {
                debug!("No frame within {:?}", self.options.poll_timeout);
                return Ok(None);
            }
            Readiness::Closed => return Err(SourceError::from(FrameReadError::Closed).into()),
            Readiness::Ready => {}
        }

        let data = self.source.read_frame()?;
        let now = self.clock.now();
        let (width, height, channels) = self.source.dimensions();
        let frame = decode_at(data, width, height, channels, now)?;

        self.frames += 1;
        metrics::counter!("frames_read_total").increment(1);

        Ok(Some(self.session.rotation().apply(frame)))
    }

    #[instrument(level = "trace", skip_all, fields(frame = self.frames))]
    fn process(&mut self, frame: &Frame) {
        let now = frame.captured_at;
        self.session.on_frame(now);
        let fps = self.meter.record(now);

        if let Some(adapter) = self.inference.as_mut() {
            match adapter.classify(frame) {
                Ok(result) => self.session.record_classification(&result),
                Err(e) => {
                    metrics::counter!("inference_errors_total").increment(1);
                    warn!(frame = self.frames, "Inference failed: {}", e);
                }
            }
        }

        let session = &self.session;
        let remaining = match session.state() {
            CaptureState::Precountdown => Some(session.precountdown_remaining()),
            CaptureState::Countdown => Some(session.countdown_remaining()),
            _ => None,
        };
        let hud = Hud {
            state: session.state(),
            remaining,
            count: session.displayed_count(),
            fps: fps.filter(|_| self.options.draw_fps),
            classification: session.last_classification(),
        };

        if let Err(e) = self.overlay.render(frame, &hud) {
            warn!("Overlay render failed: {}", e);
        }
    }

    /// Persist the one frame read after the countdown elapsed
    fn emit(&mut self, frame: &Frame) -> Result<(), AbortReason> {
        self.sink.persist(frame)?;
        self.captures += 1;
        metrics::counter!("captures_total").increment(1);

        let hud = Hud {
            state: CaptureState::Captured,
            remaining: None,
            count: None,
            fps: None,
            classification: None,
        };
        if let Err(e) = self.overlay.render(frame, &hud) {
            warn!("Overlay render failed: {}", e);
        }

        self.session.complete();
        Ok(())
    }

    fn finished(&self) -> bool {
        match self.options.mode {
            CaptureMode::Single => true,
            CaptureMode::Repeat => self
                .options
                .max_captures
                .is_some_and(|max| self.captures >= max),
            CaptureMode::Live => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_latches() {
        let (handle, mut cancel) = Cancellation::new();
        assert!(!cancel.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(cancel.is_cancelled());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn dropped_handle_is_not_a_cancel() {
        let (handle, mut cancel) = Cancellation::new();
        drop(handle);
        assert!(!cancel.is_cancelled());
    }
}
