//! Collaborators that show and persist frames.
//!
//! The capture loop only talks to these traits; drawing and file naming
//! policy live behind them.

#[cfg(feature = "preview")]
pub mod display;
pub mod file;
pub mod log;

use std::fmt::Write as _;
use std::time::Duration;

use crate::capture::Frame;
use crate::error::SinkError;
use crate::pipeline::CaptureState;

#[cfg(feature = "preview")]
pub use display::Sdl2Display;
pub use file::ImageFileSink;
pub use log::LogOverlay;

/// Text painted over the live frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hud<'a> {
    pub state: CaptureState,
    pub remaining: Option<Duration>,
    pub count: Option<u64>,
    pub fps: Option<f64>,
    pub classification: Option<(&'a str, f32)>,
}

impl Hud<'_> {
    /// One line per element, in drawing order
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(3);
        match (self.state, self.remaining) {
            (CaptureState::Precountdown, Some(left)) => {
                lines.push(format!("Starting in: {:.1}", left.as_secs_f64()))
            }
            (CaptureState::Countdown, Some(left)) => {
                let mut line = String::new();
                if let Some(count) = self.count {
                    let _ = write!(line, "{count} ");
                }
                let _ = write!(line, "Capturing in: {:.1}", left.as_secs_f64());
                lines.push(line);
            }
            _ => {}
        }
        if let Some(fps) = self.fps {
            lines.push(format!("FPS: {fps:.1}"));
        }
        if let Some((label, confidence)) = self.classification {
            lines.push(format!("{label}: {confidence:.2}"));
        }
        lines
    }
}

/// Paints the HUD and shows live frames
pub trait Overlay {
    fn render(&mut self, frame: &Frame, hud: &Hud<'_>) -> Result<(), SinkError>;

    /// Whether the user asked to quit since the last call
    fn quit_requested(&mut self) -> bool {
        false
    }
}

/// Receives the single captured still of each session
pub trait FrameSink {
    fn persist(&mut self, frame: &Frame) -> Result<(), SinkError>;
}

impl<T: Overlay + ?Sized> Overlay for &mut T {
    fn render(&mut self, frame: &Frame, hud: &Hud<'_>) -> Result<(), SinkError> {
        (**self).render(frame, hud)
    }

    fn quit_requested(&mut self) -> bool {
        (**self).quit_requested()
    }
}

impl<T: FrameSink + ?Sized> FrameSink for &mut T {
    fn persist(&mut self, frame: &Frame) -> Result<(), SinkError> {
        (**self).persist(frame)
    }
}

impl<T: Overlay + ?Sized> Overlay for Box<T> {
    fn render(&mut self, frame: &Frame, hud: &Hud<'_>) -> Result<(), SinkError> {
        (**self).render(frame, hud)
    }

    fn quit_requested(&mut self) -> bool {
        (**self).quit_requested()
    }
}
