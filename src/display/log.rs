//! Headless overlay: the HUD goes to the log instead of a window

use tracing::debug;

use super::{Hud, Overlay};
use crate::capture::Frame;
use crate::error::SinkError;

/// Logs the HUD whenever its text changes
#[derive(Debug, Default)]
pub struct LogOverlay {
    last: Vec<String>,
    frames: u64,
}

impl LogOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }
}

impl Overlay for LogOverlay {
    fn render(&mut self, frame: &Frame, hud: &Hud<'_>) -> Result<(), SinkError> {
        self.frames += 1;
        let lines = hud.lines();
        if lines != self.last {
            debug!(
                width = frame.width,
                height = frame.height,
                state = %hud.state,
                "{}",
                lines.join(" | ")
            );
            self.last = lines;
        }
        Ok(())
    }
}
