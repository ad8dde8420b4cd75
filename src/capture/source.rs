use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::subprocess::PipelineSource;
use super::v4l2::DeviceSource;
use crate::error::SourceError;
use crate::CaptureConfig;

/// Outcome of a non-consuming readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Timeout,
    Closed,
}

/// A producer of fixed-size raw frames.
///
/// Implementations own their process and OS handles exclusively and release
/// them in [`close`](FrameSource::close), which must be idempotent.
pub trait FrameSource {
    /// Geometry every frame from this source has, before rotation.
    fn dimensions(&self) -> (u32, u32, u8);

    fn poll(&mut self, timeout: Duration) -> Result<Readiness, SourceError>;

    /// Read exactly one frame. Only call after `poll` returned `Ready`.
    fn read_frame(&mut self) -> Result<Bytes, SourceError>;

    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn dimensions(&self) -> (u32, u32, u8) {
        (**self).dimensions()
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness, SourceError> {
        (**self).poll(timeout)
    }

    fn read_frame(&mut self) -> Result<Bytes, SourceError> {
        (**self).read_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// How the raw stream is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStrategy {
    /// `gst-launch-1.0` writing raw frames to its stdout
    Pipeline,
    /// V4L2 memory-mapped streaming on the device node
    Device,
}

impl SourceStrategy {
    pub fn other(self) -> Self {
        match self {
            SourceStrategy::Pipeline => SourceStrategy::Device,
            SourceStrategy::Device => SourceStrategy::Pipeline,
        }
    }

    fn open(self, config: &CaptureConfig) -> Result<Box<dyn FrameSource + Send>, SourceError> {
        match self {
            SourceStrategy::Pipeline => Ok(Box::new(PipelineSource::open(config)?)),
            SourceStrategy::Device => Ok(Box::new(DeviceSource::open(config)?)),
        }
    }
}

/// Open the configured strategy, falling back to the other one if allowed.
pub fn open(config: &CaptureConfig) -> Result<Box<dyn FrameSource + Send>, SourceError> {
    let primary = config.strategy;
    let first = match primary.open(config) {
        Ok(source) => {
            info!(strategy = ?primary, "Frame source opened");
            return Ok(source);
        }
        Err(e) => e,
    };

    if !config.fallback {
        return Err(first);
    }

    let fallback = primary.other();
    warn!(strategy = ?primary, error = %first, "Source failed, trying {:?}", fallback);

    match fallback.open(config) {
        Ok(source) => {
            info!(strategy = ?fallback, "Frame source opened");
            Ok(source)
        }
        Err(second) => Err(SourceError::unavailable(
            "pipeline+device",
            format!("{first}; {second}"),
        )),
    }
}
