//! Direct V4L2 capture of raw frames through memory-mapped buffers

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::frame_len;
use super::source::{FrameSource, Readiness};
use super::stream::poll_fd;
use crate::error::{FrameReadError, SourceError};
use crate::CaptureConfig;

const STRATEGY: &str = "device";

/// V4L2 device streaming the configured raw pixel format
pub struct DeviceSource {
    // Declared before `device` so buffers unmap before the handle closes
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    fd: RawFd,
    dims: (u32, u32, u8),
    sequence: u64,
    /// Set once the first dequeue has queued the buffers and started streaming
    primed: bool,
    stall: Duration,
}

impl DeviceSource {
    pub fn open(config: &CaptureConfig) -> Result<Self, SourceError> {
        info!("Initializing V4L2 capture: {}", config.device);
        let unavailable = |e: std::io::Error| SourceError::unavailable(STRATEGY, e);

        let device = Device::with_path(&config.device).map_err(unavailable)?;

        let caps = device.query_caps().map_err(unavailable)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SourceError::unavailable(
                STRATEGY,
                "device doesn't support video capture",
            ));
        }

        let mut fmt = device.format().map_err(unavailable)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(config.format.fourcc());
        let negotiated = device.set_format(&fmt).map_err(unavailable)?;

        // A driver that adjusts the geometry shows up as a size mismatch on read
        debug!(
            "Negotiated {}x{} {}",
            negotiated.width, negotiated.height, negotiated.fourcc
        );

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Could not set {} fps: {}", config.fps, e);
        }

        // No STREAMON here: the first `next()` queues every buffer and starts
        // the stream itself
        let mut stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
                .map_err(unavailable)?;
        stream.set_timeout(Duration::from_millis(config.startup_timeout_ms));

        info!("Capture stream mapped with {} buffers", config.buffer_count);

        let fd = device.handle().fd();

        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            fd,
            dims: (config.width, config.height, config.format.channels()),
            sequence: 0,
            primed: false,
            stall: Duration::from_millis(config.stall_timeout_ms),
        })
    }
}

impl FrameSource for DeviceSource {
    fn dimensions(&self) -> (u32, u32, u8) {
        self.dims
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness, SourceError> {
        if let Some(readiness) = readiness_without_poll(self.device.is_some(), self.primed) {
            return Ok(readiness);
        }
        // SAFETY: the descriptor belongs to `self.device`, which is alive here
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        poll_fd(fd, timeout).map_err(|e| FrameReadError::Io(e).into())
    }

    #[instrument(level = "debug", skip(self), fields(seq = self.sequence + 1))]
    fn read_frame(&mut self) -> Result<Bytes, SourceError> {
        let (w, h, c) = self.dims;
        let expected = frame_len(w, h, c);

        let stream = self.stream.as_mut().ok_or(FrameReadError::Closed)?;
        let dequeued = stream.next().map(|(buf, meta)| {
            let used = (meta.bytesused as usize).min(buf.len());
            (Bytes::copy_from_slice(&buf[..used]), meta.bytesused as usize)
        });

        if !self.primed {
            // One attempt only; a failed start leaves the fd reporting an error
            self.primed = true;
            stream.set_timeout(self.stall);
            debug!("Capture stream primed");
        }

        let (data, used) = dequeued.map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => FrameReadError::Stalled {
                expected,
                received: 0,
            },
            _ => FrameReadError::Io(e),
        })?;

        if used == 0 {
            return Err(FrameReadError::Closed.into());
        }
        if used != expected || data.len() != expected {
            return Err(FrameReadError::SizeMismatch {
                expected,
                received: data.len(),
            }
            .into());
        }

        self.sequence += 1;
        Ok(data)
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                warn!("Failed to stop capture stream: {}", e);
            }
            info!(frames = self.sequence, "Capture stream stopped");
        }
        self.device.take();
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Readiness that can be decided without touching the descriptor.
///
/// Until the first dequeue no buffer is queued, so the fd has nothing to
/// report (vb2 flags POLLERR) and that first read must be let through.
fn readiness_without_poll(open: bool, primed: bool) -> Option<Readiness> {
    match (open, primed) {
        (false, _) => Some(Readiness::Closed),
        (true, false) => Some(Readiness::Ready),
        (true, true) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_read_is_let_through_before_streaming() {
        assert_eq!(readiness_without_poll(true, false), Some(Readiness::Ready));
    }

    #[test]
    fn primed_stream_defers_to_the_descriptor() {
        assert_eq!(readiness_without_poll(true, true), None);
    }

    #[test]
    fn closed_device_reports_closed() {
        assert_eq!(readiness_without_poll(false, false), Some(Readiness::Closed));
        assert_eq!(readiness_without_poll(false, true), Some(Readiness::Closed));
    }

    #[test]
    fn missing_device_is_unavailable() {
        let mut config = crate::Config::default().capture;
        config.device = "/nonexistent/video99".into();
        match DeviceSource::open(&config) {
            Err(SourceError::Unavailable { strategy, .. }) => assert_eq!(strategy, STRATEGY),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("a missing node cannot open"),
        }
    }
}
