//! Fixed-size framing over an unframed byte stream.
//!
//! The producer writes packed raw frames back to back with no header, so the
//! only framing information is the caller-known frame size.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use tracing::{instrument, trace};

use super::source::Readiness;
use crate::error::FrameReadError;

/// Non-consuming readiness check on a file descriptor.
pub(crate) fn poll_fd(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<Readiness> {
    let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

    match nix::poll::poll(&mut fds, PollTimeout::from(millis)) {
        Ok(0) => Ok(Readiness::Timeout),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.contains(PollFlags::POLLIN) {
                // EOF is also readable; read_frame tells the two apart
                Ok(Readiness::Ready)
            } else if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL) {
                Ok(Readiness::Closed)
            } else {
                Ok(Readiness::Timeout)
            }
        }
        Err(Errno::EINTR) => Ok(Readiness::Timeout),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Frames a readable descriptor into `frame_len`-byte chunks.
pub struct RawStream<R> {
    reader: R,
    frame_len: usize,
    stall_timeout: Duration,
}

impl<R: Read + AsFd> RawStream<R> {
    pub fn new(reader: R, frame_len: usize, stall_timeout: Duration) -> Self {
        Self {
            reader,
            frame_len,
            stall_timeout,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn poll(&self, timeout: Duration) -> io::Result<Readiness> {
        poll_fd(self.reader.as_fd(), timeout)
    }

    /// Read exactly one frame.
    ///
    /// Call after [`poll`](Self::poll) reported `Ready`. Partial reads are
    /// accumulated; between them the descriptor is polled again so a producer
    /// that stops mid-frame costs at most `stall_timeout`.
    #[instrument(level = "trace", skip(self), fields(frame_len = self.frame_len))]
    pub fn read_frame(&mut self) -> Result<(Bytes, Instant), FrameReadError> {
        let mut buf = BytesMut::zeroed(self.frame_len);
        let mut filled = 0;

        while filled < self.frame_len {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(FrameReadError::Closed),
                Ok(0) => {
                    return Err(FrameReadError::Truncated {
                        expected: self.frame_len,
                        received: filled,
                    })
                }
                Ok(n) => {
                    filled += n;
                    trace!(filled, "partial read");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(FrameReadError::Io(e)),
            }

            if filled < self.frame_len {
                self.wait_for_more(filled)?;
            }
        }

        Ok((buf.freeze(), Instant::now()))
    }

    fn wait_for_more(&self, filled: usize) -> Result<(), FrameReadError> {
        let started = Instant::now();
        loop {
            let left = self.stall_timeout.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Err(FrameReadError::Stalled {
                    expected: self.frame_len,
                    received: filled,
                });
            }
            match self.poll(left)? {
                // Let the next read observe EOF and report the truncation
                Readiness::Ready | Readiness::Closed => return Ok(()),
                Readiness::Timeout => continue,
            }
        }
    }
}
