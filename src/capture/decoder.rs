use std::time::Instant;

use bytes::Bytes;

use super::frame::{frame_len, Frame, Rotation};
use crate::error::DecodeError;

/// Interpret a raw packed buffer as a `width` x `height` x `channels` image.
pub fn decode(
    buffer: impl Into<Bytes>,
    width: u32,
    height: u32,
    channels: u8,
) -> Result<Frame, DecodeError> {
    decode_at(buffer.into(), width, height, channels, Instant::now())
}

pub(crate) fn decode_at(
    buffer: Bytes,
    width: u32,
    height: u32,
    channels: u8,
    captured_at: Instant,
) -> Result<Frame, DecodeError> {
    let expected = frame_len(width, height, channels);
    if buffer.len() != expected || expected == 0 {
        return Err(DecodeError::InvalidBufferSize {
            width,
            height,
            channels,
            expected,
            actual: buffer.len(),
        });
    }
    Ok(Frame::from_parts(buffer, width, height, channels, captured_at))
}

/// Rotate clockwise by `degrees`, which must be 0, 90, 180 or 270.
pub fn rotate(frame: Frame, degrees: u32) -> Result<Frame, DecodeError> {
    Ok(Rotation::from_degrees(degrees)?.apply(frame))
}
