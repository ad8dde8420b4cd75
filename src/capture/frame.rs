use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// One decoded still image.
///
/// The buffer always holds exactly `width * height * channels` bytes, rows
/// packed top to bottom with no stride padding. Frames are only built through
/// [`decode`](super::decode) and [`Rotation::apply`].
#[derive(Clone)]
pub struct Frame {
    data: Bytes,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// When the last byte of the frame was read from the producer
    pub captured_at: Instant,
}

impl Frame {
    pub(crate) fn from_parts(
        data: Bytes,
        width: u32,
        height: u32,
        channels: u8,
        captured_at: Instant,
    ) -> Self {
        debug_assert_eq!(data.len(), frame_len(width, height, channels));
        Self {
            data,
            width,
            height,
            channels,
            captured_at,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("len", &self.data.len())
            .finish()
    }
}

pub(crate) fn frame_len(width: u32, height: u32, channels: u8) -> usize {
    width as usize * height as usize * channels as usize
}

/// Raw pixel layouts a producer can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgr24,
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> u8 {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Caps name understood by `videoconvert`
    pub fn gst_format(self) -> &'static str {
        match self {
            PixelFormat::Bgr24 => "BGR",
            PixelFormat::Rgb24 => "RGB",
            PixelFormat::Gray8 => "GRAY8",
        }
    }

    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            PixelFormat::Bgr24 => b"BGR3",
            PixelFormat::Rgb24 => b"RGB3",
            PixelFormat::Gray8 => b"GREY",
        }
    }
}

/// Clockwise rotation applied to every decoded frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self, DecodeError> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(DecodeError::UnsupportedRotation(other)),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Dimensions of a `width` x `height` frame after this rotation
    pub fn output_dims(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::None | Rotation::Cw180 => (width, height),
            Rotation::Cw90 | Rotation::Cw270 => (height, width),
        }
    }

    pub fn apply(self, frame: Frame) -> Frame {
        if self == Rotation::None {
            return frame;
        }

        let (w, h) = (frame.width as usize, frame.height as usize);
        let px = frame.channels as usize;
        let src = frame.data();
        let mut dst = vec![0u8; src.len()];
        let (out_w, out_h) = self.output_dims(frame.width, frame.height);

        for y in 0..h {
            for x in 0..w {
                let (dx, dy) = match self {
                    Rotation::Cw90 => (h - 1 - y, x),
                    Rotation::Cw180 => (w - 1 - x, h - 1 - y),
                    Rotation::Cw270 => (y, w - 1 - x),
                    Rotation::None => unreachable!(),
                };
                let s = (y * w + x) * px;
                let d = (dy * out_w as usize + dx) * px;
                dst[d..d + px].copy_from_slice(&src[s..s + px]);
            }
        }

        Frame::from_parts(
            Bytes::from(dst),
            out_w,
            out_h,
            frame.channels,
            frame.captured_at,
        )
    }
}

impl TryFrom<u32> for Rotation {
    type Error = DecodeError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees)
    }
}
