//! Still-image persistence

use std::io;
use std::path::{Path, PathBuf};

use image::ColorType;
use tracing::info;

use super::FrameSink;
use crate::capture::{Frame, PixelFormat};
use crate::error::SinkError;
use crate::utils::next_free_path;

type PathSource = Box<dyn FnMut() -> io::Result<PathBuf> + Send>;

/// Writes each captured frame to the path the caller hands out
pub struct ImageFileSink {
    format: PixelFormat,
    next_path: PathSource,
    written: Vec<PathBuf>,
}

impl ImageFileSink {
    pub fn new(format: PixelFormat, next_path: PathSource) -> Self {
        Self {
            format,
            next_path,
            written: Vec::new(),
        }
    }

    /// `dir/{prefix}{n}{suffix}` with the first unused `n`
    pub fn sequential(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        format: PixelFormat,
    ) -> Self {
        let dir = dir.into();
        let prefix = prefix.into();
        let suffix = suffix.into();
        Self::new(
            format,
            Box::new(move || {
                std::fs::create_dir_all(&dir)?;
                Ok(next_free_path(&dir, &prefix, &suffix))
            }),
        )
    }

    /// Paths written so far, oldest first
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl FrameSink for ImageFileSink {
    fn persist(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let path = (self.next_path)()?;
        write_image(frame, self.format, &path)?;
        info!("Image successfully saved to {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

/// Encode by file extension (PNG, JPEG), converting BGR to RGB first.
pub fn write_image(frame: &Frame, format: PixelFormat, path: &Path) -> Result<(), SinkError> {
    let (buf, color) = match (frame.channels, format) {
        (1, _) => (frame.data().to_vec(), ColorType::L8),
        (3, PixelFormat::Rgb24) => (frame.data().to_vec(), ColorType::Rgb8),
        (3, _) => {
            let mut rgb = frame.data().to_vec();
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            (rgb, ColorType::Rgb8)
        }
        (channels, _) => return Err(SinkError::UnsupportedChannels { channels }),
    };

    image::save_buffer(path, &buf, frame.width, frame.height, color).map_err(|source| {
        SinkError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decode;

    #[test]
    fn sequential_sink_writes_png_with_rgb_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink =
            ImageFileSink::sequential(dir.path().join("Class_1"), "capture_", ".png", PixelFormat::Bgr24);

        // One blue pixel, BGR
        let frame = decode(vec![255, 0, 0], 1, 1, 3).unwrap();
        sink.persist(&frame).unwrap();
        sink.persist(&frame).unwrap();

        let written = sink.written();
        assert_eq!(written[0], dir.path().join("Class_1/capture_0.png"));
        assert_eq!(written[1], dir.path().join("Class_1/capture_1.png"));

        let img = image::open(&written[0]).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn two_channel_frames_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let frame = decode(vec![0u8; 8], 2, 2, 2).unwrap();
        let err = write_image(&frame, PixelFormat::Gray8, &dir.path().join("x.png")).unwrap_err();
        assert!(matches!(err, SinkError::UnsupportedChannels { channels: 2 }));
    }
}
