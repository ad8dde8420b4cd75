//! Optional per-frame classification.
//!
//! Frames are reduced to a fixed-length grayscale feature vector and handed
//! to an external [`Classifier`]. Failures here never stop acquisition.

pub mod eim;

use std::collections::BTreeMap;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use tracing::{debug, instrument};

use crate::capture::{Frame, PixelFormat};
use crate::error::InferenceError;

pub use eim::{EimRunner, ModelInfo};

/// Label → confidence, never empty
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    scores: BTreeMap<String, f32>,
}

impl ClassificationResult {
    pub fn new(scores: BTreeMap<String, f32>) -> Result<Self, InferenceError> {
        if scores.is_empty() {
            return Err(InferenceError::EmptyResult);
        }
        if let Some((label, &confidence)) = scores
            .iter()
            .find(|(_, c)| !(0.0..=1.0).contains(*c))
        {
            return Err(InferenceError::InvalidConfidence {
                label: label.clone(),
                confidence,
            });
        }
        Ok(Self { scores })
    }

    pub fn scores(&self) -> &BTreeMap<String, f32> {
        &self.scores
    }

    /// Highest-confidence label; ties go to the first label in order
    pub fn top(&self) -> (&str, f32) {
        let mut iter = self.scores.iter();
        // Non-empty by construction
        let (mut best_label, mut best) = match iter.next() {
            Some((label, c)) => (label.as_str(), *c),
            None => ("", 0.0),
        };
        for (label, &c) in iter {
            if c > best {
                best_label = label;
                best = c;
            }
        }
        (best_label, best)
    }
}

/// Boundary to an external classification engine
pub trait Classifier {
    /// Feature vector length the engine expects, if it reports one
    fn input_len(&self) -> Option<usize> {
        None
    }

    fn classify(&mut self, features: &[f32]) -> Result<ClassificationResult, InferenceError>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn input_len(&self) -> Option<usize> {
        (**self).input_len()
    }

    fn classify(&mut self, features: &[f32]) -> Result<ClassificationResult, InferenceError> {
        (**self).classify(features)
    }
}

/// Turns frames into features and features into a classification
pub struct InferenceAdapter {
    classifier: Box<dyn Classifier + Send>,
    input_width: u32,
    input_height: u32,
    format: PixelFormat,
}

impl InferenceAdapter {
    /// Fails if the engine expects a different feature length than
    /// `input_width * input_height`.
    pub fn new(
        classifier: Box<dyn Classifier + Send>,
        input_width: u32,
        input_height: u32,
        format: PixelFormat,
    ) -> Result<Self, InferenceError> {
        let actual = input_width as usize * input_height as usize;
        if let Some(expected) = classifier.input_len() {
            if expected != actual {
                return Err(InferenceError::FeatureCount { expected, actual });
            }
        }
        Ok(Self {
            classifier,
            input_width,
            input_height,
            format,
        })
    }

    #[instrument(level = "debug", skip_all)]
    pub fn classify(&mut self, frame: &Frame) -> Result<ClassificationResult, InferenceError> {
        let features = extract_features(frame, self.format, self.input_width, self.input_height);

        let started = Instant::now();
        let result = self.classifier.classify(&features);
        metrics::histogram!("inference_time_us").record(started.elapsed().as_micros() as f64);

        if let Ok(result) = &result {
            let (label, confidence) = result.top();
            debug!(label, confidence, "Classified frame");
        }
        result
    }
}

/// Grayscale, bilinear resize to `width` x `height`, scale to [0, 1].
///
/// Pure: identical frames always produce identical vectors.
pub fn extract_features(frame: &Frame, format: PixelFormat, width: u32, height: u32) -> Vec<f32> {
    let gray = grayscale(frame, format);
    let resized = if (gray.width(), gray.height()) == (width, height) {
        gray
    } else {
        imageops::resize(&gray, width, height, FilterType::Triangle)
    };
    resized.as_raw().iter().map(|&p| p as f32 / 255.0).collect()
}

fn grayscale(frame: &Frame, format: PixelFormat) -> GrayImage {
    let data = frame.data();
    let stride = frame.stride();
    let px = frame.channels as usize;
    let (r_at, b_at) = match format {
        PixelFormat::Rgb24 => (0, 2),
        PixelFormat::Bgr24 | PixelFormat::Gray8 => (2, 0),
    };

    GrayImage::from_fn(frame.width, frame.height, |x, y| {
        let i = y as usize * stride + x as usize * px;
        let luma = if px < 3 {
            data[i]
        } else {
            bt601(data[i + r_at], data[i + 1], data[i + b_at])
        };
        Luma([luma])
    })
}

/// ITU-R BT.601 luma in 14-bit fixed point
fn bt601(r: u8, g: u8, b: u8) -> u8 {
    let y = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14;
    y.min(255) as u8
}
