//! Error taxonomy for the capture pipeline.
//!
//! Acquisition and decode errors abort the running session, inference errors
//! never do. Configuration errors are raised once at startup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the frame producer.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The producer could not be started by any strategy.
    #[error("source unavailable ({strategy}): {reason}")]
    Unavailable { strategy: String, reason: String },

    /// The stream ended early or delivered a malformed frame.
    #[error(transparent)]
    FrameRead(#[from] FrameReadError),
}

impl SourceError {
    pub fn unavailable(strategy: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            strategy: strategy.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameReadError {
    /// Zero bytes were returned before any part of a frame arrived.
    #[error("stream closed")]
    Closed,

    /// End of stream after part of a frame.
    #[error("stream ended after {received} of {expected} frame bytes")]
    Truncated { expected: usize, received: usize },

    /// The producer delivered a buffer of the wrong size.
    #[error("producer delivered {received} bytes, expected {expected}")]
    SizeMismatch { expected: usize, received: usize },

    /// No further bytes arrived within the stall timeout mid-frame.
    #[error("stream stalled after {received} of {expected} frame bytes")]
    Stalled { expected: usize, received: usize },

    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),
}

/// Raw buffer interpretation and configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer holds {actual} bytes, {width}x{height}x{channels} needs {expected}")]
    InvalidBufferSize {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },

    #[error("rotation {0} is not supported, must be 0, 90, 180 or 270")]
    UnsupportedRotation(u32),
}

/// Non-fatal classifier failures.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model initialization failed: {0}")]
    Init(String),

    #[error("model expects {expected} features, adapter produces {actual}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("classifier reported an error: {0}")]
    Remote(String),

    #[error("classifier returned no labels")]
    EmptyResult,

    #[error("confidence {confidence} for label '{label}' is outside [0, 1]")]
    InvalidConfidence { label: String, confidence: f32 },

    #[error("classifier did not answer within the timeout")]
    Timeout,

    #[error("malformed classifier reply: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("classifier I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the display/persistence collaborators.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot persist {channels}-channel frames")]
    UnsupportedChannels { channels: u8 },

    #[error("display error: {0}")]
    Display(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
