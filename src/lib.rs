pub mod capture;
pub mod display;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use capture::{PixelFormat, Rotation, SourceStrategy};
use error::ConfigError;
use pipeline::{CaptureMode, LoopOptions, SessionTiming};

pub use capture::Frame;

/// Environment variables override the file with `SHUTTER_<SECTION>__<KEY>`
pub const ENV_PREFIX: &str = "SHUTTER";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub session: SessionConfig,
    pub inference: InferenceConfig,
    pub output: OutputConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub strategy: SourceStrategy,
    /// Try the other strategy if the first cannot be opened
    pub fallback: bool,
    pub buffer_count: u32,
    pub pipeline_program: String,
    /// Replaces the generated gst-launch pipeline description
    pub custom_pipeline: Option<String>,
    pub poll_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub stall_timeout_ms: u64,
    pub terminate_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub precountdown_secs: f64,
    pub countdown_secs: f64,
    /// Clockwise degrees: 0, 90, 180 or 270
    pub rotation: u32,
    pub mode: CaptureMode,
    pub max_captures: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub enabled: bool,
    /// Edge Impulse `.eim` runner
    pub model: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub prefix: String,
    /// `.png`, `.jpg` or `.jpeg`
    pub suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// SDL2 window; needs the `preview` feature
    pub enabled: bool,
    pub draw_fps: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: "/dev/video0".into(),
                width: 640,
                height: 480,
                fps: 30,
                format: PixelFormat::Bgr24,
                strategy: SourceStrategy::Pipeline,
                fallback: true,
                buffer_count: 4,
                pipeline_program: "gst-launch-1.0".into(),
                custom_pipeline: None,
                poll_timeout_ms: 100,
                startup_timeout_ms: 2_000,
                stall_timeout_ms: 2_000,
                terminate_grace_ms: 1_000,
            },
            session: SessionConfig {
                precountdown_secs: 2.0,
                countdown_secs: 3.0,
                rotation: 0,
                mode: CaptureMode::Single,
                max_captures: None,
            },
            inference: InferenceConfig {
                enabled: false,
                model: None,
                input_width: 28,
                input_height: 28,
                timeout_ms: 1_000,
            },
            output: OutputConfig {
                dir: "./captures".into(),
                prefix: "capture_".into(),
                suffix: ".png".into(),
            },
            preview: PreviewConfig {
                enabled: false,
                draw_fps: true,
            },
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (`path`, or `./shutter.toml` if present),
    /// then `SHUTTER_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(true),
            None => config::File::with_name("shutter")
                .format(config::FileFormat::Toml)
                .required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Startup checks; nothing here is re-checked inside the loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.capture;
        if c.width == 0 || c.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution {}x{} is empty",
                c.width, c.height
            )));
        }
        if c.fps == 0 {
            return Err(ConfigError::Invalid("fps must be positive".into()));
        }
        if c.buffer_count == 0 {
            return Err(ConfigError::Invalid("buffer_count must be positive".into()));
        }

        self.session.rotation()?;
        self.session.timing()?;

        // The preview window only takes packed 3-channel frames
        if self.preview.enabled && c.format.channels() != 3 {
            return Err(ConfigError::Invalid(format!(
                "preview cannot show {:?} frames",
                c.format
            )));
        }

        let i = &self.inference;
        if i.enabled && i.model.is_none() {
            return Err(ConfigError::Invalid(
                "inference is enabled but no model is configured".into(),
            ));
        }
        if i.input_width == 0 || i.input_height == 0 {
            return Err(ConfigError::Invalid("inference input size is empty".into()));
        }

        let suffix = self.output.suffix.to_lowercase();
        if !matches!(suffix.as_str(), ".png" | ".jpg" | ".jpeg") {
            return Err(ConfigError::Invalid(format!(
                "unsupported image suffix '{}'",
                self.output.suffix
            )));
        }
        Ok(())
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            poll_timeout: Duration::from_millis(self.capture.poll_timeout_ms),
            mode: self.session.mode,
            max_captures: self.session.max_captures,
            draw_fps: self.preview.draw_fps,
        }
    }
}

impl SessionConfig {
    pub fn rotation(&self) -> Result<Rotation, ConfigError> {
        Ok(Rotation::from_degrees(self.rotation)?)
    }

    pub fn timing(&self) -> Result<SessionTiming, ConfigError> {
        let secs = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value)
                .map_err(|_| ConfigError::Invalid(format!("{name} of {value}s is not a valid duration")))
        };
        Ok(SessionTiming {
            precountdown: secs("precountdown", self.precountdown_secs)?,
            countdown: secs("countdown", self.countdown_secs)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn odd_rotation_fails_fast() {
        let mut config = Config::default();
        config.session.rotation = 45;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Decode(DecodeError::UnsupportedRotation(45)))
        ));
    }

    #[test]
    fn negative_countdown_is_rejected() {
        let mut config = Config::default();
        config.session.countdown_secs = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn inference_needs_a_model() {
        let mut config = Config::default();
        config.inference.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn gray_frames_cannot_be_previewed() {
        let mut config = Config::default();
        config.capture.format = PixelFormat::Gray8;
        config.validate().unwrap();

        config.preview.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.capture.format = PixelFormat::Rgb24;
        config.validate().unwrap();
    }
}
