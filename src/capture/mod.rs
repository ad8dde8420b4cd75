pub mod decoder;
pub mod frame;
pub mod source;
pub mod stream;
pub mod subprocess;
pub mod v4l2;

pub use decoder::{decode, rotate};
pub use frame::{Frame, PixelFormat, Rotation};
pub use source::{open, FrameSource, Readiness, SourceStrategy};
pub use stream::RawStream;
pub use subprocess::{PipelineSource, ProcessTimeouts};
pub use v4l2::DeviceSource;
