pub mod clock;
pub mod runner;
pub mod state;

pub use clock::{Clock, Deadline, FrameRateMeter, ManualClock, SystemClock};
pub use runner::{
    AbortReason, CancelHandle, Cancellation, CaptureLoop, CaptureMode, LoopOptions, RunOutcome,
};
pub use state::{CaptureSession, CaptureState, SessionTiming, Step};
