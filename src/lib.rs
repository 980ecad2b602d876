#![forbid(unsafe_code)]

pub mod capture;
pub mod clock;
pub mod core;
pub mod ease;
pub mod engine;
pub mod error;
pub mod recorder;
pub mod renderer;
pub mod sink;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testutil;

pub use capture::{CaptureConfig, CaptureOutcome, CaptureSession, Progress, SessionState};
pub use clock::{Clock, ManualClock};
pub use core::{CameraBounds, CameraPose, FrameRgba, LngLat};
pub use ease::Ease;
pub use engine::{AnimationEngine, AnimationTask, CancelToken, RunOutcome, StartOutcome, TaskCtx, TaskStatus};
pub use error::{MapcapError, MapcapResult};
pub use recorder::{Recorder, RecorderEvent, RecordingConfig, RecordingOutput, RecordingResult};
pub use renderer::MapRenderer;
pub use sink::{
    AccelParams, EncoderConfig, FallbackNotice, FrameSink, SinkKind, create_sink,
};
pub use tasks::{LoopClosingTask, LoopMode, PreflightCorrection, preflight_correct};
