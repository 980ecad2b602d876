//! Encoder backends behind one lifecycle contract.
//!
//! Three families with deliberately different delivery models: the direct
//! sink writes frames inline, the accelerated sink queues them for a
//! hardware encoder, and the streaming sink talks to an isolated worker
//! over typed channels. The capture scheduler only sees [`FrameSink`].

mod accel;
mod direct;
mod ffmpeg;
mod stream;

pub use accel::{AccelParams, AcceleratedSink, BitrateMode, LatencyMode, Quality};
pub use direct::DirectSink;
pub use stream::StreamingSink;

use std::time::Duration;

use crate::{
    core::FrameRgba,
    error::{MapcapError, MapcapResult},
};

/// Budget for the streaming worker's ready handshake.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for a backend to deliver its finalized stream after end-of-input.
pub(crate) const FINALIZE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SinkKind {
    /// Synchronous in-process-style encoding: frames are written inline into
    /// the encoder's input and encoded as they arrive.
    Direct,
    /// Hardware-accelerated encoding with an asynchronous frame queue.
    Accelerated,
    /// Encoding in an isolated worker, bridged by message passing.
    Streaming,
}

impl SinkKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Direct | Self::Accelerated => "video/mp4",
            Self::Streaming => "video/webm",
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Accelerated => "accelerated",
            Self::Streaming => "streaming",
        }
    }

    /// Next backend in the deterministic fallback chain.
    fn fallback(self) -> Option<SinkKind> {
        match self {
            Self::Direct => Some(Self::Accelerated),
            Self::Accelerated => Some(Self::Streaming),
            Self::Streaming => None,
        }
    }
}

/// Immutable once a sink has been created from it.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate_kbps: u32,
    pub kind: SinkKind,
    /// Quality/latency/bitrate-mode knobs; only the accelerated backend
    /// understands them.
    pub accel: Option<AccelParams>,
}

impl EncoderConfig {
    pub fn validate(&self) -> MapcapResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MapcapError::validation(
                "encoder width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p output needs even dimensions on every backend we drive.
            return Err(MapcapError::validation(
                "encoder width/height must be even",
            ));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(MapcapError::validation("encoder fps must be > 0"));
        }
        if self.bitrate_kbps == 0 {
            return Err(MapcapError::validation("encoder bitrate must be > 0"));
        }
        Ok(())
    }

    pub(crate) fn frame_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

/// Uniform lifecycle over the encoder backends.
pub trait FrameSink {
    fn kind(&self) -> SinkKind;

    /// Submit one frame. A sink that retains frames asynchronously copies the
    /// buffer; the call returning is the backpressure ack, after which the
    /// caller may mutate or reuse the buffer.
    fn push_frame(&mut self, frame: &FrameRgba) -> MapcapResult<()>;

    /// Close the stream and return the finalized bytes. Fails with
    /// [`MapcapError::EncodingTimeout`] if the backend produces no completion
    /// signal within the finalize budget.
    fn finish(&mut self) -> MapcapResult<Vec<u8>>;

    /// Release backend resources. Idempotent; safe to call after `finish` or
    /// instead of it.
    fn dispose(&mut self);
}

/// One hop of the fallback chain, surfaced to the caller as a non-fatal
/// warning.
#[derive(Clone, Debug)]
pub struct FallbackNotice {
    pub from: SinkKind,
    pub to: SinkKind,
    pub reason: String,
}

/// Build a sink for the requested backend, walking the fallback chain on
/// init failures: direct -> accelerated -> streaming, one hop per failure.
/// Exhausting the chain is fatal. Only [`MapcapError::EncoderInit`] triggers
/// a hop; any other error aborts immediately.
pub fn create_sink(cfg: &EncoderConfig) -> MapcapResult<(Box<dyn FrameSink>, Vec<FallbackNotice>)> {
    cfg.validate()?;
    select_with_fallback(cfg.kind, |kind| build_sink(kind, cfg))
}

fn build_sink(kind: SinkKind, cfg: &EncoderConfig) -> MapcapResult<Box<dyn FrameSink>> {
    match kind {
        SinkKind::Direct => Ok(Box::new(DirectSink::new(cfg)?)),
        SinkKind::Accelerated => Ok(Box::new(AcceleratedSink::new(cfg)?)),
        SinkKind::Streaming => Ok(Box::new(StreamingSink::new(cfg)?)),
    }
}

pub(crate) fn select_with_fallback(
    requested: SinkKind,
    mut build: impl FnMut(SinkKind) -> MapcapResult<Box<dyn FrameSink>>,
) -> MapcapResult<(Box<dyn FrameSink>, Vec<FallbackNotice>)> {
    let mut notices = Vec::new();
    let mut kind = requested;
    loop {
        match build(kind) {
            Ok(sink) => return Ok((sink, notices)),
            Err(MapcapError::EncoderInit(reason)) => match kind.fallback() {
                Some(next) => {
                    tracing::warn!(
                        from = kind.label(),
                        to = next.label(),
                        %reason,
                        "encoder backend unavailable, falling back"
                    );
                    notices.push(FallbackNotice {
                        from: kind,
                        to: next,
                        reason,
                    });
                    kind = next;
                }
                None => {
                    return Err(MapcapError::encoder_init(format!(
                        "all encoder backends failed; last error: {reason}"
                    )));
                }
            },
            Err(e) => return Err(e),
        }
    }
}
