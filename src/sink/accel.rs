use std::{
    io::Write as _,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    core::FrameRgba,
    error::{MapcapError, MapcapResult},
    sink::{
        EncoderConfig, FINALIZE_TIMEOUT, FrameSink, SinkKind,
        ffmpeg::{self, FfmpegPipe},
    },
};

/// Hardware encoder families, probed in preference order.
const HW_ENCODERS: &[&str] = &[
    "h264_nvenc",
    "h264_vaapi",
    "h264_qsv",
    "h264_amf",
    "h264_v4l2m2m",
    "h264_vulkan",
];

/// Frames in flight before `push_frame` blocks.
const FRAME_QUEUE_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Quality {
    Speed,
    #[default]
    Balanced,
    Best,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LatencyMode {
    #[default]
    Standard,
    Realtime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BitrateMode {
    #[default]
    Variable,
    Constant,
}

/// Knobs only the accelerated backend understands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccelParams {
    pub quality: Quality,
    pub latency: LatencyMode,
    pub bitrate_mode: BitrateMode,
}

pub(crate) fn accel_output_args(cfg: &EncoderConfig, encoder: &str) -> Vec<String> {
    let params = cfg.accel.unwrap_or_default();
    let mut args: Vec<String> = vec!["-c:v".into(), encoder.into()];

    args.push("-preset".into());
    args.push(
        match params.quality {
            Quality::Speed => "fast",
            Quality::Balanced => "medium",
            Quality::Best => "slow",
        }
        .into(),
    );

    if params.latency == LatencyMode::Realtime {
        args.extend(["-flags".into(), "low_delay".into()]);
    }

    let rate = format!("{}k", cfg.bitrate_kbps);
    args.extend(["-b:v".into(), rate.clone()]);
    if params.bitrate_mode == BitrateMode::Constant {
        args.extend([
            "-minrate".into(),
            rate.clone(),
            "-maxrate".into(),
            rate.clone(),
            "-bufsize".into(),
            format!("{}k", cfg.bitrate_kbps * 2),
        ]);
    }

    args.extend(
        [
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "frag_keyframe+empty_moov",
            "-f",
            "mp4",
            "pipe:1",
        ]
        .map(String::from),
    );
    args
}

/// Hardware-accelerated H.264 sink. Frames are copied into a bounded queue
/// serviced by a writer thread; `push_frame` blocks while the queue is full,
/// and returning is the signal that the caller's buffer may be reused.
pub struct AcceleratedSink {
    cfg: EncoderConfig,
    frame_tx: Option<Sender<Vec<u8>>>,
    writer: Option<JoinHandle<Result<(), String>>>,
    pipe: Option<FfmpegPipe>,
    output_rx: Option<Receiver<Vec<u8>>>,
}

impl AcceleratedSink {
    pub fn new(cfg: &EncoderConfig) -> MapcapResult<Self> {
        if !ffmpeg::is_ffmpeg_on_path() {
            return Err(MapcapError::encoder_init(
                "ffmpeg not found on PATH; accelerated encoding is unavailable",
            ));
        }
        let listing = ffmpeg::available_encoders();
        let Some(encoder) = HW_ENCODERS
            .iter()
            .copied()
            .find(|name| ffmpeg::listing_has_encoder(&listing, name))
        else {
            return Err(MapcapError::encoder_init(format!(
                "no hardware H.264 encoder available (checked: {})",
                HW_ENCODERS.join(", ")
            )));
        };
        tracing::debug!(encoder, "accelerated sink using hardware encoder");

        let mut args = ffmpeg::rawvideo_input_args(cfg);
        args.extend(accel_output_args(cfg, encoder));

        let mut pipe = FfmpegPipe::spawn(&args)?;
        let output_rx = ffmpeg::collect_output(pipe.take_stdout()?);
        let mut stdin = pipe.take_stdin()?;

        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Vec<u8>>(FRAME_QUEUE_DEPTH);
        let writer = thread::spawn(move || {
            for data in frame_rx {
                if let Err(e) = stdin.write_all(&data) {
                    return Err(format!("failed to write frame to encoder: {e}"));
                }
            }
            // Dropping stdin here is the encoder's end-of-input.
            Ok(())
        });

        Ok(Self {
            cfg: cfg.clone(),
            frame_tx: Some(frame_tx),
            writer: Some(writer),
            pipe: Some(pipe),
            output_rx: Some(output_rx),
        })
    }

    fn join_writer(&mut self) -> MapcapResult<()> {
        if let Some(writer) = self.writer.take() {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(msg)) => return Err(MapcapError::encode(msg)),
                Err(_) => return Err(MapcapError::encode("encoder writer thread panicked")),
            }
        }
        Ok(())
    }
}

impl FrameSink for AcceleratedSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Accelerated
    }

    fn push_frame(&mut self, frame: &FrameRgba) -> MapcapResult<()> {
        if frame.data.len() != self.cfg.frame_len() {
            return Err(MapcapError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }
        let Some(tx) = self.frame_tx.as_ref() else {
            return Err(MapcapError::validation(
                "accelerated sink is already finalized",
            ));
        };
        // The queue owns a copy; a full queue blocks here (backpressure).
        if tx.send(frame.data.clone()).is_err() {
            self.join_writer()?;
            return Err(MapcapError::encode("encoder writer thread terminated"));
        }
        Ok(())
    }

    fn finish(&mut self) -> MapcapResult<Vec<u8>> {
        if self.frame_tx.take().is_none() {
            return Err(MapcapError::validation(
                "accelerated sink is already finalized",
            ));
        }
        self.join_writer()?;

        let Some(mut pipe) = self.pipe.take() else {
            return Err(MapcapError::validation(
                "accelerated sink is already finalized",
            ));
        };
        let Some(output_rx) = self.output_rx.take() else {
            return Err(MapcapError::validation(
                "accelerated sink is already finalized",
            ));
        };

        let bytes = match output_rx.recv_timeout(FINALIZE_TIMEOUT) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => {
                pipe.kill();
                return Err(MapcapError::encoding_timeout(
                    "accelerated encoder produced no finalized stream within the budget",
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                pipe.kill();
                return Err(MapcapError::encode(
                    "accelerated encoder output pipe closed unexpectedly",
                ));
            }
        };
        pipe.wait_checked()?;
        Ok(bytes)
    }

    fn dispose(&mut self) {
        self.frame_tx = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        if let Some(mut pipe) = self.pipe.take() {
            pipe.kill();
        }
        self.output_rx = None;
    }
}

impl Drop for AcceleratedSink {
    fn drop(&mut self) {
        self.dispose();
    }
}
