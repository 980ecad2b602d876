use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::{
    core::FrameRgba,
    error::{MapcapError, MapcapResult},
    sink::{
        EncoderConfig, FINALIZE_TIMEOUT, FrameSink, SinkKind,
        ffmpeg::{self, FfmpegPipe},
    },
};

/// Synchronous software H.264 sink. Frames are written inline into the
/// encoder's input pipe and encoded as they arrive; there is no backpressure
/// beyond the latency of the write itself. Output is fragmented MP4 so the
/// stream never needs a seekable destination.
pub struct DirectSink {
    cfg: EncoderConfig,
    pipe: Option<FfmpegPipe>,
    output_rx: Option<Receiver<Vec<u8>>>,
}

impl DirectSink {
    pub fn new(cfg: &EncoderConfig) -> MapcapResult<Self> {
        if !ffmpeg::is_ffmpeg_on_path() {
            return Err(MapcapError::encoder_init(
                "ffmpeg not found on PATH; direct H.264 encoding is unavailable",
            ));
        }
        let listing = ffmpeg::available_encoders();
        if !ffmpeg::listing_has_encoder(&listing, "libx264") {
            return Err(MapcapError::encoder_init(
                "libx264 is not available in this ffmpeg build",
            ));
        }

        let mut args = ffmpeg::rawvideo_input_args(cfg);
        args.extend(
            [
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-b:v",
                &format!("{}k", cfg.bitrate_kbps),
                "-movflags",
                "frag_keyframe+empty_moov",
                "-f",
                "mp4",
                "pipe:1",
            ]
            .map(String::from),
        );

        let mut pipe = FfmpegPipe::spawn(&args)?;
        let output_rx = ffmpeg::collect_output(pipe.take_stdout()?);

        tracing::debug!(width = cfg.width, height = cfg.height, "direct sink ready");
        Ok(Self {
            cfg: cfg.clone(),
            pipe: Some(pipe),
            output_rx: Some(output_rx),
        })
    }
}

impl FrameSink for DirectSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Direct
    }

    fn push_frame(&mut self, frame: &FrameRgba) -> MapcapResult<()> {
        if frame.data.len() != self.cfg.frame_len() {
            return Err(MapcapError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }
        let Some(pipe) = self.pipe.as_mut() else {
            return Err(MapcapError::validation("direct sink is already finalized"));
        };
        pipe.write_frame(&frame.data)
    }

    fn finish(&mut self) -> MapcapResult<Vec<u8>> {
        let Some(mut pipe) = self.pipe.take() else {
            return Err(MapcapError::validation("direct sink is already finalized"));
        };
        let Some(output_rx) = self.output_rx.take() else {
            return Err(MapcapError::validation("direct sink is already finalized"));
        };

        pipe.close_stdin();
        let bytes = match output_rx.recv_timeout(FINALIZE_TIMEOUT) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => {
                pipe.kill();
                return Err(MapcapError::encoding_timeout(
                    "direct encoder produced no finalized stream within the budget",
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                pipe.kill();
                return Err(MapcapError::encode(
                    "direct encoder output pipe closed unexpectedly",
                ));
            }
        };
        pipe.wait_checked()?;
        Ok(bytes)
    }

    fn dispose(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close_stdin();
            pipe.kill();
        }
        self.output_rx = None;
    }
}

impl Drop for DirectSink {
    fn drop(&mut self) {
        self.dispose();
    }
}
