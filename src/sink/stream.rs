//! Streaming backend adapter: bridges the [`FrameSink`] contract to an
//! encoder running in an isolated worker, reachable only through typed
//! channel messages.
//!
//! Protocol: the worker is spawned with its configuration and must answer
//! with [`WorkerEvent::Ready`] within the handshake budget. Each frame is
//! copied into a fresh buffer and sent as a message — never a buffer the
//! caller may still mutate. A [`WorkerRequest::Finish`] sentinel ends the
//! stream; output chunks arrive as [`WorkerEvent::Chunk`] messages in read
//! order and are reassembled byte-for-byte in arrival order once the worker
//! acknowledges end-of-stream with [`WorkerEvent::Done`].

use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    core::FrameRgba,
    error::{MapcapError, MapcapResult},
    sink::{
        EncoderConfig, FINALIZE_TIMEOUT, FrameSink, HANDSHAKE_TIMEOUT, SinkKind,
        ffmpeg::{self, FfmpegPipe},
    },
};

/// Frames in flight before `push_frame` blocks.
const FRAME_QUEUE_DEPTH: usize = 4;

/// Stdout read granularity in the worker.
const CHUNK_READ_LEN: usize = 64 * 1024;

pub(crate) enum WorkerRequest {
    /// One frame of raw RGBA pixels, owned by the message.
    Frame(Vec<u8>),
    /// End-of-stream sentinel.
    Finish,
}

pub(crate) enum WorkerEvent {
    /// Handshake ack: the worker's encoder is initialized.
    Ready,
    /// One ordered slice of the encoded output stream.
    Chunk(Vec<u8>),
    /// End-of-stream ack: every chunk has been delivered.
    Done,
    Error(String),
}

/// VP9/WebM sink running in a worker thread. Always operates in realtime
/// sub-mode: a buffered deadline makes the encoder batch its output until
/// finalize, which starves chunk delivery and blocks the worker loop.
pub struct StreamingSink {
    cfg: EncoderConfig,
    req_tx: Option<Sender<WorkerRequest>>,
    evt_rx: Receiver<WorkerEvent>,
    worker: Option<JoinHandle<()>>,
    chunks: Vec<Vec<u8>>,
    failed: Option<String>,
    finalize_timeout: Duration,
}

impl StreamingSink {
    pub fn new(cfg: &EncoderConfig) -> MapcapResult<Self> {
        if !ffmpeg::is_ffmpeg_on_path() {
            return Err(MapcapError::encoder_init(
                "ffmpeg not found on PATH; streaming VP9 encoding is unavailable",
            ));
        }
        let listing = ffmpeg::available_encoders();
        if !ffmpeg::listing_has_encoder(&listing, "libvpx-vp9") {
            return Err(MapcapError::encoder_init(
                "libvpx-vp9 is not available in this ffmpeg build",
            ));
        }

        let worker_cfg = cfg.clone();
        Self::spawn_with(
            cfg,
            move |req_rx, evt_tx| stream_worker(worker_cfg, req_rx, evt_tx),
            HANDSHAKE_TIMEOUT,
            FINALIZE_TIMEOUT,
        )
    }

    /// Spawn the adapter around an arbitrary worker body. Tests use this to
    /// script the worker side of the protocol.
    pub(crate) fn spawn_with(
        cfg: &EncoderConfig,
        worker: impl FnOnce(Receiver<WorkerRequest>, Sender<WorkerEvent>) + Send + 'static,
        handshake_timeout: Duration,
        finalize_timeout: Duration,
    ) -> MapcapResult<Self> {
        let (req_tx, req_rx) = crossbeam_channel::bounded::<WorkerRequest>(FRAME_QUEUE_DEPTH);
        let (evt_tx, evt_rx) = crossbeam_channel::unbounded::<WorkerEvent>();

        let handle = thread::spawn(move || worker(req_rx, evt_tx));

        match evt_rx.recv_timeout(handshake_timeout) {
            Ok(WorkerEvent::Ready) => {}
            Ok(WorkerEvent::Error(e)) => {
                drop(req_tx);
                let _ = handle.join();
                return Err(MapcapError::encoder_init(e));
            }
            Ok(_) => {
                drop(req_tx);
                let _ = handle.join();
                return Err(MapcapError::encoder_init(
                    "unexpected message during streaming handshake",
                ));
            }
            Err(RecvTimeoutError::Timeout) => {
                drop(req_tx);
                return Err(MapcapError::encoder_init(
                    "streaming encoder did not acknowledge readiness within the handshake budget",
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                return Err(MapcapError::encoder_init(
                    "streaming encoder worker exited during handshake",
                ));
            }
        }

        tracing::debug!(
            width = cfg.width,
            height = cfg.height,
            "streaming sink ready (realtime mode)"
        );
        Ok(Self {
            cfg: cfg.clone(),
            req_tx: Some(req_tx),
            evt_rx,
            worker: Some(handle),
            chunks: Vec::new(),
            failed: None,
            finalize_timeout,
        })
    }

    /// Collect chunks (and any terminal error) that have already arrived,
    /// without blocking.
    fn drain_events(&mut self) {
        while let Ok(event) = self.evt_rx.try_recv() {
            match event {
                WorkerEvent::Chunk(chunk) => self.chunks.push(chunk),
                WorkerEvent::Error(e) => self.failed = Some(e),
                WorkerEvent::Ready | WorkerEvent::Done => {}
            }
        }
    }
}

impl FrameSink for StreamingSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Streaming
    }

    fn push_frame(&mut self, frame: &FrameRgba) -> MapcapResult<()> {
        self.drain_events();
        if let Some(e) = self.failed.take() {
            return Err(MapcapError::encode(format!("streaming encoder failed: {e}")));
        }
        if frame.data.len() != self.cfg.frame_len() {
            return Err(MapcapError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }
        let Some(tx) = self.req_tx.as_ref() else {
            return Err(MapcapError::validation(
                "streaming sink is already finalized",
            ));
        };
        // Copy, don't alias: the message owns its pixels. A full queue blocks
        // here, which is the backpressure ack.
        if tx.send(WorkerRequest::Frame(frame.data.clone())).is_err() {
            return Err(MapcapError::encode(
                "streaming encoder worker disconnected",
            ));
        }
        Ok(())
    }

    fn finish(&mut self) -> MapcapResult<Vec<u8>> {
        let Some(tx) = self.req_tx.take() else {
            return Err(MapcapError::validation(
                "streaming sink is already finalized",
            ));
        };
        // A dead worker is detected below via the event channel.
        let _ = tx.send(WorkerRequest::Finish);
        drop(tx);

        let deadline = Instant::now() + self.finalize_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.evt_rx.recv_timeout(remaining) {
                Ok(WorkerEvent::Chunk(chunk)) => self.chunks.push(chunk),
                Ok(WorkerEvent::Done) => break,
                Ok(WorkerEvent::Ready) => {}
                Ok(WorkerEvent::Error(e)) => {
                    if let Some(worker) = self.worker.take() {
                        let _ = worker.join();
                    }
                    return Err(MapcapError::encode(format!(
                        "streaming encoder failed: {e}"
                    )));
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(MapcapError::encoding_timeout(format!(
                        "streaming finalization timed out ({} chunks collected)",
                        self.chunks.len()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(worker) = self.worker.take() {
                        let _ = worker.join();
                    }
                    return Err(MapcapError::encode(
                        "streaming encoder worker disconnected before finalizing",
                    ));
                }
            }
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        // Reassemble in arrival order; total length is the sum of the parts.
        let chunks = std::mem::take(&mut self.chunks);
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in &chunks {
            bytes.extend_from_slice(chunk);
        }
        tracing::debug!(chunks = chunks.len(), bytes = bytes.len(), "stream finalized");
        Ok(bytes)
    }

    fn dispose(&mut self) {
        self.req_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.chunks.clear();
    }
}

impl Drop for StreamingSink {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Worker body: owns a realtime VP9 encoder process, answers the handshake,
/// writes frames, and streams encoded output back as ordered chunks.
fn stream_worker(
    cfg: EncoderConfig,
    req_rx: Receiver<WorkerRequest>,
    evt_tx: Sender<WorkerEvent>,
) {
    let mut args = ffmpeg::rawvideo_input_args(&cfg);
    args.extend(
        [
            "-c:v",
            "libvpx-vp9",
            "-deadline",
            "realtime",
            "-cpu-used",
            "8",
            "-row-mt",
            "1",
            "-b:v",
            &format!("{}k", cfg.bitrate_kbps),
            "-f",
            "webm",
            "pipe:1",
        ]
        .map(String::from),
    );

    let mut pipe = match FfmpegPipe::spawn(&args) {
        Ok(pipe) => pipe,
        Err(e) => {
            let _ = evt_tx.send(WorkerEvent::Error(e.to_string()));
            return;
        }
    };
    let mut stdout = match pipe.take_stdout() {
        Ok(stdout) => stdout,
        Err(e) => {
            pipe.kill();
            let _ = evt_tx.send(WorkerEvent::Error(e.to_string()));
            return;
        }
    };

    // Encoded output is forwarded as it appears; chunk order is read order.
    let chunk_tx = evt_tx.clone();
    let reader = thread::spawn(move || {
        use std::io::Read as _;
        let mut buf = vec![0u8; CHUNK_READ_LEN];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if chunk_tx.send(WorkerEvent::Chunk(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let _ = evt_tx.send(WorkerEvent::Ready);

    loop {
        match req_rx.recv() {
            Ok(WorkerRequest::Frame(data)) => {
                if let Err(e) = pipe.write_frame(&data) {
                    pipe.kill();
                    let _ = reader.join();
                    let _ = evt_tx.send(WorkerEvent::Error(e.to_string()));
                    return;
                }
            }
            // Disconnection doubles as the cancellation path: finalize what
            // we have and exit.
            Ok(WorkerRequest::Finish) | Err(_) => break,
        }
    }

    pipe.close_stdin();
    let wait_result = pipe.wait_checked();
    let _ = reader.join();
    match wait_result {
        Ok(()) => {
            let _ = evt_tx.send(WorkerEvent::Done);
        }
        Err(e) => {
            let _ = evt_tx.send(WorkerEvent::Error(e.to_string()));
        }
    }
}
