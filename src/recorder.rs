//! The public facade: one call that validates, corrects the camera, sets up
//! an encoder backend, runs the capture session, and tears everything down.

use crate::{
    capture::{self, CaptureConfig, CaptureOutcome, Progress},
    clock::Clock,
    core::{CameraBounds, CameraPose},
    engine::{AnimationEngine, AnimationTask, CancelToken},
    error::MapcapResult,
    renderer::MapRenderer,
    sink::{self, AccelParams, EncoderConfig, FallbackNotice, FrameSink, SinkKind},
    tasks::{self, LoopClosingTask, LoopMode},
};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RecordingConfig {
    /// Encode resolution. When it differs from the live surface, the surface
    /// is resized for the session and restored afterwards.
    pub width: u32,
    pub height: u32,
    pub duration_ms: f64,
    pub fps: f64,
    pub speed_multiplier: f64,
    pub bitrate_kbps: u32,
    /// Requested encoder backend; unavailability walks the fallback chain.
    pub format: SinkKind,
    pub accel: Option<AccelParams>,
    pub wait_for_assets: bool,
    pub loop_mode: LoopMode,
    pub letterbox_ratio: Option<f64>,
    /// Optional camera envelope enforced (by correction) before the session.
    pub bounds: Option<CameraBounds>,
}

impl RecordingConfig {
    pub fn validate(&self) -> MapcapResult<()> {
        self.encoder_config().validate()?;
        self.capture_config().validate()?;
        if let Some(bounds) = &self.bounds {
            bounds.validate()?;
        }
        Ok(())
    }

    fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate_kbps: self.bitrate_kbps,
            kind: self.format,
            accel: self.accel,
        }
    }

    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            duration_ms: self.duration_ms,
            fps: self.fps,
            speed_multiplier: self.speed_multiplier,
            wait_for_assets: self.wait_for_assets,
            letterbox_ratio: self.letterbox_ratio,
        }
    }
}

/// Out-of-band notifications emitted while a recording runs. All of them are
/// informational; none requires a response.
#[derive(Clone, Debug)]
pub enum RecorderEvent {
    Progress(Progress),
    /// The requested backend (or a fallback of it) was unavailable and the
    /// next backend in the chain was selected instead.
    BackendFallback {
        from: SinkKind,
        to: SinkKind,
        reason: String,
    },
    /// The camera was outside the configured envelope and has been eased to
    /// the nearest valid pose before capture started.
    ConstraintCorrected {
        from: CameraPose,
        to: CameraPose,
    },
    Completed {
        frame_count: u64,
    },
}

#[derive(Debug)]
pub struct RecordingOutput {
    pub bytes: Vec<u8>,
    /// Container MIME of the backend that actually encoded, which may differ
    /// from the requested one after a fallback.
    pub mime_type: &'static str,
    pub frame_count: u64,
}

/// Cancellation is a result, not an error.
#[derive(Debug)]
pub enum RecordingResult {
    Completed(RecordingOutput),
    Cancelled,
}

/// Owns the animation engine and the session cancel token across recordings.
/// One recording at a time; the borrow rules enforce that per instance, and
/// the engine enforces it against tasks started outside a recording.
#[derive(Default)]
pub struct Recorder {
    engine: AnimationEngine,
    cancel: CancelToken,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that cancels the recording in progress (and re-arms for the
    /// next one). Safe to hold across sessions and call from other threads.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Record one session to finalized video bytes.
    ///
    /// The full sequence: validate, camera preflight, surface resize, loop
    /// wrapping, backend selection with fallback, capture, finalize. The
    /// surface size is restored and the sink disposed on every exit path;
    /// a fatal error additionally restores the pre-session camera pose.
    pub fn start_recording(
        &mut self,
        renderer: &mut dyn MapRenderer,
        clock: &mut dyn Clock,
        task: Box<dyn AnimationTask>,
        cfg: &RecordingConfig,
        on_event: &mut dyn FnMut(RecorderEvent),
    ) -> MapcapResult<RecordingResult> {
        self.start_recording_with(renderer, clock, task, cfg, on_event, sink::create_sink)
    }

    /// Same as [`start_recording`](Self::start_recording) but with an
    /// injectable sink factory.
    pub fn start_recording_with(
        &mut self,
        renderer: &mut dyn MapRenderer,
        clock: &mut dyn Clock,
        task: Box<dyn AnimationTask>,
        cfg: &RecordingConfig,
        on_event: &mut dyn FnMut(RecorderEvent),
        make_sink: impl FnOnce(&EncoderConfig) -> MapcapResult<(Box<dyn FrameSink>, Vec<FallbackNotice>)>,
    ) -> MapcapResult<RecordingResult> {
        cfg.validate()?;
        self.cancel.reset();

        if let Some(correction) = tasks::preflight_correct(renderer, cfg.bounds.as_ref())? {
            on_event(RecorderEvent::ConstraintCorrected {
                from: correction.from,
                to: correction.to,
            });
        }

        let session_start_pose = renderer.pose();
        let original_size = renderer.surface_size();
        let resized = original_size != (cfg.width, cfg.height);
        if resized {
            renderer.resize_surface(cfg.width, cfg.height)?;
        }

        let result = self.record_session(renderer, clock, task, cfg, on_event, make_sink);

        if resized
            && let Err(e) = renderer.resize_surface(original_size.0, original_size.1)
        {
            tracing::warn!(error = %e, "failed to restore surface size after recording");
        }
        if result.is_err() {
            // A fatal failure must not leave the camera wherever the session
            // died. Restores the post-preflight pose; this also covers
            // failures past the engine's lifetime, like finalization.
            renderer.set_pose(&session_start_pose);
        }
        result
    }

    fn record_session(
        &mut self,
        renderer: &mut dyn MapRenderer,
        clock: &mut dyn Clock,
        task: Box<dyn AnimationTask>,
        cfg: &RecordingConfig,
        on_event: &mut dyn FnMut(RecorderEvent),
        make_sink: impl FnOnce(&EncoderConfig) -> MapcapResult<(Box<dyn FrameSink>, Vec<FallbackNotice>)>,
    ) -> MapcapResult<RecordingResult> {
        let task: Box<dyn AnimationTask> = match cfg.loop_mode {
            LoopMode::None => task,
            mode => Box::new(LoopClosingTask::new(task, mode, cfg.duration_ms)),
        };

        let (mut sink, notices) = make_sink(&cfg.encoder_config())?;
        for notice in notices {
            on_event(RecorderEvent::BackendFallback {
                from: notice.from,
                to: notice.to,
                reason: notice.reason,
            });
        }
        let mime_type = sink.kind().mime_type();

        let cancel = self.cancel.clone();
        let outcome = capture::run_capture(
            renderer,
            clock,
            &mut self.engine,
            task,
            sink.as_mut(),
            &cfg.capture_config(),
            &cancel,
            &mut |progress| on_event(RecorderEvent::Progress(progress)),
        );
        // Exactly one disposal per session, errors included. `finish` has
        // already released the happy path's resources; dispose is idempotent.
        sink.dispose();

        match outcome? {
            CaptureOutcome::Completed { bytes, session } => {
                on_event(RecorderEvent::Completed {
                    frame_count: session.frame_index,
                });
                Ok(RecordingResult::Completed(RecordingOutput {
                    bytes,
                    mime_type,
                    frame_count: session.frame_index,
                }))
            }
            CaptureOutcome::Cancelled { .. } => Ok(RecordingResult::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        clock::ManualClock,
        core::{FrameRgba, LngLat},
        engine::{TaskCtx, TaskStatus},
        error::MapcapError,
        testutil::TestRenderer,
    };

    struct CollectSink {
        kind: SinkKind,
        frames: usize,
        finished: bool,
        disposals: Arc<AtomicUsize>,
    }

    impl CollectSink {
        fn boxed(kind: SinkKind, disposals: &Arc<AtomicUsize>) -> Box<dyn FrameSink> {
            Box::new(Self {
                kind,
                frames: 0,
                finished: false,
                disposals: Arc::clone(disposals),
            })
        }
    }

    impl FrameSink for CollectSink {
        fn kind(&self) -> SinkKind {
            self.kind
        }
        fn push_frame(&mut self, _frame: &FrameRgba) -> MapcapResult<()> {
            self.frames += 1;
            Ok(())
        }
        fn finish(&mut self) -> MapcapResult<Vec<u8>> {
            self.finished = true;
            Ok(vec![0u8; self.frames])
        }
        fn dispose(&mut self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Holds the camera on a fixed pose until its virtual end time.
    struct HoldTask {
        end_ms: f64,
    }

    impl AnimationTask for HoldTask {
        fn tick(&mut self, ctx: &mut TaskCtx<'_>) -> MapcapResult<TaskStatus> {
            ctx.check_cancelled()?;
            if ctx.now_ms >= self.end_ms {
                Ok(TaskStatus::Finished)
            } else {
                Ok(TaskStatus::Running)
            }
        }
    }

    fn recording_cfg() -> RecordingConfig {
        RecordingConfig {
            width: 8,
            height: 8,
            duration_ms: 100.0,
            fps: 30.0,
            speed_multiplier: 1.0,
            bitrate_kbps: 4000,
            format: SinkKind::Direct,
            accel: None,
            wait_for_assets: false,
            loop_mode: LoopMode::None,
            letterbox_ratio: None,
            bounds: None,
        }
    }

    #[test]
    fn completed_recording_reports_fallback_and_actual_mime() {
        let mut renderer = TestRenderer::new(8, 8);
        let mut clock = ManualClock::new(0.0);
        let mut recorder = Recorder::new();
        let disposals = Arc::new(AtomicUsize::new(0));

        let mut events = Vec::new();
        let result = recorder
            .start_recording_with(
                &mut renderer,
                &mut clock,
                Box::new(HoldTask { end_ms: 1000.0 }),
                &recording_cfg(),
                &mut |e| events.push(e),
                |cfg| {
                    assert_eq!(cfg.kind, SinkKind::Direct);
                    Ok((
                        CollectSink::boxed(SinkKind::Streaming, &disposals),
                        vec![FallbackNotice {
                            from: SinkKind::Direct,
                            to: SinkKind::Streaming,
                            reason: "no ffmpeg".into(),
                        }],
                    ))
                },
            )
            .unwrap();

        // 100 ms at 30 fps is a 3-frame budget; the task outlives it.
        let RecordingResult::Completed(output) = result else {
            panic!("expected completion");
        };
        assert_eq!(output.frame_count, 3);
        assert_eq!(output.bytes.len(), 3);
        assert_eq!(output.mime_type, "video/webm");
        assert_eq!(disposals.load(Ordering::SeqCst), 1);

        assert!(matches!(
            events.first(),
            Some(RecorderEvent::BackendFallback {
                from: SinkKind::Direct,
                to: SinkKind::Streaming,
                ..
            })
        ));
        let progress_count = events
            .iter()
            .filter(|e| matches!(e, RecorderEvent::Progress(_)))
            .count();
        assert_eq!(progress_count, 3);
        assert!(matches!(
            events.last(),
            Some(RecorderEvent::Completed { frame_count: 3 })
        ));
    }

    #[test]
    fn cancellation_mid_run_skips_finalize_but_disposes_once() {
        let mut renderer = TestRenderer::new(8, 8);
        let mut clock = ManualClock::new(0.0);
        let mut recorder = Recorder::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        let token = recorder.cancel_token();

        let result = recorder
            .start_recording_with(
                &mut renderer,
                &mut clock,
                Box::new(HoldTask { end_ms: 1000.0 }),
                &recording_cfg(),
                &mut |e| {
                    // Cancel as soon as the first frame lands.
                    if matches!(e, RecorderEvent::Progress(_)) {
                        token.cancel();
                    }
                },
                |_| Ok((CollectSink::boxed(SinkKind::Direct, &disposals), Vec::new())),
            )
            .unwrap();

        assert!(matches!(result, RecordingResult::Cancelled));
        // Cancelled sessions never finalize, but the backend is still
        // released exactly once.
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn surface_is_resized_for_the_session_and_restored() {
        let mut renderer = TestRenderer::new(640, 480);
        let mut clock = ManualClock::new(0.0);
        let mut recorder = Recorder::new();
        let disposals = Arc::new(AtomicUsize::new(0));

        recorder
            .start_recording_with(
                &mut renderer,
                &mut clock,
                Box::new(HoldTask { end_ms: 50.0 }),
                &recording_cfg(),
                &mut |_| {},
                |_| Ok((CollectSink::boxed(SinkKind::Direct, &disposals), Vec::new())),
            )
            .unwrap();

        assert_eq!(renderer.resizes, vec![(8, 8), (640, 480)]);
        assert_eq!(renderer.surface_size(), (640, 480));
    }

    #[test]
    fn out_of_bounds_camera_is_corrected_before_capture() {
        let mut renderer = TestRenderer::new(8, 8);
        let mut clock = ManualClock::new(0.0);
        let mut recorder = Recorder::new();
        let disposals = Arc::new(AtomicUsize::new(0));

        let mut cfg = recording_cfg();
        cfg.bounds = Some(CameraBounds {
            west: 0.0,
            south: 0.0,
            east: 1.0,
            north: 1.0,
            min_zoom: 2.0,
            max_zoom: 8.0,
        });

        let mut corrections = 0;
        recorder
            .start_recording_with(
                &mut renderer,
                &mut clock,
                Box::new(HoldTask { end_ms: 50.0 }),
                &cfg,
                &mut |e| {
                    if let RecorderEvent::ConstraintCorrected { from, to } = e {
                        assert_ne!(from, to);
                        corrections += 1;
                    }
                },
                |_| Ok((CollectSink::boxed(SinkKind::Direct, &disposals), Vec::new())),
            )
            .unwrap();

        assert_eq!(corrections, 1);
        assert_eq!(renderer.eases.len(), 1);
    }

    /// Pans the camera away, then fails.
    struct PanThenFailTask;

    impl AnimationTask for PanThenFailTask {
        fn tick(&mut self, ctx: &mut TaskCtx<'_>) -> MapcapResult<TaskStatus> {
            ctx.check_cancelled()?;
            let mut moved = ctx.renderer.pose();
            moved.center = LngLat::new(2.35, 48.85);
            moved.zoom = 14.0;
            ctx.renderer.set_pose(&moved);
            Err(MapcapError::render("style source dropped"))
        }
    }

    #[test]
    fn fatal_failure_restores_camera_and_surface() {
        let mut renderer = TestRenderer::new(640, 480);
        let start = renderer.pose();
        let mut clock = ManualClock::new(0.0);
        let mut recorder = Recorder::new();
        let disposals = Arc::new(AtomicUsize::new(0));

        let err = recorder
            .start_recording_with(
                &mut renderer,
                &mut clock,
                Box::new(PanThenFailTask),
                &recording_cfg(),
                &mut |_| {},
                |_| Ok((CollectSink::boxed(SinkKind::Direct, &disposals), Vec::new())),
            )
            .unwrap_err();

        assert!(matches!(err, MapcapError::Render(_)));
        // The session died mid-pan; camera and surface must both be back
        // where they started, and the backend released exactly once.
        assert_eq!(renderer.pose(), start);
        assert_eq!(renderer.resizes, vec![(8, 8), (640, 480)]);
        assert_eq!(renderer.surface_size(), (640, 480));
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(!clock.is_frozen());
    }

    #[test]
    fn recording_config_round_trips_through_json() {
        let cfg = recording_cfg();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RecordingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.format, cfg.format);
        assert_eq!(back.loop_mode, cfg.loop_mode);
        assert_eq!(back.fps, cfg.fps);
        assert_eq!(back.letterbox_ratio, cfg.letterbox_ratio);
    }

    #[test]
    fn invalid_config_is_rejected_before_any_side_effect() {
        let mut renderer = TestRenderer::new(8, 8);
        let mut clock = ManualClock::new(0.0);
        let mut recorder = Recorder::new();

        let mut cfg = recording_cfg();
        cfg.width = 0;
        let err = recorder
            .start_recording_with(
                &mut renderer,
                &mut clock,
                Box::new(HoldTask { end_ms: 50.0 }),
                &cfg,
                &mut |_| {},
                |_| panic!("sink factory must not run for invalid config"),
            )
            .unwrap_err();
        assert!(matches!(err, MapcapError::Validation(_)));
        assert_eq!(renderer.repaints, 0);
    }
}
