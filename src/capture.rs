use std::time::{Duration, Instant};

use crate::{
    clock::{Clock, FreezeGuard},
    engine::{AnimationEngine, AnimationTask, CancelToken, RunOutcome, StartOutcome},
    error::MapcapResult,
    renderer::MapRenderer,
    sink::FrameSink,
};

use crate::error::MapcapError;

/// Retry budget for the best-effort asset-readiness wait.
const ASSET_POLL_BUDGET: u32 = 5;
const ASSET_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CaptureConfig {
    /// Virtual duration of the animation, before the speed multiplier.
    pub duration_ms: f64,
    pub fps: f64,
    pub speed_multiplier: f64,
    /// Poll tile/sprite readiness before each capture (best effort).
    pub wait_for_assets: bool,
    /// Target aspect ratio emulated with opaque bars, e.g. 2.39.
    pub letterbox_ratio: Option<f64>,
}

impl CaptureConfig {
    pub fn validate(&self) -> MapcapResult<()> {
        if !(self.duration_ms.is_finite() && self.duration_ms > 0.0) {
            return Err(MapcapError::validation("capture duration must be > 0"));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(MapcapError::validation("capture fps must be > 0"));
        }
        if !(self.speed_multiplier.is_finite() && self.speed_multiplier > 0.0) {
            return Err(MapcapError::validation("speed multiplier must be > 0"));
        }
        if let Some(ratio) = self.letterbox_ratio
            && !(ratio.is_finite() && ratio > 0.0)
        {
            return Err(MapcapError::validation("letterbox ratio must be > 0"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

/// The unit of work for one export. Created when recording starts and
/// mutated only by the capture scheduler; `virtual_time_ms` increases
/// monotonically and is owned exclusively by the loop.
#[derive(Clone, Debug)]
pub struct CaptureSession {
    pub virtual_time_ms: f64,
    pub frame_index: u64,
    pub target_frame_count: u64,
    pub state: SessionState,
}

#[derive(Clone, Copy, Debug)]
pub struct Progress {
    pub frame_index: u64,
    pub total_frames: u64,
    pub eta_ms: Option<f64>,
}

#[derive(Debug)]
pub enum CaptureOutcome {
    Completed {
        bytes: Vec<u8>,
        session: CaptureSession,
    },
    Cancelled {
        session: CaptureSession,
    },
}

pub fn target_frame_count(effective_duration_ms: f64, fps: f64) -> u64 {
    ((effective_duration_ms / 1000.0) * fps).floor().max(0.0) as u64
}

/// Drive virtual time, rendering, and sink feeding for one session.
///
/// Every output frame corresponds to an exact virtual instant: the loop
/// advances virtual time by `(1000/fps) * speed` per frame, freezes the host
/// clock there, ticks the animation task, renders, reads pixels back, and
/// pushes them to the sink in strictly increasing frame order. The loop ends
/// when the task completes or the frame budget is exhausted — the budget is
/// the safety valve against choreography that never terminates on its own.
/// The clock is unfrozen on every exit path, and a fatal failure restores
/// the camera to the pose captured when the task was started. The sink is
/// *not* disposed here; that stays with the caller so disposal happens
/// exactly once.
#[tracing::instrument(skip_all, fields(fps = cfg.fps, duration_ms = cfg.duration_ms))]
pub fn run_capture(
    renderer: &mut dyn MapRenderer,
    clock: &mut dyn Clock,
    engine: &mut AnimationEngine,
    task: Box<dyn AnimationTask>,
    sink: &mut dyn FrameSink,
    cfg: &CaptureConfig,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(Progress),
) -> MapcapResult<CaptureOutcome> {
    cfg.validate()?;

    let extra_ms = task.extra_capture_ms(cfg.speed_multiplier);
    let effective_ms = cfg.duration_ms / cfg.speed_multiplier + extra_ms;
    let target = target_frame_count(effective_ms, cfg.fps);
    let delta_ms = (1000.0 / cfg.fps) * cfg.speed_multiplier;

    let mut session = CaptureSession {
        virtual_time_ms: clock.now(),
        frame_index: 0,
        target_frame_count: target,
        state: SessionState::Running,
    };
    tracing::info!(
        target_frames = target,
        delta_ms,
        effective_ms,
        "capture session started"
    );

    let StartOutcome::Started(_task_token) = engine.start(task, renderer) else {
        session.state = SessionState::Cancelled;
        return Ok(CaptureOutcome::Cancelled { session });
    };

    let started_at = Instant::now();
    let mut task_outcome: Option<RunOutcome> = None;

    let loop_result = {
        let mut guard = FreezeGuard::new(clock);
        capture_loop(
            renderer,
            engine,
            sink,
            cfg,
            cancel,
            on_progress,
            &mut guard,
            &mut session,
            &mut task_outcome,
            delta_ms,
            started_at,
        )
        // guard drops here: the host clock is released before finalization,
        // on error paths included.
    };

    if let Err(e) = loop_result {
        session.state = SessionState::Failed;
        // Restore the start pose; the engine is a no-op here when the task
        // itself failed (its tick already cleaned up and restored).
        engine.cancel(Some(renderer));
        tracing::error!(error = %e, frame = session.frame_index, "capture failed");
        return Err(e);
    }

    match task_outcome {
        Some(RunOutcome::Cancelled) => {
            session.state = SessionState::Cancelled;
            tracing::info!(frames = session.frame_index, "capture cancelled");
            return Ok(CaptureOutcome::Cancelled { session });
        }
        Some(RunOutcome::Completed) => {}
        None => {
            // Budget exhausted first. The output is already useful, so stop
            // the task without restoring the camera.
            tracing::debug!("frame budget exhausted before task completion");
            engine.stop();
        }
    }

    session.state = SessionState::Finalizing;
    let bytes = match sink.finish() {
        Ok(bytes) => bytes,
        Err(e) => {
            session.state = SessionState::Failed;
            return Err(e);
        }
    };
    session.state = SessionState::Completed;
    tracing::info!(
        frames = session.frame_index,
        bytes = bytes.len(),
        "capture completed"
    );
    Ok(CaptureOutcome::Completed { bytes, session })
}

#[allow(clippy::too_many_arguments)]
fn capture_loop(
    renderer: &mut dyn MapRenderer,
    engine: &mut AnimationEngine,
    sink: &mut dyn FrameSink,
    cfg: &CaptureConfig,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(Progress),
    guard: &mut FreezeGuard<'_>,
    session: &mut CaptureSession,
    task_outcome: &mut Option<RunOutcome>,
    delta_ms: f64,
    started_at: Instant,
) -> MapcapResult<()> {
    while task_outcome.is_none() && session.frame_index < session.target_frame_count {
        if cancel.is_cancelled() {
            engine.cancel(None);
            *task_outcome = Some(RunOutcome::Cancelled);
            return Ok(());
        }

        session.virtual_time_ms += delta_ms;
        guard.freeze(session.virtual_time_ms);

        // One cooperative task step at the frozen instant. A completed task
        // still gets its final camera state captured below; a cancelled one
        // stops the session before any further frame is pushed.
        if let Some(outcome) = engine.tick(renderer, session.virtual_time_ms)? {
            *task_outcome = Some(outcome);
            if outcome == RunOutcome::Cancelled {
                return Ok(());
            }
        }

        renderer.request_repaint();
        if cfg.wait_for_assets {
            wait_for_assets_best_effort(renderer);
        }
        renderer.wait_render_complete()?;

        let (width, height) = renderer.surface_size();
        let mut frame = renderer.read_frame_buffer(0, 0, width, height)?;
        if let Some(ratio) = cfg.letterbox_ratio {
            apply_letterbox(&mut frame.data, frame.width, frame.height, ratio);
        }
        // The push returning is the sink's ack; only then may the buffer be
        // touched again.
        sink.push_frame(&frame)?;

        session.frame_index += 1;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        let eta_ms = Some(
            elapsed_ms / session.frame_index as f64
                * (session.target_frame_count - session.frame_index) as f64,
        );
        on_progress(Progress {
            frame_index: session.frame_index,
            total_frames: session.target_frame_count,
            eta_ms,
        });
    }
    Ok(())
}

/// Poll asset readiness with a small fixed budget of real-time waits,
/// repainting between polls. Best effort only: after the budget we proceed
/// even if assets are not confirmed ready, so a slow-loading style can still
/// yield incomplete-looking frames. That trade-off is deliberate.
fn wait_for_assets_best_effort(renderer: &mut dyn MapRenderer) {
    for _ in 0..ASSET_POLL_BUDGET {
        if renderer.assets_ready() {
            return;
        }
        std::thread::sleep(ASSET_POLL_INTERVAL);
        renderer.request_repaint();
    }
    if !renderer.assets_ready() {
        tracing::warn!("assets still not ready after poll budget, capturing anyway");
    }
}

/// Overwrite the top and bottom margins of an RGBA8 frame with opaque black
/// to emulate `ratio` (width:height). A ratio whose visible band would be at
/// least as tall as the frame is a no-op, not an error; so is a buffer
/// shorter than `width * height * 4`.
pub fn apply_letterbox(data: &mut [u8], width: u32, height: u32, ratio: f64) {
    if !(ratio.is_finite() && ratio > 0.0) || width == 0 {
        return;
    }
    let row_len = (width as usize) * 4;
    if data.len() < (height as usize) * row_len {
        return;
    }
    let visible_height = (f64::from(width) / ratio).floor() as u32;
    if visible_height >= height {
        return;
    }

    let top_rows = (height - visible_height) / 2;
    let paint_black = |rows: &mut [u8]| {
        for px in rows.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
    };

    paint_black(&mut data[..(top_rows as usize) * row_len]);
    paint_black(&mut data[((top_rows + visible_height) as usize) * row_len..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_frame_count_matches_duration_and_fps() {
        // 1s at 60 fps, speed 1.
        assert_eq!(target_frame_count(1000.0, 60.0), 60);
        // 2s at 30 fps compressed by speed 2 -> 1s effective.
        assert_eq!(target_frame_count(2000.0 / 2.0, 30.0), 30);
        // Fractional frames floor.
        assert_eq!(target_frame_count(1050.0, 30.0), 31);
    }

    #[test]
    fn config_validation_catches_bad_values() {
        let good = CaptureConfig {
            duration_ms: 1000.0,
            fps: 30.0,
            speed_multiplier: 1.0,
            wait_for_assets: false,
            letterbox_ratio: None,
        };
        assert!(good.validate().is_ok());

        let mut bad = good.clone();
        bad.fps = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.speed_multiplier = -1.0;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.letterbox_ratio = Some(0.0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn letterbox_splits_bars_top_light() {
        let (w, h) = (1920u32, 1080u32);
        let mut data = vec![0xAAu8; (w * h * 4) as usize];
        apply_letterbox(&mut data, w, h, 2.39);

        // visible = floor(1920 / 2.39) = 803; bars 1080-803 = 277 -> 138/139.
        let row = |i: u32| &data[(i * w * 4) as usize..((i + 1) * w * 4) as usize];
        let is_black = |r: &[u8]| r.chunks_exact(4).all(|px| px == [0, 0, 0, 255]);
        let untouched = |r: &[u8]| r.iter().all(|&b| b == 0xAA);

        assert!(is_black(row(0)));
        assert!(is_black(row(137)));
        assert!(untouched(row(138)));
        assert!(untouched(row(138 + 802)));
        assert!(is_black(row(138 + 803)));
        assert!(is_black(row(1079)));
    }

    #[test]
    fn letterbox_undersized_buffer_is_left_untouched() {
        let (w, h) = (1920u32, 1080u32);
        // One row short of the claimed geometry.
        let mut data = vec![0xAAu8; ((w * (h - 1)) * 4) as usize];
        let before = data.clone();
        apply_letterbox(&mut data, w, h, 2.39);
        assert_eq!(data, before);
    }

    #[test]
    fn letterbox_incompatible_ratio_is_byte_identical_noop() {
        let (w, h) = (640u32, 480u32);
        let mut data = vec![0x55u8; (w * h * 4) as usize];
        let before = data.clone();
        // visible = floor(640 / 1.0) = 640 >= 480: nothing to paint.
        apply_letterbox(&mut data, w, h, 1.0);
        assert_eq!(data, before);
    }
}
