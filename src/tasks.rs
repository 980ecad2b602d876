use crate::{
    core::{CameraBounds, CameraPose},
    ease::Ease,
    engine::{AnimationTask, TaskCtx, TaskStatus},
    error::MapcapResult,
    renderer::MapRenderer,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LoopMode {
    /// End wherever the choreography ends.
    None,
    /// Snap back to the starting pose in a single assignment.
    Instant,
    /// Ease back to the starting pose over a bounded return transition.
    Smooth,
}

/// Virtual duration of the smooth loop-return transition.
pub fn loop_return_ms(duration_ms: f64) -> f64 {
    (duration_ms * 0.2).min(2000.0)
}

#[derive(Clone, Copy)]
struct ReturnLeg {
    from: CameraPose,
    started_ms: f64,
}

enum Phase {
    Inner,
    Returning(ReturnLeg),
    Done,
}

/// Wraps an animation task so the camera ends where it started, making the
/// exported clip loop seamlessly. The starting pose is captured at the first
/// tick, before the inner task has moved the camera.
pub struct LoopClosingTask {
    inner: Box<dyn AnimationTask>,
    mode: LoopMode,
    duration_ms: f64,
    start_pose: Option<CameraPose>,
    phase: Phase,
}

impl LoopClosingTask {
    /// `duration_ms` is the inner task's configured virtual duration; the
    /// smooth return lasts `min(2000, duration_ms * 0.2)` on top of it.
    pub fn new(inner: Box<dyn AnimationTask>, mode: LoopMode, duration_ms: f64) -> Self {
        Self {
            inner,
            mode,
            duration_ms,
            start_pose: None,
            phase: Phase::Inner,
        }
    }
}

impl AnimationTask for LoopClosingTask {
    fn tick(&mut self, ctx: &mut TaskCtx<'_>) -> MapcapResult<TaskStatus> {
        ctx.check_cancelled()?;

        let start = match self.start_pose {
            Some(pose) => pose,
            None => {
                let pose = ctx.renderer.pose();
                self.start_pose = Some(pose);
                pose
            }
        };

        match self.phase {
            Phase::Inner => match self.inner.tick(ctx)? {
                TaskStatus::Running => Ok(TaskStatus::Running),
                TaskStatus::Finished => match self.mode {
                    LoopMode::None => {
                        self.phase = Phase::Done;
                        Ok(TaskStatus::Finished)
                    }
                    LoopMode::Instant => {
                        ctx.renderer.set_pose(&start);
                        self.phase = Phase::Done;
                        Ok(TaskStatus::Finished)
                    }
                    LoopMode::Smooth => {
                        self.phase = Phase::Returning(ReturnLeg {
                            from: ctx.renderer.pose(),
                            started_ms: ctx.now_ms,
                        });
                        Ok(TaskStatus::Running)
                    }
                },
            },
            Phase::Returning(leg) => {
                let return_ms = loop_return_ms(self.duration_ms);
                let t = if return_ms > 0.0 {
                    (ctx.now_ms - leg.started_ms) / return_ms
                } else {
                    1.0
                };
                if t >= 1.0 {
                    ctx.renderer.set_pose(&start);
                    self.phase = Phase::Done;
                    Ok(TaskStatus::Finished)
                } else {
                    let pose = CameraPose::lerp(&leg.from, &start, Ease::InOutQuad.apply(t));
                    ctx.renderer.set_pose(&pose);
                    Ok(TaskStatus::Running)
                }
            }
            Phase::Done => Ok(TaskStatus::Finished),
        }
    }

    fn extra_capture_ms(&self, speed_multiplier: f64) -> f64 {
        let own = match self.mode {
            LoopMode::Smooth => loop_return_ms(self.duration_ms) / speed_multiplier,
            LoopMode::None | LoopMode::Instant => 0.0,
        };
        own + self.inner.extra_capture_ms(speed_multiplier)
    }
}

/// Duration of the corrective ease applied before a session starts.
pub const PREFLIGHT_EASE_MS: f64 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreflightCorrection {
    pub from: CameraPose,
    pub to: CameraPose,
}

/// If the current pose violates the configured envelope, animate to the
/// nearest valid pose with a fixed 1 s linear ease, blocking until the
/// transition completes. No-op when no envelope is configured or the pose is
/// already valid. The correction is reported, never rejected.
pub fn preflight_correct(
    renderer: &mut dyn MapRenderer,
    bounds: Option<&CameraBounds>,
) -> MapcapResult<Option<PreflightCorrection>> {
    let Some(bounds) = bounds else {
        return Ok(None);
    };
    bounds.validate()?;

    let from = renderer.pose();
    if bounds.contains(&from) {
        return Ok(None);
    }

    let to = bounds.clamp_pose(&from);
    tracing::info!(
        ?from,
        ?to,
        "camera outside recording bounds, easing to nearest valid pose"
    );
    renderer.ease_to(&to, PREFLIGHT_EASE_MS)?;
    Ok(Some(PreflightCorrection { from, to }))
}
