use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    core::CameraPose,
    error::{MapcapError, MapcapResult},
    renderer::MapRenderer,
};

/// Shared cooperative-cancellation flag. Clones observe the same flag, so a
/// handle can cancel a run from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Re-arm a token for a new session.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Cooperative check for use inside tasks: returns
    /// [`MapcapError::Aborted`] once the flag has been raised.
    pub fn check(&self) -> MapcapResult<()> {
        if self.is_cancelled() {
            Err(MapcapError::Aborted)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Per-tick context handed to a running task.
pub struct TaskCtx<'a> {
    /// The frozen virtual instant this tick evaluates at.
    pub now_ms: f64,
    pub renderer: &'a mut dyn MapRenderer,
    cancel: &'a CancelToken,
}

impl<'a> TaskCtx<'a> {
    /// Tasks must call this at safe points and propagate the error with `?`.
    pub fn check_cancelled(&self) -> MapcapResult<()> {
        self.cancel.check()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        now_ms: f64,
        renderer: &'a mut dyn MapRenderer,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            now_ms,
            renderer,
            cancel,
        }
    }
}

/// An opaque camera choreography, advanced cooperatively by the engine at
/// each virtual-time step. Implementations must call
/// [`TaskCtx::check_cancelled`] periodically and must reach
/// [`TaskStatus::Finished`] in finite virtual time relative to the duration
/// they were configured with.
pub trait AnimationTask {
    fn tick(&mut self, ctx: &mut TaskCtx<'_>) -> MapcapResult<TaskStatus>;

    /// Extra capture time (real milliseconds at the given speed multiplier)
    /// this task appends beyond its configured duration. Wrappers that play a
    /// closing transition declare their contribution here so the scheduler
    /// can include it in the frame budget.
    fn extra_capture_ms(&self, _speed_multiplier: f64) -> f64 {
        0.0
    }
}

pub enum StartOutcome {
    /// The task was armed; the returned token cancels this run.
    Started(CancelToken),
    /// A task was already active. It has been cancelled, and the new task was
    /// *not* started — "second call aborts the first" is deliberate, this is
    /// not a queue.
    Busy,
}

struct ActiveRun {
    task: Box<dyn AnimationTask>,
    token: CancelToken,
    start_pose: CameraPose,
}

/// Runs one animation task at a time with cooperative cancellation and
/// camera restoration. Internal state is released on every exit path
/// (completion, cancellation, task error), so a later `start` is never
/// blocked by stale state.
#[derive(Default)]
pub struct AnimationEngine {
    active: Option<ActiveRun>,
}

impl AnimationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self, task: Box<dyn AnimationTask>, renderer: &dyn MapRenderer) -> StartOutcome {
        if self.active.is_some() {
            tracing::debug!("animation start rejected: a task is already active, cancelling it");
            self.stop();
            return StartOutcome::Busy;
        }
        let token = CancelToken::new();
        self.active = Some(ActiveRun {
            task,
            token: token.clone(),
            start_pose: renderer.pose(),
        });
        StartOutcome::Started(token)
    }

    /// Advance the active task one cooperative step at virtual instant
    /// `now_ms`. Returns `None` while the task keeps running, `Some(outcome)`
    /// once it completed or was cancelled. Cancellation raised inside the
    /// task (as [`MapcapError::Aborted`]) is swallowed and reported as
    /// [`RunOutcome::Cancelled`]; any other task error propagates after the
    /// engine has cleaned up and restored the start pose.
    pub fn tick(
        &mut self,
        renderer: &mut dyn MapRenderer,
        now_ms: f64,
    ) -> MapcapResult<Option<RunOutcome>> {
        let Some(run) = self.active.as_mut() else {
            return Ok(None);
        };

        if run.token.is_cancelled() {
            self.active = None;
            return Ok(Some(RunOutcome::Cancelled));
        }

        let status = {
            let mut ctx = TaskCtx {
                now_ms,
                renderer,
                cancel: &run.token,
            };
            run.task.tick(&mut ctx)
        };

        match status {
            Ok(TaskStatus::Running) => Ok(None),
            Ok(TaskStatus::Finished) => {
                self.active = None;
                Ok(Some(RunOutcome::Completed))
            }
            Err(MapcapError::Aborted) => {
                self.active = None;
                Ok(Some(RunOutcome::Cancelled))
            }
            Err(e) => {
                // Fatal task failure: put the camera back where the run began
                // before the error surfaces.
                if let Some(run) = self.active.take() {
                    renderer.set_pose(&run.start_pose);
                }
                Err(e)
            }
        }
    }

    /// Signal cancellation. If a restore target is supplied and a start pose
    /// was captured, snap the camera back to it. Always clears internal
    /// state.
    pub fn cancel(&mut self, restore: Option<&mut dyn MapRenderer>) {
        if let Some(run) = self.active.take() {
            run.token.cancel();
            if let Some(renderer) = restore {
                renderer.set_pose(&run.start_pose);
            }
            tracing::debug!("animation cancelled");
        }
    }

    /// Signal cancellation without camera restoration. Used after a recording
    /// has already produced useful output and the end pose should stand.
    pub fn stop(&mut self) {
        if let Some(run) = self.active.take() {
            run.token.cancel();
            tracing::debug!("animation stopped");
        }
    }
}
