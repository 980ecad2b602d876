/// The host's animation clock, abstracted so the capture loop can pin every
/// render pass to an exact simulation instant. The core depends only on this
/// trait, never on a concrete renderer clock.
pub trait Clock {
    /// Pin `now()` to `t_ms` until the next `freeze` or `unfreeze` call.
    fn freeze(&mut self, t_ms: f64);

    /// Resume normal time flow.
    fn unfreeze(&mut self);

    /// Current virtual time in milliseconds.
    fn now(&self) -> f64;
}

/// A directly driven clock. Hosts that own their render loop can use this as
/// is; tests use it to observe freeze/unfreeze traffic.
#[derive(Debug, Default)]
pub struct ManualClock {
    base_ms: f64,
    frozen_at: Option<f64>,
}

impl ManualClock {
    pub fn new(base_ms: f64) -> Self {
        Self {
            base_ms,
            frozen_at: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn advance(&mut self, delta_ms: f64) {
        self.base_ms += delta_ms;
    }
}

impl Clock for ManualClock {
    fn freeze(&mut self, t_ms: f64) {
        self.frozen_at = Some(t_ms);
    }

    fn unfreeze(&mut self) {
        self.frozen_at = None;
    }

    fn now(&self) -> f64 {
        self.frozen_at.unwrap_or(self.base_ms)
    }
}

/// Unfreezes the clock when dropped, so every exit path of the capture loop
/// (normal, cancelled, error) releases the host's time flow.
pub(crate) struct FreezeGuard<'a> {
    clock: &'a mut dyn Clock,
}

impl<'a> FreezeGuard<'a> {
    pub(crate) fn new(clock: &'a mut dyn Clock) -> Self {
        Self { clock }
    }

    pub(crate) fn freeze(&mut self, t_ms: f64) {
        self.clock.freeze(t_ms);
    }

    pub(crate) fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        self.clock.unfreeze();
    }
}
