use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTimer<P> {
    phase: P,
    remaining: Duration,
}

/// Owns the single pending timer of a state machine.
///
/// Scheduling a new phase cancels whatever was pending, so a stale timer from an earlier phase
/// can never fire after its phase has been left. Time only moves when [`PhaseSequencer::advance`]
/// is called.
#[derive(Debug, Clone)]
pub struct PhaseSequencer<P> {
    pending: Option<PendingTimer<P>>,
}

impl<P> Default for PhaseSequencer<P> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<P: Copy> PhaseSequencer<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `phase` once `after` has elapsed, replacing any pending timer.
    pub fn schedule(&mut self, phase: P, after: Duration) {
        self.pending = Some(PendingTimer {
            phase,
            remaining: after,
        });
    }

    /// Drops the pending timer, returning the phase it would have fired.
    pub fn cancel(&mut self) -> Option<P> {
        self.pending.take().map(|t| t.phase)
    }

    pub fn pending(&self) -> Option<P> {
        self.pending.map(|t| t.phase)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.pending.map(|t| t.remaining)
    }

    /// Moves the clock forward by `dt` and returns the phase whose timer expired, if any.
    /// Time beyond the expiry is not carried over.
    pub fn advance(&mut self, dt: Duration) -> Option<P> {
        let timer = self.pending.as_mut()?;
        timer.remaining = timer.remaining.saturating_sub(dt);
        if timer.remaining.is_zero() {
            return self.cancel();
        }
        None
    }
}
