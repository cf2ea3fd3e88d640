//! One-shot timer layered on the engine's blocker mechanism.

use crossbeam::channel::{bounded, Receiver, Sender};

use chrono::Duration;
use parking_lot::Mutex;

use crate::clock::{FakeClock, VirtualTime};
use crate::error::ClockError;

/// A one-shot timer driven by virtual time.
///
/// Unlike [`FakeTicker`](crate::FakeTicker), a timer never rearms on its
/// own, so its output channel serves directly as the blocker's
/// notification channel and no background thread exists. The engine
/// delivers the firing time straight into the capacity-1 buffer; a second
/// firing after [`reset`](FakeTimer::reset) is dropped if the first was
/// never drained.
pub struct FakeTimer {
    clock: FakeClock,
    output_tx: Sender<VirtualTime>,
    output: Receiver<VirtualTime>,
    /// Sequence number of the pending blocker, if one is still live.
    pending: Mutex<Option<u64>>,
}

impl FakeTimer {
    pub(crate) fn arm(clock: FakeClock, d: Duration) -> Result<Self, ClockError> {
        if d <= Duration::zero() {
            return Err(ClockError::NonPositiveInterval(d));
        }
        let (output_tx, output) = bounded(1);
        let seq = clock.register_wakeup_with(output_tx.clone(), d);
        Ok(Self {
            clock,
            output_tx,
            output,
            pending: Mutex::new(Some(seq)),
        })
    }

    /// Receives the firing time. Delivers at most once per registration.
    pub fn chan(&self) -> &Receiver<VirtualTime> {
        &self.output
    }

    /// Cancels the pending wakeup, reporting whether one was still
    /// pending. A no-op after the timer has fired or been stopped.
    pub fn stop(&self) -> bool {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(seq) => self.clock.cancel_wakeup(seq),
            None => false,
        }
    }

    /// Rearms the timer to fire `d` past the current virtual time,
    /// cancelling any pending wakeup. Returns whether a still-pending
    /// wakeup was replaced.
    ///
    /// Fails with [`ClockError::NonPositiveInterval`] if `d <= 0`, leaving
    /// the pending wakeup untouched.
    pub fn reset(&self, d: Duration) -> Result<bool, ClockError> {
        if d <= Duration::zero() {
            return Err(ClockError::NonPositiveInterval(d));
        }
        let mut pending = self.pending.lock();
        let was_pending = match pending.take() {
            Some(seq) => self.clock.cancel_wakeup(seq),
            None => false,
        };
        let seq = self
            .clock
            .register_wakeup_with(self.output_tx.clone(), d);
        *pending = Some(seq);
        Ok(was_pending)
    }
}

impl Drop for FakeTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
