//! Periodic scheduler layered on the engine's blocker mechanism.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Duration;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::clock::{FakeClock, VirtualTime};
use crate::error::ClockError;

/// A repeating ticker driven by virtual time.
///
/// The ticker owns exactly one live blocker at a time. Each firing rearms
/// at `previous target + interval`, not `now + interval`, so delayed
/// delivery never accumulates drift. Ticks are delivered through a
/// capacity-1 buffer: if the consumer has not drained the previous tick
/// when the next one becomes due, the new tick is dropped.
///
/// Rearming happens on the ticker's own background thread after it
/// observes the wakeup, never inside the advancing thread.
pub struct FakeTicker {
    output: Receiver<VirtualTime>,
    stopped: Arc<AtomicBool>,
    /// Sequence number of the currently live blocker, updated on rearm.
    active: Arc<AtomicU64>,
    clock: FakeClock,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FakeTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTicker")
            .field("stopped", &self.stopped)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl FakeTicker {
    pub(crate) fn start(clock: FakeClock, interval: Duration) -> Result<Self, ClockError> {
        if interval <= Duration::zero() {
            return Err(ClockError::NonPositiveInterval(interval));
        }

        let (out_tx, out_rx) = bounded(1);
        let stopped = Arc::new(AtomicBool::new(false));

        // Register the first blocker before the loop starts so the ticker
        // is already parked when this constructor returns.
        let (seq, first_target, fire_rx) = clock.register_wakeup_after(interval);
        let active = Arc::new(AtomicU64::new(seq));

        let handle = {
            let clock = clock.clone();
            let stopped = Arc::clone(&stopped);
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("fake-clock-ticker".into())
                .spawn(move || {
                    run_loop(clock, interval, first_target, fire_rx, out_tx, stopped, active)
                })
                .expect("failed to spawn ticker thread")
        };

        Ok(Self {
            output: out_rx,
            stopped,
            active,
            clock,
            handle: Some(handle),
        })
    }

    /// The stream of tick times. Holds at most one undelivered tick.
    pub fn chan(&self) -> &Receiver<VirtualTime> {
        &self.output
    }

    /// Stops the ticker. Idempotent, and safe to race against an
    /// in-flight wakeup: advances sequenced after this call never deliver
    /// another tick.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Cancelling drops the blocker's sender, which unparks the run
        // loop and terminates it. If the blocker already fired, the loop
        // sees the stop flag instead; if it is mid-rearm, its own
        // post-rearm flag check withdraws the fresh registration.
        self.clock.cancel_wakeup(self.active.load(Ordering::SeqCst));
        tracing::trace!("ticker stopped");
    }
}

impl Drop for FakeTicker {
    fn drop(&mut self) {
        self.stop();
        // The loop always terminates once the flag is set and the live
        // blocker is cancelled, so joining cannot hang. After drop, every
        // delivered tick is already in the output buffer.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    clock: FakeClock,
    interval: Duration,
    mut target: VirtualTime,
    mut fire_rx: Receiver<VirtualTime>,
    output: Sender<VirtualTime>,
    stopped: Arc<AtomicBool>,
    active: Arc<AtomicU64>,
) {
    loop {
        // Disconnection means the live blocker was cancelled out from
        // under us by stop().
        let Ok(fired_at) = fire_rx.recv() else { return };
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        // Rearm before delivering, so a driver using block_until(1) can
        // tell when the ticker has parked again. The next target is
        // derived from the previous one, keeping the schedule drift-free.
        target = target + interval;
        let (seq, rx) = clock.register_wakeup_at(target);
        active.store(seq, Ordering::SeqCst);
        if stopped.load(Ordering::SeqCst) {
            // stop() raced the rearm and may have cancelled the previous,
            // already-fired blocker; withdraw this one ourselves.
            clock.cancel_wakeup(seq);
            return;
        }
        fire_rx = rx;

        match output.try_send(fired_at) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(tick = %fired_at, "tick dropped: consumer has not drained the previous one");
            }
            // Receiver gone; nobody will ever drain the channel again.
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}
