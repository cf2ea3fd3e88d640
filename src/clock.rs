//! Core FakeClock engine: virtual-time state, waiter registration, and
//! explicit advancement.

use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::blocker::{notify_blockers, Blocker};
use crate::error::ClockError;
use crate::ticker::FakeTicker;
use crate::timer::FakeTimer;

/// An absolute instant on the virtual timeline.
pub type VirtualTime = DateTime<Utc>;

/// A deterministic clock that only moves when the test driver advances it.
///
/// Consumers register waits through [`sleep`](FakeClock::sleep),
/// [`after`](FakeClock::after), [`new_ticker`](FakeClock::new_ticker), and
/// [`new_timer`](FakeClock::new_timer); the driver moves time forward with
/// [`advance`](FakeClock::advance) or [`advance_to`](FakeClock::advance_to),
/// which wakes every waiter whose target has been reached, in target order.
/// [`block_until`](FakeClock::block_until) lets the driver wait for a known
/// number of consumers to park before advancing, closing the race between
/// "consumer about to register" and "driver about to advance".
///
/// The clock is cheaply cloneable; clones share one engine. Construct one
/// per test, never a shared singleton.
#[derive(Clone)]
pub struct FakeClock {
    core: Arc<ClockCore>,
}

struct ClockCore {
    state: Mutex<EngineState>,
    /// Signaled on every blocker registration and removal.
    parked: Condvar,
}

struct EngineState {
    current: VirtualTime,
    blockers: Vec<Blocker>,
    sleep_calls: u64,
    next_seq: u64,
}

impl EngineState {
    /// Registers a blocker at `target`, keeping the live set in
    /// registration order.
    fn register(&mut self, target: VirtualTime, notify: Sender<VirtualTime>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.blockers.push(Blocker::new(seq, target, notify));
        tracing::trace!(seq, target = %target, live = self.blockers.len(), "registered blocker");
        seq
    }

    /// Fires all blockers due at or before `new_time` and moves the clock
    /// there. Returns how many fired.
    fn advance_to_time(&mut self, new_time: VirtualTime) -> usize {
        let live = mem::take(&mut self.blockers);
        let before = live.len();
        self.blockers = notify_blockers(live, new_time);
        self.current = new_time;
        before - self.blockers.len()
    }
}

/// Default epoch for [`FakeClock::new`]. Deliberately not the zero
/// instant, so a fake-clock timestamp is distinguishable from an unset
/// one.
fn default_epoch() -> VirtualTime {
    Utc.with_ymd_and_hms(1984, 4, 4, 0, 0, 0).unwrap()
}

impl FakeClock {
    /// Creates a fake clock at the fixed, non-zero default epoch.
    pub fn new() -> Self {
        Self::at(default_epoch())
    }

    /// Creates a fake clock at an explicit epoch.
    pub fn at(epoch: VirtualTime) -> Self {
        Self {
            core: Arc::new(ClockCore {
                state: Mutex::new(EngineState {
                    current: epoch,
                    blockers: Vec::new(),
                    sleep_calls: 0,
                    next_seq: 0,
                }),
                parked: Condvar::new(),
            }),
        }
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> VirtualTime {
        self.core.state.lock().current
    }

    /// Returns the virtual time elapsed since `t`.
    pub fn since(&self, t: VirtualTime) -> Duration {
        self.now() - t
    }

    /// Blocks the calling thread until the clock has advanced by `d`.
    ///
    /// A zero or negative `d` returns immediately. Either way the call is
    /// counted by [`num_sleep_calls`](FakeClock::num_sleep_calls).
    pub fn sleep(&self, d: Duration) {
        // after() registers the wait and counts the call; for `d <= 0` the
        // channel is already resolved and recv returns straight away.
        let _ = self.after(d).recv();
    }

    /// Returns a channel that receives the firing time once the clock has
    /// advanced by `d`. Never blocks the caller.
    ///
    /// A zero or negative `d` resolves immediately with the current time.
    /// Registration is counted by [`num_sleep_calls`](FakeClock::num_sleep_calls)
    /// either way.
    pub fn after(&self, d: Duration) -> Receiver<VirtualTime> {
        let (tx, rx) = bounded(1);
        let mut state = self.core.state.lock();
        state.sleep_calls += 1;
        if d <= Duration::zero() {
            let now = state.current;
            let _ = tx.try_send(now);
            return rx;
        }
        let target = state.current + d;
        state.register(target, tx);
        drop(state);
        self.core.parked.notify_all();
        rx
    }

    /// Creates a ticker that fires every `interval` of virtual time.
    ///
    /// Fails with [`ClockError::NonPositiveInterval`] if `interval <= 0`.
    pub fn new_ticker(&self, interval: Duration) -> Result<FakeTicker, ClockError> {
        FakeTicker::start(self.clone(), interval)
    }

    /// Creates a timer that fires once, after `d` of virtual time.
    ///
    /// Fails with [`ClockError::NonPositiveInterval`] if `d <= 0`.
    pub fn new_timer(&self, d: Duration) -> Result<FakeTimer, ClockError> {
        FakeTimer::arm(self.clone(), d)
    }

    /// Moves the clock forward by `d`, waking every waiter whose target is
    /// reached, in ascending target order (ties in registration order).
    ///
    /// Waiters registered as a side effect of a wakeup (a ticker rearming)
    /// are visible to later calls but never fired retroactively by this
    /// one. Advance calls are expected to come from a single driving
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if `d` is negative: virtual time never moves backwards.
    pub fn advance(&self, d: Duration) {
        assert!(
            d >= Duration::zero(),
            "virtual time cannot move backwards (advance by {d})"
        );
        let mut state = self.core.state.lock();
        let new_time = state.current + d;
        let fired = state.advance_to_time(new_time);
        drop(state);
        tracing::debug!(now = %new_time, fired, "advanced virtual time");
        if fired > 0 {
            self.core.parked.notify_all();
        }
    }

    /// Moves the clock forward to the absolute instant `t`.
    ///
    /// Fails with [`ClockError::TargetInPast`] and leaves all state
    /// unchanged if `t` is earlier than the current time.
    pub fn advance_to(&self, t: VirtualTime) -> Result<(), ClockError> {
        let mut state = self.core.state.lock();
        if t < state.current {
            return Err(ClockError::TargetInPast {
                target: t,
                current: state.current,
            });
        }
        let fired = state.advance_to_time(t);
        drop(state);
        tracing::debug!(now = %t, fired, "advanced virtual time");
        if fired > 0 {
            self.core.parked.notify_all();
        }
        Ok(())
    }

    /// Blocks until exactly `n` blockers are live.
    ///
    /// Lets a test driver wait for background consumers to park before
    /// advancing; without this, an advance could run before a consumer's
    /// registration and silently miss the intended firing.
    pub fn block_until(&self, n: usize) {
        let mut state = self.core.state.lock();
        while state.blockers.len() != n {
            self.core.parked.wait(&mut state);
        }
    }

    /// Cumulative count of `sleep`/`after` registrations, including the
    /// immediately-resolved non-positive ones.
    pub fn num_sleep_calls(&self) -> u64 {
        self.core.state.lock().sleep_calls
    }

    /// Earliest target among live blockers, or `None` if nothing is
    /// waiting.
    pub fn next_wakeup(&self) -> Option<VirtualTime> {
        let state = self.core.state.lock();
        state.blockers.iter().map(|b| b.target()).min()
    }

    /// Registers a blocker `d` past the current time under a single lock
    /// acquisition, returning its sequence number, target, and receiving
    /// end. Used by the ticker for its initial arm.
    pub(crate) fn register_wakeup_after(
        &self,
        d: Duration,
    ) -> (u64, VirtualTime, Receiver<VirtualTime>) {
        let (tx, rx) = bounded(1);
        let mut state = self.core.state.lock();
        let target = state.current + d;
        let seq = state.register(target, tx);
        drop(state);
        self.core.parked.notify_all();
        (seq, target, rx)
    }

    /// Registers a blocker at an absolute target. Used by the ticker when
    /// rearming at `previous target + interval`.
    pub(crate) fn register_wakeup_at(&self, target: VirtualTime) -> (u64, Receiver<VirtualTime>) {
        let (tx, rx) = bounded(1);
        let mut state = self.core.state.lock();
        let seq = state.register(target, tx);
        drop(state);
        self.core.parked.notify_all();
        (seq, rx)
    }

    /// Registers a blocker that notifies through a caller-supplied
    /// channel. Used by the timer, whose output channel doubles as the
    /// blocker's notification channel.
    pub(crate) fn register_wakeup_with(&self, notify: Sender<VirtualTime>, d: Duration) -> u64 {
        let mut state = self.core.state.lock();
        let target = state.current + d;
        let seq = state.register(target, notify);
        drop(state);
        self.core.parked.notify_all();
        seq
    }

    /// Removes the blocker with the given sequence number from the live
    /// set, reporting whether it was still pending. A blocker that already
    /// fired is gone, so cancellation degrades to a no-op.
    pub(crate) fn cancel_wakeup(&self, seq: u64) -> bool {
        let mut state = self.core.state.lock();
        let before = state.blockers.len();
        state.blockers.retain(|b| b.seq() != seq);
        let removed = state.blockers.len() != before;
        drop(state);
        if removed {
            tracing::trace!(seq, "cancelled blocker");
            self.core.parked.notify_all();
        }
        removed
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_epoch_is_nonzero() {
        assert_ne!(default_epoch().timestamp(), 0);
    }

    #[test]
    fn test_clones_share_one_engine() {
        let clock = FakeClock::new();
        let other = clock.clone();
        clock.advance(Duration::seconds(7));
        assert_eq!(other.now(), clock.now());
    }
}
