//! Blockers: outstanding wait requests and the wake partition algorithm.

use crossbeam::channel::Sender;

use crate::clock::VirtualTime;

/// A single outstanding wait request: a target instant on the virtual
/// timeline plus a one-shot notification channel.
///
/// A blocker leaves the live set exactly once, either by firing (consumed
/// by [`notify_blockers`]) or by cancellation (dropped, which a parked
/// receiver observes as disconnection).
#[derive(Debug)]
pub(crate) struct Blocker {
    seq: u64,
    target: VirtualTime,
    notify: Sender<VirtualTime>,
}

impl Blocker {
    pub(crate) fn new(seq: u64, target: VirtualTime, notify: Sender<VirtualTime>) -> Self {
        Self { seq, target, notify }
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn target(&self) -> VirtualTime {
        self.target
    }

    /// Delivers the firing time into the notification channel.
    ///
    /// The channel has capacity 1 and each blocker sends at most once, so
    /// the send never blocks; it only fails if the receiver is gone, which
    /// just means nobody is listening anymore.
    fn fire(self, at: VirtualTime) {
        if self.notify.try_send(at).is_err() {
            tracing::trace!(seq = self.seq, "blocker receiver dropped before firing");
        }
    }
}

/// Fires every blocker due at or before `threshold` and returns the rest.
///
/// Due blockers are notified in ascending target order, ties broken by
/// registration order; the remaining collection keeps its original order.
/// Callers must hold exclusive access to the live set for the duration of
/// the partition, but firing itself never blocks, so it is safe to run
/// with the engine lock held.
pub(crate) fn notify_blockers(blockers: Vec<Blocker>, threshold: VirtualTime) -> Vec<Blocker> {
    let (mut due, remaining): (Vec<_>, Vec<_>) =
        blockers.into_iter().partition(|b| b.target <= threshold);

    // The live set is kept in registration order, so a stable sort on the
    // target alone breaks ties first-registered, first-notified.
    due.sort_by_key(|b| b.target);
    for blocker in due {
        tracing::trace!(seq = blocker.seq, target = %blocker.target, "firing blocker");
        blocker.fire(threshold);
    }

    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use crossbeam::channel::{bounded, Receiver};

    fn blocker_at(seq: u64, offset_secs: i64) -> (Blocker, Receiver<VirtualTime>) {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let (tx, rx) = bounded(1);
        (Blocker::new(seq, epoch + Duration::seconds(offset_secs), tx), rx)
    }

    #[test]
    fn test_partition_fires_due_and_keeps_rest() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let (blockers, receivers): (Vec<_>, Vec<_>) = [1i64, 2, 5, 10, 10]
            .iter()
            .enumerate()
            .map(|(seq, &offset)| blocker_at(seq as u64, offset))
            .unzip();

        let remaining = notify_blockers(blockers, epoch + Duration::seconds(2));
        assert_eq!(remaining.len(), 3);
        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[1].try_recv().is_ok());
        assert!(receivers[2].try_recv().is_err());
        assert!(receivers[3].try_recv().is_err());
        assert!(receivers[4].try_recv().is_err());

        let remaining = notify_blockers(remaining, epoch + Duration::seconds(10));
        assert!(remaining.is_empty());
        assert!(receivers[2].try_recv().is_ok());
        assert!(receivers[3].try_recv().is_ok());
        assert!(receivers[4].try_recv().is_ok());
    }

    #[test]
    fn test_remaining_preserves_registration_order() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let (blockers, _receivers): (Vec<_>, Vec<_>) = [7i64, 3, 9, 3]
            .iter()
            .enumerate()
            .map(|(seq, &offset)| blocker_at(seq as u64, offset))
            .unzip();

        let remaining = notify_blockers(blockers, epoch + Duration::seconds(3));
        let seqs: Vec<u64> = remaining.iter().map(|b| b.seq()).collect();
        assert_eq!(seqs, vec![0, 2]);
    }

    #[test]
    fn test_fired_value_is_the_threshold() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let (blocker, rx) = blocker_at(0, 1);

        let remaining = notify_blockers(vec![blocker], epoch + Duration::seconds(4));
        assert!(remaining.is_empty());
        assert_eq!(rx.try_recv().unwrap(), epoch + Duration::seconds(4));
    }

    #[test]
    fn test_dropped_receiver_does_not_poison_the_partition() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let (abandoned, rx) = blocker_at(0, 1);
        drop(rx);
        let (kept, live_rx) = blocker_at(1, 2);

        let remaining = notify_blockers(vec![abandoned, kept], epoch + Duration::seconds(2));
        assert!(remaining.is_empty());
        assert!(live_rx.try_recv().is_ok());
    }
}
