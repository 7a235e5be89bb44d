//! One-shot timer identities.
//!
//! The engine never sleeps. It hands the driver a [`TimerId`] and a delay,
//! and the driver feeds the id back when the delay elapses. Every arm issues
//! a fresh generation, so a timer that was cancelled (or re-armed) after the
//! driver already queued its expiry is recognised as stale and ignored.

/// What a timer is for. At most one timer of each kind is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Next scheduled heartbeat (interval, backoff or retry delay)
    Heartbeat,
    /// Startup gate gave up waiting for the remaining channels
    GateTimeout,
    /// Offline-reason acknowledgement deadline
    OfflineAck,
}

impl TimerKind {
    /// All timer kinds, in a stable order
    pub const ALL: [TimerKind; 3] =
        [TimerKind::Heartbeat, TimerKind::GateTimeout, TimerKind::OfflineAck];

    const fn slot(self) -> usize {
        match self {
            TimerKind::Heartbeat => 0,
            TimerKind::GateTimeout => 1,
            TimerKind::OfflineAck => 2,
        }
    }
}

/// Handle for one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    /// Purpose
    pub kind: TimerKind,
    /// Arm counter, unique per engine
    pub generation: u64,
}

/// Live generation per timer kind
#[derive(Debug, Clone, Default)]
pub(crate) struct TimerSlots {
    next_generation: u64,
    live: [Option<u64>; 3],
}

impl TimerSlots {
    /// Arm `kind`, replacing whatever was live
    pub(crate) fn arm(&mut self, kind: TimerKind) -> TimerId {
        self.next_generation += 1;
        self.live[kind.slot()] = Some(self.next_generation);
        TimerId { kind, generation: self.next_generation }
    }

    /// Disarm `kind`. Returns whether it was armed.
    pub(crate) fn cancel(&mut self, kind: TimerKind) -> bool {
        self.live[kind.slot()].take().is_some()
    }

    /// Consume an expiry. Returns `false` for stale or unknown ids.
    pub(crate) fn fire(&mut self, id: TimerId) -> bool {
        let slot = &mut self.live[id.kind.slot()];
        if *slot == Some(id.generation) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        self.live[kind.slot()].is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_consumes_live_timer() {
        let mut slots = TimerSlots::default();
        let id = slots.arm(TimerKind::Heartbeat);

        assert!(slots.is_armed(TimerKind::Heartbeat));
        assert!(slots.fire(id));
        assert!(!slots.fire(id), "a timer fires at most once");
        assert!(!slots.is_armed(TimerKind::Heartbeat));
    }

    #[test]
    fn cancelled_timer_is_stale() {
        let mut slots = TimerSlots::default();
        let id = slots.arm(TimerKind::OfflineAck);

        assert!(slots.cancel(TimerKind::OfflineAck));
        assert!(!slots.cancel(TimerKind::OfflineAck));
        assert!(!slots.fire(id));
    }

    #[test]
    fn rearm_invalidates_previous_generation() {
        let mut slots = TimerSlots::default();
        let first = slots.arm(TimerKind::GateTimeout);
        let second = slots.arm(TimerKind::GateTimeout);

        assert_ne!(first, second);
        assert!(!slots.fire(first));
        assert!(slots.fire(second));
    }

    #[test]
    fn kinds_are_independent() {
        let mut slots = TimerSlots::default();
        let heartbeat = slots.arm(TimerKind::Heartbeat);
        let ack = slots.arm(TimerKind::OfflineAck);

        slots.cancel(TimerKind::Heartbeat);
        assert!(!slots.fire(heartbeat));
        assert!(slots.fire(ack));
    }
}
