//! Startup gate: decides the single instant heartbeating may begin.
//!
//! The gate watches one or two signaling channels. It opens immediately once
//! every monitored channel is connected. If only some are connected, a
//! timeout is armed; when it expires the gate opens anyway, since one live
//! channel is good enough to prove liveness.
//!
//! A connected channel dropping before the gate opens cancels the timeout
//! and the gate starts over from the remaining channels. Once open, the gate
//! ignores every further channel change.
//!
//! ```text
//!             some connected           all connected
//!  ┌────────┐ ───────────────> ┌───────┐ ──────────────> ┌──────┐
//!  │ Closed │                  │ Armed │                 │ Open │
//!  └────────┘ <─────────────── └───────┘ ──────────────> └──────┘
//!               none connected            timeout
//! ```

use std::time::Duration;

/// What the gate asks its owner to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// Start the gate timeout
    ArmTimer(Duration),
    /// Stop the gate timeout
    CancelTimer,
    /// Heartbeating may begin. Emitted exactly once.
    Ready,
}

/// Readiness condition over the monitored signaling channels
#[derive(Debug, Clone)]
pub struct StartupGate {
    connected: Vec<bool>,
    timeout: Duration,
    timer_armed: bool,
    ready: bool,
}

impl StartupGate {
    /// Gate over `channels` channels with the given partial-connect timeout
    #[must_use]
    pub fn new(channels: usize, timeout: Duration) -> Self {
        Self { connected: vec![false; channels], timeout, timer_armed: false, ready: false }
    }

    /// Number of monitored channels
    #[must_use]
    pub fn channels(&self) -> usize {
        self.connected.len()
    }

    /// Whether `Ready` has been emitted
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Record a channel state change
    ///
    /// Out-of-range channels are ignored; the engine validates indices
    /// before forwarding.
    pub fn observe(&mut self, channel: usize, connected: bool) -> Vec<GateEvent> {
        if self.ready {
            return vec![];
        }
        let Some(slot) = self.connected.get_mut(channel) else {
            return vec![];
        };

        let was_connected = std::mem::replace(slot, connected);
        let mut events = Vec::new();

        if self.connected.iter().all(|c| *c) {
            if std::mem::take(&mut self.timer_armed) {
                events.push(GateEvent::CancelTimer);
            }
            self.ready = true;
            events.push(GateEvent::Ready);
        } else if was_connected && !connected {
            if std::mem::take(&mut self.timer_armed) {
                events.push(GateEvent::CancelTimer);
            }
            if self.connected.iter().any(|c| *c) {
                self.timer_armed = true;
                events.push(GateEvent::ArmTimer(self.timeout));
            }
        } else if connected && !self.timer_armed {
            self.timer_armed = true;
            events.push(GateEvent::ArmTimer(self.timeout));
        }

        events
    }

    /// The gate timeout expired
    pub fn on_timeout(&mut self) -> Vec<GateEvent> {
        self.timer_armed = false;

        if self.ready || !self.connected.iter().any(|c| *c) {
            return vec![];
        }

        self.ready = true;
        vec![GateEvent::Ready]
    }
}
