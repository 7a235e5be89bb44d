//! World state for scenario execution.
//!
//! The World holds one heartbeat engine, the directory it talks to, the
//! virtual clock, and a timestamped log of everything that happened. Oracles
//! read the log; they never see the event queue.

use std::time::Duration;

use hostbeat_core::{
    HeartbeatEngine, SenderState, offline::AnnouncementId, rpc::TransportError, timer::TimerKind,
};
use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse};

use crate::DirectoryModel;

/// Something observable that happened during a scenario
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Engine entered a lifecycle state
    StateChanged(SenderState),
    /// Heartbeat handed to the RPC
    Sent(HeartbeatRequest),
    /// RPC outcome delivered to the engine
    Verdict(Result<HeartbeatResponse, TransportError>),
    /// Timer armed
    TimerSet {
        /// Purpose
        kind: TimerKind,
        /// Delay
        after: Duration,
    },
    /// Timer cancelled before expiry
    TimerCancelled(TimerKind),
    /// Live timer expired and was delivered
    TimerFired(TimerKind),
    /// Expiry of a cancelled or superseded timer was delivered anyway
    StaleTimer(TimerKind),
    /// `set_host_offline_reason` called
    Announced {
        /// Returned announcement id
        id: AnnouncementId,
        /// Reason text
        reason: String,
    },
    /// Offline-reason acknowledgement delivered
    OfflineResolved {
        /// Announcement
        id: AnnouncementId,
        /// Outcome
        acknowledged: bool,
    },
    /// Credentials invalidated
    CredentialsRefreshed,
    /// First-success notification
    HeartbeatSucceeded,
    /// Unknown-host notification
    UnknownHostId,
    /// Authentication-failure notification
    AuthError,
}

/// Timestamped [`Event`]
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Virtual time since scenario start
    pub at: Duration,
    /// What happened
    pub event: Event,
}

/// World state containing the engine under test and its directory.
pub struct World {
    engine: HeartbeatEngine,
    directory: DirectoryModel,
    now: Duration,
    log: Vec<Observation>,
}

impl World {
    pub(crate) fn new(engine: HeartbeatEngine, directory: DirectoryModel) -> Self {
        Self { engine, directory, now: Duration::ZERO, log: Vec::new() }
    }

    /// Engine under test
    pub fn engine(&self) -> &HeartbeatEngine {
        &self.engine
    }

    pub(crate) fn engine_mut(&mut self) -> &mut HeartbeatEngine {
        &mut self.engine
    }

    /// Directory the engine talked to
    pub fn directory(&self) -> &DirectoryModel {
        &self.directory
    }

    pub(crate) fn directory_mut(&mut self) -> &mut DirectoryModel {
        &mut self.directory
    }

    /// Virtual time at which the scenario ended
    pub fn now(&self) -> Duration {
        self.now
    }

    pub(crate) fn advance_to(&mut self, at: Duration) {
        debug_assert!(at >= self.now, "virtual time never goes backwards");
        self.now = at;
    }

    pub(crate) fn record(&mut self, event: Event) {
        self.log.push(Observation { at: self.now, event });
    }

    /// Everything that happened, in order
    pub fn observations(&self) -> &[Observation] {
        &self.log
    }

    /// Every heartbeat sent, with its send time
    pub fn sent(&self) -> Vec<(Duration, &HeartbeatRequest)> {
        self.log
            .iter()
            .filter_map(|o| match &o.event {
                Event::Sent(request) => Some((o.at, request)),
                _ => None,
            })
            .collect()
    }

    /// Every offline-reason resolution, with its time
    pub fn resolutions(&self) -> Vec<(Duration, AnnouncementId, bool)> {
        self.log
            .iter()
            .filter_map(|o| match o.event {
                Event::OfflineResolved { id, acknowledged } => Some((o.at, id, acknowledged)),
                _ => None,
            })
            .collect()
    }

    /// When the engine first entered `state`
    pub fn entered_at(&self, state: SenderState) -> Option<Duration> {
        self.first_at(|event| *event == Event::StateChanged(state))
    }

    /// Time of the first event matching `pred`
    pub fn first_at(&self, pred: impl Fn(&Event) -> bool) -> Option<Duration> {
        self.log.iter().find(|o| pred(&o.event)).map(|o| o.at)
    }

    /// Number of events matching `pred`
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.log.iter().filter(|o| pred(&o.event)).count()
    }
}
