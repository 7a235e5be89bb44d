//! Offline-reason announcements.
//!
//! A host about to go away attaches a free-text reason to its heartbeats and
//! waits, up to a deadline, for the directory to accept one of them. The
//! coordinator tracks the single pending announcement and guarantees its
//! acknowledgement resolves exactly once: `true` when an accepted heartbeat
//! carried it, `false` on deadline, on replacement by a newer announcement,
//! or when the sender stops for good.
//!
//! The reason itself is sticky. Resolution only ends the wait; heartbeats
//! keep carrying the latest reason until a new one replaces it.

use std::time::Duration;

/// Identifies one `announce` call and its acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnouncementId(pub u64);

/// What the coordinator asks its owner to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineEvent {
    /// Start the acknowledgement deadline
    ArmDeadline(Duration),
    /// Stop the acknowledgement deadline
    CancelDeadline,
    /// Deliver the acknowledgement for `id`
    Resolved {
        /// Announcement being resolved
        id: AnnouncementId,
        /// Whether the directory accepted a heartbeat carrying it
        acknowledged: bool,
    },
}

/// Holds at most one pending announcement
#[derive(Debug, Clone, Default)]
pub struct OfflineReasonCoordinator {
    reason: Option<(AnnouncementId, String)>,
    pending: Option<AnnouncementId>,
    next_id: u64,
}

impl OfflineReasonCoordinator {
    /// Empty coordinator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id without announcing anything
    ///
    /// Used when an announcement arrives after the sender stopped: the caller
    /// still gets exactly one (negative) acknowledgement.
    pub fn issue_id(&mut self) -> AnnouncementId {
        self.next_id += 1;
        AnnouncementId(self.next_id)
    }

    /// Replace any pending announcement with `reason`
    ///
    /// The previous acknowledgement, if still pending, resolves `false`
    /// before the new deadline is armed.
    pub fn announce(
        &mut self,
        reason: impl Into<String>,
        timeout: Duration,
    ) -> (AnnouncementId, Vec<OfflineEvent>) {
        let mut events = Vec::new();

        if let Some(previous) = self.pending.take() {
            events.push(OfflineEvent::CancelDeadline);
            events.push(OfflineEvent::Resolved { id: previous, acknowledged: false });
        }

        let id = self.issue_id();
        self.reason = Some((id, reason.into()));
        self.pending = Some(id);
        events.push(OfflineEvent::ArmDeadline(timeout));

        (id, events)
    }

    /// Reason to attach to the next heartbeat, with the announcement it
    /// belongs to
    #[must_use]
    pub fn current(&self) -> Option<(AnnouncementId, &str)> {
        self.reason.as_ref().map(|(id, reason)| (*id, reason.as_str()))
    }

    /// Announcement still waiting for its acknowledgement
    #[must_use]
    pub fn pending(&self) -> Option<AnnouncementId> {
        self.pending
    }

    /// An accepted heartbeat carried announcement `id`
    ///
    /// No-op unless `id` is the pending one.
    pub fn on_ack(&mut self, id: AnnouncementId) -> Vec<OfflineEvent> {
        if self.pending != Some(id) {
            return vec![];
        }
        self.pending = None;
        vec![OfflineEvent::CancelDeadline, OfflineEvent::Resolved { id, acknowledged: true }]
    }

    /// The acknowledgement deadline expired
    pub fn on_timeout(&mut self) -> Vec<OfflineEvent> {
        match self.pending.take() {
            Some(id) => vec![OfflineEvent::Resolved { id, acknowledged: false }],
            None => vec![],
        }
    }

    /// The sender stopped for good; fail whatever is pending
    pub fn fail_pending(&mut self) -> Vec<OfflineEvent> {
        match self.pending.take() {
            Some(id) => vec![
                OfflineEvent::CancelDeadline,
                OfflineEvent::Resolved { id, acknowledged: false },
            ],
            None => vec![],
        }
    }

    /// The sender is being torn down; drop the pending wait unresolved
    pub fn abandon(&mut self) -> Option<AnnouncementId> {
        self.pending.take()
    }
}
