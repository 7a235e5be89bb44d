//! Heartbeat sender state machine.
//!
//! The engine periodically proves host liveness to the directory service.
//! It owns the sequence counter, builds and signs each request, classifies
//! the directory's verdict, and drives the startup gate, backoff, and
//! offline-reason coordinator.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods never perform I/O, sleep, or read the clock
//! - Methods return `Vec<SenderAction>`; the driver executes them in order
//! - Timer expiries and RPC outcomes come back in as method calls
//!
//! The driver serialises every call into the engine, so there is exactly one
//! logical owner and no two attempts ever overlap.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐ start ┌──────────────┐ gate ready ┌────────┐
//! │ NotStarted │──────>│ AwaitingGate │───────────>│ Active │
//! └────────────┘       └──────────────┘            └────────┘
//!                                                    │    ↑
//!                             unknown host / auth    │    │ per attempt:
//!                                                    ↓    │ send → verdict
//!                                         ┌────────────────────┐
//!                                         │ PermanentlyStopped │
//!                                         └────────────────────┘
//! ```
//!
//! # Verdicts
//!
//! - **Accepted**: first one fires `HeartbeatSucceeded`; acknowledges a
//!   carried offline reason; resets backoff; next heartbeat after the
//!   interval.
//! - **Sequence mismatch**: adopt the directory's sequence id and resend at
//!   once. Repeated mismatches fall back to backoff.
//! - **Unknown host id**: permanent stop (after optional grace retries).
//! - **Unauthenticated**: refresh credentials and back off; permanent once
//!   the retry budget is spent.
//! - **Transport failure**: back off and retry, forever.

use std::time::Duration;

use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse, ResponseStatus};

use crate::{
    backoff::BackoffController,
    config::{MAX_DELAY, SenderConfig},
    env::Environment,
    error::{FailureKind, SenderError},
    gate::{GateEvent, StartupGate},
    offline::{AnnouncementId, OfflineEvent, OfflineReasonCoordinator},
    rpc::TransportError,
    signer::HeartbeatIdentity,
    timer::{TimerId, TimerKind, TimerSlots},
};

/// Actions returned by the engine.
///
/// The driver executes these in order:
/// - `SendHeartbeat`: call the RPC; report back via `on_rpc_result`
/// - `SetTimer`: (re)start the timer of that kind; report via `on_timer`
/// - `CancelTimer`: drop the timer of that kind
/// - everything else: deliver to the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderAction {
    /// Send this request to the directory
    SendHeartbeat(HeartbeatRequest),

    /// Start a one-shot timer, replacing any live timer of the same kind
    SetTimer {
        /// Id to hand back on expiry
        timer: TimerId,
        /// Delay from now
        after: Duration,
    },

    /// Stop the timer of this kind
    CancelTimer(TimerKind),

    /// Invalidate cached credentials before the next attempt
    RefreshCredentials,

    /// Deliver the acknowledgement for a `set_host_offline_reason` call
    OfflineReasonResolved {
        /// Announcement returned by `set_host_offline_reason`
        id: AnnouncementId,
        /// Whether the directory accepted a heartbeat carrying the reason
        acknowledged: bool,
    },

    /// The first heartbeat was accepted. Emitted once per engine.
    HeartbeatSucceeded,

    /// The directory permanently does not know this host. Emitted once.
    UnknownHostId,

    /// The directory permanently rejects our credentials. Emitted once.
    AuthError,
}

/// Sender lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderState {
    /// Created, `start` not yet called
    NotStarted,
    /// Waiting for the startup gate to open
    AwaitingGate,
    /// Heartbeating
    Active,
    /// Stopped for good; nothing is ever sent again
    PermanentlyStopped,
}

/// Signaling channel state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Channel connected under this full signaling id
    Connected {
        /// Full signaling address; heartbeats are signed over it
        full_id: String,
    },
    /// Channel lost
    Disconnected,
}

/// The attempt currently awaiting a verdict
#[derive(Debug, Clone, Copy)]
struct InFlight {
    sequence_id: u64,
    announcement: Option<AnnouncementId>,
}

/// Heartbeat protocol engine
///
/// Pure state machine: no I/O, no stored environment. One instance per
/// host; instances share nothing.
#[derive(Debug)]
pub struct HeartbeatEngine {
    state: SenderState,
    config: SenderConfig,
    identity: HeartbeatIdentity,
    /// Only the directory may move this backwards
    sequence_id: u64,
    backoff: BackoffController,
    gate: StartupGate,
    offline: OfflineReasonCoordinator,
    timers: TimerSlots,
    /// Full signaling id per channel, `None` while disconnected
    channels: Vec<Option<String>>,
    in_flight: Option<InFlight>,
    /// A trigger arrived while an attempt was in flight
    send_again: bool,
    /// An attempt came due while no channel was connected
    parked: bool,
    heartbeat_succeeded: bool,
    sequence_corrections: u32,
    auth_failures: u32,
    unknown_host_failures: u32,
}

impl HeartbeatEngine {
    /// Create an engine in [`SenderState::NotStarted`]
    ///
    /// # Errors
    ///
    /// Returns [`SenderError::Config`] if `config` fails validation.
    pub fn new(config: SenderConfig, identity: HeartbeatIdentity) -> Result<Self, SenderError> {
        config.validate()?;

        Ok(Self {
            state: SenderState::NotStarted,
            backoff: BackoffController::new(config.backoff.clone()),
            gate: StartupGate::new(config.gate.channels, config.gate.timeout),
            channels: vec![None; config.gate.channels],
            config,
            identity,
            sequence_id: 0,
            offline: OfflineReasonCoordinator::new(),
            timers: TimerSlots::default(),
            in_flight: None,
            send_again: false,
            parked: false,
            heartbeat_succeeded: false,
            sequence_corrections: 0,
            auth_failures: 0,
            unknown_host_failures: 0,
        })
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Sequence id the next request will carry
    #[must_use]
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Consecutive transient failures since the last accepted heartbeat
    #[must_use]
    pub fn backoff_attempts(&self) -> u32 {
        self.backoff.attempt_count()
    }

    /// Whether a request is awaiting its verdict
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Offline reason attached to outgoing heartbeats
    #[must_use]
    pub fn offline_reason(&self) -> Option<&str> {
        self.offline.current().map(|(_, reason)| reason)
    }

    /// Announcement still waiting for its acknowledgement
    #[must_use]
    pub fn pending_offline_ack(&self) -> Option<AnnouncementId> {
        self.offline.pending()
    }

    /// Whether any heartbeat has been accepted
    #[must_use]
    pub fn heartbeat_succeeded(&self) -> bool {
        self.heartbeat_succeeded
    }

    /// Host id this engine heartbeats for
    #[must_use]
    pub fn host_id(&self) -> &str {
        self.identity.host_id()
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Signaling id heartbeats are currently signed over: the lowest-index
    /// connected channel
    #[must_use]
    pub fn signaling_id(&self) -> Option<&str> {
        self.channels.iter().flatten().next().map(String::as_str)
    }

    /// Begin waiting for the startup gate
    ///
    /// Channels that connected before `start` count towards the gate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in [`SenderState::NotStarted`].
    pub fn start(&mut self) -> Result<Vec<SenderAction>, SenderError> {
        if self.state != SenderState::NotStarted {
            return Err(SenderError::InvalidState { state: self.state, operation: "start" });
        }

        self.state = SenderState::AwaitingGate;
        tracing::info!(
            host_id = %self.identity.host_id(),
            channels = self.gate.channels(),
            "heartbeat sender waiting for signaling"
        );

        let connected: Vec<usize> = self
            .channels
            .iter()
            .enumerate()
            .filter_map(|(index, id)| id.as_ref().map(|_| index))
            .collect();

        let mut actions = Vec::new();
        for channel in connected {
            let events = self.gate.observe(channel, true);
            actions.extend(self.apply_gate(events));
        }
        Ok(actions)
    }

    /// A signaling channel connected or disconnected
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` if `channel` is not monitored.
    pub fn on_channel_state(
        &mut self,
        channel: usize,
        event: ChannelEvent,
    ) -> Result<Vec<SenderAction>, SenderError> {
        let channels = self.channels.len();
        let Some(slot) = self.channels.get_mut(channel) else {
            return Err(SenderError::InvalidChannel { channel, channels });
        };

        let connected = matches!(event, ChannelEvent::Connected { .. });
        *slot = match event {
            ChannelEvent::Connected { full_id } => Some(full_id),
            ChannelEvent::Disconnected => None,
        };
        tracing::debug!(
            host_id = %self.identity.host_id(),
            channel,
            connected,
            "signaling channel changed"
        );

        let actions = match self.state {
            SenderState::NotStarted | SenderState::PermanentlyStopped => vec![],
            SenderState::AwaitingGate => {
                let events = self.gate.observe(channel, connected);
                self.apply_gate(events)
            },
            SenderState::Active if connected && self.parked && self.in_flight.is_none() => {
                self.attempt_now()
            },
            SenderState::Active => vec![],
        };
        Ok(actions)
    }

    /// Attach `reason` to heartbeats and send one right away
    ///
    /// Returns the announcement id; exactly one
    /// [`SenderAction::OfflineReasonResolved`] will eventually carry it,
    /// unless the engine is shut down first. A pending earlier announcement
    /// resolves `false` before anything else happens.
    ///
    /// An attempt already in flight is not duplicated: the reason rides on
    /// the next attempt, which goes out as soon as the current one resolves.
    pub fn set_host_offline_reason(
        &mut self,
        reason: impl Into<String>,
        timeout: Duration,
    ) -> (AnnouncementId, Vec<SenderAction>) {
        if self.state == SenderState::PermanentlyStopped {
            let id = self.offline.issue_id();
            tracing::debug!(
                host_id = %self.identity.host_id(),
                "sender stopped, offline reason cannot be delivered"
            );
            return (id, vec![SenderAction::OfflineReasonResolved { id, acknowledged: false }]);
        }

        let reason = reason.into();
        tracing::info!(
            host_id = %self.identity.host_id(),
            reason = %reason,
            ?timeout,
            "host offline reason set"
        );

        let (id, events) = self.offline.announce(reason, timeout);
        let mut actions = self.apply_offline(events);
        if self.state == SenderState::Active {
            actions.extend(self.trigger_attempt());
        }
        (id, actions)
    }

    /// A timer armed by a previous `SetTimer` expired
    ///
    /// Stale expiries (cancelled or re-armed since) are ignored.
    pub fn on_timer(&mut self, timer: TimerId) -> Vec<SenderAction> {
        if !self.timers.fire(timer) {
            tracing::trace!(?timer, "ignoring stale timer");
            return vec![];
        }

        match timer.kind {
            TimerKind::Heartbeat if self.state == SenderState::Active => self.trigger_attempt(),
            TimerKind::Heartbeat => vec![],
            TimerKind::GateTimeout => {
                let events = self.gate.on_timeout();
                self.apply_gate(events)
            },
            TimerKind::OfflineAck => {
                tracing::warn!(
                    host_id = %self.identity.host_id(),
                    kind = %FailureKind::OfflineAckTimeout,
                    "offline reason not acknowledged in time"
                );
                let events = self.offline.on_timeout();
                self.apply_offline(events)
            },
        }
    }

    /// The in-flight request resolved
    ///
    /// `env` supplies jitter for any backoff delay.
    pub fn on_rpc_result(
        &mut self,
        result: Result<HeartbeatResponse, TransportError>,
        env: &impl Environment,
    ) -> Vec<SenderAction> {
        let Some(attempt) = self.in_flight.take() else {
            tracing::warn!(
                host_id = %self.identity.host_id(),
                "rpc result with no attempt in flight"
            );
            return vec![];
        };
        if self.state != SenderState::Active {
            return vec![];
        }

        match result {
            Ok(response) => match response.status {
                ResponseStatus::Accepted => self.on_accepted(attempt, &response),
                ResponseStatus::SequenceMismatch => match response.expected_sequence_id {
                    Some(expected) => self.on_sequence_mismatch(attempt, expected, env),
                    None => self.on_transport_failure(
                        &TransportError::Malformed(
                            "sequence mismatch without expected sequence id".to_string(),
                        ),
                        env,
                    ),
                },
                ResponseStatus::UnknownHostId => self.on_unknown_host(),
                ResponseStatus::Unauthenticated => self.on_auth_failure(env),
            },
            Err(err) => self.on_transport_failure(&err, env),
        }
    }

    /// Tear the sender down
    ///
    /// Cancels every timer and forgets any in-flight attempt. No owner
    /// notification is emitted, including for a pending offline reason.
    pub fn shutdown(&mut self) -> Vec<SenderAction> {
        self.state = SenderState::PermanentlyStopped;
        self.in_flight = None;
        self.send_again = false;
        self.parked = false;

        if let Some(id) = self.offline.abandon() {
            tracing::debug!(
                host_id = %self.identity.host_id(),
                ?id,
                "abandoning offline reason acknowledgement"
            );
        }

        self.cancel_all_timers()
    }

    fn on_accepted(
        &mut self,
        attempt: InFlight,
        response: &HeartbeatResponse,
    ) -> Vec<SenderAction> {
        self.sequence_corrections = 0;
        self.auth_failures = 0;
        self.unknown_host_failures = 0;
        self.backoff.record_success();
        self.sequence_id = attempt.sequence_id.saturating_add(1);

        let mut actions = Vec::new();

        if !self.heartbeat_succeeded {
            self.heartbeat_succeeded = true;
            tracing::info!(host_id = %self.identity.host_id(), "first heartbeat accepted");
            actions.push(SenderAction::HeartbeatSucceeded);
        }

        if let Some(id) = attempt.announcement {
            let events = self.offline.on_ack(id);
            if !events.is_empty() {
                tracing::info!(
                    host_id = %self.identity.host_id(),
                    ?id,
                    "offline reason acknowledged"
                );
            }
            actions.extend(self.apply_offline(events));
        }

        let interval = response
            .interval_secs
            .filter(|secs| *secs > 0)
            .map_or(self.config.heartbeat_interval, |secs| {
                Duration::from_secs(secs).min(MAX_DELAY)
            });

        tracing::debug!(
            host_id = %self.identity.host_id(),
            sequence_id = attempt.sequence_id,
            next_in_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "heartbeat accepted"
        );

        actions.extend(self.schedule_next(interval));
        actions
    }

    fn on_sequence_mismatch(
        &mut self,
        attempt: InFlight,
        expected: u64,
        env: &impl Environment,
    ) -> Vec<SenderAction> {
        self.sequence_id = expected;
        self.sequence_corrections += 1;

        if self.sequence_corrections <= self.config.max_sequence_corrections {
            tracing::debug!(
                host_id = %self.identity.host_id(),
                sent = attempt.sequence_id,
                expected,
                "directory corrected sequence id, resending"
            );
            // The immediate resend also serves any trigger that was waiting.
            self.send_again = false;
            return self.attempt_now();
        }

        tracing::warn!(
            host_id = %self.identity.host_id(),
            kind = %FailureKind::SequenceMismatch,
            sent = attempt.sequence_id,
            expected,
            "sequence id rejected again, backing off"
        );
        self.sequence_corrections = 0;
        self.back_off(env)
    }

    fn on_unknown_host(&mut self) -> Vec<SenderAction> {
        self.sequence_corrections = 0;
        self.unknown_host_failures += 1;

        if self.unknown_host_failures <= self.config.unknown_host.max_retries {
            tracing::warn!(
                host_id = %self.identity.host_id(),
                retry = self.unknown_host_failures,
                "directory does not know host id yet, retrying"
            );
            return self.schedule_next(self.config.unknown_host.retry_delay);
        }

        tracing::error!(
            host_id = %self.identity.host_id(),
            kind = %FailureKind::UnknownHost,
            "host id unknown to directory, stopping heartbeats"
        );
        let mut actions = self.stop_permanently();
        actions.push(SenderAction::UnknownHostId);
        actions
    }

    fn on_auth_failure(&mut self, env: &impl Environment) -> Vec<SenderAction> {
        self.sequence_corrections = 0;
        self.auth_failures += 1;

        if self.auth_failures <= self.config.max_auth_retries {
            tracing::warn!(
                host_id = %self.identity.host_id(),
                kind = %FailureKind::AuthFailure,
                retry = self.auth_failures,
                "heartbeat unauthenticated, refreshing credentials"
            );
            let mut actions = vec![SenderAction::RefreshCredentials];
            actions.extend(self.back_off(env));
            return actions;
        }

        tracing::error!(
            host_id = %self.identity.host_id(),
            kind = %FailureKind::AuthFailure,
            failures = self.auth_failures,
            "heartbeat authentication keeps failing, stopping heartbeats"
        );
        let mut actions = self.stop_permanently();
        actions.push(SenderAction::AuthError);
        actions
    }

    fn on_transport_failure(
        &mut self,
        err: &TransportError,
        env: &impl Environment,
    ) -> Vec<SenderAction> {
        self.sequence_corrections = 0;
        tracing::warn!(
            host_id = %self.identity.host_id(),
            kind = %FailureKind::TransientTransport,
            error = %err,
            "heartbeat failed"
        );
        self.back_off(env)
    }

    fn back_off(&mut self, env: &impl Environment) -> Vec<SenderAction> {
        self.backoff.record_failure();
        let delay = self.backoff.next_delay(env);

        tracing::debug!(
            host_id = %self.identity.host_id(),
            attempt = self.backoff.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying after backoff"
        );
        self.schedule_next(delay)
    }

    /// Next attempt after `delay`, unless a trigger is already waiting
    fn schedule_next(&mut self, delay: Duration) -> Vec<SenderAction> {
        if std::mem::take(&mut self.send_again) {
            return self.attempt_now();
        }
        vec![self.arm(TimerKind::Heartbeat, delay)]
    }

    /// Send as soon as possible, coalescing with an in-flight attempt
    fn trigger_attempt(&mut self) -> Vec<SenderAction> {
        if self.in_flight.is_some() {
            self.send_again = true;
            return vec![];
        }

        let mut actions: Vec<SenderAction> =
            self.cancel(TimerKind::Heartbeat).into_iter().collect();
        actions.extend(self.attempt_now());
        actions
    }

    fn attempt_now(&mut self) -> Vec<SenderAction> {
        debug_assert!(self.in_flight.is_none(), "one attempt in flight at a time");

        let Some(full_id) = self.signaling_id().map(str::to_owned) else {
            tracing::debug!(
                host_id = %self.identity.host_id(),
                "no signaling channel connected, parking heartbeat"
            );
            self.parked = true;
            return vec![];
        };
        self.parked = false;

        let sequence_id = self.sequence_id;
        let (announcement, host_offline_reason) = match self.offline.current() {
            Some((id, reason)) => (Some(id), Some(reason.to_owned())),
            None => (None, None),
        };

        let request = HeartbeatRequest {
            host_id: self.identity.host_id().to_owned(),
            sequence_id,
            signature: self.identity.signer().sign(&full_id, sequence_id),
            signaling_full_id: full_id,
            host_offline_reason,
        };

        tracing::debug!(
            host_id = %request.host_id,
            sequence_id,
            offline_reason = ?request.host_offline_reason,
            "sending heartbeat"
        );

        self.in_flight = Some(InFlight { sequence_id, announcement });
        vec![SenderAction::SendHeartbeat(request)]
    }

    fn activate(&mut self) -> Vec<SenderAction> {
        if self.state != SenderState::AwaitingGate {
            return vec![];
        }
        self.state = SenderState::Active;
        tracing::info!(host_id = %self.identity.host_id(), "startup gate open, heartbeating");
        self.trigger_attempt()
    }

    fn stop_permanently(&mut self) -> Vec<SenderAction> {
        self.state = SenderState::PermanentlyStopped;
        self.in_flight = None;
        self.send_again = false;
        self.parked = false;

        let events = self.offline.fail_pending();
        let mut actions = self.apply_offline(events);
        actions.extend(self.cancel_all_timers());
        actions
    }

    fn apply_gate(&mut self, events: Vec<GateEvent>) -> Vec<SenderAction> {
        let mut actions = Vec::new();
        for event in events {
            match event {
                GateEvent::ArmTimer(after) => actions.push(self.arm(TimerKind::GateTimeout, after)),
                GateEvent::CancelTimer => actions.extend(self.cancel(TimerKind::GateTimeout)),
                GateEvent::Ready => actions.extend(self.activate()),
            }
        }
        actions
    }

    fn apply_offline(&mut self, events: Vec<OfflineEvent>) -> Vec<SenderAction> {
        let mut actions = Vec::new();
        for event in events {
            match event {
                OfflineEvent::ArmDeadline(after) => {
                    actions.push(self.arm(TimerKind::OfflineAck, after));
                },
                OfflineEvent::CancelDeadline => actions.extend(self.cancel(TimerKind::OfflineAck)),
                OfflineEvent::Resolved { id, acknowledged } => {
                    actions.push(SenderAction::OfflineReasonResolved { id, acknowledged });
                },
            }
        }
        actions
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) -> SenderAction {
        SenderAction::SetTimer { timer: self.timers.arm(kind), after }
    }

    fn cancel(&mut self, kind: TimerKind) -> Option<SenderAction> {
        self.timers.cancel(kind).then_some(SenderAction::CancelTimer(kind))
    }

    fn cancel_all_timers(&mut self) -> Vec<SenderAction> {
        TimerKind::ALL.into_iter().filter_map(|kind| self.cancel(kind)).collect()
    }
}
