//! Single-task driver for one heartbeat sender.
//!
//! # Architecture
//!
//! ```text
//!   HeartbeatSender (handle)
//!        │ Command (mpsc)
//!        ↓
//!   ┌───────────────────────────────────────────┐
//!   │ driver task                               │
//!   │   select! {                               │
//!   │     command    → engine.on_channel_state  │
//!   │                  engine.set_offline_...   │
//!   │     rpc result → engine.on_rpc_result     │
//!   │     deadline   → engine.on_timer          │
//!   │   }                                       │
//!   │   execute(actions)                        │
//!   └───────────────────────────────────────────┘
//!        │ spawn per SendHeartbeat
//!        ↓
//!   token fetch + HeartbeatRpc::send ──(mpsc)──> rpc result
//! ```
//!
//! The engine is only ever touched from the driver task, so every
//! transition is serialised. The RPC is the only suspension point and runs
//! on its own task; its result re-enters through the same `select!`.
//!
//! # Shutdown
//!
//! [`HeartbeatSender::shutdown`] or dropping the handle aborts any in-flight
//! RPC, drops every timer, and drops pending acknowledgement senders so their
//! receivers observe a closed channel. No callback runs once the driver has
//! processed the shutdown.

use std::{collections::HashMap, sync::Arc, time::Duration};

use hostbeat_core::{
    ChannelEvent, HeartbeatEngine, HeartbeatIdentity, SenderAction, SenderConfig, SenderError,
    env::Environment,
    offline::AnnouncementId,
    rpc::{AccessTokenSource, HeartbeatRpc, TransportError},
    timer::{TimerId, TimerKind},
};
use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse};
use tokio::{
    sync::{mpsc, oneshot},
    task::{AbortHandle, JoinHandle},
    time::Instant,
};

/// Deadline for a single heartbeat RPC, token fetch included
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Owner notifications
///
/// Each runs at most once, on the driver task. Keep them short.
#[derive(Default)]
pub struct SenderCallbacks {
    /// First heartbeat accepted
    pub on_heartbeat_successful: Option<Callback>,
    /// Directory permanently does not know this host
    pub on_unknown_host_id_error: Option<Callback>,
    /// Directory permanently rejects our credentials
    pub on_auth_error: Option<Callback>,
}

impl SenderCallbacks {
    /// Set the first-success callback
    #[must_use]
    pub fn on_heartbeat_successful(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_heartbeat_successful = Some(Box::new(f));
        self
    }

    /// Set the unknown-host callback
    #[must_use]
    pub fn on_unknown_host_id_error(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_unknown_host_id_error = Some(Box::new(f));
        self
    }

    /// Set the authentication-failure callback
    #[must_use]
    pub fn on_auth_error(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_auth_error = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for SenderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderCallbacks")
            .field("on_heartbeat_successful", &self.on_heartbeat_successful.is_some())
            .field("on_unknown_host_id_error", &self.on_unknown_host_id_error.is_some())
            .field("on_auth_error", &self.on_auth_error.is_some())
            .finish()
    }
}

enum Command {
    ChannelState { channel: usize, event: ChannelEvent },
    OfflineReason { reason: String, timeout: Duration, ack: oneshot::Sender<bool> },
    Shutdown,
}

/// Handle to a running heartbeat sender
///
/// Dropping the handle shuts the sender down.
#[derive(Debug)]
pub struct HeartbeatSender {
    commands: mpsc::UnboundedSender<Command>,
    channels: usize,
    task: JoinHandle<()>,
}

impl HeartbeatSender {
    /// Start heartbeating for `identity`
    ///
    /// Must be called inside a Tokio runtime. The engine starts immediately
    /// and waits for signaling channels via
    /// [`channel_state_changed`](Self::channel_state_changed).
    ///
    /// # Errors
    ///
    /// Returns [`SenderError::Config`] if `config` is invalid.
    pub fn spawn<E: Environment>(
        config: SenderConfig,
        identity: HeartbeatIdentity,
        rpc: Arc<dyn HeartbeatRpc>,
        tokens: Arc<dyn AccessTokenSource>,
        callbacks: SenderCallbacks,
        env: E,
    ) -> Result<Self, SenderError> {
        let channels = config.gate.channels;
        let mut engine = HeartbeatEngine::new(config, identity)?;
        let initial = engine.start()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (rpc_results, rpc_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            engine,
            env,
            rpc,
            tokens,
            callbacks,
            commands: command_rx,
            rpc_results,
            rpc_rx,
            rpc_task: None,
            timers: HashMap::new(),
            pending_acks: HashMap::new(),
        };
        let task = tokio::spawn(driver.run(initial));

        Ok(Self { commands, channels, task })
    }

    /// Report a signaling channel state change
    ///
    /// # Errors
    ///
    /// Returns [`SenderError::InvalidChannel`] for an unmonitored index.
    pub fn channel_state_changed(
        &self,
        channel: usize,
        event: ChannelEvent,
    ) -> Result<(), SenderError> {
        if channel >= self.channels {
            return Err(SenderError::InvalidChannel { channel, channels: self.channels });
        }
        self.submit(Command::ChannelState { channel, event });
        Ok(())
    }

    /// Announce that the host is going offline for `reason`
    ///
    /// The receiver yields `true` once a heartbeat carrying the reason is
    /// accepted, `false` on timeout, on a newer announcement, or if the
    /// sender has stopped. It is closed without a value if the sender is
    /// shut down first.
    pub fn set_host_offline_reason(
        &self,
        reason: impl Into<String>,
        timeout: Duration,
    ) -> oneshot::Receiver<bool> {
        let (ack, rx) = oneshot::channel();
        self.submit(Command::OfflineReason { reason: reason.into(), timeout, ack });
        rx
    }

    /// Stop the sender and wait for its task to finish
    ///
    /// No callback runs after this returns.
    pub async fn shutdown(self) {
        self.submit(Command::Shutdown);
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "heartbeat driver task ended abnormally");
        }
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("heartbeat driver already gone, dropping command");
        }
    }
}

struct Driver<E: Environment> {
    engine: HeartbeatEngine,
    env: E,
    rpc: Arc<dyn HeartbeatRpc>,
    tokens: Arc<dyn AccessTokenSource>,
    callbacks: SenderCallbacks,
    commands: mpsc::UnboundedReceiver<Command>,
    rpc_results: mpsc::UnboundedSender<Result<HeartbeatResponse, TransportError>>,
    rpc_rx: mpsc::UnboundedReceiver<Result<HeartbeatResponse, TransportError>>,
    rpc_task: Option<AbortHandle>,
    timers: HashMap<TimerKind, (Instant, TimerId)>,
    pending_acks: HashMap<AnnouncementId, oneshot::Sender<bool>>,
}

impl<E: Environment> Driver<E> {
    async fn run(mut self, initial: Vec<SenderAction>) {
        self.execute(initial);

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::ChannelState { channel, event }) => {
                        match self.engine.on_channel_state(channel, event) {
                            Ok(actions) => self.execute(actions),
                            Err(err) => tracing::warn!(error = %err, "rejected channel state"),
                        }
                    },
                    Some(Command::OfflineReason { reason, timeout, ack }) => {
                        let (id, actions) = self.engine.set_host_offline_reason(reason, timeout);
                        self.pending_acks.insert(id, ack);
                        self.execute(actions);
                    },
                    Some(Command::Shutdown) | None => {
                        self.shutdown();
                        return;
                    },
                },
                Some(result) = self.rpc_rx.recv() => {
                    self.rpc_task = None;
                    let actions = self.engine.on_rpc_result(result, &self.env);
                    self.execute(actions);
                },
                () = sleep_until(deadline) => self.fire_due_timers(),
            }
        }
    }

    fn execute(&mut self, actions: Vec<SenderAction>) {
        for action in actions {
            match action {
                SenderAction::SendHeartbeat(request) => self.dispatch(request),
                SenderAction::SetTimer { timer, after } => {
                    self.timers.insert(timer.kind, (deadline_after(after), timer));
                },
                SenderAction::CancelTimer(kind) => {
                    self.timers.remove(&kind);
                },
                SenderAction::RefreshCredentials => self.tokens.invalidate(),
                SenderAction::OfflineReasonResolved { id, acknowledged } => {
                    if let Some(ack) = self.pending_acks.remove(&id) {
                        // The announcer may have stopped listening.
                        let _ = ack.send(acknowledged);
                    }
                },
                SenderAction::HeartbeatSucceeded => {
                    invoke(self.callbacks.on_heartbeat_successful.take());
                },
                SenderAction::UnknownHostId => {
                    invoke(self.callbacks.on_unknown_host_id_error.take());
                },
                SenderAction::AuthError => invoke(self.callbacks.on_auth_error.take()),
            }
        }
    }

    fn dispatch(&mut self, request: HeartbeatRequest) {
        let rpc = Arc::clone(&self.rpc);
        let tokens = Arc::clone(&self.tokens);
        let results = self.rpc_results.clone();

        let task = tokio::spawn(async move {
            let call = async {
                match tokens.access_token().await {
                    Ok(token) => rpc.send(request, &token).await,
                    Err(err) => Err(err),
                }
            };
            let result = match tokio::time::timeout(RPC_TIMEOUT, call).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(RPC_TIMEOUT)),
            };
            // The driver may have shut down meanwhile.
            let _ = results.send(result);
        });

        self.rpc_task = Some(task.abort_handle());
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|(at, _)| *at).min()
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(Instant, TimerId)> =
            self.timers.values().copied().filter(|(at, _)| *at <= now).collect();
        due.sort_by_key(|(at, timer)| (*at, timer.generation));

        for (_, timer) in due {
            // An earlier expiry in this batch may have re-armed or cancelled it.
            if self.timers.get(&timer.kind).is_some_and(|(_, live)| *live == timer) {
                self.timers.remove(&timer.kind);
                let actions = self.engine.on_timer(timer);
                self.execute(actions);
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.rpc_task.take() {
            task.abort();
        }
        // Cancellations only; the engine emits no notifications here.
        let _ = self.engine.shutdown();
        self.timers.clear();
        self.pending_acks.clear();
        self.callbacks = SenderCallbacks::default();

        tracing::info!(host_id = %self.engine.host_id(), "heartbeat sender shut down");
    }
}

/// Deadline `after` from now, saturating at about thirty years out
fn deadline_after(after: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

    let now = Instant::now();
    now.checked_add(after.min(FAR_FUTURE)).unwrap_or(now + Duration::from_secs(86_400))
}

fn invoke(callback: Option<Callback>) {
    if let Some(callback) = callback {
        callback();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn callbacks_debug_shows_presence_only() {
        let callbacks = SenderCallbacks::default().on_auth_error(|| {});
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("on_auth_error: true"));
        assert!(debug.contains("on_heartbeat_successful: false"));
    }

    #[test]
    fn invoke_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut callbacks = SenderCallbacks::default().on_heartbeat_successful(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        invoke(callbacks.on_heartbeat_successful.take());
        invoke(callbacks.on_heartbeat_successful.take());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_saturates_instead_of_overflowing() {
        let now = Instant::now();
        let far = deadline_after(Duration::MAX);
        assert!(far > now + Duration::from_secs(86_400 * 365));
        assert_eq!(deadline_after(Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_until_none_never_wakes() {
        let slept = tokio::time::timeout(Duration::from_secs(3600), sleep_until(None)).await;
        assert!(slept.is_err());
    }
}
