//! Scenario builder API.
//!
//! Provides a declarative API for timed heartbeat scenarios that enforce the
//! Oracle Pattern. Execution is a discrete-event loop over virtual time: the
//! next pending step, timer expiry, or RPC completion is always processed
//! next, so a run takes microseconds regardless of the simulated span.

use std::{collections::HashMap, time::Duration};

use hostbeat_core::{
    ChannelEvent, HeartbeatEngine, HeartbeatIdentity, SenderAction, SenderConfig,
    rpc::TransportError,
    timer::{TimerId, TimerKind},
};
use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse};

use crate::{
    DirectoryModel, SimEnv,
    scenario::{Event, OracleFn, World},
};

/// Host id used by every scenario
pub const HOST_ID: &str = "sim-host";

type Reply = Result<HeartbeatResponse, TransportError>;

/// External input applied at a scheduled time
#[derive(Debug, Clone)]
enum Step {
    Connect { channel: usize, full_id: String },
    Disconnect { channel: usize },
    AnnounceOffline { reason: String, timeout: Duration },
}

/// Scenario builder.
///
/// Configure the sender, schedule channel changes and offline
/// announcements, shape the directory, then add the mandatory oracle.
pub struct Scenario {
    config: SenderConfig,
    seed: u64,
    steps: Vec<(Duration, Step)>,
    rpc_latency: Duration,
    run_for: Duration,
    registered: bool,
    expected_sequence: Option<u64>,
    interval_secs: Option<u64>,
    scripted: Vec<Reply>,
}

impl Scenario {
    /// Default config, seed 0, registered host, 100 ms RPC latency, run for
    /// ten minutes
    pub fn new() -> Self {
        Self {
            config: SenderConfig::default(),
            seed: 0,
            steps: Vec::new(),
            rpc_latency: Duration::from_millis(100),
            run_for: Duration::from_secs(600),
            registered: true,
            expected_sequence: None,
            interval_secs: None,
            scripted: Vec::new(),
        }
    }

    /// Sender configuration
    pub fn with_config(mut self, config: SenderConfig) -> Self {
        self.config = config;
        self
    }

    /// RNG seed for jitter and the host key
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Round trip of every RPC
    pub fn with_rpc_latency(mut self, latency: Duration) -> Self {
        self.rpc_latency = latency;
        self
    }

    /// Virtual time at which the scenario stops
    pub fn run_for(mut self, duration: Duration) -> Self {
        self.run_for = duration;
        self
    }

    /// Channel `channel` connects at `at`
    pub fn connect_at(mut self, at: Duration, channel: usize) -> Self {
        let full_id = format!("{HOST_ID}@example.com/chromoting_ftl_{channel}");
        self.steps.push((at, Step::Connect { channel, full_id }));
        self
    }

    /// Channel `channel` disconnects at `at`
    pub fn disconnect_at(mut self, at: Duration, channel: usize) -> Self {
        self.steps.push((at, Step::Disconnect { channel }));
        self
    }

    /// `set_host_offline_reason(reason, timeout)` at `at`
    pub fn announce_offline_at(
        mut self,
        at: Duration,
        reason: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.steps.push((at, Step::AnnounceOffline { reason: reason.into(), timeout }));
        self
    }

    /// The directory has never heard of the host
    pub fn unregistered_host(mut self) -> Self {
        self.registered = false;
        self
    }

    /// The directory already expects `sequence_id`
    pub fn directory_expects(mut self, sequence_id: u64) -> Self {
        self.expected_sequence = Some(sequence_id);
        self
    }

    /// The directory asks for this interval on every accept
    pub fn directory_interval(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    /// Answer the first calls with these outcomes before consulting the
    /// directory
    pub fn with_scripted_replies(mut self, replies: Vec<Reply>) -> Self {
        self.scripted = replies;
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

enum Pending {
    Step(Step),
    Timer(TimerId),
    RpcDone(Reply),
}

/// Event queue ordered by (time, insertion order)
struct Queue {
    entries: Vec<(Duration, u64, Pending)>,
    next_order: u64,
}

impl Queue {
    fn push(&mut self, at: Duration, pending: Pending) {
        self.entries.push((at, self.next_order, pending));
        self.next_order += 1;
    }

    fn pop_until(&mut self, horizon: Duration) -> Option<(Duration, Pending)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (at, _, _))| *at <= horizon)
            .min_by_key(|(_, (at, order, _))| (*at, *order))
            .map(|(index, _)| index)?;
        let (at, _, pending) = self.entries.swap_remove(index);
        Some((at, pending))
    }
}

struct Simulation {
    env: SimEnv,
    queue: Queue,
    latency: Duration,
    scripted: std::vec::IntoIter<Reply>,
    live_timers: HashMap<TimerKind, TimerId>,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// 1. Derive the host key from the seed and register it (unless told
    ///    otherwise)
    /// 2. Start the engine at t = 0
    /// 3. Process steps, timers, and RPC completions in time order until the
    ///    horizon
    /// 4. Run the oracle
    pub fn run(self) -> Result<(), String> {
        let Scenario {
            config,
            seed,
            steps,
            rpc_latency,
            run_for,
            registered,
            expected_sequence,
            interval_secs,
            scripted,
        } = self.scenario;

        let env = SimEnv::with_seed(seed);
        let key = env.signing_key();

        let mut directory = DirectoryModel::new();
        if registered {
            directory.register(HOST_ID, key.verifying_key());
            if let Some(sequence_id) = expected_sequence {
                directory.expect_sequence(HOST_ID, sequence_id);
            }
        }
        directory.set_interval_secs(interval_secs);

        let engine = HeartbeatEngine::new(config, HeartbeatIdentity::new(HOST_ID, key))
            .map_err(|e| format!("engine rejected config: {e}"))?;
        let mut world = World::new(engine, directory);

        let mut sim = Simulation {
            env,
            queue: Queue { entries: Vec::new(), next_order: 0 },
            latency: rpc_latency,
            scripted: scripted.into_iter(),
            live_timers: HashMap::new(),
        };
        for (at, step) in steps {
            sim.queue.push(at, Pending::Step(step));
        }

        let actions = world.engine_mut().start().map_err(|e| format!("start failed: {e}"))?;
        sim.execute(&mut world, actions);

        while let Some((at, pending)) = sim.queue.pop_until(run_for) {
            world.advance_to(at);
            match pending {
                Pending::Step(step) => sim.apply_step(&mut world, step)?,
                Pending::Timer(timer) => sim.deliver_timer(&mut world, timer),
                Pending::RpcDone(reply) => {
                    world.record(Event::Verdict(reply.clone()));
                    let actions = world.engine_mut().on_rpc_result(reply, &sim.env);
                    sim.execute(&mut world, actions);
                },
            }
        }
        world.advance_to(run_for.max(world.now()));

        (self.oracle)(&world)
    }
}

impl Simulation {
    fn apply_step(&mut self, world: &mut World, step: Step) -> Result<(), String> {
        let actions = match step {
            Step::Connect { channel, full_id } => world
                .engine_mut()
                .on_channel_state(channel, ChannelEvent::Connected { full_id })
                .map_err(|e| format!("connect failed: {e}"))?,
            Step::Disconnect { channel } => world
                .engine_mut()
                .on_channel_state(channel, ChannelEvent::Disconnected)
                .map_err(|e| format!("disconnect failed: {e}"))?,
            Step::AnnounceOffline { reason, timeout } => {
                let (id, actions) =
                    world.engine_mut().set_host_offline_reason(reason.clone(), timeout);
                world.record(Event::Announced { id, reason });
                actions
            },
        };
        self.execute(world, actions);
        Ok(())
    }

    fn deliver_timer(&mut self, world: &mut World, timer: TimerId) {
        // Cancelled timers are delivered anyway; the engine must ignore them.
        if self.live_timers.get(&timer.kind) == Some(&timer) {
            self.live_timers.remove(&timer.kind);
            world.record(Event::TimerFired(timer.kind));
        } else {
            world.record(Event::StaleTimer(timer.kind));
        }
        let actions = world.engine_mut().on_timer(timer);
        self.execute(world, actions);
    }

    fn execute(&mut self, world: &mut World, actions: Vec<SenderAction>) {
        let before = world.engine().state();

        for action in actions {
            match action {
                SenderAction::SendHeartbeat(request) => {
                    let reply = self.reply(world, &request);
                    world.record(Event::Sent(request));
                    self.queue.push(world.now() + self.latency, Pending::RpcDone(reply));
                },
                SenderAction::SetTimer { timer, after } => {
                    self.live_timers.insert(timer.kind, timer);
                    world.record(Event::TimerSet { kind: timer.kind, after });
                    self.queue.push(world.now() + after, Pending::Timer(timer));
                },
                SenderAction::CancelTimer(kind) => {
                    self.live_timers.remove(&kind);
                    world.record(Event::TimerCancelled(kind));
                },
                SenderAction::RefreshCredentials => world.record(Event::CredentialsRefreshed),
                SenderAction::OfflineReasonResolved { id, acknowledged } => {
                    world.record(Event::OfflineResolved { id, acknowledged });
                },
                SenderAction::HeartbeatSucceeded => world.record(Event::HeartbeatSucceeded),
                SenderAction::UnknownHostId => world.record(Event::UnknownHostId),
                SenderAction::AuthError => world.record(Event::AuthError),
            }
        }

        let after = world.engine().state();
        if after != before {
            world.record(Event::StateChanged(after));
        }
    }

    fn reply(&mut self, world: &mut World, request: &HeartbeatRequest) -> Reply {
        match self.scripted.next() {
            Some(reply) => reply,
            None => Ok(world.directory_mut().handle(request)),
        }
    }
}
