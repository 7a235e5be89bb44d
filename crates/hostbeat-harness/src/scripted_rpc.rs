//! Canned RPC collaborators for driver tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use hostbeat_core::rpc::{AccessTokenSource, HeartbeatRpc, TransportError};
use hostbeat_proto::{HeartbeatRequest, HeartbeatResponse};

type Reply = Result<HeartbeatResponse, TransportError>;

/// Directory stand-in that answers from a script
///
/// Each call pops the next scripted reply, sleeping for its delay first.
/// Once the script runs out every call gets the fallback (accepted, with no
/// delay, unless changed). Every request is recorded with the token it
/// carried.
#[derive(Debug)]
pub struct ScriptedRpc {
    state: Mutex<Script>,
}

#[derive(Debug)]
struct Script {
    replies: VecDeque<(Duration, Reply)>,
    fallback: Reply,
    calls: Vec<(HeartbeatRequest, String)>,
}

impl ScriptedRpc {
    /// Script that accepts everything
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Script {
                replies: VecDeque::new(),
                fallback: Ok(HeartbeatResponse::accepted()),
                calls: Vec::new(),
            }),
        }
    }

    /// Queue an immediate reply
    pub fn push(&self, reply: Reply) -> &Self {
        self.push_delayed(Duration::ZERO, reply)
    }

    /// Queue a reply that arrives after `delay`
    pub fn push_delayed(&self, delay: Duration, reply: Reply) -> &Self {
        self.script().replies.push_back((delay, reply));
        self
    }

    /// Reply used once the queue is empty
    pub fn set_fallback(&self, reply: Reply) {
        self.script().fallback = reply;
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<HeartbeatRequest> {
        self.script().calls.iter().map(|(request, _)| request.clone()).collect()
    }

    /// Token carried by each request so far
    pub fn tokens(&self) -> Vec<String> {
        self.script().calls.iter().map(|(_, token)| token.clone()).collect()
    }

    /// Number of calls so far
    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ScriptedRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HeartbeatRpc for ScriptedRpc {
    async fn send(&self, request: HeartbeatRequest, access_token: &str) -> Reply {
        let (delay, reply) = {
            let mut script = self.script();
            script.calls.push((request, access_token.to_string()));
            match script.replies.pop_front() {
                Some(next) => next,
                None => (Duration::ZERO, script.fallback.clone()),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }
}

/// Token source that mints a new token after each invalidation
#[derive(Debug, Default)]
pub struct CountingTokens {
    generation: AtomicU64,
}

impl CountingTokens {
    /// Start at `token-0`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `invalidate` calls so far
    pub fn invalidations(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessTokenSource for CountingTokens {
    async fn access_token(&self) -> Result<String, TransportError> {
        Ok(format!("token-{}", self.generation.load(Ordering::SeqCst)))
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
