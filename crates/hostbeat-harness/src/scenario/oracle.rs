//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive the finished world and check invariants over its log.

use std::time::Duration;

use hostbeat_core::SenderState;

use crate::scenario::{Event, World};

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// The engine started heartbeating exactly at `at`
pub fn activated_at(at: Duration) -> OracleFn {
    Box::new(move |world| match world.entered_at(SenderState::Active) {
        Some(actual) if actual == at => Ok(()),
        Some(actual) => Err(format!("activated at {actual:?}, expected {at:?}")),
        None => Err("never activated".to_string()),
    })
}

/// The first-success notification fired exactly once
pub fn succeeded_once() -> OracleFn {
    Box::new(|world| match world.count(|e| *e == Event::HeartbeatSucceeded) {
        1 => Ok(()),
        n => Err(format!("success notified {n} times")),
    })
}

/// Never more than one heartbeat awaiting its verdict
pub fn single_flight() -> OracleFn {
    Box::new(|world| {
        let mut outstanding = 0usize;
        for observation in world.observations() {
            match observation.event {
                Event::Sent(_) => outstanding += 1,
                Event::Verdict(_) => outstanding = outstanding.saturating_sub(1),
                _ => {},
            }
            if outstanding > 1 {
                return Err(format!("overlapping heartbeats at {:?}", observation.at));
            }
        }
        Ok(())
    })
}

/// Every announcement resolved exactly once
pub fn every_announcement_resolved_once() -> OracleFn {
    Box::new(|world| {
        for observation in world.observations() {
            let Event::Announced { id, .. } = observation.event else { continue };
            let resolutions = world.resolutions().iter().filter(|(_, r, _)| *r == id).count();
            if resolutions != 1 {
                return Err(format!("{id:?} resolved {resolutions} times"));
            }
        }
        Ok(())
    })
}

/// Nothing was sent after the engine stopped for good
pub fn silent_after_stop() -> OracleFn {
    Box::new(|world| {
        let Some(stopped) = world.entered_at(SenderState::PermanentlyStopped) else {
            return Err("sender never stopped".to_string());
        };
        match world.sent().iter().find(|(at, _)| *at > stopped) {
            Some((at, _)) => Err(format!("heartbeat sent at {at:?} after stop at {stopped:?}")),
            None => Ok(()),
        }
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
