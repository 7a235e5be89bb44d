//! Scenario tests for the startup gate.
//!
//! The sender must not heartbeat until signaling is up: all channels, or any
//! channel once the gate timeout has passed.

use std::time::Duration;

use hostbeat_core::{SenderConfig, SenderState, timer::TimerKind};
use hostbeat_harness::scenario::{Event, Scenario, oracle};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn both_channels_open_gate_before_timeout() {
    // A at 0s, B at 2s, timeout 5s: ready at B's connection.
    let result = Scenario::new()
        .connect_at(secs(0), 0)
        .connect_at(secs(2), 1)
        .run_for(secs(10))
        .oracle(oracle::all_of(vec![
            oracle::activated_at(secs(2)),
            Box::new(|world| {
                let sent = world.sent();
                assert_eq!(sent[0].0, secs(2), "first heartbeat at B's connection");
                assert_eq!(sent[0].1.signaling_full_id, "sim-host@example.com/chromoting_ftl_0");

                // The gate timer was cancelled; its late expiry was ignored.
                assert_eq!(world.count(|e| *e == Event::TimerFired(TimerKind::GateTimeout)), 0);
                assert_eq!(world.count(|e| *e == Event::StaleTimer(TimerKind::GateTimeout)), 1);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn single_channel_opens_gate_at_timeout() {
    let result = Scenario::new()
        .connect_at(secs(0), 0)
        .run_for(secs(10))
        .oracle(oracle::all_of(vec![
            oracle::activated_at(secs(5)),
            Box::new(|world| {
                assert_eq!(world.sent().len(), 1);
                assert_eq!(world.sent()[0].0, secs(5));
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn drop_before_ready_rearms_gate() {
    // A connects, drops at 3s, reconnects at 4s: the timeout restarts at 4s.
    let result = Scenario::new()
        .connect_at(secs(0), 0)
        .disconnect_at(secs(3), 0)
        .connect_at(secs(4), 0)
        .run_for(secs(20))
        .oracle(oracle::activated_at(secs(9)))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn no_channel_means_no_heartbeat() {
    let result = Scenario::new()
        .run_for(secs(60))
        .oracle(Box::new(|world| {
            assert_eq!(world.engine().state(), SenderState::AwaitingGate);
            assert!(world.sent().is_empty());
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn single_channel_config_opens_immediately() {
    let mut config = SenderConfig::default();
    config.gate.channels = 1;

    let result = Scenario::new()
        .with_config(config)
        .connect_at(secs(1), 0)
        .oracle(oracle::all_of(vec![oracle::activated_at(secs(1)), oracle::succeeded_once()]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}
