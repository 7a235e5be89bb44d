//! Scenario tests for directory rejections and transport failures.

use std::time::Duration;

use hostbeat_core::{SenderConfig, SenderState, rpc::TransportError};
use hostbeat_harness::scenario::{Event, HOST_ID, Scenario, oracle};
use hostbeat_proto::HeartbeatResponse;

const LATENCY: Duration = Duration::from_millis(100);

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// One channel, no jitter
fn config() -> SenderConfig {
    let mut config = SenderConfig::default();
    config.gate.channels = 1;
    config.backoff.jitter_factor = 0.0;
    config
}

fn unavailable() -> Result<HeartbeatResponse, TransportError> {
    Err(TransportError::Unavailable("connection refused".to_string()))
}

#[test]
fn unknown_host_stops_for_good() {
    let result = Scenario::new()
        .with_config(config())
        .unregistered_host()
        .connect_at(secs(0), 0)
        .oracle(oracle::all_of(vec![
            oracle::silent_after_stop(),
            Box::new(|world| {
                assert_eq!(world.sent().len(), 1);
                assert_eq!(world.count(|e| *e == Event::UnknownHostId), 1);
                assert_eq!(world.count(|e| *e == Event::HeartbeatSucceeded), 0);
                assert_eq!(world.entered_at(SenderState::PermanentlyStopped), Some(LATENCY));
                assert!(!world.engine().is_in_flight());
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn unknown_host_grace_retries_are_spaced() {
    let mut config = config();
    config.unknown_host.max_retries = 2;
    config.unknown_host.retry_delay = secs(10);

    let result = Scenario::new()
        .with_config(config)
        .unregistered_host()
        .connect_at(secs(0), 0)
        .oracle(oracle::all_of(vec![
            oracle::silent_after_stop(),
            Box::new(|world| {
                let times: Vec<Duration> = world.sent().iter().map(|(at, _)| *at).collect();
                assert_eq!(times, vec![secs(0), secs(10) + LATENCY, secs(20) + LATENCY * 2]);
                assert_eq!(world.count(|e| *e == Event::UnknownHostId), 1);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn auth_failure_refreshes_once_then_stops() {
    let result = Scenario::new()
        .with_config(config())
        .with_scripted_replies(vec![
            Ok(HeartbeatResponse::unauthenticated()),
            Ok(HeartbeatResponse::unauthenticated()),
        ])
        .connect_at(secs(0), 0)
        .oracle(oracle::all_of(vec![
            oracle::silent_after_stop(),
            Box::new(|world| {
                assert_eq!(world.count(|e| *e == Event::CredentialsRefreshed), 1);
                assert_eq!(world.count(|e| *e == Event::AuthError), 1);

                let refreshed = world.first_at(|e| *e == Event::CredentialsRefreshed);
                let failed = world.first_at(|e| *e == Event::AuthError);
                assert!(refreshed < failed);

                // Retry after the first backoff step.
                let sent = world.sent();
                assert_eq!(sent.len(), 2);
                assert_eq!(sent[1].0, LATENCY + secs(5));
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn auth_failure_recovers_after_refresh() {
    let result = Scenario::new()
        .with_config(config())
        .with_scripted_replies(vec![Ok(HeartbeatResponse::unauthenticated())])
        .connect_at(secs(0), 0)
        .oracle(oracle::all_of(vec![
            oracle::succeeded_once(),
            Box::new(|world| {
                assert_eq!(world.count(|e| *e == Event::CredentialsRefreshed), 1);
                assert_eq!(world.count(|e| *e == Event::AuthError), 0);
                assert_eq!(world.engine().state(), SenderState::Active);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn sequence_mismatch_adopts_directory_counter() {
    let result = Scenario::new()
        .with_config(config())
        .directory_expects(40)
        .connect_at(secs(0), 0)
        .run_for(secs(400))
        .oracle(oracle::all_of(vec![
            oracle::succeeded_once(),
            oracle::single_flight(),
            Box::new(|world| {
                let sent: Vec<(Duration, u64)> =
                    world.sent().iter().map(|(at, r)| (*at, r.sequence_id)).collect();
                assert_eq!(
                    sent,
                    vec![
                        (secs(0), 0),
                        (LATENCY, 40),
                        (secs(300) + LATENCY * 2, 41),
                    ]
                );
                assert_eq!(world.directory().expected_sequence(HOST_ID), Some(42));
                assert_eq!(world.engine().sequence_id(), 42);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn repeated_mismatch_backs_off() {
    let result = Scenario::new()
        .with_config(config())
        .with_scripted_replies(vec![
            Ok(HeartbeatResponse::sequence_mismatch(40)),
            Ok(HeartbeatResponse::sequence_mismatch(50)),
        ])
        .connect_at(secs(0), 0)
        .run_for(secs(60))
        .oracle(Box::new(|world| {
            let sent: Vec<(Duration, u64)> =
                world.sent().iter().map(|(at, r)| (*at, r.sequence_id)).collect();
            assert_eq!(
                sent,
                vec![(secs(0), 0), (LATENCY, 40), (LATENCY * 2 + secs(5), 50)]
            );
            assert_eq!(world.count(|e| *e == Event::HeartbeatSucceeded), 1);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn transient_failures_back_off_then_reset() {
    let result = Scenario::new()
        .with_config(config())
        .with_scripted_replies(vec![unavailable(); 4])
        .connect_at(secs(0), 0)
        .run_for(secs(500))
        .oracle(oracle::all_of(vec![
            oracle::succeeded_once(),
            oracle::single_flight(),
            Box::new(|world| {
                let times: Vec<Duration> = world.sent().iter().map(|(at, _)| *at).collect();
                let gaps: Vec<Duration> =
                    times.windows(2).map(|pair| pair[1] - pair[0] - LATENCY).collect();

                // 4 failures, then the interval after the first success.
                assert_eq!(gaps, vec![secs(5), secs(10), secs(20), secs(40), secs(300)]);
                assert_eq!(world.engine().backoff_attempts(), 0);

                // The sequence id only advances on acceptance.
                let ids: Vec<u64> = world.sent().iter().map(|(_, r)| r.sequence_id).collect();
                assert_eq!(ids, vec![0, 0, 0, 0, 0, 1]);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn directory_interval_overrides_default() {
    let result = Scenario::new()
        .with_config(config())
        .directory_interval(60)
        .connect_at(secs(0), 0)
        .run_for(secs(200))
        .oracle(Box::new(|world| {
            let times: Vec<Duration> = world.sent().iter().map(|(at, _)| *at).collect();
            assert_eq!(
                times,
                vec![secs(0), secs(60) + LATENCY, secs(120) + LATENCY * 2, secs(180) + LATENCY * 3]
            );
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn heartbeat_waits_for_lost_signaling() {
    let result = Scenario::new()
        .with_config(config())
        .connect_at(secs(0), 0)
        .disconnect_at(secs(100), 0)
        .connect_at(secs(400), 0)
        .run_for(secs(500))
        .oracle(Box::new(|world| {
            let times: Vec<Duration> = world.sent().iter().map(|(at, _)| *at).collect();
            // Due at 300.1s while disconnected; sent on reconnect.
            assert_eq!(times, vec![secs(0), secs(400)]);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn surviving_channel_signs_after_failover() {
    let mut config = config();
    config.gate.channels = 2;

    let result = Scenario::new()
        .with_config(config)
        .connect_at(secs(0), 0)
        .connect_at(secs(0), 1)
        .disconnect_at(secs(100), 0)
        .run_for(secs(400))
        .oracle(Box::new(|world| {
            let sent = world.sent();
            let ids: Vec<&str> = sent.iter().map(|(_, r)| r.signaling_full_id.as_str()).collect();
            assert_eq!(
                ids,
                vec![
                    "sim-host@example.com/chromoting_ftl_0",
                    "sim-host@example.com/chromoting_ftl_1",
                ]
            );
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}
