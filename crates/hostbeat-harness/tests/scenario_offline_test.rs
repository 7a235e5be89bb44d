//! Scenario tests for offline-reason announcements.

use std::time::Duration;

use hostbeat_core::{SenderConfig, rpc::TransportError, timer::TimerKind};
use hostbeat_harness::scenario::{Event, Scenario, oracle};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn one_channel() -> SenderConfig {
    let mut config = SenderConfig::default();
    config.gate.channels = 1;
    config
}

fn unavailable() -> Result<hostbeat_proto::HeartbeatResponse, TransportError> {
    Err(TransportError::Unavailable("connection refused".to_string()))
}

#[test]
fn reason_set_before_signaling_rides_first_heartbeat() {
    // Reason set at 0 with a 3s deadline; the first heartbeat carries it and
    // the directory answers after 1s.
    let result = Scenario::new()
        .with_config(one_channel())
        .with_rpc_latency(secs(1))
        .announce_offline_at(secs(0), "SHUTDOWN", secs(3))
        .connect_at(secs(0), 0)
        .run_for(secs(10))
        .oracle(oracle::all_of(vec![
            oracle::every_announcement_resolved_once(),
            Box::new(|world| {
                let sent = world.sent();
                assert_eq!(sent[0].1.host_offline_reason.as_deref(), Some("SHUTDOWN"));

                let resolutions = world.resolutions();
                assert_eq!(resolutions.len(), 1);
                assert_eq!(resolutions[0].0, secs(1));
                assert!(resolutions[0].2, "acknowledged by the accepted heartbeat");

                // Cancelled deadline expires at 3s and is ignored.
                assert_eq!(world.count(|e| *e == Event::TimerFired(TimerKind::OfflineAck)), 0);
                assert_eq!(world.count(|e| *e == Event::StaleTimer(TimerKind::OfflineAck)), 1);
                assert_eq!(world.directory().offline_reason("sim-host"), Some("SHUTDOWN"));
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn ack_one_second_into_three_second_deadline() {
    // Announced at 10s with a 3s deadline; the accepted response lands at
    // 11s. Nothing may resolve when the deadline would have expired at 13s.
    let announced = secs(10);
    let result = Scenario::new()
        .with_config(one_channel())
        .with_rpc_latency(secs(1))
        .connect_at(secs(0), 0)
        .announce_offline_at(announced, "SHUTDOWN", secs(3))
        .run_for(secs(30))
        .oracle(oracle::all_of(vec![
            oracle::every_announcement_resolved_once(),
            Box::new(move |world| {
                let resolutions = world.resolutions();
                assert_eq!(resolutions.len(), 1);
                let (at, _, acknowledged) = resolutions[0];
                assert_eq!(at, announced + secs(1));
                assert!(acknowledged);

                let cancelled =
                    world.first_at(|e| *e == Event::TimerCancelled(TimerKind::OfflineAck));
                assert_eq!(cancelled, Some(announced + secs(1)));

                let expired = world.first_at(|e| *e == Event::StaleTimer(TimerKind::OfflineAck));
                assert_eq!(expired, Some(announced + secs(3)));
                assert_eq!(world.count(|e| *e == Event::TimerFired(TimerKind::OfflineAck)), 0);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn reason_preempts_scheduled_heartbeat() {
    let result = Scenario::new()
        .with_config(one_channel())
        .connect_at(secs(0), 0)
        .announce_offline_at(secs(60), "RESTART", secs(10))
        .run_for(secs(120))
        .oracle(Box::new(|world| {
            let sent = world.sent();
            assert_eq!(sent.len(), 2, "initial heartbeat plus the announcement");
            assert_eq!(sent[1].0, secs(60));
            assert_eq!(sent[1].1.host_offline_reason.as_deref(), Some("RESTART"));

            let resolutions = world.resolutions();
            assert_eq!(resolutions.len(), 1);
            assert_eq!(resolutions[0].0, secs(60) + Duration::from_millis(100));
            assert!(resolutions[0].2);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn unreachable_directory_times_out_announcement() {
    let result = Scenario::new()
        .with_config(one_channel())
        .with_scripted_replies(vec![unavailable(); 8])
        .announce_offline_at(secs(0), "SHUTDOWN", secs(3))
        .connect_at(secs(0), 0)
        .run_for(secs(60))
        .oracle(oracle::all_of(vec![
            oracle::every_announcement_resolved_once(),
            oracle::single_flight(),
            Box::new(|world| {
                let resolutions = world.resolutions();
                assert_eq!(resolutions.len(), 1);
                assert_eq!(resolutions[0].0, secs(3));
                assert!(!resolutions[0].2);

                // The reason is sticky: retries keep carrying it.
                let sent = world.sent();
                let reasons: Vec<Option<&str>> = sent
                    .iter()
                    .map(|(_, request)| request.host_offline_reason.as_deref())
                    .collect();
                assert!(reasons.iter().all(|reason| *reason == Some("SHUTDOWN")));
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn newer_reason_fails_older_first() {
    // The first announcement is still waiting (its heartbeat is in flight for
    // 5s) when the second one arrives.
    let result = Scenario::new()
        .with_config(one_channel())
        .with_rpc_latency(secs(5))
        .connect_at(secs(0), 0)
        .announce_offline_at(secs(10), "UPDATE", secs(30))
        .announce_offline_at(secs(12), "SHUTDOWN", secs(30))
        .run_for(secs(60))
        .oracle(oracle::all_of(vec![
            oracle::every_announcement_resolved_once(),
            oracle::single_flight(),
            Box::new(|world| {
                let resolutions = world.resolutions();
                assert_eq!(resolutions.len(), 2);

                let (at, first, acknowledged) = resolutions[0];
                assert_eq!(at, secs(12));
                assert!(!acknowledged, "superseded");

                let (at, second, acknowledged) = resolutions[1];
                assert!(second > first);
                assert!(acknowledged);
                // UPDATE's heartbeat resolves at 15s, SHUTDOWN's goes out then.
                assert_eq!(at, secs(20));

                assert_eq!(world.directory().offline_reason("sim-host"), Some("SHUTDOWN"));
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn unknown_host_fails_pending_announcement() {
    let result = Scenario::new()
        .with_config(one_channel())
        .unregistered_host()
        .announce_offline_at(secs(0), "SHUTDOWN", secs(30))
        .connect_at(secs(1), 0)
        .announce_offline_at(secs(5), "LATE", secs(30))
        .oracle(oracle::all_of(vec![
            oracle::every_announcement_resolved_once(),
            oracle::silent_after_stop(),
            Box::new(|world| {
                let resolutions = world.resolutions();
                assert_eq!(resolutions.len(), 2);
                assert!(resolutions.iter().all(|(_, _, acknowledged)| !acknowledged));
                assert_eq!(resolutions[1].0, secs(5), "announcing after stop fails at once");
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "{result:?}");
}
