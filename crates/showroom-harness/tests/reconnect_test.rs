//! Reconnect and catch-up scenarios.

use std::time::Duration;

use showroom_client::{AuthChange, ChatConfig, ChatEvent, SyncConfig};
use showroom_core::ConnectionState;
use showroom_harness::{FaultConfig, InvariantRegistry, SimDriver};
use showroom_proto::{ClientFrame, RoomId, UserId};

fn lobby() -> RoomId {
    RoomId::from("lobby")
}

fn bob() -> UserId {
    UserId::from("bob")
}

fn connected(seed: u64, config: &ChatConfig) -> SimDriver {
    let mut driver = SimDriver::with_config(seed, config).with_invariants(InvariantRegistry::standard());
    driver.server_mut().create_room(&lobby(), &[UserId::from("alice"), bob()]);
    driver.sign_in("alice", "alice-token");
    driver.open_room("lobby");
    driver
}

#[test]
fn missed_messages_are_fetched_once_without_duplicates() {
    let mut driver = connected(7, &ChatConfig::default());
    driver.server_mut().post(&lobby(), &bob(), "before");
    driver.run_until_idle();

    driver.drop_transport();
    for body in ["one", "two", "three"] {
        driver.server_mut().post(&lobby(), &bob(), body);
    }
    driver.advance(Duration::from_secs(1));

    assert_eq!(driver.session().connection_state(), ConnectionState::Connected);
    assert!(!driver.session().is_stale(&lobby()));
    driver.caught_up().unwrap();
    assert_eq!(driver.session().messages(&lobby()).len(), 4);
}

#[test]
fn live_events_during_refetch_are_replayed_in_order() {
    let mut driver = connected(11, &ChatConfig::default());
    driver.server_mut().post(&lobby(), &bob(), "seen");
    driver.run_until_idle();
    driver.drop_transport();
    driver.server_mut().post(&lobby(), &bob(), "missed");

    // Hold every REST response so live frames land while the room is stale.
    driver.set_faults(FaultConfig { fetch_delay: 1.0, ..FaultConfig::none() });
    driver.advance(Duration::from_secs(1));
    driver.advance(Duration::from_millis(1));
    assert!(driver.session().is_stale(&lobby()));

    driver.server_mut().post(&lobby(), &bob(), "live");
    driver.run_until_idle();
    driver.set_faults(FaultConfig::none());
    driver.advance(Duration::from_millis(1));

    assert!(!driver.session().is_stale(&lobby()));
    driver.caught_up().unwrap();
    let bodies: Vec<_> = driver.session().messages(&lobby()).iter().map(|m| m.body.clone()).collect();
    assert_eq!(bodies, ["seen", "missed", "live"]);
}

#[test]
fn buffer_overflow_restarts_the_fetch() {
    let config = ChatConfig {
        sync: SyncConfig { buffer_cap: 2, ..SyncConfig::default() },
        ..ChatConfig::default()
    };
    let mut driver = connected(3, &config);
    driver.server_mut().post(&lobby(), &bob(), "seen");
    driver.run_until_idle();
    driver.drop_transport();
    driver.server_mut().post(&lobby(), &bob(), "missed");

    driver.set_faults(FaultConfig { fetch_delay: 1.0, ..FaultConfig::none() });
    driver.advance(Duration::from_secs(1));
    driver.advance(Duration::from_millis(1));
    assert!(driver.session().is_stale(&lobby()));

    for body in ["a", "b", "c", "d"] {
        driver.server_mut().post(&lobby(), &bob(), body);
    }
    driver.run_until_idle();
    assert!(driver.session().is_stale(&lobby()));

    driver.set_faults(FaultConfig::none());
    driver.advance(Duration::from_millis(1));

    assert!(!driver.session().is_stale(&lobby()));
    driver.caught_up().unwrap();
    assert_eq!(driver.session().messages(&lobby()).len(), 6);
}

#[test]
fn failed_dials_back_off_then_recover() {
    let mut driver = connected(5, &ChatConfig::default());
    driver.set_faults(FaultConfig { dial_failure: 1.0, ..FaultConfig::none() });
    driver.drop_transport();

    driver.advance_by(Duration::from_secs(10), Duration::from_millis(250));
    assert!(matches!(
        driver.session().connection_state(),
        ConnectionState::Reconnecting { attempt } if attempt > 1
    ));

    driver.set_faults(FaultConfig::none());
    assert!(driver.settle());
    assert_eq!(driver.session().connection_state(), ConnectionState::Connected);
}

#[test]
fn handshake_repeats_on_every_reconnect() {
    let mut driver = connected(9, &ChatConfig::default());
    driver.drop_transport();
    driver.advance(Duration::from_secs(1));

    let handshakes = driver
        .sent_frames()
        .iter()
        .filter(|f| matches!(f, ClientFrame::Authenticate { .. }))
        .count();
    assert_eq!(handshakes, 2);
}

#[test]
fn send_whose_ack_was_lost_settles_after_reconnect() {
    let mut driver = connected(13, &ChatConfig::default());
    // The server accepts the send, but the ack dies with the transport.
    driver.hold_frames(true);
    driver.send_message("lobby", "hello");
    assert_eq!(driver.server().messages(&lobby()).len(), 1);
    driver.drop_transport();
    driver.hold_frames(false);

    driver.advance(Duration::from_secs(1));
    assert!(driver.settle());

    driver.caught_up().unwrap();
    let snapshot = driver.snapshot();
    let room = snapshot.room("lobby").unwrap();
    assert_eq!(room.messages.len(), 1);
    assert_eq!(room.messages[0].status, "sent");
}

#[test]
fn nothing_arrives_after_sign_out() {
    let mut driver = connected(17, &ChatConfig::default());
    driver.inject(ChatEvent::Auth(AuthChange::SignedOut));
    driver.server_mut().post(&lobby(), &bob(), "after");
    driver.advance(Duration::from_secs(60));

    assert_eq!(driver.session().connection_state(), ConnectionState::Disconnected);
    assert!(driver.snapshot().rooms.is_empty());
}
