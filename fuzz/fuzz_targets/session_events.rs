//! Fuzz target for the chat session under arbitrary user and network events.
//!
//! # Strategy
//!
//! - User actions: send, open, close, mark read, sign out and back in
//! - Network: transport drops, held frames, late and failed REST responses
//! - Time: arbitrary clock jumps
//!
//! # Invariants
//!
//! - Every standard session invariant holds after every event
//! - NEVER panic

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use showroom_client::{AuthChange, ChatEvent};
use showroom_harness::{FaultConfig, InvariantRegistry, SimDriver};
use showroom_proto::{RoomId, UserId};

const ROOMS: [&str; 3] = ["r0", "r1", "r2"];

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    faults: Faults,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Arbitrary)]
struct Faults {
    dial: u8,
    fetch: u8,
    delay: u8,
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Send { room: u8, body: String },
    Post { room: u8 },
    Open { room: u8 },
    Close,
    MarkRead { room: u8 },
    Drop,
    HoldFrames(bool),
    Advance { millis: u16 },
    SignOut,
    SignIn,
}

fn room(index: u8) -> &'static str {
    ROOMS[usize::from(index) % ROOMS.len()]
}

fn probability(byte: u8) -> f64 {
    f64::from(byte) / 512.0
}

fuzz_target!(|scenario: Scenario| {
    let faults = FaultConfig {
        dial_failure: probability(scenario.faults.dial),
        fetch_failure: probability(scenario.faults.fetch),
        fetch_delay: probability(scenario.faults.delay),
    };
    let mut driver = SimDriver::new(scenario.seed)
        .with_faults(faults)
        .with_invariants(InvariantRegistry::standard());
    let members = [UserId::from("alice"), UserId::from("bob")];
    for id in ROOMS {
        driver.server_mut().create_room(&RoomId::from(id), &members);
    }
    driver.sign_in("alice", "alice-token");

    for op in scenario.ops.into_iter().take(256) {
        match op {
            Op::Send { room: r, body } => driver.send_message(room(r), &body),
            Op::Post { room: r } => {
                driver.server_mut().post(&RoomId::from(room(r)), &UserId::from("bob"), "hi");
                driver.run_until_idle();
            },
            Op::Open { room: r } => driver.open_room(room(r)),
            Op::Close => driver.inject(ChatEvent::CloseRoom),
            Op::MarkRead { room: r } => {
                driver.inject(ChatEvent::MarkRead { room_id: RoomId::from(room(r)) });
            },
            Op::Drop => driver.drop_transport(),
            Op::HoldFrames(held) => {
                driver.hold_frames(held);
                driver.run_until_idle();
            },
            Op::Advance { millis } => driver.advance(Duration::from_millis(u64::from(millis))),
            Op::SignOut => driver.inject(ChatEvent::Auth(AuthChange::SignedOut)),
            Op::SignIn => driver.sign_in("alice", "alice-token"),
        }
    }
});
