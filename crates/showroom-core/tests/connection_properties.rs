//! Property tests for the connection manager.
//!
//! Drives the state machine with arbitrary event sequences on a virtual clock
//! and checks the lifecycle guarantees hold on every path.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use proptest::prelude::*;
use showroom_core::{
    Backoff, BackoffConfig, ConnectionAction, ConnectionConfig, ConnectionManager,
    ConnectionState, Environment, SharedToken,
};
use showroom_harness::SimEnv;
use showroom_proto::BearerToken;

#[derive(Debug, Clone)]
enum Op {
    Open(u8),
    Close,
    Opened,
    Failed,
    Accepted,
    Rejected,
    Rotate(u8),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => (0u8..3).prop_map(Op::Open),
        1 => Just(Op::Close),
        3 => Just(Op::Opened),
        2 => Just(Op::Failed),
        3 => Just(Op::Accepted),
        1 => Just(Op::Rejected),
        1 => (0u8..3).prop_map(Op::Rotate),
        3 => (0u64..40_000).prop_map(Op::Advance),
    ]
}

fn token(n: u8) -> BearerToken {
    BearerToken::new(format!("token-{n}"))
}

fn apply(
    conn: &mut ConnectionManager<SimEnv>,
    env: &SimEnv,
    tokens: &SharedToken,
    op: &Op,
) -> Vec<ConnectionAction> {
    let live = conn.transport();
    match op {
        Op::Open(n) => conn.open(token(*n)),
        Op::Close => conn.close(),
        Op::Opened => live.map(|t| conn.transport_opened(t)).unwrap_or_default(),
        Op::Failed => live.map(|t| conn.transport_failed(t, "dropped")).unwrap_or_default(),
        Op::Accepted => live.map(|t| conn.handshake_accepted(t)).unwrap_or_default(),
        Op::Rejected => {
            live.map(|t| conn.handshake_rejected(t, "expired".into())).unwrap_or_default()
        },
        Op::Rotate(n) => {
            tokens.set(Some(token(*n)));
            Vec::new()
        },
        Op::Advance(ms) => {
            env.advance(Duration::from_millis(*ms));
            conn.tick()
        },
    }
}

proptest! {
    /// Backoff delays never decrease and never exceed the cap.
    #[test]
    fn prop_backoff_monotonic_and_capped(
        seed in any::<u64>(),
        initial_ms in 1u64..2_000,
        max_ms in 1u64..60_000,
        jitter in 0.0f64..1.0,
        attempts in 1usize..64,
    ) {
        let env = SimEnv::with_seed(seed);
        let max = Duration::from_millis(max_ms);
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            max,
            multiplier: 2,
            jitter,
        });

        let mut previous = Duration::ZERO;
        for _ in 0..attempts {
            let delay = backoff.next_delay(&env);
            prop_assert!(delay <= max, "{delay:?} exceeds cap {max:?}");
            prop_assert!(delay >= previous, "{delay:?} shorter than {previous:?}");
            previous = delay;
        }
    }

    /// Lifecycle guarantees over arbitrary event sequences:
    /// transitions chain without gaps, at most one transport is live, and
    /// nothing fires once `close` returns.
    #[test]
    fn prop_lifecycle_invariants(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 0..80),
    ) {
        let env = SimEnv::with_seed(seed);
        let tokens = SharedToken::new();
        let mut conn =
            ConnectionManager::new(env.clone(), ConnectionConfig::default(), Arc::new(tokens.clone()));

        let mut state = ConnectionState::Disconnected;
        let mut live = BTreeSet::new();

        for op in &ops {
            for action in apply(&mut conn, &env, &tokens, op) {
                match action {
                    ConnectionAction::StateChanged { from, to } => {
                        prop_assert_eq!(from, state, "transition skipped after {:?}", op);
                        state = to;
                    },
                    ConnectionAction::Dial { transport } => {
                        live.insert(transport);
                    },
                    ConnectionAction::CloseTransport { transport } => {
                        live.remove(&transport);
                    },
                    _ => {},
                }
                prop_assert!(live.len() <= 1, "two live transports after {:?}", op);
            }
            prop_assert_eq!(state, conn.state());
        }

        conn.close();
        prop_assert_eq!(conn.state(), ConnectionState::Disconnected);
        prop_assert_eq!(conn.next_deadline(), None);

        env.advance(Duration::from_secs(3_600));
        prop_assert!(conn.tick().is_empty());
        prop_assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}

/// Unbounded attempts: the manager keeps rescheduling while drops continue.
#[test]
fn reconnects_indefinitely_until_closed() {
    let env = SimEnv::with_seed(7);
    let tokens = SharedToken::new();
    let mut conn =
        ConnectionManager::new(env.clone(), ConnectionConfig::default(), Arc::new(tokens));

    conn.open(token(0));
    for attempt in 1..=50u32 {
        let transport = conn.transport().unwrap();
        conn.transport_failed(transport, "unreachable");
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt });

        let deadline = conn.next_deadline().unwrap();
        env.advance(deadline - env.now());
        conn.tick();
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }
}
