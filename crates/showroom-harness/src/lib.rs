//! Deterministic simulation harness for the Showroom chat layer.
//!
//! The harness runs a real [`ChatSession`](showroom_client::ChatSession)
//! against an in-memory backend under a virtual clock. Every source of
//! nondeterminism (time, jitter, injected faults) comes from a seed, so a
//! failing property test replays exactly.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock and seeded RNG implementing `Environment`
//! - [`SimServer`]: REST and real-time backend with per-room sequencing
//! - [`SimDriver`]: event loop that executes session actions against the
//!   server, with optional fault injection
//! - [`invariants`]: properties checked after every processed event

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod invariants;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;

pub use invariants::{InvariantRegistry, SessionSnapshot, Violation};
pub use sim_driver::{FaultConfig, SimDriver};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::{ConnId, SimServer};
