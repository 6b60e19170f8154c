//! Showroom chat core
//!
//! Sans-IO building blocks for the chat session manager: the injected
//! [`Environment`] (time and randomness), reconnect [`Backoff`], the
//! [`ConnectionManager`] state machine, a synchronous [`Observers`] registry
//! and the [`TokenSource`] seam to the external auth session.
//!
//! Nothing here performs I/O. State machines take events and return actions
//! for a driver to execute, which keeps them deterministic under simulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;
pub mod observe;
pub mod token;

pub use backoff::{Backoff, BackoffConfig};
pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, TransportId,
};
pub use env::Environment;
pub use error::ConnectionError;
pub use observe::{Observers, SubscriptionId};
pub use token::{SharedToken, TokenSource};
