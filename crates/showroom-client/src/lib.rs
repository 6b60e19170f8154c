//! Showroom chat client
//!
//! Keeps a live, consistent view of a user's chat rooms, messages and unread
//! counts while the real-time connection drops and reconnects underneath.
//!
//! # Architecture
//!
//! The client follows the Sans-IO pattern:
//!
//! ```text
//!   UI / auth session / transports / REST
//!                   │ ChatEvent
//!                   v
//!   ┌─────────────────────────────────────┐
//!   │ ChatSession                         │
//!   │  ├── SessionBinding (auth lifetime) │
//!   │  ├── ConnectionManager (transport)  │
//!   │  ├── RoomSync (rooms, messages)     │
//!   │  └── UnreadCounter (unread tally)   │
//!   └─────────────────────────────────────┘
//!                   │ ChatAction
//!                   v
//!   Runtime (tokio) or a simulation driver
//! ```
//!
//! [`ChatSession`] is a pure state machine; [`Runtime`] executes its actions
//! with real I/O and publishes [`ChatSnapshot`]s to the UI.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod api;
pub mod auth;
pub mod binding;
pub mod config;
pub mod error;
pub mod event;
pub mod rooms;
pub mod runtime;
pub mod session;
pub mod state;
pub mod system_env;
pub mod transport;
pub mod unread;
#[cfg(feature = "transport")]
pub mod ws;

#[cfg(test)]
mod test_env;

pub use api::{ApiError, ChatApi, HttpChatApi};
pub use auth::{AuthSession, StaticAuth};
pub use binding::{AuthChange, BindingAction, BindingState, SessionBinding};
pub use config::ChatConfig;
pub use error::ChatError;
pub use event::{ChatAction, ChatEvent, Generation};
pub use rooms::{RequestId, Room, RoomChange, RoomSync, SyncAction, SyncConfig};
pub use runtime::{ChatHandle, Runtime};
pub use session::ChatSession;
pub use state::{ChatMessage, ChatSnapshot, DeliveryStatus, FailureReason, RoomView};
pub use system_env::SystemEnv;
pub use transport::{Connector, TransportError, TransportIo};
pub use unread::{UnreadCounter, UnreadUpdate};
#[cfg(feature = "transport")]
pub use ws::WsConnector;
