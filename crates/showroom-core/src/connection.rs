//! Connection lifecycle state machine.
//!
//! Owns the persistent real-time connection: dialing, the bearer-token
//! handshake, unsolicited-drop recovery with backoff, and shutdown. Uses the
//! action pattern: methods take events and return actions for the driver to
//! execute. No I/O happens here; time and jitter come from the injected
//! [`Environment`].
//!
//! # State Machine
//!
//! ```text
//!                open            transport_opened        handshake_accepted
//! ┌──────────────┐ ──> ┌────────────┐ ──> ┌────────────────┐ ──> ┌───────────┐
//! │ Disconnected │     │ Connecting │     │ Authenticating │     │ Connected │
//! └──────────────┘     └────────────┘     └────────────────┘     └───────────┘
//!        ^                   ^   │ failed/timeout  │ failed/timeout     │ failed
//!        │ close/rejected    │   v                 v                    v
//!        │                   │ ┌──────────────────────────────────────────┐
//!        └───────────────────┴─│         Reconnecting { attempt }         │
//!                   deadline   └──────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - At most one transport is live. Each dial gets a fresh [`TransportId`];
//!   events tagged with any other id are ignored.
//! - Every transition is reported, in order, both as
//!   [`ConnectionAction::StateChanged`] and to subscribers.
//! - After [`ConnectionManager::close`] no deadline is pending.

use std::{sync::Arc, time::Duration};

use showroom_proto::BearerToken;

use crate::{
    backoff::{Backoff, BackoffConfig},
    env::Environment,
    error::ConnectionError,
    observe::{Observers, SubscriptionId},
    token::TokenSource,
};

/// Time allowed from dial to handshake acceptance.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval at which the manager asks for a keepalive while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Identifies one physical transport (one dial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, no pending reconnect
    Disconnected,
    /// Transport dial in flight
    Connecting,
    /// Transport open, handshake sent, awaiting verdict
    Authenticating,
    /// Handshake accepted, events flowing
    Connected,
    /// Waiting for the backoff deadline before the next dial
    Reconnecting {
        /// Reconnect attempt number since the last successful handshake,
        /// starting at 1
        attempt: u32,
    },
}

impl ConnectionState {
    /// Whether a transport is dialing, handshaking or established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating | Self::Connected)
    }
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// State transition, already applied
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },

    /// Open a new transport tagged with this id
    Dial {
        /// Id of the new transport
        transport: TransportId,
    },

    /// Send the authenticate frame on the transport
    SendHandshake {
        /// Target transport
        transport: TransportId,
        /// Token to present
        token: BearerToken,
    },

    /// Release the transport
    CloseTransport {
        /// Transport to close
        transport: TransportId,
    },

    /// Handshake accepted
    Established {
        /// Transport now carrying events
        transport: TransportId,
        /// `true` if a handshake already succeeded earlier in this session
        resumed: bool,
    },

    /// Send a keepalive on the transport
    SendPing {
        /// Target transport
        transport: TransportId,
    },

    /// Server refused the token; the state machine is now disconnected
    AuthRejected {
        /// Reason reported by the server
        reason: String,
    },
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Reconnect backoff tuning
    pub backoff: BackoffConfig,
    /// Timeout from dial to handshake acceptance
    pub handshake_timeout: Duration,
    /// Keepalive interval while connected
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Connection manager state machine.
///
/// Exclusive owner of [`ConnectionState`]. Reads the token from the injected
/// [`TokenSource`] at each reconnect attempt so rotations made by the auth
/// session are picked up without a restart.
pub struct ConnectionManager<E: Environment> {
    env: E,
    config: ConnectionConfig,
    tokens: Arc<dyn TokenSource>,
    state: ConnectionState,
    token: Option<BearerToken>,
    transport: Option<TransportId>,
    next_transport: u64,
    backoff: Backoff,
    reconnect_at: Option<E::Instant>,
    handshake_deadline: Option<(E::Instant, E::Instant)>,
    next_ping: Option<E::Instant>,
    established_once: bool,
    observers: Observers<ConnectionState>,
}

impl<E: Environment> ConnectionManager<E> {
    /// Create a manager in [`ConnectionState::Disconnected`].
    pub fn new(env: E, config: ConnectionConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        Self {
            env,
            config,
            tokens,
            state: ConnectionState::Disconnected,
            token: None,
            transport: None,
            next_transport: 0,
            backoff,
            reconnect_at: None,
            handshake_deadline: None,
            next_ping: None,
            established_once: false,
            observers: Observers::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Live transport, if any.
    #[must_use]
    pub fn transport(&self) -> Option<TransportId> {
        self.transport
    }

    /// Token used for the current or next handshake.
    pub fn token(&self) -> Option<&BearerToken> {
        self.token.as_ref()
    }

    /// Earliest pending deadline (handshake timeout, reconnect or keepalive).
    #[must_use]
    pub fn next_deadline(&self) -> Option<E::Instant> {
        let handshake = self.handshake_deadline.map(|(_, deadline)| deadline);
        [handshake, self.reconnect_at, self.next_ping].into_iter().flatten().min()
    }

    /// Observe every state transition.
    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&ConnectionState) + Send + 'static,
    ) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    /// Stop observing.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Start connecting with `token`.
    ///
    /// Idempotent while active with the same token. A different token while
    /// active closes the current transport first. While reconnecting, the
    /// pending timer is cancelled and a dial starts immediately.
    pub fn open(&mut self, token: BearerToken) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.state.is_active() {
            if self.token.as_ref() == Some(&token) {
                tracing::trace!(state = ?self.state, "open ignored, already active");
                return actions;
            }
            tracing::debug!("token changed while active, reopening");
            actions.extend(self.close());
        }

        self.token = Some(token);
        self.reconnect_at = None;
        self.dial(&mut actions);
        actions
    }

    /// Stop everything. Always ends in [`ConnectionState::Disconnected`].
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        self.reconnect_at = None;
        self.handshake_deadline = None;
        self.next_ping = None;
        self.backoff.reset();
        self.established_once = false;

        if let Some(transport) = self.transport.take() {
            actions.push(ConnectionAction::CloseTransport { transport });
        }
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions
    }

    /// Replace the token used for future handshakes without reconnecting.
    pub fn set_token(&mut self, token: BearerToken) {
        self.token = Some(token);
    }

    /// The transport finished opening.
    pub fn transport_opened(&mut self, transport: TransportId) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if let Err(e) = self.check_live(transport, ConnectionState::Connecting, "transport_opened")
        {
            tracing::debug!(error = %e, "ignoring transport_opened");
            return actions;
        }

        let Some(token) = self.token.clone() else {
            let reason = ConnectionError::MissingToken.to_string();
            return self.drop_transport(&reason);
        };

        self.transition(ConnectionState::Authenticating, &mut actions);
        actions.push(ConnectionAction::SendHandshake { transport, token });
        actions
    }

    /// The transport dropped or failed to open.
    pub fn transport_failed(
        &mut self,
        transport: TransportId,
        reason: &str,
    ) -> Vec<ConnectionAction> {
        if self.transport != Some(transport) || !self.state.is_active() {
            tracing::debug!(?transport, live = ?self.transport, "ignoring stale transport failure");
            return Vec::new();
        }
        self.drop_transport(&ConnectionError::TransportDropped(reason.to_string()).to_string())
    }

    /// Server accepted the handshake.
    pub fn handshake_accepted(&mut self, transport: TransportId) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if let Err(e) =
            self.check_live(transport, ConnectionState::Authenticating, "handshake_accepted")
        {
            tracing::debug!(error = %e, "ignoring handshake_accepted");
            return actions;
        }

        self.handshake_deadline = None;
        self.next_ping = Some(self.env.now() + self.config.heartbeat_interval);
        self.backoff.reset();
        let resumed = self.established_once;
        self.established_once = true;

        self.transition(ConnectionState::Connected, &mut actions);
        actions.push(ConnectionAction::Established { transport, resumed });
        actions
    }

    /// Server rejected the token.
    pub fn handshake_rejected(
        &mut self,
        transport: TransportId,
        reason: String,
    ) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if let Err(e) =
            self.check_live(transport, ConnectionState::Authenticating, "handshake_rejected")
        {
            tracing::debug!(error = %e, "ignoring handshake_rejected");
            return actions;
        }

        tracing::warn!(error = %ConnectionError::AuthRejected { reason: reason.clone() }, "handshake failed");

        self.handshake_deadline = None;
        self.reconnect_at = None;
        self.next_ping = None;
        self.transport = None;
        actions.push(ConnectionAction::CloseTransport { transport });
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions.push(ConnectionAction::AuthRejected { reason });
        actions
    }

    /// Fire expired deadlines.
    pub fn tick(&mut self) -> Vec<ConnectionAction> {
        let now = self.env.now();

        if let Some((started, deadline)) = self.handshake_deadline
            && now >= deadline
            && matches!(self.state, ConnectionState::Connecting | ConnectionState::Authenticating)
        {
            let error = ConnectionError::HandshakeTimeout { elapsed: now - started };
            return self.drop_transport(&error.to_string());
        }

        if let Some(at) = self.reconnect_at
            && now >= at
            && matches!(self.state, ConnectionState::Reconnecting { .. })
        {
            self.reconnect_at = None;
            if let Some(latest) = self.tokens.current_token() {
                self.token = Some(latest);
            }
            let mut actions = Vec::new();
            self.dial(&mut actions);
            return actions;
        }

        if let Some(at) = self.next_ping
            && now >= at
            && let (ConnectionState::Connected, Some(transport)) = (self.state, self.transport)
        {
            self.next_ping = Some(now + self.config.heartbeat_interval);
            return vec![ConnectionAction::SendPing { transport }];
        }

        Vec::new()
    }

    fn dial(&mut self, actions: &mut Vec<ConnectionAction>) {
        let transport = TransportId(self.next_transport);
        self.next_transport += 1;
        self.transport = Some(transport);

        let now = self.env.now();
        self.handshake_deadline = Some((now, now + self.config.handshake_timeout));

        self.transition(ConnectionState::Connecting, actions);
        actions.push(ConnectionAction::Dial { transport });
    }

    /// Tear down the live transport and schedule a reconnect.
    fn drop_transport(&mut self, reason: &str) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if let Some(transport) = self.transport.take() {
            actions.push(ConnectionAction::CloseTransport { transport });
        }
        self.handshake_deadline = None;
        self.next_ping = None;

        let delay = self.backoff.next_delay(&self.env);
        let attempt = self.backoff.attempt();
        self.reconnect_at = Some(self.env.now() + delay);

        tracing::warn!(reason, attempt, ?delay, "connection lost, scheduling reconnect");
        self.transition(ConnectionState::Reconnecting { attempt }, &mut actions);
        actions
    }

    fn check_live(
        &self,
        transport: TransportId,
        expected: ConnectionState,
        operation: &'static str,
    ) -> Result<(), ConnectionError> {
        if self.transport != Some(transport) {
            return Err(ConnectionError::StaleTransport { got: transport, live: self.transport });
        }
        if self.state != expected {
            return Err(ConnectionError::InvalidState { state: self.state, operation });
        }
        Ok(())
    }

    fn transition(&mut self, to: ConnectionState, actions: &mut Vec<ConnectionAction>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(?from, ?to, "connection state");
        self.observers.notify(&to);
        actions.push(ConnectionAction::StateChanged { from, to });
    }
}

impl<E: Environment> std::fmt::Debug for ConnectionManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("transport", &self.transport)
            .field("reconnect_at", &self.reconnect_at)
            .finish_non_exhaustive()
    }
}
