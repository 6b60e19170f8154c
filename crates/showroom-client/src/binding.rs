//! Session binding.
//!
//! Ties the chat layer's lifetime to the external authenticated session:
//! sign-in opens the connection, sign-out closes it and clears all chat
//! state, and a rejected handshake triggers exactly one token refresh
//! before the user is signed out.
//!
//! # State Machine
//!
//! ```text
//!              SignedIn(token)
//! ┌───────────┐ ─────────────> ┌──────────────────┐
//! │ SignedOut │                │ SignedIn { user }│ ── TokenRotated ──> SetToken
//! └───────────┘ <───────────── └──────────────────┘
//!        SignedOut / second rejection / refresh failure
//! ```

use showroom_proto::{BearerToken, UserId};

/// Change reported by the external auth session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
    /// A user signed in (or the session was restored).
    SignedIn {
        /// Identity of the user.
        user: UserId,
        /// Usable token, if the session has one.
        token: Option<BearerToken>,
    },
    /// The user signed out.
    SignedOut,
    /// The session rotated its token.
    TokenRotated(BearerToken),
}

/// Binding state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// No authenticated user.
    SignedOut,
    /// Authenticated as `user`.
    SignedIn {
        /// Current identity.
        user: UserId,
    },
}

/// Actions returned by the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingAction {
    /// Open the connection with this token.
    Open(BearerToken),
    /// Use this token for future handshakes and requests.
    SetToken(BearerToken),
    /// Close the connection.
    Close,
    /// Discard all rooms, messages and unread counts.
    ClearState,
    /// Ask the auth session for a fresh token.
    RefreshToken,
    /// Tell the auth session to sign the user out.
    ForceSignOut,
}

/// Session binding state machine.
#[derive(Debug, Clone)]
pub struct SessionBinding {
    state: BindingState,
    refresh_attempted: bool,
    refresh_in_flight: bool,
}

impl Default for SessionBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBinding {
    /// Start signed out.
    pub fn new() -> Self {
        Self { state: BindingState::SignedOut, refresh_attempted: false, refresh_in_flight: false }
    }

    /// Current state.
    pub fn state(&self) -> &BindingState {
        &self.state
    }

    /// Signed-in user, if any.
    pub fn user(&self) -> Option<&UserId> {
        match &self.state {
            BindingState::SignedIn { user } => Some(user),
            BindingState::SignedOut => None,
        }
    }

    /// Apply a change from the auth session.
    pub fn auth_changed(&mut self, change: AuthChange) -> Vec<BindingAction> {
        match change {
            AuthChange::SignedIn { user, token } => {
                let mut actions = Vec::new();
                if let Some(current) = self.user()
                    && current != &user
                {
                    tracing::info!(from = %current, to = %user, "identity changed");
                    actions.extend([BindingAction::Close, BindingAction::ClearState]);
                }

                self.state = BindingState::SignedIn { user };
                self.refresh_attempted = false;
                match token {
                    Some(token) => {
                        self.refresh_in_flight = false;
                        actions.push(BindingAction::Open(token));
                    },
                    None => {
                        self.refresh_attempted = true;
                        self.refresh_in_flight = true;
                        actions.push(BindingAction::RefreshToken);
                    },
                }
                actions
            },
            AuthChange::SignedOut => self.sign_out(false),
            AuthChange::TokenRotated(token) => match self.state {
                BindingState::SignedIn { .. } => vec![BindingAction::SetToken(token)],
                BindingState::SignedOut => Vec::new(),
            },
        }
    }

    /// The server rejected the handshake.
    pub fn auth_rejected(&mut self) -> Vec<BindingAction> {
        if self.user().is_none() {
            return Vec::new();
        }
        if self.refresh_attempted {
            tracing::warn!("token rejected after refresh, signing out");
            return self.sign_out(true);
        }
        self.refresh_attempted = true;
        self.refresh_in_flight = true;
        vec![BindingAction::RefreshToken]
    }

    /// The auth session answered a refresh request.
    pub fn refresh_completed(&mut self, result: Result<BearerToken, String>) -> Vec<BindingAction> {
        if self.user().is_none() || !self.refresh_in_flight {
            tracing::debug!("ignoring unsolicited token refresh");
            return Vec::new();
        }
        self.refresh_in_flight = false;

        match result {
            Ok(token) => vec![BindingAction::Open(token)],
            Err(reason) => {
                tracing::warn!(%reason, "token refresh failed, signing out");
                self.sign_out(true)
            },
        }
    }

    /// A handshake succeeded: the next rejection gets a fresh refresh.
    pub fn handshake_succeeded(&mut self) {
        self.refresh_attempted = false;
    }

    fn sign_out(&mut self, forced: bool) -> Vec<BindingAction> {
        if self.user().is_none() {
            return Vec::new();
        }
        self.state = BindingState::SignedOut;
        self.refresh_attempted = false;
        self.refresh_in_flight = false;

        let mut actions = Vec::new();
        if forced {
            actions.push(BindingAction::ForceSignOut);
        }
        actions.extend([BindingAction::Close, BindingAction::ClearState]);
        actions
    }
}
