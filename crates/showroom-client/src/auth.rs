//! Authenticated-session seam.
//!
//! The chat layer does not own authentication. It observes an external
//! session that tells it who is signed in and with which token, and asks that
//! session to refresh a rejected token or sign the user out.

use async_trait::async_trait;
use showroom_proto::{BearerToken, UserId};
use tokio::sync::{Mutex, broadcast};

use crate::binding::AuthChange;

/// External authenticated session.
#[async_trait]
pub trait AuthSession: Send + Sync + 'static {
    /// State to start from, `None` when signed out.
    fn current(&self) -> Option<AuthChange>;

    /// Stream of subsequent changes.
    fn changes(&self) -> broadcast::Receiver<AuthChange>;

    /// Obtain a fresh token for the signed-in user.
    async fn refresh(&self) -> Result<BearerToken, String>;

    /// Sign the user out. Must eventually publish [`AuthChange::SignedOut`].
    async fn force_sign_out(&self);
}

/// In-process [`AuthSession`] driven by explicit calls.
///
/// Backs the CLI (a token given on the command line) and runtime tests.
#[derive(Debug)]
pub struct StaticAuth {
    state: std::sync::Mutex<Option<(UserId, BearerToken)>>,
    refreshed: Mutex<Vec<BearerToken>>,
    tx: broadcast::Sender<AuthChange>,
}

impl StaticAuth {
    /// Session signed in as `user` with `token`.
    pub fn signed_in(user: UserId, token: BearerToken) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            state: std::sync::Mutex::new(Some((user, token))),
            refreshed: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Session with nobody signed in.
    pub fn signed_out() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { state: std::sync::Mutex::new(None), refreshed: Mutex::new(Vec::new()), tx }
    }

    /// Queue tokens handed out by successive refreshes.
    pub async fn push_refresh(&self, token: BearerToken) {
        self.refreshed.lock().await.push(token);
    }

    /// Publish a change.
    pub fn publish(&self, change: AuthChange) {
        if let Ok(mut state) = self.state.lock() {
            match &change {
                AuthChange::SignedIn { user, token: Some(token) } => {
                    *state = Some((user.clone(), token.clone()));
                },
                AuthChange::SignedIn { .. } => {},
                AuthChange::SignedOut => *state = None,
                AuthChange::TokenRotated(token) => {
                    if let Some((_, current)) = state.as_mut() {
                        *current = token.clone();
                    }
                },
            }
        }
        // No receivers is fine: nobody is listening yet.
        let _ = self.tx.send(change);
    }
}

#[async_trait]
impl AuthSession for StaticAuth {
    fn current(&self) -> Option<AuthChange> {
        let state = self.state.lock().ok()?;
        state.as_ref().map(|(user, token)| AuthChange::SignedIn {
            user: user.clone(),
            token: Some(token.clone()),
        })
    }

    fn changes(&self) -> broadcast::Receiver<AuthChange> {
        self.tx.subscribe()
    }

    async fn refresh(&self) -> Result<BearerToken, String> {
        let mut queue = self.refreshed.lock().await;
        if queue.is_empty() {
            return Err("no refresh token available".to_owned());
        }
        Ok(queue.remove(0))
    }

    async fn force_sign_out(&self) {
        self.publish(AuthChange::SignedOut);
    }
}
