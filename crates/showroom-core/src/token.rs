//! Session token provider.
//!
//! The external auth session owns the token and its refresh lifecycle. The
//! connection manager only needs to read the latest token at each attempt,
//! so the seam is a synchronous [`TokenSource`].

use std::sync::{Arc, RwLock};

use showroom_proto::BearerToken;

/// Supplies the current bearer token.
pub trait TokenSource: Send + Sync {
    /// Latest token, or `None` if the session has no usable token.
    fn current_token(&self) -> Option<BearerToken>;
}

/// In-process token slot shared between the session binding (writer) and the
/// connection manager and REST executor (readers).
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<BearerToken>>>,
}

impl SharedToken {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored token.
    pub fn set(&self, token: Option<BearerToken>) {
        let mut slot = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = token;
    }
}

impl TokenSource for SharedToken {
    fn current_token(&self) -> Option<BearerToken> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
