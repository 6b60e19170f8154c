//! Bearer token wrapper.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Authentication bearer token issued by the external auth session.
///
/// Used for both REST calls and the real-time handshake. `Debug` never prints
/// the secret so frames and actions can be logged freely.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for `Authorization` headers and the handshake frame.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken(<{} bytes>)", self.0.len())
    }
}
