//! Opaque identifiers.
//!
//! All identifiers are server-issued strings. The client never interprets
//! them beyond equality and hashing, with one exception: temporary message
//! ids minted for optimistic sends, which are never sent as message ids.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Globally unique chat room identifier.
    RoomId
);

string_id!(
    /// Message identifier, unique within its room.
    ///
    /// Also used as the correlation id of an optimistic send: the client mints
    /// a temporary id, sends it as `correlation`, and the server echoes it back
    /// on the confirmed message.
    MessageId
);

string_id!(
    /// User (participant) identifier.
    UserId
);
