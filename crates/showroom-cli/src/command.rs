//! Line commands typed at the prompt.

use showroom_proto::{BearerToken, RoomId, UserId};

/// Parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/open <room>`
    Open(RoomId),
    /// `/close`
    Close,
    /// `/read <room>`
    Read(RoomId),
    /// `/send <room> <text>`, or bare text for the open room.
    Send {
        /// Target room; `None` means the open room.
        room_id: Option<RoomId>,
        /// Message text.
        body: String,
    },
    /// `/rooms`
    Rooms,
    /// `/login <user> <token>`
    Login(UserId, BearerToken),
    /// `/logout`
    Logout,
    /// `/quit`
    Quit,
}

/// Input that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Empty line.
    #[error("empty input")]
    Empty,
    /// Unknown slash command.
    #[error("unknown command: /{0}")]
    Unknown(String),
    /// Missing argument.
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Send { room_id: None, body: line.to_owned() });
        };

        let mut parts = rest.splitn(3, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let first = parts.next().filter(|s| !s.is_empty());
        let second = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match name {
            "open" => first.map(|r| Self::Open(RoomId::from(r))).ok_or(ParseError::Usage("/open <room>")),
            "close" => Ok(Self::Close),
            "read" => first.map(|r| Self::Read(RoomId::from(r))).ok_or(ParseError::Usage("/read <room>")),
            "send" => match (first, second) {
                (Some(room), Some(body)) => {
                    Ok(Self::Send { room_id: Some(RoomId::from(room)), body: body.to_owned() })
                },
                _ => Err(ParseError::Usage("/send <room> <text>")),
            },
            "rooms" => Ok(Self::Rooms),
            "login" => match (first, second) {
                (Some(user), Some(token)) => {
                    Ok(Self::Login(UserId::from(user), BearerToken::new(token)))
                },
                _ => Err(ParseError::Usage("/login <user> <token>")),
            },
            "logout" => Ok(Self::Logout),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ParseError::Unknown(other.to_owned())),
        }
    }
}
