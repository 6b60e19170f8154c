//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use super::{Invariant, InvariantResult, SessionSnapshot, Violation};

/// The total unread count equals the sum of per-room counts.
pub struct UnreadTotalMatchesSum;

impl Invariant for UnreadTotalMatchesSum {
    fn name(&self) -> &'static str {
        "unread_total_matches_sum"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let sum: u32 = state.unread.values().sum();
        if sum != state.unread_total {
            return Err(Violation {
                invariant: self.name(),
                message: format!("total {} but rooms sum to {sum}", state.unread_total),
            });
        }
        Ok(())
    }
}

/// Message ids are unique within a room.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let mut seen = HashSet::new();
            for message in &room.messages {
                if !seen.insert(message.id.as_str()) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("room {}: duplicate message {}", room.id, message.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Confirmed messages appear in strictly ascending sequence order.
pub struct ServerOrderPreserved;

impl Invariant for ServerOrderPreserved {
    fn name(&self) -> &'static str {
        "server_order_preserved"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let seqs: Vec<u64> = room.messages.iter().filter_map(|m| m.seq).collect();
            if let Some(window) = seqs.windows(2).find(|w| w[1] <= w[0]) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "room {}: seq {} displayed before seq {}",
                        room.id, window[0], window[1]
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The room being viewed never shows unread messages.
pub struct ActiveRoomHasNoUnread;

impl Invariant for ActiveRoomHasNoUnread {
    fn name(&self) -> &'static str {
        "active_room_has_no_unread"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let Some(active) = &state.active_room else {
            return Ok(());
        };
        match state.unread.get(active) {
            Some(&count) if count > 0 => Err(Violation {
                invariant: self.name(),
                message: format!("active room {active} has {count} unread"),
            }),
            _ => Ok(()),
        }
    }
}

/// A signed-out session holds no chat state and no connection.
pub struct SignedOutIsEmpty;

impl Invariant for SignedOutIsEmpty {
    fn name(&self) -> &'static str {
        "signed_out_is_empty"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.user.is_some() {
            return Ok(());
        }
        if !state.rooms.is_empty() || state.unread_total != 0 || state.active_room.is_some() {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "signed out but holding {} rooms, {} unread",
                    state.rooms.len(),
                    state.unread_total
                ),
            });
        }
        if state.connection != "Disconnected" {
            return Err(Violation {
                invariant: self.name(),
                message: format!("signed out but connection is {}", state.connection),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::RoomSnapshot;

    fn signed_in() -> SessionSnapshot {
        SessionSnapshot { user: Some("alice".into()), ..SessionSnapshot::empty() }
    }

    #[test]
    fn unread_sum_passes_when_consistent() {
        let state = signed_in().with_unread("a", 2).with_unread("b", 3);
        assert_eq!(state.unread_total, 5);
        assert!(UnreadTotalMatchesSum.check(&state).is_ok());
    }

    #[test]
    fn unread_sum_fails_when_total_drifts() {
        let mut state = signed_in().with_unread("a", 2);
        state.unread_total = 3;
        let result = UnreadTotalMatchesSum.check(&state);
        assert!(result.unwrap_err().message.contains("sum to 2"));
    }

    #[test]
    fn duplicate_ids_detected() {
        let room = RoomSnapshot::new("a")
            .with_message("m1", Some(1), "sent")
            .with_message("m1", Some(1), "sent");
        let result = UniqueMessageIds.check(&signed_in().with_room(room));
        assert!(result.unwrap_err().message.contains("duplicate"));
    }

    #[test]
    fn order_ignores_unconfirmed_entries() {
        let room = RoomSnapshot::new("a")
            .with_message("m1", Some(1), "sent")
            .with_message("tmp-1", None, "failed")
            .with_message("m2", Some(2), "sent");
        assert!(ServerOrderPreserved.check(&signed_in().with_room(room)).is_ok());
    }

    #[test]
    fn order_violation_detected() {
        let room = RoomSnapshot::new("a")
            .with_message("m2", Some(2), "sent")
            .with_message("m1", Some(1), "sent");
        assert!(ServerOrderPreserved.check(&signed_in().with_room(room)).is_err());
    }

    #[test]
    fn active_room_with_unread_detected() {
        let mut state = signed_in().with_room(RoomSnapshot::new("a")).with_unread("a", 1);
        state.active_room = Some("a".into());
        assert!(ActiveRoomHasNoUnread.check(&state).is_err());
    }

    #[test]
    fn signed_out_with_rooms_detected() {
        let state = SessionSnapshot::empty().with_room(RoomSnapshot::new("a"));
        assert!(SignedOutIsEmpty.check(&state).is_err());
        assert!(SignedOutIsEmpty.check(&SessionSnapshot::empty()).is_ok());
    }
}
