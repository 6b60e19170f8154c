//! Unread counter.
//!
//! Exclusive owner of the per-room unread tally. Every increment and every
//! read acknowledgement carries an ordering token (the message's server
//! sequence number), so a mark-read racing with an increment for a message
//! at or before the read position is resolved in favour of the read.
//!
//! # Invariants
//!
//! - `total()` equals the sum of the per-room counts, saturating at
//!   `u32::MAX`.
//! - Counts never go negative.
//! - The active room never accumulates unread messages.

use std::collections::{BTreeMap, BTreeSet};

use showroom_core::{Observers, SubscriptionId};
use showroom_proto::{ClientFrame, RoomId, UnreadCounts};

/// Notification sent to unread observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadUpdate {
    /// Room whose count changed, or `None` when the whole tally changed.
    pub room_id: Option<RoomId>,
    /// New count for that room.
    pub count: u32,
    /// New total.
    pub total: u32,
}

/// Per-room unread tally.
#[derive(Debug, Default)]
pub struct UnreadCounter {
    counts: BTreeMap<RoomId, u32>,
    read_marks: BTreeMap<RoomId, u64>,
    touched: BTreeSet<RoomId>,
    active: Option<RoomId>,
    baseline_applied: bool,
    total: u32,
    observers: Observers<UnreadUpdate>,
}

impl UnreadCounter {
    /// Empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unread count of one room.
    pub fn count(&self, room_id: &RoomId) -> u32 {
        self.counts.get(room_id).copied().unwrap_or(0)
    }

    /// Sum of all per-room counts.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Rooms with a non-zero count.
    pub fn counts(&self) -> impl Iterator<Item = (&RoomId, u32)> {
        self.counts.iter().filter(|(_, n)| **n > 0).map(|(room, n)| (room, *n))
    }

    /// Read position of a room.
    pub fn read_mark(&self, room_id: &RoomId) -> Option<u64> {
        self.read_marks.get(room_id).copied()
    }

    /// Whether the server baseline has been applied this session.
    pub fn baseline_applied(&self) -> bool {
        self.baseline_applied
    }

    /// Observe count changes.
    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&UnreadUpdate) + Send + 'static,
    ) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    /// Stop observing.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Seed counts from the server, once per session.
    ///
    /// Rooms already touched locally (by an increment or mark-read) keep
    /// their local count, as does the active room. Returns `false` if a
    /// baseline was already applied.
    pub fn apply_baseline(&mut self, baseline: &UnreadCounts) -> bool {
        if self.baseline_applied {
            tracing::debug!("unread baseline already applied");
            return false;
        }
        self.baseline_applied = true;

        for (room_id, count) in &baseline.rooms {
            if self.touched.contains(room_id) || self.active.as_ref() == Some(room_id) {
                continue;
            }
            self.set(room_id, *count);
        }
        self.observers.notify(&UnreadUpdate { room_id: None, count: 0, total: self.total });
        true
    }

    /// Count one inbound message with sequence number `token`.
    ///
    /// Returns `false` when the message is not counted: the room is active,
    /// or the message is at or before the room's read position.
    pub fn increment(&mut self, room_id: &RoomId, token: u64) -> bool {
        if self.active.as_ref() == Some(room_id) {
            return false;
        }
        if self.read_marks.get(room_id).is_some_and(|mark| token <= *mark) {
            tracing::trace!(%room_id, token, "increment at or before read mark");
            return false;
        }

        self.touched.insert(room_id.clone());
        let count = self.count(room_id).saturating_add(1);
        self.set(room_id, count);
        true
    }

    /// Mark a room read up to `token`.
    ///
    /// Resets the count and advances the read position. Returns the
    /// read-acknowledgement frame when the server should hear about it.
    pub fn mark_read(&mut self, room_id: &RoomId, token: Option<u64>) -> Option<ClientFrame> {
        self.touched.insert(room_id.clone());
        let had_unread = self.count(room_id) > 0;
        self.set(room_id, 0);

        let token = token?;
        let advanced = self.read_marks.get(room_id).is_none_or(|mark| token > *mark);
        if advanced {
            self.read_marks.insert(room_id.clone(), token);
        }

        (advanced || had_unread)
            .then(|| ClientFrame::MarkRead { room_id: room_id.clone(), up_to: token })
    }

    /// Set the room the user is viewing.
    pub fn set_active(&mut self, room_id: Option<RoomId>) {
        self.active = room_id;
    }

    /// Discard everything (sign-out or identity change).
    pub fn clear(&mut self) {
        self.counts.clear();
        self.read_marks.clear();
        self.touched.clear();
        self.active = None;
        self.baseline_applied = false;
        self.total = 0;
        self.observers.notify(&UnreadUpdate { room_id: None, count: 0, total: 0 });
    }

    fn set(&mut self, room_id: &RoomId, count: u32) {
        let previous = self.count(room_id);
        let others = self.total - previous;
        // The total saturates at u32::MAX; per-room counts are clamped to keep the sum exact.
        let count = count.min(u32::MAX - others);
        self.counts.insert(room_id.clone(), count);
        self.total = others + count;
        if previous != count {
            let update =
                UnreadUpdate { room_id: Some(room_id.clone()), count, total: self.total };
            self.observers.notify(&update);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::from(id)
    }

    #[test]
    fn total_tracks_sum() {
        let mut unread = UnreadCounter::new();
        unread.increment(&room("a"), 1);
        unread.increment(&room("a"), 2);
        unread.increment(&room("b"), 1);
        assert_eq!(unread.total(), 3);

        unread.mark_read(&room("a"), Some(2));
        assert_eq!(unread.count(&room("a")), 0);
        assert_eq!(unread.total(), 1);
    }

    #[test]
    fn increment_at_or_before_read_mark_is_ignored() {
        let mut unread = UnreadCounter::new();
        unread.mark_read(&room("a"), Some(5));

        assert!(!unread.increment(&room("a"), 4));
        assert!(!unread.increment(&room("a"), 5));
        assert!(unread.increment(&room("a"), 6));
        assert_eq!(unread.count(&room("a")), 1);
    }

    #[test]
    fn active_room_not_counted() {
        let mut unread = UnreadCounter::new();
        unread.set_active(Some(room("a")));
        assert!(!unread.increment(&room("a"), 1));
        assert!(unread.increment(&room("b"), 1));
        assert_eq!(unread.total(), 1);
    }

    #[test]
    fn baseline_applied_once_and_skips_touched_rooms() {
        let mut unread = UnreadCounter::new();
        unread.increment(&room("a"), 10);

        let mut baseline = UnreadCounts::default();
        baseline.rooms.insert(room("a"), 7);
        baseline.rooms.insert(room("b"), 2);

        assert!(unread.apply_baseline(&baseline));
        assert_eq!(unread.count(&room("a")), 1);
        assert_eq!(unread.count(&room("b")), 2);

        baseline.rooms.insert(room("b"), 9);
        assert!(!unread.apply_baseline(&baseline));
        assert_eq!(unread.count(&room("b")), 2);
        assert_eq!(unread.total(), 3);
    }

    #[test]
    fn oversized_baseline_saturates_total() {
        let mut unread = UnreadCounter::new();
        let mut baseline = UnreadCounts::default();
        baseline.rooms.insert(room("a"), u32::MAX);
        baseline.rooms.insert(room("b"), 1);

        assert!(unread.apply_baseline(&baseline));
        assert_eq!(unread.total(), u32::MAX);
        assert_eq!(unread.counts().map(|(_, n)| u64::from(n)).sum::<u64>(), u64::from(u32::MAX));

        assert!(unread.increment(&room("c"), 1));
        assert_eq!(unread.total(), u32::MAX);

        unread.mark_read(&room("a"), Some(1));
        assert_eq!(unread.total(), 0);
    }

    #[test]
    fn mark_read_emits_frame_only_when_needed() {
        let mut unread = UnreadCounter::new();
        unread.increment(&room("a"), 3);

        assert_eq!(
            unread.mark_read(&room("a"), Some(3)),
            Some(ClientFrame::MarkRead { room_id: room("a"), up_to: 3 })
        );
        assert_eq!(unread.mark_read(&room("a"), Some(3)), None);
        assert_eq!(unread.mark_read(&room("b"), None), None);
    }

    #[test]
    fn observers_see_changes() {
        let mut unread = UnreadCounter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        unread.subscribe(move |u| sink.lock().unwrap().push(u.total));

        unread.increment(&room("a"), 1);
        unread.increment(&room("a"), 2);
        unread.mark_read(&room("a"), Some(2));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 0]);
    }
}
