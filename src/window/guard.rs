//! Per-id ordering guard for fetch completions.

use crate::types::ReadingId;
use std::collections::HashMap;

/// Position of a change event in arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventSeq(pub u64);

/// Where an accepted completion goes in the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Position 0 (insert).
    Front,
    /// Wherever the reading already is (update).
    InPlace,
}

#[derive(Debug)]
struct Pending {
    latest: EventSeq,
    /// An insert is among the superseded events; its placement survives.
    promote: bool,
}

/// Tracks the newest event per id whose fetch is still in flight.
///
/// A completion is accepted only while its event is the newest one seen
/// for that id. Deletes forget the id, which turns every older in-flight
/// completion into a stale one.
#[derive(Debug, Default)]
pub struct CompletionGuard {
    next: u64,
    in_flight: HashMap<ReadingId, Pending>,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the next arriving event.
    pub fn stamp(&mut self) -> EventSeq {
        self.next += 1;
        EventSeq(self.next)
    }

    /// Record that `seq` started a fetch for `id`, superseding older ones.
    pub fn begin_fetch(&mut self, id: ReadingId, seq: EventSeq, placement: Placement) {
        let promote = placement == Placement::Front;
        let pending = self.in_flight.entry(id).or_insert(Pending {
            latest: seq,
            promote,
        });
        pending.latest = pending.latest.max(seq);
        pending.promote |= promote;
    }

    /// A delete for `id` arrived.
    pub fn forget(&mut self, id: &ReadingId) {
        self.in_flight.remove(id);
    }

    /// Placement for the completion of (`id`, `seq`), or `None` if a newer
    /// event for `id` superseded it or a delete cancelled it.
    pub fn accept(&mut self, id: &ReadingId, seq: EventSeq) -> Option<Placement> {
        match self.in_flight.get(id) {
            Some(pending) if pending.latest == seq => {
                let placement = if pending.promote {
                    Placement::Front
                } else {
                    Placement::InPlace
                };
                self.in_flight.remove(id);
                Some(placement)
            }
            _ => None,
        }
    }

    /// The fetch for (`id`, `seq`) will never complete. Clears the entry
    /// only if nothing newer for `id` is still in flight.
    pub fn abandon(&mut self, id: &ReadingId, seq: EventSeq) {
        if self.in_flight.get(id).is_some_and(|p| p.latest == seq) {
            self.in_flight.remove(id);
        }
    }

    /// Ids with an outstanding fetch.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_completion_wins() {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("a");

        let first = guard.stamp();
        guard.begin_fetch(id.clone(), first, Placement::InPlace);
        let second = guard.stamp();
        guard.begin_fetch(id.clone(), second, Placement::InPlace);

        assert_eq!(guard.accept(&id, first), None);
        assert_eq!(guard.accept(&id, second), Some(Placement::InPlace));
        assert_eq!(guard.in_flight(), 0);
    }

    #[test]
    fn test_update_after_pending_insert_still_promotes() {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("a");

        let insert = guard.stamp();
        guard.begin_fetch(id.clone(), insert, Placement::Front);
        let update = guard.stamp();
        guard.begin_fetch(id.clone(), update, Placement::InPlace);

        assert_eq!(guard.accept(&id, update), Some(Placement::Front));
        assert_eq!(guard.accept(&id, insert), None);
    }

    #[test]
    fn test_delete_invalidates_in_flight() {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("a");

        let insert = guard.stamp();
        guard.begin_fetch(id.clone(), insert, Placement::Front);
        guard.forget(&id);

        assert_eq!(guard.accept(&id, insert), None);
    }

    #[test]
    fn test_out_of_order_begin_keeps_newest() {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("a");
        let older = guard.stamp();
        let newer = guard.stamp();

        guard.begin_fetch(id.clone(), newer, Placement::InPlace);
        guard.begin_fetch(id.clone(), older, Placement::InPlace);

        assert_eq!(guard.accept(&id, older), None);
        assert_eq!(guard.accept(&id, newer), Some(Placement::InPlace));
    }

    #[test]
    fn test_abandon_latest_clears_entry() {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("a");

        let seq = guard.stamp();
        guard.begin_fetch(id.clone(), seq, Placement::Front);
        guard.abandon(&id, seq);

        assert_eq!(guard.in_flight(), 0);
        assert_eq!(guard.accept(&id, seq), None);
    }

    #[test]
    fn test_abandon_superseded_keeps_newer() {
        let mut guard = CompletionGuard::new();
        let id = ReadingId::from("a");

        let older = guard.stamp();
        guard.begin_fetch(id.clone(), older, Placement::InPlace);
        let newer = guard.stamp();
        guard.begin_fetch(id.clone(), newer, Placement::InPlace);

        guard.abandon(&id, older);
        assert_eq!(guard.in_flight(), 1);
        assert_eq!(guard.accept(&id, newer), Some(Placement::InPlace));
    }

    #[test]
    fn test_ids_are_independent() {
        let mut guard = CompletionGuard::new();
        let a = ReadingId::from("a");
        let b = ReadingId::from("b");
        let sa = guard.stamp();
        let sb = guard.stamp();
        guard.begin_fetch(a.clone(), sa, Placement::Front);
        guard.begin_fetch(b.clone(), sb, Placement::InPlace);

        assert_eq!(guard.accept(&b, sb), Some(Placement::InPlace));
        assert_eq!(guard.accept(&a, sa), Some(Placement::Front));
    }
}
