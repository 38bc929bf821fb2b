use chrono::{DateTime, Utc};
use domain::protocol::normalize_content;
use domain::{CommentId, PendingEntry};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

struct Slot {
    entry: PendingEntry,
    timer: CancellationToken,
}

/// Locally created comments the server has not confirmed, in submission order.
///
/// Each slot owns the token of its expiry timer; taking a slot out of the buffer
/// cancels the timer, so an entry leaves exactly once.
#[derive(Default)]
pub struct PendingBuffer {
    slots: Vec<Slot>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PendingEntry, timer: CancellationToken) {
        self.slots.push(Slot { entry, timer });
    }

    pub fn remove(&mut self, temp_id: &CommentId) -> Option<PendingEntry> {
        let index = self.slots.iter().position(|s| &s.entry.temp_id == temp_id)?;
        let slot = self.slots.remove(index);
        slot.timer.cancel();
        Some(slot.entry)
    }

    pub fn contains(&self, temp_id: &CommentId) -> bool {
        self.slots.iter().any(|s| &s.entry.temp_id == temp_id)
    }

    /// Soft confirm: the entry stays, stamped as created `now`. Its expiry is unchanged.
    pub fn touch(&mut self, temp_id: &CommentId, now: DateTime<Utc>) -> bool {
        match self.slots.iter_mut().find(|s| &s.entry.temp_id == temp_id) {
            Some(slot) => {
                slot.entry.created_at_local = now;
                true
            }
            None => false,
        }
    }

    pub fn find_duplicate(
        &self,
        content: &str,
        parent_id: Option<&CommentId>,
    ) -> Option<&PendingEntry> {
        let key = normalize_content(content);
        self.slots
            .iter()
            .map(|s| &s.entry)
            .find(|e| e.parent_id.as_ref() == parent_id && normalize_content(&e.content) == key)
    }

    pub fn entries(&self) -> Vec<PendingEntry> {
        self.slots.iter().map(|s| s.entry.clone()).collect()
    }

    pub fn graduate(&mut self, matched: &HashSet<CommentId>) -> Vec<PendingEntry> {
        let mut graduated = Vec::new();
        self.slots.retain(|slot| {
            if matched.contains(&slot.entry.temp_id) {
                slot.timer.cancel();
                graduated.push(slot.entry.clone());
                false
            } else {
                true
            }
        });
        graduated
    }

    pub fn clear(&mut self) {
        for slot in self.slots.drain(..) {
            slot.timer.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(content: &str, parent: Option<&str>) -> PendingEntry {
        let now = Utc::now();
        PendingEntry {
            temp_id: CommentId::temp(now),
            content: content.to_string(),
            parent_id: parent.map(CommentId::from),
            created_at_local: now,
            expires_at: now + Duration::seconds(5),
        }
    }

    #[test]
    fn test_remove_cancels_timer() {
        let mut buffer = PendingBuffer::new();
        let e = entry("hello", None);
        let token = CancellationToken::new();
        buffer.push(e.clone(), token.clone());

        assert_eq!(buffer.remove(&e.temp_id), Some(e.clone()));
        assert!(token.is_cancelled());
        assert!(buffer.remove(&e.temp_id).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_find_duplicate_respects_parent() {
        let mut buffer = PendingBuffer::new();
        buffer.push(entry("Nice  chapter!", None), CancellationToken::new());
        buffer.push(entry("me too", Some("c1")), CancellationToken::new());

        assert!(buffer.find_duplicate("Nice chapter!", None).is_some());
        assert!(buffer
            .find_duplicate("Nice chapter!", Some(&CommentId::from("c1")))
            .is_none());
        assert!(buffer
            .find_duplicate("me too", Some(&CommentId::from("c1")))
            .is_some());
        assert!(buffer.find_duplicate("me too", None).is_none());
    }

    #[test]
    fn test_graduate_keeps_unmatched_in_order() {
        let mut buffer = PendingBuffer::new();
        let a = entry("a", None);
        let b = entry("b", None);
        let c = entry("c", None);
        let b_token = CancellationToken::new();
        buffer.push(a.clone(), CancellationToken::new());
        buffer.push(b.clone(), b_token.clone());
        buffer.push(c.clone(), CancellationToken::new());

        let graduated = buffer.graduate(&HashSet::from([b.temp_id.clone()]));
        assert_eq!(graduated, vec![b]);
        assert!(b_token.is_cancelled());
        assert_eq!(buffer.entries(), vec![a, c]);
    }

    #[test]
    fn test_touch_and_clear() {
        let mut buffer = PendingBuffer::new();
        let e = entry("x", None);
        let token = CancellationToken::new();
        buffer.push(e.clone(), token.clone());

        let later = e.created_at_local + Duration::seconds(3);
        assert!(buffer.touch(&e.temp_id, later));
        assert_eq!(buffer.entries()[0].created_at_local, later);
        assert_eq!(buffer.entries()[0].expires_at, e.expires_at);

        buffer.clear();
        assert!(token.is_cancelled());
        assert_eq!(buffer.len(), 0);
    }
}
