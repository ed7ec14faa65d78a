//! Bounded message history kept by the manager.

use std::collections::VecDeque;

use realtime_protocol::InboundMessage;

/// Bounded, newest-first record of recent inbound messages.
///
/// Backed by a `VecDeque`. Appending inserts at the front and evicts the
/// oldest entry once the buffer is over capacity. Iteration order is
/// newest → oldest.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    buf: VecDeque<InboundMessage>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer with the given maximum capacity. Zero is
    /// raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend a message, dropping the oldest when over capacity.
    pub fn append(&mut self, message: InboundMessage) {
        self.buf.push_front(message);
        self.buf.truncate(self.capacity);
    }

    /// The most recently appended message, if any.
    pub fn last(&self) -> Option<&InboundMessage> {
        self.buf.front()
    }

    /// Iterate from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &InboundMessage> {
        self.buf.iter()
    }

    /// Owned copy of the contents, newest first.
    pub fn snapshot(&self) -> Vec<InboundMessage> {
        self.buf.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove all messages. `last()` is `None` afterwards.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: usize) -> InboundMessage {
        InboundMessage::new("system_notification", serde_json::json!({ "n": n }))
    }

    #[test]
    fn append_is_newest_first() {
        let mut history = HistoryBuffer::new(5);
        history.append(msg(1));
        history.append(msg(2));
        history.append(msg(3));

        let ns: Vec<u64> = history.iter().map(|m| m.data["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![3, 2, 1]);
        assert_eq!(history.last().unwrap().data["n"], 3);
    }

    #[test]
    fn overflow_keeps_exactly_capacity() {
        let mut history = HistoryBuffer::new(100);
        for n in 0..250 {
            history.append(msg(n));
        }

        assert_eq!(history.len(), 100);
        assert_eq!(history.last().unwrap().data["n"], 249);
        // Oldest surviving entry is the 100th most recent.
        assert_eq!(history.iter().last().unwrap().data["n"], 150);
    }

    #[test]
    fn duplicates_are_kept() {
        let mut history = HistoryBuffer::new(3);
        let m = msg(7);
        history.append(m.clone());
        history.append(m);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn clear_resets_last() {
        let mut history = HistoryBuffer::new(3);
        history.append(msg(1));
        history.clear();

        assert!(history.is_empty());
        assert!(history.last().is_none());
        assert_eq!(history.capacity(), 3);
    }

    #[test]
    fn snapshot_is_detached() {
        let mut history = HistoryBuffer::new(3);
        history.append(msg(1));
        let snap = history.snapshot();
        history.append(msg(2));

        assert_eq!(snap.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut history = HistoryBuffer::new(0);
        assert_eq!(history.capacity(), 1);

        history.append(msg(1));
        history.append(msg(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().data["n"], 2);
    }
}
