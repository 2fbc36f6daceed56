use std::collections::VecDeque;

/// Default capacity when none is configured.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1000;

/// A pending outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    pub jid: String,
    pub text: String,
}

/// Outgoing queue for text that could not be delivered yet.
///
/// Filled while a channel is disconnected or when a send attempt fails, drained
/// in FIFO order on (re)connect. Capacity is enforced on `push` by dropping the
/// oldest entry; `requeue_front` only puts back an entry that was just popped.
#[derive(Debug)]
pub struct Outbox {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append to the tail. Returns the entry evicted to stay within capacity.
    pub fn push(&mut self, jid: &str, text: &str) -> Option<QueuedMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(QueuedMessage {
            jid: jid.to_string(),
            text: text.to_string(),
        });
        evicted
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    /// Put a failed retry back at the head so original order is preserved.
    pub fn requeue_front(&mut self, item: QueuedMessage) {
        self.items.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}
