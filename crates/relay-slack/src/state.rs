use std::collections::{HashMap, HashSet, VecDeque};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_core::messaging::outbox::Outbox;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// `message ts -> thread ts`, bounded. The oldest insertion goes first.
#[derive(Debug)]
pub struct ThreadMap {
    map: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ThreadMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, message_ts: &str, thread_ts: &str) {
        if let Some(existing) = self.map.get_mut(message_ts) {
            *existing = thread_ts.to_string();
            return;
        }
        self.map.insert(message_ts.to_string(), thread_ts.to_string());
        self.order.push_back(message_ts.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }

    pub fn get(&self, message_ts: &str) -> Option<&str> {
        self.map.get(message_ts).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Top-level mention ts values still waiting for their first reply, bounded
/// like [`ThreadMap`].
#[derive(Debug)]
pub struct AnchorSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl AnchorSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, ts: &str) {
        if !self.set.insert(ts.to_string()) {
            return;
        }
        self.order.push_back(ts.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }

    /// True when `ts` was still an anchor.
    pub fn remove(&mut self, ts: &str) -> bool {
        if !self.set.remove(ts) {
            return false;
        }
        self.order.retain(|t| t != ts);
        true
    }

    pub fn contains(&self, ts: &str) -> bool {
        self.set.contains(ts)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Running background tasks (socket listener, event consumer, outbox retry).
pub struct Listener {
    pub cancel: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
}

/// All mutable adapter state, guarded by a single lock.
pub struct SlackState {
    pub connection: ConnectionState,
    pub bot_user_id: String,
    pub threads: ThreadMap,
    pub anchors: AnchorSet,
    pub outbox: Outbox,
    pub listener: Option<Listener>,
}

impl SlackState {
    pub fn new(outbox_capacity: usize, thread_map_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            bot_user_id: String::new(),
            threads: ThreadMap::new(thread_map_capacity),
            anchors: AnchorSet::new(thread_map_capacity),
            outbox: Outbox::new(outbox_capacity),
            listener: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_map_evicts_in_insertion_order() {
        let mut m = ThreadMap::new(2);
        m.insert("1", "t1");
        m.insert("2", "t1");
        m.insert("1", "t9"); // update, not a new insertion
        m.insert("3", "t3");
        assert_eq!(m.len(), 2);
        assert_eq!(m.get("1"), None);
        assert_eq!(m.get("2"), Some("t1"));
        assert_eq!(m.get("3"), Some("t3"));
    }

    #[test]
    fn anchor_set_is_bounded_and_removal_is_one_shot() {
        let mut a = AnchorSet::new(2);
        a.insert("1");
        a.insert("2");
        a.insert("3");
        assert_eq!(a.len(), 2);
        assert!(!a.contains("1"));

        assert!(a.remove("2"));
        assert!(!a.remove("2"));
        a.insert("4");
        a.insert("5");
        assert_eq!(a.len(), 2);
        assert!(a.contains("4") && a.contains("5"));
        assert!(!a.contains("3"));
    }
}
