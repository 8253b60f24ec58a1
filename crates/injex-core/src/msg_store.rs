//! Per-session bounded message queues.
//!
//! One queue per session, each behind its own lock, so delivery for one
//! session never blocks appends or drains for another. Appends never fail:
//! past the cap the oldest entries are evicted, and messages for sessions
//! that no longer have a queue are dropped.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, RwLock},
};

use crate::event::EngineMessage;

/// Maximum number of messages retained per session.
pub const MAX_MESSAGES: usize = 1000;

/// A single session's bounded FIFO queue.
struct Queue {
    messages: Mutex<VecDeque<EngineMessage>>,
}

impl Queue {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(32)),
        }
    }

    fn append(&self, msg: EngineMessage) {
        let mut messages = self.messages.lock().unwrap();
        messages.push_back(msg);
        while messages.len() > MAX_MESSAGES {
            messages.pop_front();
        }
    }

    fn drain(&self) -> Vec<EngineMessage> {
        // Copy-then-clear under the lock; no I/O while held.
        self.messages.lock().unwrap().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

/// Store of per-session message queues.
///
/// The outer map lock is only held long enough to look up a queue; all
/// message traffic contends on the per-session lock alone.
pub struct MessageStore {
    queues: RwLock<HashMap<String, Queue>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Provision an empty queue for a session.
    pub fn provision(&self, session_id: &str) {
        self.queues
            .write()
            .unwrap()
            .entry(session_id.to_owned())
            .or_insert_with(Queue::new);
    }

    /// Whether a queue was provisioned for this session.
    #[must_use]
    pub fn exists(&self, session_id: &str) -> bool {
        self.queues.read().unwrap().contains_key(session_id)
    }

    /// Append a message to a session's queue, evicting the oldest entries
    /// past [`MAX_MESSAGES`]. Messages for unknown sessions are dropped.
    pub fn append(&self, session_id: &str, msg: EngineMessage) {
        let queues = self.queues.read().unwrap();
        if let Some(queue) = queues.get(session_id) {
            queue.append(msg);
        } else {
            tracing::debug!("Dropping message for unknown session {session_id}");
        }
    }

    /// Atomically snapshot and clear a session's queue, in arrival order.
    ///
    /// Returns an empty vec for unknown sessions.
    #[must_use]
    pub fn drain(&self, session_id: &str) -> Vec<EngineMessage> {
        self.queues
            .read()
            .unwrap()
            .get(session_id)
            .map(Queue::drain)
            .unwrap_or_default()
    }

    /// Number of messages currently pending for a session.
    #[must_use]
    pub fn pending(&self, session_id: &str) -> usize {
        self.queues
            .read()
            .unwrap()
            .get(session_id)
            .map_or(0, Queue::len)
    }

    /// Remove a session's queue, discarding anything still pending.
    pub fn remove(&self, session_id: &str) {
        self.queues.write().unwrap().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(n: usize) -> EngineMessage {
        EngineMessage::send(json!({ "n": n }))
    }

    #[test]
    fn test_append_and_drain_preserve_order() {
        let store = MessageStore::new();
        store.provision("s1");

        for n in 0..5 {
            store.append("s1", msg(n));
        }

        let drained = store.drain("s1");
        let ns: Vec<u64> = drained.iter().map(|m| m.payload["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);

        // The drain cleared the queue.
        assert!(store.drain("s1").is_empty());
        assert_eq!(store.pending("s1"), 0);
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let store = MessageStore::new();
        store.provision("s1");

        for n in 0..MAX_MESSAGES + 250 {
            store.append("s1", msg(n));
        }

        let drained = store.drain("s1");
        assert_eq!(drained.len(), MAX_MESSAGES);
        assert_eq!(drained[0].payload["n"], 250);
        assert_eq!(drained[MAX_MESSAGES - 1].payload["n"], MAX_MESSAGES + 249);
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = MessageStore::new();
        store.provision("a");
        store.provision("b");

        store.append("a", msg(1));
        store.append("b", msg(2));

        assert_eq!(store.drain("a").len(), 1);
        assert_eq!(store.pending("b"), 1);
    }

    #[test]
    fn test_unknown_session_never_fails() {
        let store = MessageStore::new();
        store.append("ghost", msg(0));
        assert!(store.drain("ghost").is_empty());
        assert!(!store.exists("ghost"));
    }

    #[test]
    fn test_concurrent_appends_land_in_exactly_one_drain() {
        use std::sync::Arc;

        let store = Arc::new(MessageStore::new());
        store.provision("s1");

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for n in 0..500 {
                    store.append("s1", msg(n));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 500 {
            seen.extend(store.drain("s1"));
            if writer.is_finished() {
                seen.extend(store.drain("s1"));
                break;
            }
        }
        writer.join().unwrap();
        seen.extend(store.drain("s1"));

        // Every append appears exactly once, in relative order.
        let ns: Vec<u64> = seen.iter().map(|m| m.payload["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, (0..500).collect::<Vec<u64>>());
    }
}
