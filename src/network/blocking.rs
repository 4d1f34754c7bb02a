//! Blocked-client registry for blocking stream reads
//!
//! A client running XREAD BLOCK parks here until one of its streams grows
//! past the id it is waiting behind or its deadline passes. XADD notifies
//! the registry, which pushes wake requests onto a lock-free queue the
//! event loop drains between polls.

use crate::storage::StreamId;
use crossbeam::queue::SegQueue;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

/// A parked XREAD
#[derive(Debug, Clone)]
pub struct StreamWaiter {
    pub conn_id: u64,

    /// Keys being watched, with the id each read must exceed
    pub keys: Vec<Vec<u8>>,
    pub after: Vec<StreamId>,

    /// None blocks until data arrives
    pub deadline: Option<Instant>,
}

/// Wake request produced when a watched stream grows
#[derive(Debug)]
pub struct Wakeup {
    pub conn_id: u64,
    pub waiter: StreamWaiter,
}

pub struct BlockingManager {
    /// key -> conn ids waiting on it
    watchers: RwLock<HashMap<Vec<u8>, Vec<u64>>>,

    /// conn id -> full waiter record
    waiters: RwLock<HashMap<u64, StreamWaiter>>,

    wake_queue: SegQueue<Wakeup>,
}

impl BlockingManager {
    pub fn new() -> Self {
        BlockingManager {
            watchers: RwLock::new(HashMap::new()),
            waiters: RwLock::new(HashMap::new()),
            wake_queue: SegQueue::new(),
        }
    }

    /// Park a connection on its keys
    pub fn register(&self, waiter: StreamWaiter) {
        if let Ok(mut watchers) = self.watchers.write() {
            for key in &waiter.keys {
                watchers.entry(key.clone()).or_default().push(waiter.conn_id);
            }
        }
        if let Ok(mut waiters) = self.waiters.write() {
            waiters.insert(waiter.conn_id, waiter);
        }
    }

    /// Remove a connection from the registry, returning its waiter if it
    /// was parked. Called on wake, timeout and disconnect.
    pub fn unregister(&self, conn_id: u64) -> Option<StreamWaiter> {
        let waiter = self.waiters.write().ok()?.remove(&conn_id)?;
        if let Ok(mut watchers) = self.watchers.write() {
            for key in &waiter.keys {
                if let Some(ids) = watchers.get_mut(key) {
                    ids.retain(|id| *id != conn_id);
                    if ids.is_empty() {
                        watchers.remove(key);
                    }
                }
            }
        }
        Some(waiter)
    }

    pub fn is_blocked(&self, conn_id: u64) -> bool {
        self.waiters
            .read()
            .map(|w| w.contains_key(&conn_id))
            .unwrap_or(false)
    }

    /// Called after XADD: queue a wakeup for every connection watching the
    /// key. The event loop re-runs the read, so a spurious wake is safe.
    pub fn notify_key(&self, key: &[u8]) {
        let conn_ids = match self.watchers.read() {
            Ok(watchers) => watchers.get(key).cloned().unwrap_or_default(),
            Err(_) => return,
        };
        for conn_id in conn_ids {
            if let Some(waiter) = self.unregister(conn_id) {
                self.wake_queue.push(Wakeup { conn_id, waiter });
            }
        }
    }

    /// Drain queued wakeups, batched per loop tick
    pub fn process_wakeups(&self) -> Vec<Wakeup> {
        let mut wakeups = Vec::new();
        while wakeups.len() < 32 {
            match self.wake_queue.pop() {
                Some(wakeup) => wakeups.push(wakeup),
                None => break,
            }
        }
        wakeups
    }

    /// Waiters whose deadline has passed, removed from the registry
    pub fn process_timeouts(&self) -> Vec<StreamWaiter> {
        let now = Instant::now();
        let expired: Vec<u64> = match self.waiters.read() {
            Ok(waiters) => waiters
                .values()
                .filter(|w| w.deadline.map(|d| now >= d).unwrap_or(false))
                .map(|w| w.conn_id)
                .collect(),
            Err(_) => return Vec::new(),
        };

        expired
            .into_iter()
            .filter_map(|conn_id| self.unregister(conn_id))
            .collect()
    }

    /// Earliest pending deadline, used to size the poll sleep
    pub fn next_deadline(&self) -> Option<Instant> {
        self.waiters
            .read()
            .ok()?
            .values()
            .filter_map(|w| w.deadline)
            .min()
    }
}

impl Default for BlockingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn waiter(conn_id: u64, keys: &[&str], deadline: Option<Instant>) -> StreamWaiter {
        StreamWaiter {
            conn_id,
            keys: keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
            after: keys.iter().map(|_| StreamId::zero()).collect(),
            deadline,
        }
    }

    #[test]
    fn test_notify_wakes_watchers() {
        let manager = BlockingManager::new();
        manager.register(waiter(1, &["a"], None));
        manager.register(waiter(2, &["a", "b"], None));
        manager.register(waiter(3, &["c"], None));

        manager.notify_key(b"a");
        let wakeups = manager.process_wakeups();
        let mut ids: Vec<u64> = wakeups.iter().map(|w| w.conn_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        // Woken clients are fully unregistered
        assert!(!manager.is_blocked(1));
        assert!(!manager.is_blocked(2));
        assert!(manager.is_blocked(3));
    }

    #[test]
    fn test_notify_unwatched_key_is_noop() {
        let manager = BlockingManager::new();
        manager.register(waiter(1, &["a"], None));
        manager.notify_key(b"other");
        assert!(manager.process_wakeups().is_empty());
        assert!(manager.is_blocked(1));
    }

    #[test]
    fn test_unregister_on_disconnect() {
        let manager = BlockingManager::new();
        manager.register(waiter(1, &["a", "b"], None));
        assert!(manager.unregister(1).is_some());
        assert!(manager.unregister(1).is_none());

        manager.notify_key(b"a");
        assert!(manager.process_wakeups().is_empty());
    }

    #[test]
    fn test_timeouts() {
        let manager = BlockingManager::new();
        let past = Instant::now() - Duration::from_millis(1);
        let future = Instant::now() + Duration::from_secs(60);

        manager.register(waiter(1, &["a"], Some(past)));
        manager.register(waiter(2, &["a"], Some(future)));
        manager.register(waiter(3, &["a"], None));

        let expired = manager.process_timeouts();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].conn_id, 1);
        assert!(manager.is_blocked(2));
        assert!(manager.is_blocked(3));
    }

    #[test]
    fn test_next_deadline() {
        let manager = BlockingManager::new();
        assert!(manager.next_deadline().is_none());

        manager.register(waiter(1, &["a"], None));
        assert!(manager.next_deadline().is_none());

        let soon = Instant::now() + Duration::from_millis(10);
        manager.register(waiter(2, &["b"], Some(soon)));
        assert_eq!(manager.next_deadline(), Some(soon));
    }
}
