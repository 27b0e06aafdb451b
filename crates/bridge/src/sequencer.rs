//! Arrival-order serialization per key.
//!
//! Events for the same (bridge, origin message) must be processed in the order
//! they arrived, since an edit depends on the link written by the create before
//! it. Work on different keys runs freely in parallel.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

use tokio::sync::oneshot;

struct Tail {
    ticket: u64,
    done: oneshot::Receiver<()>,
}

struct Inner<K> {
    tails: HashMap<K, Tail>,
    next_ticket: u64,
}

/// Hands out [`Turn`]s that complete in the order they were taken.
pub struct KeySequencer<K> {
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Default for KeySequencer<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tails: HashMap::new(),
                next_ticket: 0,
            })),
        }
    }
}

impl<K: Eq + Hash + Clone> KeySequencer<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next turn for `key`. Must be called synchronously at event
    /// arrival; the order of calls is the processing order.
    pub fn enqueue(&self, key: K) -> Turn<K> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        let previous = inner.tails.insert(key.clone(), Tail {
            ticket,
            done: done_rx,
        });

        Turn {
            key,
            ticket,
            previous: previous.map(|tail| tail.done),
            _done: done_tx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Keys with work queued or running.
    pub fn pending_keys(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).tails.len()
    }
}

/// A place in line for one key. Dropping it lets the next turn proceed, so
/// hold it until the work is finished. A turn dropped before it became ready
/// also releases its successor.
pub struct Turn<K: Eq + Hash> {
    key: K,
    ticket: u64,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K: Eq + Hash> Turn<K> {
    /// Wait until every earlier turn for this key has been dropped.
    pub async fn ready(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The sender is never used; completion is signalled by drop.
            let _ = previous.await;
        }
    }
}

impl<K: Eq + Hash> Drop for Turn<K> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner
            .tails
            .get(&self.key)
            .is_some_and(|tail| tail.ticket == self.ticket)
        {
            inner.tails.remove(&self.key);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::time::Duration,
        tokio::sync::Mutex as AsyncMutex,
    };

    #[tokio::test]
    async fn same_key_runs_in_arrival_order() {
        let seq = KeySequencer::new();
        let log = Arc::new(AsyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        // The first turn is the slowest; later ones must still wait for it.
        for (i, delay) in [(0u64, 40u64), (1, 0), (2, 10)] {
            let mut turn = seq.enqueue("k");
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                turn.ready().await;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().await.push(i);
                drop(turn);
            }));
        }
        for h in handles.into_iter().rev() {
            h.await.unwrap();
        }

        assert_eq!(*log.lock().await, vec![0, 1, 2]);
        assert_eq!(seq.pending_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_wait() {
        let seq = KeySequencer::new();
        let _blocker = seq.enqueue("a");
        let mut other = seq.enqueue("b");
        tokio::time::timeout(Duration::from_millis(100), other.ready())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn waiter_blocks_until_predecessor_dropped() {
        let seq = KeySequencer::new();
        let first = seq.enqueue("a");
        let mut second = seq.enqueue("a");

        let pending = tokio::time::timeout(Duration::from_millis(30), second.ready()).await;
        assert!(pending.is_err());

        drop(first);
        tokio::time::timeout(Duration::from_millis(100), second.ready())
            .await
            .unwrap();
    }

    #[test]
    fn table_is_cleared_when_last_turn_finishes() {
        let seq = KeySequencer::new();
        let first = seq.enqueue("a");
        let second = seq.enqueue("a");
        assert_eq!(seq.pending_keys(), 1);

        // Dropping the older turn must not remove the newer tail.
        drop(first);
        assert_eq!(seq.pending_keys(), 1);
        drop(second);
        assert_eq!(seq.pending_keys(), 0);
    }
}
