use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Entry {
    sem: Arc<Semaphore>,
    /// Holders plus waiters plus not-yet-queued acquirers. The entry is
    /// dropped when this reaches zero, so the table stays bounded by the
    /// number of keys currently in use.
    interested: usize,
}

type Table<K> = Arc<Mutex<HashMap<K, Entry>>>;

/// At-most-one task per key, FIFO waiters.
///
/// Registering interest and fetching the key's semaphore happen under one
/// table lock, so acquisition is atomic with the in-use mark: there is no
/// window where two tasks can each observe the key as free.
pub struct KeyedSemaphores<K: Eq + Hash + Clone> {
    table: Table<K>,
}

impl<K: Eq + Hash + Clone + Send + 'static> KeyedSemaphores<K> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for the key's permit. Waiters resume in arrival order (tokio
    /// semaphores are FIFO-fair). Dropping the returned future before it
    /// resolves unregisters the waiter.
    pub async fn acquire(&self, key: K) -> KeyPermit<K> {
        let sem = {
            let mut table = self.table.lock().unwrap();
            let entry = table.entry(key.clone()).or_insert_with(|| Entry {
                sem: Arc::new(Semaphore::new(1)),
                interested: 0,
            });
            entry.interested += 1;
            entry.sem.clone()
        };

        let interest = InterestGuard {
            table: self.table.clone(),
            key: Some(key),
        };

        let permit = sem
            .acquire_owned()
            .await
            .expect("keyed semaphore is never closed");

        KeyPermit {
            _permit: permit,
            _interest: interest,
        }
    }

    /// Number of keys with live holders or waiters. Empty queues are
    /// removed eagerly, so this is also the table's memory footprint.
    pub fn active_keys(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

impl<K: Eq + Hash + Clone + Send + 'static> Default for KeyedSemaphores<K> {
    fn default() -> Self {
        Self::new()
    }
}

struct InterestGuard<K: Eq + Hash + Clone> {
    table: Table<K>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone> Drop for InterestGuard<K> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else { return };
        let mut table = self.table.lock().unwrap();
        if let Some(entry) = table.get_mut(&key) {
            entry.interested -= 1;
            if entry.interested == 0 {
                table.remove(&key);
            }
        }
    }
}

/// RAII permit for one key. Field order matters: the semaphore permit is
/// released before the interest guard decides whether to drop the entry.
pub struct KeyPermit<K: Eq + Hash + Clone> {
    _permit: OwnedSemaphorePermit,
    _interest: InterestGuard<K>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn exclusive_per_key() {
        let pool = Arc::new(KeyedSemaphores::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = pool.acquire("fp-1".to_string()).await;
                let n = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_run_concurrently() {
        let pool = Arc::new(KeyedSemaphores::new());
        let a = pool.acquire("a".to_string()).await;
        // Must not deadlock: "b" has its own semaphore.
        let b = pool.acquire("b".to_string()).await;
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn table_self_cleans() {
        let pool = KeyedSemaphores::new();
        {
            let _permit = pool.acquire("fp-1".to_string()).await;
            assert_eq!(pool.active_keys(), 1);
        }
        assert_eq!(pool.active_keys(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_unregisters() {
        let pool = Arc::new(KeyedSemaphores::new());
        let held = pool.acquire("fp-1".to_string()).await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _p = pool.acquire("fp-1".to_string()).await;
            })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(pool.active_keys(), 0);
    }
}
