use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;

/// Guarantees one in-flight computation per key for callers that only
/// need reject-if-busy semantics (no queueing). Membership check and
/// insert are a single atomic operation on the underlying shard.
pub struct SingleFlightSet<K: Eq + Hash + Clone> {
    set: Arc<DashSet<K>>,
}

impl<K: Eq + Hash + Clone> SingleFlightSet<K> {
    pub fn new() -> Self {
        Self {
            set: Arc::new(DashSet::new()),
        }
    }

    /// Claim the key. Returns `None` when another flight holds it.
    pub fn try_begin(&self, key: K) -> Option<FlightGuard<K>> {
        if self.set.insert(key.clone()) {
            Some(FlightGuard {
                set: self.set.clone(),
                key,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.set.contains(key)
    }
}

impl<K: Eq + Hash + Clone> Default for SingleFlightSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Clone for SingleFlightSet<K> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
        }
    }
}

/// Releases the key when dropped.
pub struct FlightGuard<K: Eq + Hash + Clone> {
    set: Arc<DashSet<K>>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_rejected_until_release() {
        let flights: SingleFlightSet<String> = SingleFlightSet::new();
        let guard = flights.try_begin("fp".to_string()).unwrap();
        assert!(flights.try_begin("fp".to_string()).is_none());
        drop(guard);
        assert!(flights.try_begin("fp".to_string()).is_some());
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let flights: SingleFlightSet<&'static str> = SingleFlightSet::new();
        let _a = flights.try_begin("a").unwrap();
        assert!(flights.try_begin("b").is_some());
    }
}
