//! Keyed async gates
//!
//! A gate serializes one kind of work per key (dialing a device, opening a
//! device subscription). An entry lives only while someone holds or waits
//! on it, so keys taken from client input never accumulate.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub(crate) struct GateMap<K> {
    gates: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> GateMap<K> {
    pub(crate) fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive use of `key`
    pub(crate) async fn acquire(&self, key: &K) -> GatePass<'_, K> {
        let mut pass = GatePass {
            map: self,
            key: key.clone(),
            guard: None,
        };
        let gate = self
            .gates
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        pass.guard = Some(gate.lock_owned().await);
        pass
    }

    /// Keys with a holder or waiter
    pub(crate) fn len(&self) -> usize {
        self.gates.lock().len()
    }

    fn release(&self, key: &K) {
        let mut gates = self.gates.lock();
        // Waiters clone the gate under this lock, so a count of one means
        // the map holds the last reference.
        if gates.get(key).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(key);
        }
    }
}

/// Exclusive use of one key; released on drop
pub(crate) struct GatePass<'a, K: Eq + Hash + Clone> {
    map: &'a GateMap<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for GatePass<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.map.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let gates = GateMap::new();
        let pass = gates.acquire(&7u32).await;
        assert_eq!(gates.len(), 1);

        drop(pass);
        assert_eq!(gates.len(), 0);
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_queued() {
        let gates = Arc::new(GateMap::new());
        let first = gates.acquire(&1u32).await;

        let waiter = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                let _pass = gates.acquire(&1u32).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(gates.len(), 1);

        waiter.await.unwrap();
        assert_eq!(gates.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let gates = GateMap::new();
        let held = gates.acquire(&3u32).await;

        let waited = tokio::time::timeout(Duration::from_millis(10), gates.acquire(&3u32)).await;
        assert!(waited.is_err());

        drop(held);
        assert_eq!(gates.len(), 0);
    }
}
