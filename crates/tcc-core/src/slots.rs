use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed map of independently locked optional values.
///
/// Operations on different keys never contend; operations on the same key are
/// serialized for as long as the returned guard is held.
///
/// Slots left empty and unreferenced are dropped the next time a new key is
/// locked, so the map holds at most the live values plus the slots in use.
pub struct KeyedSlots<K, V> {
    inner: Mutex<HashMap<K, Arc<Mutex<Option<V>>>>>,
}

impl<K, V> Default for KeyedSlots<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<Option<V>> {
        let slot = {
            let mut map = self.inner.lock().await;
            if !map.contains_key(key) {
                prune(&mut map);
            }
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };
        slot.lock_owned().await
    }

    pub async fn keys(&self) -> Vec<K> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// Lock every slot in turn and take its value out.
    pub async fn drain(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        for key in self.keys().await {
            let mut guard = self.lock(&key).await;
            if let Some(v) = guard.take() {
                out.push((key, v));
            }
        }
        out
    }
}

/// Drop slots that hold no value and that no guard or waiter references.
///
/// Slot handles are only cloned under the map lock, so a strong count of one
/// cannot grow while the caller holds it.
fn prune<K, V>(map: &mut HashMap<K, Arc<Mutex<Option<V>>>>) {
    map.retain(|_, slot| {
        Arc::strong_count(slot) > 1 || slot.try_lock().map_or(true, |v| v.is_some())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let slots: Arc<KeyedSlots<i64, u32>> = Arc::new(KeyedSlots::new());
        let guard = slots.lock(&1).await;

        let s2 = slots.clone();
        let waiter = tokio::spawn(async move {
            let mut g = s2.lock(&1).await;
            *g = Some(2);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
        assert_eq!(*slots.lock(&1).await, Some(2));
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let slots: KeyedSlots<i64, u32> = KeyedSlots::new();
        let _a = slots.lock(&1).await;
        let mut b = slots.lock(&2).await;
        *b = Some(5);
        assert_eq!(*b, Some(5));
    }

    #[tokio::test]
    async fn drain_takes_all_values() {
        let slots: KeyedSlots<i64, u32> = KeyedSlots::new();
        *slots.lock(&1).await = Some(10);
        *slots.lock(&2).await = Some(20);
        let _ = slots.lock(&3).await;

        let mut drained = slots.drain().await;
        drained.sort();
        assert_eq!(drained, vec![(1, 10), (2, 20)]);
        assert!(slots.lock(&1).await.is_none());
    }

    #[tokio::test]
    async fn empty_slots_do_not_accumulate() {
        let slots: KeyedSlots<i64, u32> = KeyedSlots::new();
        *slots.lock(&1).await = Some(10);
        for user in 100..200 {
            assert!(slots.lock(&user).await.is_none());
        }
        let mut keys = slots.keys().await;
        keys.sort();
        assert_eq!(keys, vec![1, 199]);

        // A held guard keeps its slot even while empty.
        let held = slots.lock(&2).await;
        let _ = slots.lock(&3).await;
        let mut keys = slots.keys().await;
        keys.sort();
        assert_eq!(keys, vec![1, 2, 3]);
        drop(held);
        assert_eq!(*slots.lock(&1).await, Some(10));
    }
}
