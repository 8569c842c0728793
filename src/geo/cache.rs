//! Bounded least-recently-used cache for address -> coordinate lookups
//!
//! Failed lookups are cached as `None` so an unresolvable hop is not
//! queried again on the next trace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use super::{Address, GeoCoordinate};

pub const DEFAULT_CAPACITY: usize = 500;

/// Storage seam for the resolver; the eviction policy lives behind it.
pub trait CoordinateCache: Send + Sync {
    /// `None` = never looked up, `Some(None)` = looked up and unresolvable.
    fn get(&self, addr: &Address) -> Option<Option<GeoCoordinate>>;
    fn put(&self, addr: Address, value: Option<GeoCoordinate>);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Slot {
    value: Option<GeoCoordinate>,
    last_used: AtomicU64,
}

/// LRU cache where both reads and writes count as a use.
///
/// Recency is a per-slot stamp drawn from a shared clock. Reads only take the
/// shared lock and bump their slot's stamp, so hits on different keys never
/// wait on each other; inserts take the exclusive lock and evict the slot
/// with the oldest stamp.
pub struct LruCache {
    slots: RwLock<HashMap<Address, Slot>>,
    clock: AtomicU64,
    capacity: usize,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: RwLock::new(HashMap::with_capacity(capacity)),
            clock: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for LruCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CoordinateCache for LruCache {
    fn get(&self, addr: &Address) -> Option<Option<GeoCoordinate>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get(addr)?;
        slot.last_used.store(self.tick(), Ordering::Relaxed);
        Some(slot.value)
    }

    fn put(&self, addr: Address, value: Option<GeoCoordinate>) {
        let stamp = self.tick();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = slots.get_mut(&addr) {
            slot.value = value;
            *slot.last_used.get_mut() = stamp;
            return;
        }

        if slots.len() >= self.capacity() {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                debug!(addr = %key, capacity = self.capacity(), "evicting cached location");
                slots.remove(&key);
            }
        }

        slots.insert(
            addr,
            Slot {
                value,
                last_used: AtomicU64::new(stamp),
            },
        );
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(i: usize) -> Address {
        Address::new(format!("10.0.{}.{}", i / 256, i % 256))
    }

    #[test]
    fn stores_resolved_and_absent() {
        let cache = LruCache::new(4);
        let here = GeoCoordinate::new(-6.26, 53.35);
        cache.put(addr(1), Some(here));
        cache.put(addr(2), None);

        assert_eq!(cache.get(&addr(1)), Some(Some(here)));
        assert_eq!(cache.get(&addr(2)), Some(None));
        assert_eq!(cache.get(&addr(3)), None);
    }

    #[test]
    fn bound_evicts_least_recently_used() {
        let cache = LruCache::new(DEFAULT_CAPACITY);
        for i in 0..=DEFAULT_CAPACITY {
            cache.put(addr(i), None);
        }
        assert_eq!(cache.len(), DEFAULT_CAPACITY);
        assert_eq!(cache.get(&addr(0)), None);
        assert_eq!(cache.get(&addr(DEFAULT_CAPACITY)), Some(None));
    }

    #[test]
    fn reads_refresh_recency() {
        let cache = LruCache::new(3);
        cache.put(addr(1), None);
        cache.put(addr(2), None);
        cache.put(addr(3), None);

        // Touch the oldest entry so the next one becomes the victim
        assert!(cache.get(&addr(1)).is_some());
        cache.put(addr(4), None);

        assert!(cache.get(&addr(1)).is_some());
        assert_eq!(cache.get(&addr(2)), None);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(addr(1), None);
        cache.put(addr(2), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&addr(2)), Some(None));
    }

    #[test]
    fn overwrite_keeps_size() {
        let cache = LruCache::new(2);
        cache.put(addr(1), None);
        cache.put(addr(1), Some(GeoCoordinate::new(1.0, 2.0)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&addr(1)), Some(Some(GeoCoordinate::new(1.0, 2.0))));
    }

    #[test]
    fn concurrent_access_respects_bound() {
        let cache = Arc::new(LruCache::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.put(addr(t * 1000 + i), None);
                        let _ = cache.get(&addr(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
