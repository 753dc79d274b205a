use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::trace;

/// Cached value and the instant after which it must be recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Point in time copy of a [`TtlCache`]'s counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    /// Callers that queued behind a production and received its uncached outcome.
    pub shared: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    shared: AtomicU64,
}

#[derive(Debug)]
struct SlotState<V, E> {
    entry: Option<CacheEntry<V>>,
    /// Outcome of the latest production if it failed, handed to callers queued behind it.
    failed: Option<E>,
}

#[derive(Debug)]
struct Slot<V, E> {
    /// Bumped under the state lock each time a production completes.
    generation: AtomicU64,
    state: tokio::sync::Mutex<SlotState<V, E>>,
}

impl<V, E> Default for Slot<V, E> {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            state: tokio::sync::Mutex::new(SlotState {
                entry: None,
                failed: None,
            }),
        }
    }
}

/// Time-to-live memoisation keyed by call signature.
///
/// Each key owns an async lock, so concurrent misses for the same key run the producer once and
/// every caller queued behind it receives its outcome, failures included. Failed productions are
/// never served to callers arriving after they complete. Dropping a caller mid-production
/// releases the key's lock, and the next queued caller produces in its place.
#[derive(Debug)]
pub struct TtlCache<K, V, E> {
    slots: Mutex<FnvHashMap<K, Arc<Slot<V, E>>>>,
    counters: Counters,
}

impl<K, V, E> Default for TtlCache<K, V, E> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(FnvHashMap::default()),
            counters: Counters::default(),
        }
    }
}

impl<K, V, E> TtlCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key` if still fresh, otherwise run `producer`, storing a
    /// successful result for `ttl`.
    ///
    /// A caller that waited on a production in flight shares that production's outcome instead
    /// of running `producer` again, even when it failed or its value already expired.
    pub async fn get_or_compute<Producer, Fut>(
        &self,
        key: K,
        ttl: Duration,
        producer: Producer,
    ) -> Result<V, E>
    where
        Producer: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let arrived = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        let now = Instant::now();
        if let Some(cached) = state.entry.as_ref().filter(|cached| cached.is_fresh(now)) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.value.clone());
        }

        if slot.generation.load(Ordering::Acquire) != arrived {
            let outcome = match (&state.failed, &state.entry) {
                (Some(error), _) => Some(Err(error.clone())),
                (None, Some(cached)) => Some(Ok(cached.value.clone())),
                (None, None) => None,
            };
            if let Some(outcome) = outcome {
                self.counters.shared.fetch_add(1, Ordering::Relaxed);
                trace!("sharing outcome of production completed while queued");
                return outcome;
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let outcome = producer().await;
        match &outcome {
            Ok(value) => {
                state.entry = Some(CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                });
                state.failed = None;
            }
            Err(error) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                trace!("producer failed, result not cached");
                state.failed = Some(error.clone());
            }
        }
        slot.generation.fetch_add(1, Ordering::Release);

        outcome
    }

    /// Fresh cached value for `key`, without producing one.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots.lock().get(key).cloned()?;
        let state = slot.state.try_lock().ok()?;
        state
            .entry
            .as_ref()
            .filter(|cached| cached.is_fresh(Instant::now()))
            .map(|cached| cached.value.clone())
    }

    /// Forget `key`; the next call recomputes. A production already running for `key` completes
    /// into a detached slot.
    pub fn invalidate(&self, key: &K) -> bool {
        self.slots.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Drop idle slots holding no value or an expired one. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();

        slots.retain(|_, slot| {
            // Slots are only cloned under the map lock, so a single owner means nobody waits on it
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.state.try_lock() {
                Ok(state) => state.entry.as_ref().is_some_and(|cached| cached.is_fresh(now)),
                Err(_) => true,
            }
        });

        before - slots.len()
    }

    /// Number of keys currently tracked, fresh or not.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            shared: self.counters.shared.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, key: K) -> Arc<Slot<V, E>> {
        Arc::clone(self.slots.lock().entry(key).or_default())
    }
}
