//! Caches for assembled course contexts.
//!
//! The router owns an `Arc<dyn ContextCache>`; a miss is always safe, so
//! implementations may drop entries whenever they like.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::models::CourseContext;

/// Key/value store for [`CourseContext`] values keyed by cache key.
pub trait ContextCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CourseContext>;
    fn set(&self, key: String, value: CourseContext);
    fn evict(&self, key: &str);
    fn len(&self) -> usize;
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    value: CourseContext,
    created: Instant,
    last_access: u64,
}

struct LruState {
    entries: HashMap<String, Entry>,
    tick: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Count-bounded LRU with an optional time-to-live.
///
/// Eviction order is fully deterministic: the entry with the oldest access
/// tick goes first. Expired entries are dropped on lookup.
pub struct MemoryContextCache {
    capacity: usize,
    ttl: Option<Duration>,
    state: Mutex<LruState>,
}

impl MemoryContextCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.created.elapsed() >= ttl)
    }
}

impl ContextCache for MemoryContextCache {
    fn get(&self, key: &str) -> Option<CourseContext> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = self.is_expired(state.entries.get(key)?);
        if expired {
            state.entries.remove(key);
            tracing::debug!(key, "context cache entry expired");
            return None;
        }
        let tick = state.next_tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_access = tick;
        Some(entry.value.clone())
    }

    fn set(&self, key: String, value: CourseContext) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let tick = state.next_tick();
        state.entries.insert(
            key,
            Entry {
                value,
                created: Instant::now(),
                last_access: tick,
            },
        );
        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    state.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    fn evict(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.remove(key);
    }

    fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.len()
    }

    fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.clear();
    }
}

/// Moka-backed cache: TinyLFU admission, size bound, time-to-live.
pub struct MokaContextCache {
    cache: Cache<String, CourseContext>,
}

impl MokaContextCache {
    pub fn new(max_entries: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(max_entries);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            cache: builder.build(),
        }
    }
}

impl ContextCache for MokaContextCache {
    fn get(&self, key: &str) -> Option<CourseContext> {
        self.cache.get(key)
    }

    fn set(&self, key: String, value: CourseContext) {
        self.cache.insert(key, value);
    }

    fn evict(&self, key: &str) {
        self.cache.invalidate(key);
    }

    fn len(&self) -> usize {
        // entry_count lags until pending maintenance runs.
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx(course: &str, text: &str) -> CourseContext {
        CourseContext {
            course_id: course.to_string(),
            materials: Vec::new(),
            context_text: text.to_string(),
            estimated_tokens: 1,
            built_at: Utc::now(),
            routing: None,
        }
    }

    #[test]
    fn test_get_after_set() {
        let cache = MemoryContextCache::new(4, None);
        cache.set("k".into(), ctx("c", "hello"));
        assert_eq!(cache.get("k").unwrap().context_text, "hello");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = MemoryContextCache::new(2, None);
        cache.set("a".into(), ctx("c", "a"));
        cache.set("b".into(), ctx("c", "b"));
        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get("a").is_some());
        cache.set("c".into(), ctx("c", "c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = MemoryContextCache::new(4, Some(Duration::ZERO));
        cache.set("k".into(), ctx("c", "stale"));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_and_clear() {
        let cache = MemoryContextCache::new(4, None);
        cache.set("a".into(), ctx("c", "a"));
        cache.set("b".into(), ctx("c", "b"));
        cache.evict("a");
        assert!(cache.get("a").is_none());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_moka_roundtrip_and_invalidate() {
        let cache = MokaContextCache::new(16, Some(Duration::from_secs(60)));
        cache.set("k".into(), ctx("c", "hello"));
        assert_eq!(cache.get("k").unwrap().context_text, "hello");
        assert_eq!(cache.len(), 1);
        cache.evict("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_trait_object_usable() {
        let caches: Vec<Box<dyn ContextCache>> = vec![
            Box::new(MemoryContextCache::new(2, None)),
            Box::new(MokaContextCache::new(2, None)),
        ];
        for cache in caches {
            cache.set("x".into(), ctx("c", "x"));
            assert!(cache.get("x").is_some());
            cache.clear();
            assert!(cache.get("x").is_none());
        }
    }

    fn hammer(cache: &dyn ContextCache) {
        std::thread::scope(|scope| {
            for t in 0..8 {
                scope.spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", (t + i) % 5);
                        cache.set(key.clone(), ctx("c", &key));
                        if let Some(found) = cache.get(&key) {
                            assert_eq!(found.context_text, key);
                        }
                        if i % 7 == 0 {
                            cache.evict(&key);
                        }
                    }
                });
            }
        });
    }

    #[test]
    fn test_concurrent_access_at_capacity_one() {
        let memory = MemoryContextCache::new(1, None);
        hammer(&memory);
        assert!(memory.len() <= 1);

        let moka = MokaContextCache::new(1, None);
        hammer(&moka);
        moka.clear();
        assert!((0..5).all(|i| moka.get(&format!("k{}", i)).is_none()));
    }
}
