//! Per-process NLP model residency cache ("a per-process
//! LRU-like registry with configurable `max_models` and TTL"). Tracks which
//! processors currently have a resident (`load()`ed) model and evicts the
//! least-recently-used one on a cache miss when full, or anything past its
//! TTL on the worker's post-task hook sweep.
//!
//! This only tracks *residency*, not the model bytes themselves — eviction
//! means "the next `extract` call will need to `load()` again", which is
//! exactly what [`crate::processor::Processor::load`] already models as
//! idempotent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct ModelCache {
    max_models: usize,
    ttl: Duration,
    resident: HashMap<String, Instant>,
}

impl ModelCache {
    pub fn new(max_models: usize, ttl: Duration) -> Self {
        Self {
            max_models,
            ttl,
            resident: HashMap::new(),
        }
    }

    /// Record that `name`'s model was just used/loaded, evicting the
    /// least-recently-used entry first if the cache is full.
    pub fn touch(&mut self, name: &str) {
        if self.resident.contains_key(name) {
            self.resident.insert(name.to_string(), Instant::now());
            return;
        }

        if self.resident.len() >= self.max_models {
            if let Some(lru_name) = self
                .resident
                .iter()
                .min_by_key(|(_, last_used)| **last_used)
                .map(|(name, _)| name.clone())
            {
                self.resident.remove(&lru_name);
            }
        }

        self.resident.insert(name.to_string(), Instant::now());
    }

    /// Whether `name` needs a fresh `load()` before its next `extract` call.
    pub fn needs_load(&self, name: &str) -> bool {
        match self.resident.get(name) {
            Some(last_used) => last_used.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Post-task hook: drop every entry past its TTL, clearing transient
    /// model residency between jobs.
    pub fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.resident.retain(|_, last_used| last_used.elapsed() <= ttl);
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_lru_when_full() {
        let mut cache = ModelCache::new(2, Duration::from_secs(3600));
        cache.touch("a");
        cache.touch("b");
        cache.touch("c");
        assert_eq!(cache.resident_count(), 2);
        assert!(cache.needs_load("a"));
    }

    #[test]
    fn needs_load_is_true_for_unknown_processor() {
        let cache = ModelCache::new(3, Duration::from_secs(3600));
        assert!(cache.needs_load("unseen"));
    }

    #[test]
    fn evict_expired_drops_stale_entries() {
        let mut cache = ModelCache::new(3, Duration::from_millis(0));
        cache.touch("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.evict_expired();
        assert_eq!(cache.resident_count(), 0);
    }
}
