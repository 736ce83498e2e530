use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::Resolution;

/// Bounded memo of embedding content to resolution. Entries are only ever
/// added while below capacity and the whole cache is dropped when the
/// identity index is rebuilt.
pub struct ResolutionCache {
    entries: Mutex<HashMap<u64, Resolution>>,
    capacity: usize,
}

impl ResolutionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Content address of an embedding: a hash over the exact bit patterns.
    pub fn key(embedding: &[f32]) -> u64 {
        let mut hasher = DefaultHasher::new();
        embedding.len().hash(&mut hasher);
        for value in embedding {
            value.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<Resolution> {
        self.entries.lock().get(&key).cloned()
    }

    /// Returns false when the cache is full and the entry was not stored.
    pub fn insert(&self, key: u64, resolution: Resolution) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, resolution);
        true
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_follow_content() {
        let a = ResolutionCache::key(&[0.1, 0.2, 0.3]);
        assert_eq!(a, ResolutionCache::key(&[0.1, 0.2, 0.3]));
        assert_ne!(a, ResolutionCache::key(&[0.1, 0.2, 0.30001]));
    }

    #[test]
    fn test_capacity_is_respected() {
        let cache = ResolutionCache::new(2);
        assert!(cache.insert(1, Resolution::new("E1", 0.9)));
        assert!(cache.insert(2, Resolution::new("E2", 0.8)));
        assert!(!cache.insert(3, Resolution::new("E3", 0.7)));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1), Some(Resolution::new("E1", 0.9)));
        assert_eq!(cache.get(3), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
