use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Small TTL cache for expensive COUNT queries. Writers that change the
/// underlying rows call `invalidate` after commit; readers fall through to
/// the database on a miss or an expired entry.
pub struct CountCache<K> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (i64, Instant)>>,
}

impl<K: Hash + Eq + Clone> CountCache<K> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, key: &K) -> Option<i64> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((count, stored)) if stored.elapsed() < self.ttl => Some(*count),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: K, count: i64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (count, Instant::now()));
        }
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn hit_then_invalidate() {
        let cache = CountCache::new(Duration::from_secs(60));
        let merchant = Uuid::new_v4();
        assert_eq!(cache.get(&merchant), None);
        cache.put(merchant, 7);
        assert_eq!(cache.get(&merchant), Some(7));
        cache.invalidate(&merchant);
        assert_eq!(cache.get(&merchant), None);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = CountCache::new(Duration::from_millis(1));
        cache.put((), 3);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&()), None);
    }
}
