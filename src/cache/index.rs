use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use dashmap::DashMap;
use crate::cache::adjust_counter;
use crate::core::types::{PrimaryKeys, Value};

struct IndexBucket {
    keys: Arc<[PrimaryKeys]>,
    inserted_at: Instant,
}

/// Foreign-key value to matching primary keys, for one indexed column
pub struct IndexCache {
    column: usize,
    buckets: DashMap<Value, IndexBucket>,
    key_count: AtomicU64,
    /// Upper bound on keys held across all buckets
    max_keys: Option<u64>,
}

impl IndexCache {
    pub fn new(column: usize, max_keys: Option<u64>) -> Self {
        IndexCache {
            column,
            buckets: DashMap::new(),
            key_count: AtomicU64::new(0),
            max_keys,
        }
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn get(&self, value: &Value) -> Option<Arc<[PrimaryKeys]>> {
        self.buckets.get(value).map(|b| b.keys.clone())
    }

    /// Store a key set. An entry that is already present wins.
    pub fn insert(&self, value: Value, keys: Vec<PrimaryKeys>) -> Arc<[PrimaryKeys]> {
        let count = keys.len() as u64;
        let mut added = false;
        let stored = self
            .buckets
            .entry(value)
            .or_insert_with(|| {
                added = true;
                IndexBucket { keys: keys.into(), inserted_at: Instant::now() }
            })
            .keys
            .clone();
        if added {
            self.key_count.fetch_add(count, Ordering::Relaxed);
            self.trim();
        }
        stored
    }

    /// Overwrite the key set for `value`
    pub fn replace(&self, value: Value, keys: Vec<PrimaryKeys>) -> Arc<[PrimaryKeys]> {
        let keys: Arc<[PrimaryKeys]> = keys.into();
        let count = keys.len() as u64;
        let old = self.buckets.insert(value, IndexBucket { keys: keys.clone(), inserted_at: Instant::now() });
        let removed = old.map_or(0, |b| b.keys.len() as u64);
        adjust_counter(&self.key_count, removed, count);
        self.trim();
        keys
    }

    pub fn remove(&self, value: &Value) -> bool {
        match self.buckets.remove(value) {
            Some((_, bucket)) => {
                adjust_counter(&self.key_count, bucket.keys.len() as u64, 0);
                true
            }
            None => false,
        }
    }

    /// Drop buckets populated before `cutoff`; returns how many went
    pub fn evict_older_than(&self, cutoff: Instant) -> usize {
        let stale: Vec<Value> = self
            .buckets
            .iter()
            .filter(|b| b.inserted_at < cutoff)
            .map(|b| b.key().clone())
            .collect();
        stale.iter().filter(|v| self.remove(v)).count()
    }

    /// Evict oldest buckets until within `max_keys`; returns how many went
    pub fn trim(&self) -> usize {
        let Some(max) = self.max_keys else {
            return 0;
        };
        if self.key_count.load(Ordering::Relaxed) <= max {
            return 0;
        }
        let mut by_age: Vec<(Instant, Value)> = self
            .buckets
            .iter()
            .map(|b| (b.inserted_at, b.key().clone()))
            .collect();
        by_age.sort_by_key(|(at, _)| *at);
        let mut removed = 0;
        for (_, value) in by_age {
            if self.key_count.load(Ordering::Relaxed) <= max {
                break;
            }
            if self.remove(&value) {
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) {
        self.buckets.clear();
        self.key_count.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn key_count(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keys(ids: &[i64]) -> Vec<PrimaryKeys> {
        ids.iter().map(|&i| PrimaryKeys::single(i)).collect()
    }

    #[test]
    fn first_insert_wins() {
        let index = IndexCache::new(1, None);
        index.insert(Value::Int(7), keys(&[1, 2]));
        let stored = index.insert(Value::Int(7), keys(&[3]));
        assert_eq!(stored.len(), 2);
        assert_eq!(index.key_count(), 2);

        index.replace(Value::Int(7), keys(&[3]));
        assert_eq!(index.get(&Value::Int(7)).unwrap().len(), 1);
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn trims_oldest_buckets_over_budget() {
        let index = IndexCache::new(1, Some(3));
        index.insert(Value::Int(1), keys(&[1, 2]));
        std::thread::sleep(Duration::from_millis(2));
        index.insert(Value::Int(2), keys(&[3, 4]));
        assert!(index.get(&Value::Int(1)).is_none());
        assert!(index.get(&Value::Int(2)).is_some());
        assert_eq!(index.key_count(), 2);
    }

    #[test]
    fn evicts_by_age() {
        let index = IndexCache::new(1, None);
        let before = Instant::now();
        index.insert(Value::Int(1), keys(&[1]));
        assert_eq!(index.evict_older_than(before), 0);
        assert_eq!(index.evict_older_than(Instant::now() + Duration::from_secs(1)), 1);
        assert!(index.is_empty());
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn key_count_never_wraps() {
        let index = IndexCache::new(1, None);
        index.insert(Value::Int(1), keys(&[1, 2, 3]));
        // a concurrent clear can zero the counter while a bucket is still being removed
        index.key_count.store(0, Ordering::Relaxed);
        assert!(index.remove(&Value::Int(1)));
        assert_eq!(index.key_count(), 0);
        index.replace(Value::Int(2), keys(&[4]));
        assert_eq!(index.key_count(), 1);
    }
}
