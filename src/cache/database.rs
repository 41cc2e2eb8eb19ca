use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use crate::cache::cleanup::CleanupWorker;
use crate::cache::table::TableCache;
use crate::core::config::EvictionPolicy;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{CacheStats, DatabaseCacheStats, TableCacheStats};
use crate::core::types::PrimaryKeys;
use crate::schema::{DatabaseDefinition, TableId};

/// Row and index caches for every table of one database, with the limits
/// from its `CacheSettings` enforced by periodic cleanup.
pub struct DatabaseCache {
    definition: Arc<DatabaseDefinition>,
    tables: Vec<TableCache>,
    max_bytes: Option<u64>,
    max_rows: Option<u64>,
    max_age: Option<Duration>,
    eviction: EvictionPolicy,
    evicted_rows: AtomicU64,
    cleanup_runs: AtomicU64,
    cleanup_lock: Mutex<()>,
    worker: Mutex<Option<CleanupWorker>>,
}

struct Candidate {
    table: usize,
    keys: PrimaryKeys,
    inserted_at: Instant,
    size: u64,
}

impl DatabaseCache {
    pub fn new(definition: Arc<DatabaseDefinition>) -> Result<Arc<Self>> {
        let settings = &definition.cache;
        let tables = definition
            .tables
            .iter()
            .map(|t| TableCache::new(t.clone(), settings))
            .collect();
        let cache = Arc::new(DatabaseCache {
            max_bytes: settings.max_bytes(),
            max_rows: settings.max_rows(),
            max_age: settings.max_age(),
            eviction: settings.eviction,
            tables,
            evicted_rows: AtomicU64::new(0),
            cleanup_runs: AtomicU64::new(0),
            cleanup_lock: Mutex::new(()),
            worker: Mutex::new(None),
            definition,
        });

        if let (true, Some(interval)) = (cache.definition.cache.use_cache, cache.definition.cache.cleanup_interval()) {
            let worker = CleanupWorker::start(Arc::downgrade(&cache), &cache.definition.name, interval)?;
            *cache.worker.lock() = Some(worker);
            log::info!(
                "cache for '{}' started: cleanup every {:?}, max bytes {:?}, max rows {:?}, max age {:?}",
                cache.definition.name,
                interval,
                cache.max_bytes,
                cache.max_rows,
                cache.max_age
            );
        }
        Ok(cache)
    }

    pub fn definition(&self) -> &Arc<DatabaseDefinition> {
        &self.definition
    }

    pub fn table(&self, id: TableId) -> &TableCache {
        &self.tables[id.0]
    }

    pub fn table_by_name(&self, name: &str) -> Result<&TableCache> {
        self.tables
            .iter()
            .find(|t| t.table().name == name)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no cache for table '{}'", name)))
    }

    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(TableCache::len).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(TableCache::bytes).sum()
    }

    /// Enforce age, row and byte limits; returns the number of rows evicted
    pub fn run_cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub(crate) fn cleanup_at(&self, now: Instant) -> usize {
        let _guard = self.cleanup_lock.lock();
        let started = Instant::now();
        let mut evicted = 0;
        let mut buckets = 0;

        if let Some(cutoff) = self.max_age.and_then(|age| now.checked_sub(age)) {
            for table in &self.tables {
                let (rows, dropped) = table.evict_older_than(cutoff);
                evicted += rows;
                buckets += dropped;
            }
        }

        evicted += self.evict_to_limits();
        buckets += self.tables.iter().map(TableCache::trim_indices).sum::<usize>();

        self.evicted_rows.fetch_add(evicted as u64, Ordering::Relaxed);
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 || buckets > 0 {
            log::info!(
                "cache cleanup for '{}': evicted {} rows and {} index buckets in {:?}, {} rows / {} bytes remain",
                self.definition.name,
                evicted,
                buckets,
                started.elapsed(),
                self.total_rows(),
                self.total_bytes()
            );
        }
        evicted
    }

    fn over_limits(&self, rows: u64, bytes: u64) -> bool {
        self.max_rows.is_some_and(|max| rows > max) || self.max_bytes.is_some_and(|max| bytes > max)
    }

    fn evict_to_limits(&self) -> usize {
        let mut rows = self.total_rows() as u64;
        let mut bytes = self.total_bytes();
        if !self.over_limits(rows, bytes) {
            return 0;
        }

        let mut candidates: Vec<Candidate> = self
            .tables
            .iter()
            .enumerate()
            .flat_map(|(table, cache)| {
                cache.rows.iter().map(move |entry| Candidate {
                    table,
                    keys: entry.key().clone(),
                    inserted_at: entry.inserted_at,
                    size: entry.row.size() as u64,
                })
            })
            .collect();
        match self.eviction {
            EvictionPolicy::OldestFirst => candidates.sort_by_key(|c| c.inserted_at),
            EvictionPolicy::LargestFirst => candidates.sort_by(|a, b| b.size.cmp(&a.size).then(a.inserted_at.cmp(&b.inserted_at))),
        }

        let mut evicted = 0;
        for candidate in candidates {
            if !self.over_limits(rows, bytes) {
                break;
            }
            if self.tables[candidate.table].remove_row(&candidate.keys) {
                rows = rows.saturating_sub(1);
                bytes = bytes.saturating_sub(candidate.size);
                evicted += 1;
            }
        }
        evicted
    }

    /// Wake the cleanup worker; false if none is running
    pub fn run_cleanup_now(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(CleanupWorker::run_now)
    }

    /// Stop the cleanup worker and wait for it to exit
    pub fn stop_cleanup(&self) {
        let worker = self.worker.lock().take();
        drop(worker);
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn clear(&self) {
        for table in &self.tables {
            table.clear();
        }
    }

    pub fn stats(&self) -> DatabaseCacheStats {
        let tables: Vec<TableCacheStats> = self
            .tables
            .iter()
            .map(|t| TableCacheStats {
                table: t.table().name.clone(),
                enabled: t.is_enabled(),
                stats: t.stats(),
            })
            .collect();
        let mut total = CacheStats::default();
        for t in &tables {
            total.merge(&t.stats);
        }
        DatabaseCacheStats {
            database: self.definition.name.clone(),
            tables,
            total,
            max_bytes: self.max_bytes,
            max_rows: self.max_rows,
            evicted_rows: self.evicted_rows.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
        }
    }
}
