use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use dashmap::DashMap;
use parking_lot::RwLock;
use crate::cache::index::IndexCache;
use crate::cache::{adjust_counter, RowSource, KEY_CHUNK_SIZE};
use crate::core::config::{CacheSettings, IndexCacheStrategy};
use crate::core::error::Result;
use crate::core::stats::CacheStats;
use crate::core::types::{PrimaryKeys, RowData, Value};
use crate::events::WeakEventManager;
use crate::schema::TableDefinition;

/// Payload of the per-column invalidation event
#[derive(Debug, Clone, PartialEq)]
pub struct IndexChanged {
    pub table: String,
    pub column: String,
    pub value: Value,
}

pub(crate) struct CachedRow {
    pub(crate) row: Arc<RowData>,
    pub(crate) inserted_at: Instant,
}

/// Rows of one table keyed by primary key, plus one index cache per
/// single-column secondary index.
///
/// Loads never overwrite what a commit wrote: every committed change bumps
/// `generation`, and results of a backend read are only cached when no
/// change landed between the start of the read and the moment they are
/// stored.
pub struct TableCache {
    table: Arc<TableDefinition>,
    enabled: bool,
    pub(crate) rows: DashMap<PrimaryKeys, CachedRow>,
    bytes: AtomicU64,
    indices: Vec<IndexCache>,
    bulk_threshold: f64,
    hits: AtomicU64,
    misses: AtomicU64,
    generation: AtomicU64,
    /// Held exclusively while a change is applied, shared while loads are stored
    change_lock: RwLock<()>,
    events: WeakEventManager<IndexChanged>,
}

impl TableCache {
    pub const DEFAULT_BULK_THRESHOLD: f64 = 0.5;

    pub fn new(table: Arc<TableDefinition>, settings: &CacheSettings) -> Self {
        let enabled = settings.use_cache && table.use_cache && table.has_primary_key();
        let indices = match (enabled, settings.index_strategy()) {
            (false, _) | (_, IndexCacheStrategy::None) => Vec::new(),
            (true, IndexCacheStrategy::All) => lookup_columns(&table).map(|c| IndexCache::new(c, None)).collect(),
            (true, IndexCacheStrategy::MaxRows(max)) => {
                lookup_columns(&table).map(|c| IndexCache::new(c, Some(max))).collect()
            }
        };
        TableCache {
            table,
            enabled,
            rows: DashMap::new(),
            bytes: AtomicU64::new(0),
            indices,
            bulk_threshold: Self::DEFAULT_BULK_THRESHOLD,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            change_lock: RwLock::new(()),
            events: WeakEventManager::new(),
        }
    }

    /// Load missing rows one key at a time when fewer than `threshold` of a key set is missing
    pub fn with_bulk_threshold(mut self, threshold: f64) -> Self {
        self.bulk_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn table(&self) -> &Arc<TableDefinition> {
        &self.table
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Subscribe here for `IndexChanged`, keyed by column name
    pub fn events(&self) -> &WeakEventManager<IndexChanged> {
        &self.events
    }

    pub fn index_cache(&self, column: usize) -> Option<&IndexCache> {
        self.indices.iter().find(|i| i.column() == column)
    }

    /// Cached row without touching the backend or the counters
    pub fn peek(&self, keys: &PrimaryKeys) -> Option<Arc<RowData>> {
        self.rows.get(keys).map(|r| r.row.clone())
    }

    pub fn contains(&self, keys: &PrimaryKeys) -> bool {
        self.rows.contains_key(keys)
    }

    /// Cache a loaded row. If the key is already cached that entry is kept and returned.
    pub fn insert_row(&self, row: RowData) -> Arc<RowData> {
        if !self.enabled {
            return Arc::new(row);
        }
        let mut added = 0;
        let stored = self
            .rows
            .entry(row.keys().clone())
            .or_insert_with(|| {
                added = row.size() as u64;
                CachedRow { row: Arc::new(row), inserted_at: Instant::now() }
            })
            .row
            .clone();
        self.bytes.fetch_add(added, Ordering::Relaxed);
        stored
    }

    /// Put `row` in place of whatever is cached under its keys
    pub fn replace_row(&self, row: Arc<RowData>) {
        if !self.enabled {
            return;
        }
        let size = row.size() as u64;
        let old = self
            .rows
            .insert(row.keys().clone(), CachedRow { row, inserted_at: Instant::now() });
        adjust_counter(&self.bytes, old.map_or(0, |o| o.row.size() as u64), size);
    }

    pub fn remove_row(&self, keys: &PrimaryKeys) -> bool {
        match self.rows.remove(keys) {
            Some((_, old)) => {
                adjust_counter(&self.bytes, old.row.size() as u64, 0);
                true
            }
            None => false,
        }
    }

    /// Count of changes applied so far; capture it before a backend read
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store rows read from the backend since `generation`.
    ///
    /// If a change was applied in the meantime nothing is cached; rows the
    /// change already put in the cache are returned in place of the loaded ones.
    pub(crate) fn admit_rows(&self, rows: Vec<RowData>, generation: u64) -> Vec<Arc<RowData>> {
        let _guard = self.change_lock.read();
        self.admit_rows_locked(rows, generation)
    }

    pub fn get_row(&self, keys: &PrimaryKeys, source: &dyn RowSource) -> Result<Option<Arc<RowData>>> {
        Ok(self.get_rows_by_keys(std::slice::from_ref(keys), source)?.into_iter().next())
    }

    /// Rows for `keys` in the given order; keys with no row are skipped
    pub fn get_rows_by_keys(&self, keys: &[PrimaryKeys], source: &dyn RowSource) -> Result<Vec<Arc<RowData>>> {
        let mut found: HashMap<PrimaryKeys, Arc<RowData>> = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys {
            if key.has_null() || !seen.insert(key) {
                continue;
            }
            match self.peek(key) {
                Some(row) => {
                    found.insert(key.clone(), row);
                }
                None => missing.push(key.clone()),
            }
        }
        self.hits.fetch_add(found.len() as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        let generation = self.generation();
        for chunk in missing.chunks(KEY_CHUNK_SIZE) {
            let loaded = source.load_rows_by_keys(&self.table, chunk)?;
            for row in self.admit_rows(loaded, generation) {
                found.insert(row.keys().clone(), row);
            }
        }

        Ok(keys.iter().filter_map(|k| found.remove(k)).collect())
    }

    /// Rows whose `column` equals `value`, served through the index cache.
    ///
    /// The key set comes from the index cache (or one key-only query). Cached
    /// rows are used as-is; if fewer than the bulk threshold of them are
    /// missing those are fetched by key, otherwise the whole set is reloaded
    /// in one query.
    pub fn get_rows(&self, column: usize, value: &Value, source: &dyn RowSource) -> Result<Vec<Arc<RowData>>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        let Some(index) = self.index_cache(column) else {
            let generation = self.generation();
            let rows = source.load_rows_by_value(&self.table, column, value)?;
            self.misses.fetch_add(rows.len() as u64, Ordering::Relaxed);
            return Ok(self.admit_rows(rows, generation));
        };

        let keys = match index.get(value) {
            Some(keys) => keys,
            None => {
                let generation = self.generation();
                let loaded = source.load_keys_by_value(&self.table, column, value)?;
                log::debug!(
                    "index cache {}.{} = {}: loaded {} keys",
                    self.table.name,
                    self.table.columns[column].name,
                    value,
                    loaded.len()
                );
                let _guard = self.change_lock.read();
                if self.generation() == generation {
                    index.insert(value.clone(), loaded)
                } else {
                    loaded.into()
                }
            }
        };

        let missing = keys.iter().filter(|k| !self.contains(k)).count();
        if missing == 0 || (missing as f64) < self.bulk_threshold * keys.len() as f64 {
            return self.get_rows_by_keys(&keys, source);
        }

        log::debug!(
            "index cache {}.{} = {}: {} of {} rows missing, loading in bulk",
            self.table.name,
            self.table.columns[column].name,
            value,
            missing,
            keys.len()
        );
        let generation = self.generation();
        let loaded = source.load_rows_by_value(&self.table, column, value)?;
        self.hits.fetch_add((keys.len() - missing) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing as u64, Ordering::Relaxed);
        let _guard = self.change_lock.read();
        let rows = self.admit_rows_locked(loaded, generation);
        if self.generation() == generation {
            index.replace(value.clone(), rows.iter().map(|r| r.keys().clone()).collect());
        }
        Ok(rows)
    }

    fn admit_rows_locked(&self, rows: Vec<RowData>, generation: u64) -> Vec<Arc<RowData>> {
        if self.generation() == generation {
            rows.into_iter().map(|r| self.insert_row(r)).collect()
        } else {
            log::debug!("cache {}: changed during load, {} rows not cached", self.table.name, rows.len());
            rows.into_iter()
                .map(|r| self.peek(r.keys()).unwrap_or_else(|| Arc::new(r)))
                .collect()
        }
    }

    /// Drop index buckets for `value` and tell subscribers
    pub fn invalidate_index(&self, column: usize, value: &Value) {
        if value.is_null() {
            return;
        }
        {
            let _guard = self.change_lock.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.drop_bucket(column, value);
        }
        self.notify(column, value);
    }

    fn drop_bucket(&self, column: usize, value: &Value) {
        if let Some(index) = self.index_cache(column) {
            index.remove(value);
        }
    }

    fn notify(&self, column: usize, value: &Value) {
        let name = &self.table.columns[column].name;
        self.events.dispatch(
            name,
            self,
            &IndexChanged {
                table: self.table.name.clone(),
                column: name.clone(),
                value: value.clone(),
            },
        );
    }

    /// Reflect a committed insert, update or delete.
    ///
    /// `before` is the row as it was (none for inserts), `after` the row as
    /// it is now (none for deletes). Subscribers hear about the touched
    /// buckets once the cache is consistent again.
    pub fn apply_change(&self, before: Option<&RowData>, after: Option<Arc<RowData>>) {
        let mut touched: Vec<(usize, Value)> = Vec::new();
        {
            let _guard = self.change_lock.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            if let Some(old) = before {
                if after.as_ref().is_none_or(|new| new.keys() != old.keys()) {
                    self.remove_row(old.keys());
                }
            }
            for column in lookup_columns(&self.table) {
                let old_value = before.and_then(|r| r.value_at(column));
                let new_value = after.as_ref().and_then(|r| r.value_at(column));
                if old_value == new_value && before.is_some() && after.is_some() {
                    continue;
                }
                let mut changed = Vec::with_capacity(2);
                changed.extend(old_value);
                changed.extend(new_value.filter(|v| Some(*v) != old_value));
                for value in changed.into_iter().filter(|v| !v.is_null()) {
                    self.drop_bucket(column, value);
                    touched.push((column, value.clone()));
                }
            }
            if let Some(new) = after {
                self.replace_row(new);
            }
        }
        for (column, value) in &touched {
            self.notify(*column, value);
        }
    }

    /// Remove rows cached before `cutoff`, and index buckets likewise
    pub fn evict_older_than(&self, cutoff: Instant) -> (usize, usize) {
        let stale: Vec<PrimaryKeys> = self
            .rows
            .iter()
            .filter(|r| r.inserted_at < cutoff)
            .map(|r| r.key().clone())
            .collect();
        let rows = stale.iter().filter(|k| self.remove_row(k)).count();
        let buckets = self.indices.iter().map(|i| i.evict_older_than(cutoff)).sum();
        (rows, buckets)
    }

    pub(crate) fn trim_indices(&self) -> usize {
        self.indices.iter().map(IndexCache::trim).sum()
    }

    pub fn clear(&self) {
        self.rows.clear();
        self.bytes.store(0, Ordering::Relaxed);
        for index in &self.indices {
            index.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            rows: self.len(),
            bytes: self.bytes(),
            index_buckets: self.indices.iter().map(IndexCache::len).sum(),
            index_keys: self.indices.iter().map(IndexCache::key_count).sum(),
        }
    }
}

impl fmt::Debug for TableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCache")
            .field("table", &self.table.name)
            .field("enabled", &self.enabled)
            .field("rows", &self.len())
            .field("bytes", &self.bytes())
            .field("generation", &self.generation())
            .finish()
    }
}

fn lookup_columns(table: &TableDefinition) -> impl Iterator<Item = usize> + '_ {
    table.lookup_indices().map(|(_, idx)| idx.columns[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::schema::{ColumnBuilder, DatabaseBuilder, HostType, TableBuilder};
    use parking_lot::Mutex;
    use std::any::Any;

    /// In-memory backend that records what it was asked for
    struct FakeSource {
        table: Arc<TableDefinition>,
        rows: Vec<Vec<Value>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(table: Arc<TableDefinition>, count: i64) -> Self {
            let rows = (1..=count)
                .map(|id| vec![Value::Int(id), Value::Int(id % 2), Value::from(format!("row{}", id))])
                .collect();
            FakeSource { table, rows, calls: Mutex::new(Vec::new()) }
        }

        fn row(&self, values: &[Value]) -> RowData {
            RowData::new(self.table.clone(), values.to_vec()).unwrap()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl RowSource for FakeSource {
        fn load_rows_by_keys(&self, _table: &Arc<TableDefinition>, keys: &[PrimaryKeys]) -> Result<Vec<RowData>> {
            self.calls.lock().push(format!("keys:{}", keys.len()));
            Ok(self
                .rows
                .iter()
                .filter(|r| keys.iter().any(|k| k.values()[0] == r[0]))
                .map(|r| self.row(r))
                .collect())
        }

        fn load_keys_by_value(&self, _table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<PrimaryKeys>> {
            self.calls.lock().push("index".to_string());
            Ok(self
                .rows
                .iter()
                .filter(|r| &r[column] == value)
                .map(|r| PrimaryKeys::single(r[0].clone()))
                .collect())
        }

        fn load_rows_by_value(&self, _table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<RowData>> {
            self.calls.lock().push("bulk".to_string());
            Ok(self.rows.iter().filter(|r| &r[column] == value).map(|r| self.row(r)).collect())
        }
    }

    fn items(settings: &CacheSettings) -> TableCache {
        let db = DatabaseBuilder::new("t")
            .table(
                TableBuilder::new("groups").column(ColumnBuilder::new("id", HostType::Int64).primary_key()),
            )
            .table(
                TableBuilder::new("items")
                    .column(ColumnBuilder::new("id", HostType::Int64).primary_key())
                    .column(ColumnBuilder::new("group_id", HostType::Int64))
                    .column(ColumnBuilder::new("name", HostType::String))
                    .foreign_key("group_id", "groups", "id", "group", "items"),
            )
            .build()
            .unwrap();
        TableCache::new(db.tables[1].clone(), settings)
    }

    fn ids(rows: &[Arc<RowData>]) -> Vec<i64> {
        let mut ids: Vec<i64> = rows.iter().map(|r| r.value_at(0).and_then(Value::as_i64).unwrap()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn repeated_reads_return_the_same_instance() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 4);
        let key = PrimaryKeys::single(2i64);
        let first = cache.get_row(&key, &source).unwrap().unwrap();
        let second = cache.get_row(&key, &source).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls(), vec!["keys:1"]);
        let stats = cache.stats();
        assert_eq!((stats.hit_count, stats.miss_count), (1, 1));
        assert!(cache.get_row(&PrimaryKeys::single(99i64), &source).unwrap().is_none());
    }

    #[test]
    fn cold_key_set_loads_in_bulk() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 10);
        let rows = cache.get_rows(1, &Value::Int(0), &source).unwrap();
        assert_eq!(ids(&rows), vec![2, 4, 6, 8, 10]);
        assert_eq!(source.calls(), vec!["index", "bulk"]);
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn mostly_warm_key_set_loads_missing_by_key() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 10);
        // warm 4 of the 5 even rows
        cache
            .get_rows_by_keys(&[2i64, 4, 6, 8].map(PrimaryKeys::single), &source)
            .unwrap();
        let rows = cache.get_rows(1, &Value::Int(0), &source).unwrap();
        assert_eq!(ids(&rows), vec![2, 4, 6, 8, 10]);
        assert_eq!(source.calls(), vec!["keys:4", "index", "keys:1"]);
    }

    #[test]
    fn both_paths_return_the_same_set() {
        for threshold in [0.0, 1.0] {
            let cache = items(&CacheSettings::default()).with_bulk_threshold(threshold);
            let source = FakeSource::new(cache.table().clone(), 9);
            cache.get_row(&PrimaryKeys::single(3i64), &source).unwrap();
            let rows = cache.get_rows(1, &Value::Int(1), &source).unwrap();
            assert_eq!(ids(&rows), vec![1, 3, 5, 7, 9]);
            let last = source.calls().pop().unwrap();
            assert_eq!(last, if threshold == 0.0 { "bulk" } else { "keys:4" });
        }
    }

    #[test]
    fn key_loads_are_chunked() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 250);
        let keys: Vec<PrimaryKeys> = (1..=250i64).map(PrimaryKeys::single).collect();
        let rows = cache.get_rows_by_keys(&keys, &source).unwrap();
        assert_eq!(rows.len(), 250);
        assert_eq!(source.calls(), vec!["keys:100", "keys:100", "keys:50"]);
    }

    #[test]
    fn insert_is_idempotent() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 1);
        let a = cache.insert_row(source.row(&source.rows[0]));
        let b = cache.insert_row(source.row(&source.rows[0]));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.bytes(), a.size() as u64);
    }

    #[test]
    fn disabled_cache_always_loads() {
        let cache = items(&CacheSettings::disabled());
        let source = FakeSource::new(cache.table().clone(), 4);
        let key = PrimaryKeys::single(1i64);
        let first = cache.get_row(&key, &source).unwrap().unwrap();
        let second = cache.get_row(&key, &source).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(cache.is_empty());
        cache.get_rows(1, &Value::Int(1), &source).unwrap();
        assert_eq!(source.calls(), vec!["keys:1", "keys:1", "bulk"]);
    }

    struct Watcher {
        seen: Mutex<Vec<IndexChanged>>,
    }

    fn record(w: &Watcher, _sender: &dyn Any, change: &IndexChanged) -> Result<()> {
        w.seen.lock().push(change.clone());
        Ok(())
    }

    #[test]
    fn committed_changes_invalidate_old_and_new_buckets() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 4);
        let watcher = Arc::new(Watcher { seen: Mutex::new(Vec::new()) });
        cache.events().subscribe("group_id", &watcher, record);

        cache.get_rows(1, &Value::Int(0), &source).unwrap();
        cache.get_rows(1, &Value::Int(1), &source).unwrap();
        let index = cache.index_cache(1).unwrap();
        assert_eq!(index.len(), 2);

        let before = cache.peek(&PrimaryKeys::single(2i64)).unwrap();
        let after = Arc::new(source.row(&[Value::Int(2), Value::Int(1), Value::from("moved")]));
        cache.apply_change(Some(&*before), Some(after.clone()));

        assert!(index.is_empty());
        assert!(Arc::ptr_eq(&cache.peek(&PrimaryKeys::single(2i64)).unwrap(), &after));
        let seen: Vec<Value> = watcher.seen.lock().iter().map(|c| c.value.clone()).collect();
        assert_eq!(seen, vec![Value::Int(0), Value::Int(1)]);

        cache.apply_change(Some(&*after), None);
        assert!(cache.peek(&PrimaryKeys::single(2i64)).is_none());
        assert_eq!(watcher.seen.lock().len(), 3);
    }

    #[test]
    fn exactly_half_missing_loads_in_bulk() {
        // group 0 of 8 rows is 2, 4, 6, 8
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 8);
        cache.get_rows_by_keys(&[2i64, 4].map(PrimaryKeys::single), &source).unwrap();
        let rows = cache.get_rows(1, &Value::Int(0), &source).unwrap();
        assert_eq!(ids(&rows), vec![2, 4, 6, 8]);
        assert_eq!(source.calls(), vec!["keys:2", "index", "bulk"]);

        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 8);
        cache.get_rows_by_keys(&[2i64, 4, 6].map(PrimaryKeys::single), &source).unwrap();
        let rows = cache.get_rows(1, &Value::Int(0), &source).unwrap();
        assert_eq!(ids(&rows), vec![2, 4, 6, 8]);
        assert_eq!(source.calls(), vec!["keys:3", "index", "keys:1"]);
    }

    type Commit<'a> = Box<dyn FnOnce(&mut Vec<Vec<Value>>) + Send + 'a>;

    /// Backend where another writer commits between reading and returning
    struct RacingSource<'a> {
        table: Arc<TableDefinition>,
        rows: Mutex<Vec<Vec<Value>>>,
        commit: Mutex<Option<Commit<'a>>>,
    }

    impl<'a> RacingSource<'a> {
        fn new(table: Arc<TableDefinition>, count: i64) -> Self {
            let rows = (1..=count)
                .map(|id| vec![Value::Int(id), Value::Int(id % 2), Value::from(format!("row{}", id))])
                .collect();
            RacingSource { table, rows: Mutex::new(rows), commit: Mutex::new(None) }
        }

        /// Run `commit` after the next read has taken its snapshot
        fn commit_during_next_read(&self, commit: Commit<'a>) {
            *self.commit.lock() = Some(commit);
        }

        fn read(&self) -> Vec<Vec<Value>> {
            let snapshot = self.rows.lock().clone();
            let commit = self.commit.lock().take();
            if let Some(commit) = commit {
                let mut rows = self.rows.lock();
                commit(&mut *rows);
            }
            snapshot
        }

        fn row(&self, values: &[Value]) -> RowData {
            RowData::new(self.table.clone(), values.to_vec()).unwrap()
        }
    }

    impl RowSource for RacingSource<'_> {
        fn load_rows_by_keys(&self, _table: &Arc<TableDefinition>, keys: &[PrimaryKeys]) -> Result<Vec<RowData>> {
            Ok(self
                .read()
                .iter()
                .filter(|r| keys.iter().any(|k| k.values()[0] == r[0]))
                .map(|r| self.row(r))
                .collect())
        }

        fn load_keys_by_value(&self, _table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<PrimaryKeys>> {
            Ok(self
                .read()
                .iter()
                .filter(|r| &r[column] == value)
                .map(|r| PrimaryKeys::single(r[0].clone()))
                .collect())
        }

        fn load_rows_by_value(&self, _table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<RowData>> {
            Ok(self.read().iter().filter(|r| &r[column] == value).map(|r| self.row(r)).collect())
        }
    }

    fn new_odd_row(cache: &TableCache) -> Arc<RowData> {
        let values = vec![Value::Int(99), Value::Int(1), Value::from("row99")];
        Arc::new(RowData::new(cache.table().clone(), values).unwrap())
    }

    /// Push `row` into the backend and apply it to `cache`, as a commit would
    fn insert_commit<'a>(cache: &'a TableCache, row: Arc<RowData>) -> Commit<'a> {
        Box::new(move |rows: &mut Vec<Vec<Value>>| {
            rows.push(row.values().to_vec());
            cache.apply_change(None, Some(row));
        })
    }

    #[test]
    fn insert_committed_during_key_load_is_not_lost() {
        let cache = items(&CacheSettings::default());
        let source = RacingSource::new(cache.table().clone(), 4);
        cache.get_rows_by_keys(&[1i64, 3].map(PrimaryKeys::single), &source).unwrap();

        let row99 = new_odd_row(&cache);
        source.commit_during_next_read(insert_commit(&cache, row99.clone()));
        let stale = cache.get_rows(1, &Value::Int(1), &source).unwrap();
        assert_eq!(ids(&stale), vec![1, 3]);
        assert!(cache.index_cache(1).unwrap().get(&Value::Int(1)).is_none());

        let rows = cache.get_rows(1, &Value::Int(1), &source).unwrap();
        assert_eq!(ids(&rows), vec![1, 3, 99]);
        assert!(rows.iter().any(|r| Arc::ptr_eq(r, &row99)));
        assert_eq!(cache.index_cache(1).unwrap().get(&Value::Int(1)).unwrap().len(), 3);
    }

    #[test]
    fn insert_committed_during_bulk_load_keeps_bucket_out() {
        let cache = items(&CacheSettings::default());
        let source = RacingSource::new(cache.table().clone(), 4);
        let index = cache.index_cache(1).unwrap();
        index.insert(Value::Int(1), vec![PrimaryKeys::single(1i64), PrimaryKeys::single(3i64)]);

        let row99 = new_odd_row(&cache);
        source.commit_during_next_read(insert_commit(&cache, row99.clone()));
        let stale = cache.get_rows(1, &Value::Int(1), &source).unwrap();
        assert_eq!(ids(&stale), vec![1, 3]);
        assert!(index.get(&Value::Int(1)).is_none());
        assert!(!cache.contains(&PrimaryKeys::single(1i64)));

        let rows = cache.get_rows(1, &Value::Int(1), &source).unwrap();
        assert_eq!(ids(&rows), vec![1, 3, 99]);
        assert!(rows.iter().any(|r| Arc::ptr_eq(r, &row99)));
        assert_eq!(index.get(&Value::Int(1)).unwrap().len(), 3);
    }

    #[test]
    fn delete_committed_during_row_load_is_not_resurrected() {
        let cache = items(&CacheSettings::default());
        let source = RacingSource::new(cache.table().clone(), 4);
        let key = PrimaryKeys::single(2i64);
        let deleted = source.row(&[Value::Int(2), Value::Int(0), Value::from("row2")]);
        let cache_ref = &cache;
        source.commit_during_next_read(Box::new(move |rows: &mut Vec<Vec<Value>>| {
            rows.retain(|r| r[0] != Value::Int(2));
            cache_ref.apply_change(Some(&deleted), None);
        }));

        assert!(cache.get_row(&key, &source).unwrap().is_some());
        assert!(cache.peek(&key).is_none());
        assert!(cache.get_row(&key, &source).unwrap().is_none());
    }

    #[test]
    fn byte_count_saturates_at_zero() {
        let cache = items(&CacheSettings::default());
        let source = FakeSource::new(cache.table().clone(), 2);
        let row = cache.insert_row(source.row(&source.rows[0]));
        cache.bytes.store(1, Ordering::Relaxed);
        assert!(cache.remove_row(row.keys()));
        assert_eq!(cache.bytes(), 0);

        cache.insert_row(source.row(&source.rows[1]));
        cache.bytes.store(0, Ordering::Relaxed);
        let bigger = Arc::new(source.row(&[Value::Int(2), Value::Int(0), Value::from("a much longer name")]));
        cache.replace_row(bigger.clone());
        assert_eq!(cache.bytes(), bigger.size() as u64);
    }

    #[test]
    fn debug_output_names_the_table() {
        let cache = items(&CacheSettings::default());
        let text = format!("{:?}", cache);
        assert!(text.contains("items"));
        assert!(text.contains("rows: 0"));
    }

    #[test]
    fn source_errors_propagate() {
        struct Broken;
        impl RowSource for Broken {
            fn load_rows_by_keys(&self, _: &Arc<TableDefinition>, _: &[PrimaryKeys]) -> Result<Vec<RowData>> {
                Err(Error::invalid_argument("backend down"))
            }
            fn load_keys_by_value(&self, _: &Arc<TableDefinition>, _: usize, _: &Value) -> Result<Vec<PrimaryKeys>> {
                Err(Error::invalid_argument("backend down"))
            }
            fn load_rows_by_value(&self, _: &Arc<TableDefinition>, _: usize, _: &Value) -> Result<Vec<RowData>> {
                Err(Error::invalid_argument("backend down"))
            }
        }
        let cache = items(&CacheSettings::default());
        assert!(cache.get_row(&PrimaryKeys::single(1i64), &Broken).is_err());
        assert!(cache.get_rows(1, &Value::Int(1), &Broken).is_err());
        assert!(cache.is_empty());
    }
}
