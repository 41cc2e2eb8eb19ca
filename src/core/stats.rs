use serde::{Deserialize, Serialize};

/// Counters for one table cache, or a sum over several
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub rows: usize,
    pub bytes: u64,
    pub index_buckets: usize,
    pub index_keys: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.hit_count += other.hit_count;
        self.miss_count += other.miss_count;
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.index_buckets += other.index_buckets;
        self.index_keys += other.index_keys;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCacheStats {
    pub table: String,
    pub enabled: bool,
    pub stats: CacheStats,
}

/// Snapshot of a whole database cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCacheStats {
    pub database: String,
    pub tables: Vec<TableCacheStats>,
    pub total: CacheStats,
    pub max_bytes: Option<u64>,
    pub max_rows: Option<u64>,
    /// Rows removed by cleanup since the cache was created
    pub evicted_rows: u64,
    pub cleanup_runs: u64,
}

impl DatabaseCacheStats {
    pub fn table(&self, name: &str) -> Option<&CacheStats> {
        self.tables.iter().find(|t| t.table == name).map(|t| &t.stats)
    }

    /// Fraction of the byte ceiling in use, if one is set
    pub fn utilization(&self) -> Option<f64> {
        self.max_bytes
            .filter(|max| *max > 0)
            .map(|max| self.total.bytes as f64 / max as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_and_merge() {
        let mut a = CacheStats { hit_count: 3, miss_count: 1, rows: 2, ..Default::default() };
        assert_eq!(a.hit_rate(), 0.75);
        a.merge(&CacheStats { hit_count: 1, miss_count: 3, rows: 1, ..Default::default() });
        assert_eq!(a.hit_rate(), 0.5);
        assert_eq!(a.rows, 3);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
