use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheLimitKind {
    Rows,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Seconds,
    Minutes,
    Hours,
}

/// One eviction ceiling. Size kinds bound the cache, time kinds bound entry age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimit {
    pub kind: CacheLimitKind,
    pub value: u64,
}

impl CacheLimit {
    pub fn new(kind: CacheLimitKind, value: u64) -> Self {
        CacheLimit { kind, value }
    }

    pub fn rows(value: u64) -> Self {
        CacheLimit::new(CacheLimitKind::Rows, value)
    }

    pub fn megabytes(value: u64) -> Self {
        CacheLimit::new(CacheLimitKind::Megabytes, value)
    }

    pub fn minutes(value: u64) -> Self {
        CacheLimit::new(CacheLimitKind::Minutes, value)
    }

    /// Byte ceiling, if this is a size limit
    pub fn as_bytes(&self) -> Option<u64> {
        let unit = match self.kind {
            CacheLimitKind::Bytes => 1,
            CacheLimitKind::Kilobytes => 1024,
            CacheLimitKind::Megabytes => 1024 * 1024,
            CacheLimitKind::Gigabytes => 1024 * 1024 * 1024,
            _ => return None,
        };
        Some(self.value.saturating_mul(unit))
    }

    /// Max entry age, if this is a time limit
    pub fn as_duration(&self) -> Option<Duration> {
        let secs = match self.kind {
            CacheLimitKind::Seconds => 1,
            CacheLimitKind::Minutes => 60,
            CacheLimitKind::Hours => 3600,
            _ => return None,
        };
        Some(Duration::from_secs(self.value.saturating_mul(secs)))
    }

    pub fn as_rows(&self) -> Option<u64> {
        match self.kind {
            CacheLimitKind::Rows => Some(self.value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheCleanupKind {
    Seconds,
    Minutes,
    Hours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCleanup {
    pub kind: CacheCleanupKind,
    pub value: u64,
}

impl CacheCleanup {
    pub fn interval(&self) -> Duration {
        let secs = match self.kind {
            CacheCleanupKind::Seconds => 1,
            CacheCleanupKind::Minutes => 60,
            CacheCleanupKind::Hours => 3600,
        };
        Duration::from_secs(self.value.saturating_mul(secs).max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexCacheStrategy {
    None,
    All,
    /// Keep at most this many primary keys per indexed column
    MaxRows(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    OldestFirst,
    LargestFirst,
}

/// Per-database cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub use_cache: bool,
    pub limits: Vec<CacheLimit>,
    pub cleanup: Option<CacheCleanup>,
    pub index_cache: Option<IndexCacheStrategy>,
    pub eviction: EvictionPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            use_cache: true,
            limits: Vec::new(),
            cleanup: None,
            index_cache: None,
            eviction: EvictionPolicy::OldestFirst,
        }
    }
}

impl CacheSettings {
    pub const DEFAULT_SIZE_LIMIT_MB: u64 = 256;
    pub const DEFAULT_CLEANUP_MINUTES: u64 = 5;

    pub fn disabled() -> Self {
        CacheSettings {
            use_cache: false,
            ..CacheSettings::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let settings: CacheSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.limits.iter().find(|l| l.value == 0) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("cache limit {:?} must be greater than zero", limit.kind),
            ));
        }
        if let Some(IndexCacheStrategy::MaxRows(0)) = self.index_cache {
            return Err(Error::invalid_argument("index cache MaxRows must be greater than zero"));
        }
        Ok(())
    }

    /// Fill in defaults for anything left unspecified. Only applies when caching is on.
    pub fn apply_defaults(&mut self) {
        if !self.use_cache {
            return;
        }
        if self.limits.is_empty() {
            self.limits.push(CacheLimit::megabytes(Self::DEFAULT_SIZE_LIMIT_MB));
        }
        if self.cleanup.is_none() {
            self.cleanup = Some(CacheCleanup {
                kind: CacheCleanupKind::Minutes,
                value: Self::DEFAULT_CLEANUP_MINUTES,
            });
        }
        if self.index_cache.is_none() {
            self.index_cache = Some(IndexCacheStrategy::All);
        }
    }

    pub fn index_strategy(&self) -> IndexCacheStrategy {
        if !self.use_cache {
            return IndexCacheStrategy::None;
        }
        self.index_cache.unwrap_or(IndexCacheStrategy::All)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup.map(|c| c.interval())
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.limits.iter().filter_map(|l| l.as_bytes()).min()
    }

    pub fn max_rows(&self) -> Option<u64> {
        self.limits.iter().filter_map(|l| l.as_rows()).min()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.limits.iter().filter_map(|l| l.as_duration()).min()
    }
}
