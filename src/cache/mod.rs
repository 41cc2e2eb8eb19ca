//! Row and index caching between the query layer and a backend.

pub(crate) mod cleanup;
pub mod database;
pub mod index;
pub mod table;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use crate::core::error::Result;
use crate::core::types::{PrimaryKeys, RowData, Value};
use crate::schema::TableDefinition;

pub use database::DatabaseCache;
pub use index::IndexCache;
pub use table::{IndexChanged, TableCache};

/// Maximum number of keys fetched by a single key-set query
pub const KEY_CHUNK_SIZE: usize = 100;

/// Where cache misses are loaded from
pub trait RowSource: Send + Sync {
    /// Rows for a set of at most `KEY_CHUNK_SIZE` keys, in any order
    fn load_rows_by_keys(&self, table: &Arc<TableDefinition>, keys: &[PrimaryKeys]) -> Result<Vec<RowData>>;

    fn load_keys_by_value(&self, table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<PrimaryKeys>>;

    fn load_rows_by_value(&self, table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<RowData>>;
}

/// Swap `old` for `new` in a size counter without wrapping below zero
pub(crate) fn adjust_counter(counter: &AtomicU64, old: u64, new: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(old).saturating_add(new))
    });
}
