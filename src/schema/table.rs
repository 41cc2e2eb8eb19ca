use crate::schema::column::ColumnDefinition;
use crate::schema::relation::{ColumnIndex, IndexKind};
use crate::schema::TableId;

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub id: TableId,
    pub name: String,
    /// Host model bound to this table
    pub model_name: String,
    /// Stable order; drives materialization order
    pub columns: Vec<ColumnDefinition>,
    /// Positions of the primary-key columns, in key order
    pub primary_keys: Vec<usize>,
    pub indices: Vec<ColumnIndex>,
    pub use_cache: bool,
}

impl TableDefinition {
    /// Position of a column, matched by database name first, then property name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| self.columns.iter().position(|c| c.property.name == name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.primary_keys.iter().map(|&i| &self.columns[i])
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    /// Single-column indices other than the primary key, which back index-cache lookups
    pub fn lookup_indices(&self) -> impl Iterator<Item = (usize, &ColumnIndex)> {
        self.indices
            .iter()
            .enumerate()
            .filter(|(_, idx)| idx.is_single_column() && idx.kind != IndexKind::PrimaryKey)
    }

    pub fn index_on_column(&self, column: usize) -> Option<usize> {
        self.indices
            .iter()
            .position(|idx| idx.kind != IndexKind::PrimaryKey && idx.columns == [column])
    }
}
