//! In-memory schema metadata: databases, tables, columns, indices and relations.

pub mod builder;
pub mod column;
pub mod database;
pub mod db_type;
pub mod relation;
pub mod table;

pub use builder::{ColumnBuilder, DatabaseBuilder, TableBuilder};
pub use column::{ColumnDefinition, DefaultValue, HostType, ValueProperty};
pub use database::{DatabaseDefinition, DatabaseModel, DefinitionRegistry};
pub use db_type::{DatabaseColumnType, DatabaseType};
pub use relation::{ColumnIndex, IndexKind, RelationDefinition, RelationPart, RelationSide};
pub use table::TableDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId {
    pub table: TableId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationId(pub usize);
