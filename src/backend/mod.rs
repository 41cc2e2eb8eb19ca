//! Command execution boundary. Everything above this module speaks `Sql`
//! and `Value`; drivers live below it.

pub mod sqlite;

use crate::core::error::Result;
use crate::core::types::Value;
use crate::query::sql::Sql;
use crate::schema::DatabaseType;

pub use sqlite::SqliteConnector;

/// Rows returned by a query, values in backend representation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub affected: u64,
    /// Key assigned to the last inserted row, if the backend reports one
    pub last_insert_id: Option<i64>,
}

/// Connection factory for one logical database
pub trait Connector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    fn query(&self, sql: &Sql) -> Result<ResultSet>;

    fn execute(&self, sql: &Sql) -> Result<ExecResult>;

    fn begin(&self) -> Result<Box<dyn BackendTransaction>>;
}

/// An open backend transaction, owned by one thread at a time
pub trait BackendTransaction: Send {
    fn query(&mut self, sql: &Sql) -> Result<ResultSet>;

    fn execute(&mut self, sql: &Sql) -> Result<ExecResult>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
