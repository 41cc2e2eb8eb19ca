use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use crate::backend::BackendTransaction;
use crate::core::database::DataSource;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{MutableRow, PrimaryKeys, RowData, Value};
use crate::query::sql::{delete_sql, insert_sql, update_sql};
use crate::schema::{TableDefinition, TableId};

/// Transaction ID generator
static TRANSACTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
    /// Dropped while open; the backend transaction was rolled back
    Closed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One executed mutation, applied to the cache on commit
#[derive(Debug, Clone)]
pub struct StateChange {
    pub kind: ChangeKind,
    pub table: TableId,
    /// Row before the change; `None` for inserts
    pub before: Option<Arc<RowData>>,
    /// Row after the change; `None` for deletes
    pub after: Option<Arc<RowData>>,
}

impl StateChange {
    pub fn keys(&self) -> Option<&PrimaryKeys> {
        self.after.as_ref().or(self.before.as_ref()).map(|r| r.keys())
    }
}

/// Unit of work against one data source.
///
/// Every insert, update and delete runs against the backend transaction
/// immediately so failures surface at the call. The cache only sees the
/// changes after `commit` succeeds; `rollback` (or dropping an open
/// transaction) leaves it untouched.
pub struct Transaction<'a> {
    id: u64,
    source: &'a DataSource,
    backend: Option<Box<dyn BackendTransaction>>,
    state: TransactionState,
    changes: Vec<StateChange>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(source: &'a DataSource) -> Result<Self> {
        let backend = source.connector().begin()?;
        let id = TRANSACTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        log::debug!("transaction {} opened on '{}'", id, source.definition().name);
        Ok(Transaction {
            id,
            source,
            backend: Some(backend),
            state: TransactionState::Open,
            changes: Vec::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Changes executed so far, in order
    pub fn changes(&self) -> &[StateChange] {
        &self.changes
    }

    fn check_open(&self, operation: &str) -> Result<()> {
        if self.state != TransactionState::Open {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("cannot {} in transaction {}: it is {}", operation, self.id, self.state),
            ));
        }
        Ok(())
    }

    fn backend(&mut self) -> Result<&mut Box<dyn BackendTransaction>> {
        let (id, state) = (self.id, self.state);
        self.backend.as_mut().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidState,
                format!("transaction {} has no backend transaction ({})", id, state),
            )
        })
    }

    fn table_of(&self, table: &Arc<TableDefinition>) -> Result<TableId> {
        let own = self.source.definition().table(&table.name).filter(|t| t.id == table.id);
        match own {
            Some(t) => Ok(t.id),
            None => Err(Error::invalid_argument(format!(
                "table '{}' does not belong to database '{}'",
                table.name,
                self.source.definition().name
            ))),
        }
    }

    /// Insert a new row; returns it as stored, with defaults and generated keys filled in
    pub fn insert(&mut self, mut row: MutableRow) -> Result<Arc<RowData>> {
        self.check_open("insert")?;
        let table = row.table().clone();
        let table_id = self.table_of(&table)?;
        if let Some(original) = row.original() {
            return Err(Error::invalid_argument(format!(
                "row {} of '{}' is already stored; update it instead",
                original.keys(),
                table.name
            )));
        }

        for (index, column) in table.columns.iter().enumerate() {
            if !row.values()[index].is_null() {
                continue;
            }
            if let Some(default) = &column.property.default {
                row.set_at(index, default.resolve());
            } else if !column.nullable && !column.auto_increment {
                return Err(Error::invalid_argument(format!(
                    "column '{}.{}' is not nullable and has no value",
                    table.name, column.name
                )));
            }
        }

        let sql = insert_sql(self.source.dialect(), &table, row.values())?;
        log::debug!("tx {}: {}", self.id, sql);
        let result = self.backend()?.execute(&sql)?;

        let pending: Vec<usize> = table
            .primary_keys
            .iter()
            .copied()
            .filter(|&i| table.columns[i].auto_increment && row.values()[i].is_null())
            .collect();
        for index in pending {
            let id = result.last_insert_id.ok_or_else(|| {
                Error::new(
                    ErrorKind::Backend,
                    format!("backend reported no generated key for '{}.{}'", table.name, table.columns[index].name),
                )
            })?;
            row.set_at(index, Value::Int(id));
        }

        let stored = Arc::new(row.into_row()?);
        self.changes.push(StateChange {
            kind: ChangeKind::Insert,
            table: table_id,
            before: None,
            after: Some(stored.clone()),
        });
        Ok(stored)
    }

    /// Write the changed columns of a stored row. A row without changes is returned as-is.
    pub fn update(&mut self, row: MutableRow) -> Result<Arc<RowData>> {
        self.check_open("update")?;
        let table = row.table().clone();
        let table_id = self.table_of(&table)?;
        let Some(original) = row.original().cloned() else {
            return Err(Error::invalid_argument(format!(
                "row of '{}' has not been stored; insert it instead",
                table.name
            )));
        };
        if !row.has_changes() {
            return Ok(original);
        }

        let changes: Vec<(usize, Value)> = row
            .changed_columns()
            .map(|i| (i, row.values()[i].clone()))
            .collect();
        let sql = update_sql(self.source.dialect(), &table, original.keys(), &changes)?;
        log::debug!("tx {}: {}", self.id, sql);
        let result = self.backend()?.execute(&sql)?;
        if result.affected == 0 {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("no row of '{}' with keys {} to update", table.name, original.keys()),
            ));
        }

        let stored = Arc::new(row.into_row()?);
        self.changes.push(StateChange {
            kind: ChangeKind::Update,
            table: table_id,
            before: Some(original),
            after: Some(stored.clone()),
        });
        Ok(stored)
    }

    /// Delete a stored row; false if the backend no longer had it
    pub fn delete(&mut self, row: &Arc<RowData>) -> Result<bool> {
        self.check_open("delete")?;
        let table_id = self.table_of(row.table())?;
        let sql = delete_sql(self.source.dialect(), row.table(), row.keys())?;
        log::debug!("tx {}: {}", self.id, sql);
        let result = self.backend()?.execute(&sql)?;
        if result.affected == 0 {
            return Ok(false);
        }
        self.changes.push(StateChange {
            kind: ChangeKind::Delete,
            table: table_id,
            before: Some(row.clone()),
            after: None,
        });
        Ok(true)
    }

    /// Commit the backend transaction, then apply every change to the cache
    pub fn commit(&mut self) -> Result<()> {
        self.check_open("commit")?;
        let backend = self.backend.take();
        if let Some(backend) = backend {
            if let Err(e) = backend.commit() {
                self.state = TransactionState::Closed;
                return Err(e);
            }
        }
        self.state = TransactionState::Committed;

        let cache = self.source.cache();
        for change in self.changes.drain(..) {
            cache
                .table(change.table)
                .apply_change(change.before.as_deref(), change.after);
        }
        log::debug!("transaction {} committed", self.id);
        Ok(())
    }

    /// Discard the backend transaction; the cache is not touched
    pub fn rollback(&mut self) -> Result<()> {
        self.check_open("rollback")?;
        self.state = TransactionState::RolledBack;
        self.changes.clear();
        match self.backend.take() {
            Some(backend) => backend.rollback(),
            None => Ok(()),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TransactionState::Open {
            return;
        }
        self.state = TransactionState::Closed;
        log::warn!(
            "transaction {} dropped while open, rolling back {} changes",
            self.id,
            self.changes.len()
        );
        if let Some(backend) = self.backend.take() {
            if let Err(e) = backend.rollback() {
                log::warn!("rollback of transaction {} failed: {}", self.id, e);
            }
        }
    }
}
