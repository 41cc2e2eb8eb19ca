use std::path::{Path, PathBuf};
use std::time::Duration;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection, Statement};
use crate::backend::{BackendTransaction, Connector, ExecResult, ResultSet};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::dialect::DATETIME_TEXT_FORMAT;
use crate::query::sql::Sql;
use crate::schema::DatabaseType;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database file. Reads share one connection; every transaction
/// opens its own so a writer never blocks behind a reader's lock.
pub struct SqliteConnector {
    path: PathBuf,
    reader: Mutex<Connection>,
}

impl SqliteConnector {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = open_connection(&path)?;
        // WAL lets the shared reader proceed while a transaction holds the write lock
        reader.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        log::info!("opened SQLite database at {}", path.display());
        Ok(SqliteConnector {
            path,
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

impl Connector for SqliteConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn query(&self, sql: &Sql) -> Result<ResultSet> {
        let conn = self.reader.lock();
        run_query(&conn, sql)
    }

    fn execute(&self, sql: &Sql) -> Result<ExecResult> {
        let conn = self.reader.lock();
        run_execute(&conn, sql)
    }

    fn begin(&self) -> Result<Box<dyn BackendTransaction>> {
        let conn = open_connection(&self.path)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction { conn, finished: false }))
    }
}

struct SqliteTransaction {
    conn: Connection,
    finished: bool,
}

impl BackendTransaction for SqliteTransaction {
    fn query(&mut self, sql: &Sql) -> Result<ResultSet> {
        run_query(&self.conn, sql)
    }

    fn execute(&mut self, sql: &Sql) -> Result<ExecResult> {
        run_execute(&self.conn, sql)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("rollback of abandoned SQLite transaction failed: {}", e);
            }
        }
    }
}

fn prepare<'c>(conn: &'c Connection, sql: &Sql) -> Result<Statement<'c>> {
    log::debug!("sqlite: {} ({} params)", sql.text, sql.params.len());
    let mut stmt = conn.prepare(&sql.text)?;
    for param in &sql.params {
        let marker = format!("@{}", param.name);
        let index = stmt.parameter_index(&marker)?.ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("statement has no parameter {}: {}", marker, sql.text),
            )
        })?;
        stmt.raw_bind_parameter(index, to_sqlite(&param.value))?;
    }
    Ok(stmt)
}

fn run_query(conn: &Connection, sql: &Sql) -> Result<ResultSet> {
    let mut stmt = prepare(conn, sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(from_sqlite(row.get_ref(i)?));
        }
        rows.push(values);
    }
    Ok(ResultSet { columns, rows })
}

fn run_execute(conn: &Connection, sql: &Sql) -> Result<ExecResult> {
    let mut stmt = prepare(conn, sql)?;
    let affected = stmt.raw_execute()? as u64;
    let is_insert = sql.text.trim_start().get(..6).is_some_and(|s| s.eq_ignore_ascii_case("insert"));
    Ok(ExecResult {
        affected,
        last_insert_id: is_insert.then(|| conn.last_insert_rowid()),
    })
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(*b as i64),
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Uuid(u) => SqliteValue::Text(u.hyphenated().to_string()),
        Value::DateTime(d) => SqliteValue::Text(d.format(DATETIME_TEXT_FORMAT).to_string()),
        Value::Date(d) => SqliteValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::IpAddr(ip) => SqliteValue::Text(ip.to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}
