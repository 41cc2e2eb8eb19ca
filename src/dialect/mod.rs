//! Per-backend SQL syntax, value conversion and DDL.

pub mod mysql;
pub mod sqlite;
pub mod types;

use std::net::IpAddr;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::schema::{
    ColumnDefinition, ColumnIndex, DatabaseColumnType, DatabaseDefinition, DatabaseType, HostType,
    IndexKind, TableDefinition,
};

pub use mysql::MySqlDialect;
pub use sqlite::SqliteDialect;
pub use types::{get_db_type, resolve_column_type};

/// Storage format for date-times in text columns; sorts lexically
pub const DATETIME_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub trait SqlDialect: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Placeholder for a named parameter, e.g. `@p0`
    fn parameter_marker(&self, name: &str) -> String;

    fn quote_identifier(&self, name: &str) -> String;

    /// Escape clause appended to every `LIKE`; the escape character is a backslash
    fn like_escape(&self) -> &'static str {
        "ESCAPE '\\'"
    }

    /// `LIMIT`/`OFFSET` tail, or `None` when neither is set
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String>;

    /// Convert a host value into what gets bound for `column`
    fn write_value(&self, column: &ColumnDefinition, value: &Value) -> Result<Value>;

    /// Convert a value read from the backend into the column's host value
    fn read_value(&self, column: &ColumnDefinition, raw: Value) -> Result<Value> {
        to_host(column, raw)
    }

    /// `CREATE TABLE` for one table, including foreign-key constraints
    fn create_table_sql(&self, database: &DatabaseDefinition, table: &TableDefinition) -> Result<String>;

    /// Standalone index statement, or `None` if the index is declared inline
    fn create_index_sql(&self, table: &TableDefinition, index: &ColumnIndex) -> Option<String>;

    /// Resolved column type rendered for DDL
    fn column_type_sql(&self, column: &ColumnDefinition) -> Result<String> {
        Ok(render_type(get_db_type(column, self.database_type())?))
    }
}

pub fn dialect_for(database: DatabaseType) -> Result<Box<dyn SqlDialect>> {
    match database {
        DatabaseType::Sqlite => Ok(Box::new(SqliteDialect)),
        DatabaseType::MySql | DatabaseType::MariaDb => Ok(Box::new(MySqlDialect::new(database))),
        DatabaseType::Default => Err(Error::invalid_argument("no SQL dialect for the Default backend")),
    }
}

/// Upper-case DDL rendering; enum labels keep their case
pub fn render_type(ty: &DatabaseColumnType) -> String {
    let mut out = ty.name.to_ascii_uppercase();
    if !ty.enum_values.is_empty() {
        let labels: Vec<String> = ty
            .enum_values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect();
        out.push_str(&format!("({})", labels.join(",")));
    } else if let Some(length) = ty.length {
        match ty.decimals {
            Some(decimals) => out.push_str(&format!("({},{})", length, decimals)),
            None => out.push_str(&format!("({})", length)),
        }
    }
    if ty.signed == Some(false) {
        out.push_str(" UNSIGNED");
    }
    out
}

/// `CONSTRAINT ... FOREIGN KEY` clauses for the foreign-key side of every relation owned by `table`
pub(crate) fn foreign_key_clauses(
    dialect: &dyn SqlDialect,
    database: &DatabaseDefinition,
    table: &TableDefinition,
) -> Vec<String> {
    database
        .relations
        .iter()
        .filter(|r| r.foreign_key.table == table.id)
        .map(|relation| {
            let fk_index = &table.indices[relation.foreign_key.index];
            let target = database.table_by_id(relation.candidate_key.table);
            let ck_index = &target.indices[relation.candidate_key.index];
            format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                dialect.quote_identifier(&relation.constraint_name),
                quoted_columns(dialect, table, &fk_index.columns),
                dialect.quote_identifier(&target.name),
                quoted_columns(dialect, target, &ck_index.columns)
            )
        })
        .collect()
}

pub(crate) fn quoted_columns(dialect: &dyn SqlDialect, table: &TableDefinition, columns: &[usize]) -> String {
    columns
        .iter()
        .map(|&c| dialect.quote_identifier(&table.columns[c].name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// True for indices created together with the table rather than on their own
pub(crate) fn is_implicit_index(index: &ColumnIndex) -> bool {
    index.kind == IndexKind::PrimaryKey
}

fn unexpected(column: &ColumnDefinition, raw: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidType,
        format!(
            "column '{}' ({}) cannot hold a {} value",
            column.name,
            column.property.host_type,
            raw.type_name()
        ),
    )
}

/// Shared conversion from a raw backend value into the column's host type
pub fn to_host(column: &ColumnDefinition, raw: Value) -> Result<Value> {
    if raw.is_null() {
        if column.nullable {
            return Ok(Value::Null);
        }
        return Err(Error::new(
            ErrorKind::UnexpectedNull,
            format!("column '{}' is not nullable but the backend returned NULL", column.name),
        ));
    }
    let value = match (&column.property.host_type, raw) {
        (HostType::Bool, Value::Bool(b)) => Value::Bool(b),
        (HostType::Bool, Value::Int(i)) => Value::Bool(i != 0),
        (HostType::Bool, Value::Bytes(b)) if b.len() == 1 => Value::Bool(b[0] != 0),
        (HostType::Int16 | HostType::Int32 | HostType::Int64, Value::Int(i)) => Value::Int(i),
        (HostType::Int16 | HostType::Int32 | HostType::Int64, Value::Bool(b)) => Value::Int(b as i64),
        (HostType::Float32 | HostType::Float64, Value::Float(f)) => Value::Float(f),
        (HostType::Float32 | HostType::Float64, Value::Int(i)) => Value::Float(i as f64),
        (HostType::String, Value::Text(s)) => Value::Text(s),
        (HostType::Bytes, Value::Bytes(b)) => Value::Bytes(b),
        (HostType::Uuid, Value::Uuid(u)) => Value::Uuid(u),
        (HostType::Uuid, Value::Bytes(b)) => {
            let u = Uuid::from_slice(&b).map_err(|e| parse_error(column, e))?;
            Value::Uuid(u)
        }
        (HostType::Uuid, Value::Text(s)) => Value::Uuid(Uuid::parse_str(&s).map_err(|e| parse_error(column, e))?),
        (HostType::DateTime, Value::DateTime(d)) => Value::DateTime(d),
        (HostType::DateTime, Value::Text(s)) => Value::DateTime(parse_datetime(column, &s)?),
        (HostType::Date, Value::Date(d)) => Value::Date(d),
        (HostType::Date, Value::Text(s)) => {
            Value::Date(NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| parse_error(column, e))?)
        }
        (HostType::IpAddr, Value::IpAddr(ip)) => Value::IpAddr(ip),
        (HostType::IpAddr, Value::Text(s)) => Value::IpAddr(s.parse::<IpAddr>().map_err(|e| parse_error(column, e))?),
        (HostType::Enum(labels), Value::Text(s)) => {
            if !labels.iter().any(|l| *l == s) {
                return Err(Error::new(
                    ErrorKind::InvalidType,
                    format!("'{}' is not a label of enum column '{}'", s, column.name),
                ));
            }
            Value::Text(s)
        }
        (HostType::Other(_), raw) => raw,
        (_, raw) => return Err(unexpected(column, &raw)),
    };
    Ok(value)
}

fn parse_datetime(column: &ColumnDefinition, s: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| parse_error(column, e))
}

fn parse_error(column: &ColumnDefinition, err: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::InvalidType,
        format!("column '{}' holds an unreadable value: {}", column.name, err),
    )
}

/// Reject enum labels the column does not declare
pub(crate) fn check_enum(column: &ColumnDefinition, value: &Value) -> Result<()> {
    if let (HostType::Enum(labels), Value::Text(s)) = (&column.property.host_type, value) {
        if !labels.iter().any(|l| l == s) {
            return Err(Error::new(
                ErrorKind::InvalidType,
                format!("'{}' is not a label of enum column '{}'", s, column.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnBuilder, DatabaseBuilder, TableBuilder};

    fn table() -> std::sync::Arc<TableDefinition> {
        let db = DatabaseBuilder::new("t")
            .table(
                TableBuilder::new("things")
                    .column(ColumnBuilder::new("id", HostType::Uuid).primary_key())
                    .column(ColumnBuilder::new("flag", HostType::Bool))
                    .column(ColumnBuilder::new("seen", HostType::DateTime).nullable())
                    .column(ColumnBuilder::new("kind", HostType::Enum(vec!["A".into(), "B".into()]))),
            )
            .build()
            .unwrap();
        db.tables[0].clone()
    }

    #[test]
    fn reads_backend_representations() {
        let t = table();
        let id = Uuid::new_v4();
        assert_eq!(to_host(&t.columns[0], Value::Text(id.to_string())).unwrap(), Value::Uuid(id));
        assert_eq!(to_host(&t.columns[0], Value::Bytes(id.as_bytes().to_vec())).unwrap(), Value::Uuid(id));
        assert_eq!(to_host(&t.columns[1], Value::Int(1)).unwrap(), Value::Bool(true));
        assert_eq!(to_host(&t.columns[2], Value::Null).unwrap(), Value::Null);

        let seen = to_host(&t.columns[2], Value::from("2024-03-01 10:20:30.000000")).unwrap();
        match seen {
            Value::DateTime(d) => assert_eq!(d.to_rfc3339(), "2024-03-01T10:20:30+00:00"),
            other => panic!("expected datetime, got {:?}", other),
        }
    }

    #[test]
    fn conversion_failures_are_typed() {
        let t = table();
        assert!(to_host(&t.columns[1], Value::Null).unwrap_err().is(ErrorKind::UnexpectedNull));
        assert!(to_host(&t.columns[1], Value::from("yes")).unwrap_err().is(ErrorKind::InvalidType));
        assert!(to_host(&t.columns[3], Value::from("C")).unwrap_err().is(ErrorKind::InvalidType));
        assert!(to_host(&t.columns[0], Value::from("not-a-uuid")).unwrap_err().is(ErrorKind::InvalidType));
    }

    #[test]
    fn renders_types_for_ddl() {
        let ty = DatabaseColumnType::parse(DatabaseType::MySql, "decimal(10,2) unsigned").unwrap();
        assert_eq!(render_type(&ty), "DECIMAL(10,2) UNSIGNED");
        let ty = DatabaseColumnType::parse(DatabaseType::MySql, "enum('Admin','User')").unwrap();
        assert_eq!(render_type(&ty), "ENUM('Admin','User')");
    }
}
