use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::schema::{ColumnDefinition, HostType, TableDefinition};

/// A single column value as seen by the host side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    IpAddr(IpAddr),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::IpAddr(_) => "ipaddr",
        }
    }

    /// Approximate heap + inline footprint, used for byte-size cache limits
    pub fn estimated_size(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) => inline + s.len(),
            Value::Bytes(b) => inline + b.len(),
            _ => inline,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::IpAddr(a), Value::IpAddr(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::DateTime(d) => d.hash(state),
            Value::Date(d) => d.hash(state),
            Value::IpAddr(ip) => ip.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Date(d) => write!(f, "{}", d),
            Value::IpAddr(ip) => write!(f, "{}", ip),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v $(as $cast)?)
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    DateTime<Utc> => DateTime,
    NaiveDate => Date,
    IpAddr => IpAddr,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Ordered primary key tuple of a row; the row cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKeys(Arc<[Value]>);

impl PrimaryKeys {
    pub fn new(values: Vec<Value>) -> Self {
        PrimaryKeys(values.into())
    }

    pub fn single(value: impl Into<Value>) -> Self {
        PrimaryKeys::new(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any component is null, which never identifies a stored row
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl fmt::Display for PrimaryKeys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// Immutable snapshot of one materialized row, shared by the row cache
#[derive(Debug)]
pub struct RowData {
    table: Arc<TableDefinition>,
    values: Box<[Value]>,
    keys: PrimaryKeys,
    size: usize,
}

impl RowData {
    /// Values must be in the table's column order.
    pub fn new(table: Arc<TableDefinition>, values: Vec<Value>) -> Result<Self> {
        if values.len() != table.columns.len() {
            return Err(Error::invalid_argument(format!(
                "row for table '{}' has {} values, expected {}",
                table.name,
                values.len(),
                table.columns.len()
            )));
        }
        let keys = PrimaryKeys::new(
            table.primary_keys.iter().map(|&i| values[i].clone()).collect(),
        );
        let size = values.iter().map(Value::estimated_size).sum::<usize>()
            + std::mem::size_of::<RowData>();
        Ok(RowData {
            table,
            values: values.into_boxed_slice(),
            keys,
            size,
        })
    }

    pub fn table(&self) -> &Arc<TableDefinition> {
        &self.table
    }

    pub fn keys(&self) -> &PrimaryKeys {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Look up by column name or property name
    pub fn get(&self, name: &str) -> Result<&Value> {
        let index = self.table.column_index(name).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("table '{}' has no column '{}'", self.table.name, name),
            )
        })?;
        Ok(&self.values[index])
    }

    pub fn mutate(self: &Arc<Self>) -> MutableRow {
        MutableRow::from_row(self.clone())
    }
}

/// Pending values for an insert or update.
///
/// A row without `original` is new; one built from an existing `RowData`
/// tracks which columns changed.
#[derive(Debug, Clone)]
pub struct MutableRow {
    table: Arc<TableDefinition>,
    original: Option<Arc<RowData>>,
    values: Vec<Value>,
    changed: Vec<bool>,
}

impl MutableRow {
    pub fn new(table: Arc<TableDefinition>) -> Self {
        let n = table.columns.len();
        MutableRow {
            table,
            original: None,
            values: vec![Value::Null; n],
            changed: vec![false; n],
        }
    }

    pub fn from_row(row: Arc<RowData>) -> Self {
        let n = row.values.len();
        MutableRow {
            table: row.table.clone(),
            values: row.values.to_vec(),
            changed: vec![false; n],
            original: Some(row),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let index = self.table.column_index(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "table '{}' has no column '{}'",
                self.table.name, name
            ))
        })?;
        let value = host_value(&self.table.columns[index], value.into())?;
        if self.values[index] != value {
            self.values[index] = value;
            self.changed[index] = true;
        }
        Ok(self)
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.table.column_index(name).map(|i| &self.values[i])
    }

    pub fn table(&self) -> &Arc<TableDefinition> {
        &self.table
    }

    pub fn original(&self) -> Option<&Arc<RowData>> {
        self.original.as_ref()
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    pub fn has_changes(&self) -> bool {
        self.changed.iter().any(|c| *c)
    }

    pub fn changed_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.changed.iter().enumerate().filter(|(_, c)| **c).map(|(i, _)| i)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn set_at(&mut self, index: usize, value: Value) {
        self.values[index] = value;
        self.changed[index] = true;
    }

    /// Keys as they are now, which differ from the original's if a key column changed
    pub fn current_keys(&self) -> PrimaryKeys {
        PrimaryKeys::new(
            self.table.primary_keys.iter().map(|&i| self.values[i].clone()).collect(),
        )
    }

    pub fn into_row(self) -> Result<RowData> {
        RowData::new(self.table, self.values)
    }
}

/// Check a written value against the column's host type. Integers widen to
/// floats; anything else that does not match is `InvalidType`.
fn host_value(column: &ColumnDefinition, value: Value) -> Result<Value> {
    let mismatch = |value: &Value| {
        Error::new(
            ErrorKind::InvalidType,
            format!(
                "column '{}' ({}) cannot hold a {} value",
                column.name,
                column.host_type(),
                value.type_name()
            ),
        )
    };
    let value = match (column.host_type(), value) {
        (_, Value::Null) => Value::Null,
        (HostType::Other(_), v) => v,
        (HostType::Bool, v @ Value::Bool(_)) => v,
        (HostType::Int16, Value::Int(i)) if i16::try_from(i).is_err() => return Err(out_of_range(column, i)),
        (HostType::Int32, Value::Int(i)) if i32::try_from(i).is_err() => return Err(out_of_range(column, i)),
        (HostType::Int16 | HostType::Int32 | HostType::Int64, v @ Value::Int(_)) => v,
        (HostType::Float32 | HostType::Float64, v @ Value::Float(_)) => v,
        (HostType::Float32 | HostType::Float64, Value::Int(i)) => Value::Float(i as f64),
        (HostType::String, v @ Value::Text(_)) => v,
        (HostType::Bytes, v @ Value::Bytes(_)) => v,
        (HostType::Uuid, v @ Value::Uuid(_)) => v,
        (HostType::DateTime, v @ Value::DateTime(_)) => v,
        (HostType::Date, v @ Value::Date(_)) => v,
        (HostType::IpAddr, v @ Value::IpAddr(_)) => v,
        (HostType::Enum(labels), Value::Text(s)) => {
            if !labels.contains(&s) {
                return Err(Error::new(
                    ErrorKind::InvalidType,
                    format!("'{}' is not a label of enum column '{}'", s, column.name),
                ));
            }
            Value::Text(s)
        }
        (_, v) => return Err(mismatch(&v)),
    };
    Ok(value)
}

fn out_of_range(column: &ColumnDefinition, i: i64) -> Error {
    Error::new(
        ErrorKind::InvalidType,
        format!("{} does not fit column '{}' ({})", i, column.name, column.host_type()),
    )
}
