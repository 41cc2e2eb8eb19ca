use std::fmt;
use chrono::Utc;
use uuid::Uuid;
use crate::core::types::Value;
use crate::schema::db_type::{DatabaseColumnType, DatabaseType};
use crate::schema::{ColumnId, TableId};

/// Host-side value type of a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    IpAddr,
    /// Enumeration stored by label
    Enum(Vec<String>),
    /// A type the layer knows nothing about; needs an explicit column type
    Other(String),
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostType::Enum(values) => write!(f, "enum[{}]", values.join("|")),
            HostType::Other(name) => f.write_str(name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Value generated for a column when an insert leaves it unset
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Static(Value),
    CurrentTimestamp,
    NewUuidV4,
    NewUuidV7,
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::CurrentTimestamp => Value::DateTime(Utc::now()),
            DefaultValue::NewUuidV4 => Value::Uuid(Uuid::new_v4()),
            DefaultValue::NewUuidV7 => Value::Uuid(Uuid::now_v7()),
        }
    }
}

/// Host-side description of the property a column is bound to
#[derive(Debug, Clone)]
pub struct ValueProperty {
    pub name: String,
    pub host_type: HostType,
    pub default: Option<DefaultValue>,
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub id: ColumnId,
    pub name: String,
    pub db_types: Vec<DatabaseColumnType>,
    pub nullable: bool,
    pub auto_increment: bool,
    pub primary_key: bool,
    pub foreign_key: bool,
    pub property: ValueProperty,
    /// Filled once at schema build, one entry per concrete backend
    pub(crate) resolved: Vec<DatabaseColumnType>,
}

impl ColumnDefinition {
    pub fn table(&self) -> TableId {
        self.id.table
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn host_type(&self) -> &HostType {
        &self.property.host_type
    }

    /// Declared type for exactly this backend, without fallback
    pub fn declared_type(&self, database: DatabaseType) -> Option<&DatabaseColumnType> {
        self.db_types.iter().find(|t| t.database == database)
    }

    /// Resolved concrete type for a backend.
    ///
    /// Every column of a built schema resolves for every backend, so this only
    /// returns `None` for `DatabaseType::Default` without a declaration.
    pub fn db_type(&self, database: DatabaseType) -> Option<&DatabaseColumnType> {
        match database {
            DatabaseType::Default => self.declared_type(DatabaseType::Default),
            _ => self.resolved.iter().find(|t| t.database == database),
        }
    }
}
