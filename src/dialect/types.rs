//! Column type resolution per backend.
//!
//! Order: a type declared for the requested backend, then a `Default`
//! declaration, then a declaration for another backend translated across,
//! then a type inferred from the host type.

use crate::core::error::{Error, Result};
use crate::schema::column::{ColumnDefinition, HostType};
use crate::schema::db_type::{DatabaseColumnType, DatabaseType};

pub fn resolve_column_type(
    declared: &[DatabaseColumnType],
    host_type: &HostType,
    target: DatabaseType,
) -> Option<DatabaseColumnType> {
    if let Some(exact) = declared.iter().find(|t| t.database == target) {
        return Some(exact.clone());
    }
    if let Some(translated) = declared
        .iter()
        .find(|t| t.database == DatabaseType::Default)
        .and_then(|t| translate(t, target))
    {
        return Some(translated);
    }
    for source in DatabaseType::BACKENDS {
        if let Some(translated) = declared
            .iter()
            .find(|t| t.database == source)
            .and_then(|t| translate(t, target))
        {
            return Some(translated);
        }
    }
    infer(host_type, target)
}

/// Resolved type for a column of a built schema
pub fn get_db_type(column: &ColumnDefinition, target: DatabaseType) -> Result<&DatabaseColumnType> {
    column.db_type(target).ok_or_else(|| {
        Error::invalid_model(format!(
            "column '{}' (property '{}') has no type for {}",
            column.name, column.property.name, target
        ))
    })
}

/// Mechanically carry a type declared for one backend over to another
pub fn translate(ty: &DatabaseColumnType, target: DatabaseType) -> Option<DatabaseColumnType> {
    if ty.database == target {
        return Some(ty.clone());
    }
    match target {
        DatabaseType::Sqlite => to_sqlite(ty),
        DatabaseType::MySql | DatabaseType::MariaDb => to_mysql_family(ty, target),
        DatabaseType::Default => None,
    }
}

fn to_sqlite(ty: &DatabaseColumnType) -> Option<DatabaseColumnType> {
    let name = match ty.name.as_str() {
        "bit" | "bool" | "boolean" | "tinyint" | "smallint" | "mediumint" | "int" | "integer"
        | "bigint" => "integer",
        "float" | "double" | "real" | "decimal" | "numeric" => "real",
        "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set"
        | "json" | "uuid" | "inet4" | "inet6" | "datetime" | "timestamp" | "date" | "time" => "text",
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => "blob",
        _ => return None,
    };
    Some(DatabaseColumnType::new(DatabaseType::Sqlite, name))
}

fn to_mysql_family(ty: &DatabaseColumnType, target: DatabaseType) -> Option<DatabaseColumnType> {
    let native_uuid = target == DatabaseType::MariaDb;
    let translated = match ty.name.as_str() {
        "uuid" if native_uuid => DatabaseColumnType::new(target, "uuid"),
        "uuid" => DatabaseColumnType::new(target, "binary").with_length(16),
        "inet6" if native_uuid => DatabaseColumnType::new(target, "inet6"),
        "inet6" => DatabaseColumnType::new(target, "varchar").with_length(39),
        "inet4" if native_uuid => DatabaseColumnType::new(target, "inet4"),
        "inet4" => DatabaseColumnType::new(target, "varchar").with_length(15),
        "bool" | "boolean" => DatabaseColumnType::new(target, "bit").with_length(1),
        "integer" if ty.database == DatabaseType::Sqlite => DatabaseColumnType::new(target, "bigint"),
        "integer" => DatabaseColumnType {
            name: "int".to_string(),
            ..ty.for_database(target)
        },
        "real" if ty.database == DatabaseType::Sqlite => DatabaseColumnType::new(target, "double"),
        "bit" | "tinyint" | "smallint" | "mediumint" | "int" | "bigint" | "float" | "double"
        | "real" | "decimal" | "numeric" | "char" | "varchar" | "text" | "tinytext"
        | "mediumtext" | "longtext" | "enum" | "set" | "json" | "binary" | "varbinary" | "blob"
        | "tinyblob" | "mediumblob" | "longblob" | "datetime" | "timestamp" | "date" | "time"
        | "year" => ty.for_database(target),
        _ => return None,
    };
    Some(translated)
}

/// Last resort: derive a type from the host value type
pub fn infer(host_type: &HostType, target: DatabaseType) -> Option<DatabaseColumnType> {
    match target {
        DatabaseType::Sqlite => {
            let name = match host_type {
                HostType::Bool | HostType::Int16 | HostType::Int32 | HostType::Int64 => "integer",
                HostType::Float32 | HostType::Float64 => "real",
                HostType::Bytes => "blob",
                HostType::String
                | HostType::Uuid
                | HostType::DateTime
                | HostType::Date
                | HostType::IpAddr
                | HostType::Enum(_) => "text",
                HostType::Other(_) => return None,
            };
            Some(DatabaseColumnType::new(target, name))
        }
        DatabaseType::MySql | DatabaseType::MariaDb => {
            let native = target == DatabaseType::MariaDb;
            let ty = match host_type {
                HostType::Bool => DatabaseColumnType::new(target, "bit").with_length(1),
                HostType::Int16 => DatabaseColumnType::new(target, "smallint"),
                HostType::Int32 => DatabaseColumnType::new(target, "int"),
                HostType::Int64 => DatabaseColumnType::new(target, "bigint"),
                HostType::Float32 => DatabaseColumnType::new(target, "float"),
                HostType::Float64 => DatabaseColumnType::new(target, "double"),
                HostType::String => DatabaseColumnType::new(target, "varchar").with_length(255),
                HostType::Bytes => DatabaseColumnType::new(target, "blob"),
                HostType::Uuid if native => DatabaseColumnType::new(target, "uuid"),
                HostType::Uuid => DatabaseColumnType::new(target, "binary").with_length(16),
                HostType::DateTime => DatabaseColumnType::new(target, "datetime"),
                HostType::Date => DatabaseColumnType::new(target, "date"),
                HostType::IpAddr if native => DatabaseColumnType::new(target, "inet6"),
                HostType::IpAddr => DatabaseColumnType::new(target, "varchar").with_length(39),
                HostType::Enum(values) => DatabaseColumnType {
                    enum_values: values.clone(),
                    ..DatabaseColumnType::new(target, "enum")
                },
                HostType::Other(_) => return None,
            };
            Some(ty)
        }
        DatabaseType::Default => None,
    }
}
