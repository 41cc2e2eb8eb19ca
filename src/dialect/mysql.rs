use crate::core::error::Result;
use crate::core::types::Value;
use crate::dialect::{
    check_enum, foreign_key_clauses, get_db_type, is_implicit_index, quoted_columns, SqlDialect,
    DATETIME_TEXT_FORMAT,
};
use crate::schema::{ColumnDefinition, ColumnIndex, DatabaseDefinition, DatabaseType, IndexKind, TableDefinition};

/// MySQL and MariaDB. The two differ in native UUID and inet support,
/// which is carried by the resolved column types.
#[derive(Debug, Clone, Copy)]
pub struct MySqlDialect {
    flavor: DatabaseType,
}

impl MySqlDialect {
    pub fn new(flavor: DatabaseType) -> Self {
        debug_assert!(flavor.is_mysql_family());
        MySqlDialect { flavor }
    }
}

impl SqlDialect for MySqlDialect {
    fn database_type(&self) -> DatabaseType {
        self.flavor
    }

    fn parameter_marker(&self, name: &str) -> String {
        format!("?{}", name)
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    // backslash is itself an escape inside MySQL string literals
    fn like_escape(&self) -> &'static str {
        "ESCAPE '\\\\'"
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (Some(l), Some(o)) => Some(format!("LIMIT {} OFFSET {}", l, o)),
            // MySQL has no OFFSET without LIMIT
            (None, Some(o)) => Some(format!("LIMIT {} OFFSET {}", u64::MAX, o)),
        }
    }

    fn write_value(&self, column: &ColumnDefinition, value: &Value) -> Result<Value> {
        check_enum(column, value)?;
        let ty = get_db_type(column, self.flavor)?;
        let written = match value {
            Value::Uuid(u) => match ty.name.as_str() {
                "binary" | "varbinary" | "blob" => Value::Bytes(u.as_bytes().to_vec()),
                "char" | "varchar" | "text" => Value::Text(u.hyphenated().to_string()),
                _ => Value::Uuid(*u),
            },
            Value::IpAddr(ip) if ty.name != "inet4" && ty.name != "inet6" => Value::Text(ip.to_string()),
            Value::DateTime(d) if ty.name != "datetime" && ty.name != "timestamp" => {
                Value::Text(d.format(DATETIME_TEXT_FORMAT).to_string())
            }
            other => other.clone(),
        };
        Ok(written)
    }

    fn create_table_sql(&self, database: &DatabaseDefinition, table: &TableDefinition) -> Result<String> {
        let mut lines = Vec::with_capacity(table.columns.len() + table.indices.len());
        for column in &table.columns {
            let mut line = format!("{} {}", self.quote_identifier(&column.name), self.column_type_sql(column)?);
            line.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
            if column.auto_increment {
                line.push_str(" AUTO_INCREMENT");
            }
            lines.push(line);
        }
        if table.has_primary_key() {
            lines.push(format!("PRIMARY KEY ({})", quoted_columns(self, table, &table.primary_keys)));
        }
        for index in table.indices.iter().filter(|i| !is_implicit_index(i)) {
            let keyword = if index.kind == IndexKind::Unique { "UNIQUE KEY" } else { "KEY" };
            lines.push(format!(
                "{} {} ({})",
                keyword,
                self.quote_identifier(&index.name),
                quoted_columns(self, table, &index.columns)
            ));
        }
        lines.extend(foreign_key_clauses(self, database, table));
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            lines.join(",\n  ")
        ))
    }

    fn create_index_sql(&self, _table: &TableDefinition, _index: &ColumnIndex) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnBuilder, DatabaseBuilder, HostType, TableBuilder};
    use uuid::Uuid;

    fn database() -> DatabaseDefinition {
        DatabaseBuilder::new("app")
            .table(
                TableBuilder::new("users")
                    .column(ColumnBuilder::new("id", HostType::Uuid).primary_key())
                    .column(ColumnBuilder::new("name", HostType::String).db_type(DatabaseType::Default, "varchar(50)"))
                    .column(ColumnBuilder::new("role", HostType::Enum(vec!["Admin".into(), "User".into()]))),
            )
            .table(
                TableBuilder::new("posts")
                    .column(ColumnBuilder::new("id", HostType::Int64).primary_key().auto_increment())
                    .column(ColumnBuilder::new("author_id", HostType::Uuid))
                    .foreign_key("author_id", "users", "id", "author", "posts"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn mariadb_uses_native_uuid() {
        let db = database();
        let sql = MySqlDialect::new(DatabaseType::MariaDb)
            .create_table_sql(&db, &db.tables[0])
            .unwrap();
        assert!(sql.contains("`id` UUID NOT NULL"), "{}", sql);
        assert!(!sql.contains("BINARY(16)"), "{}", sql);
        assert!(sql.contains("`name` VARCHAR(50) NOT NULL"), "{}", sql);
        assert!(sql.contains("`role` ENUM('Admin','User') NOT NULL"), "{}", sql);
        assert!(sql.contains("PRIMARY KEY (`id`)"), "{}", sql);
    }

    #[test]
    fn mysql_stores_uuid_as_binary() {
        let db = database();
        let dialect = MySqlDialect::new(DatabaseType::MySql);
        let sql = dialect.create_table_sql(&db, &db.tables[0]).unwrap();
        assert!(sql.contains("`id` BINARY(16) NOT NULL"), "{}", sql);

        let id = Uuid::new_v4();
        let written = dialect.write_value(&db.tables[0].columns[0], &Value::Uuid(id)).unwrap();
        assert_eq!(written, Value::Bytes(id.as_bytes().to_vec()));

        let maria = MySqlDialect::new(DatabaseType::MariaDb);
        assert_eq!(maria.write_value(&db.tables[0].columns[0], &Value::Uuid(id)).unwrap(), Value::Uuid(id));
    }

    #[test]
    fn child_table_declares_key_index_and_constraint() {
        let db = database();
        let sql = MySqlDialect::new(DatabaseType::MySql)
            .create_table_sql(&db, &db.tables[1])
            .unwrap();
        assert!(sql.contains("`id` BIGINT NOT NULL AUTO_INCREMENT"), "{}", sql);
        assert!(sql.contains("KEY `fk_posts_author_id` (`author_id`)"), "{}", sql);
        assert!(
            sql.contains("CONSTRAINT `fk_posts_author_id` FOREIGN KEY (`author_id`) REFERENCES `users` (`id`)"),
            "{}",
            sql
        );
    }

    #[test]
    fn rejects_unknown_enum_label() {
        let db = database();
        let err = MySqlDialect::new(DatabaseType::MySql)
            .write_value(&db.tables[0].columns[2], &Value::from("Root"))
            .unwrap_err();
        assert!(err.to_string().contains("Root"));
    }
}
