use crate::core::error::Result;
use crate::core::types::Value;
use crate::dialect::{
    check_enum, foreign_key_clauses, get_db_type, is_implicit_index, quoted_columns, SqlDialect,
    DATETIME_TEXT_FORMAT,
};
use crate::schema::{ColumnDefinition, ColumnIndex, DatabaseDefinition, DatabaseType, IndexKind, TableDefinition};

/// SQLite: dynamic typing, so dates and addresses are stored as text, and
/// UUIDs as text unless the column is declared binary
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// `INTEGER PRIMARY KEY AUTOINCREMENT` only works inline on a single-column key
    fn inline_primary_key(table: &TableDefinition) -> Option<usize> {
        match table.primary_keys.as_slice() {
            [only] if table.columns[*only].auto_increment => Some(*only),
            _ => None,
        }
    }
}

impl SqlDialect for SqliteDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn parameter_marker(&self, name: &str) -> String {
        format!("@{}", name)
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (Some(l), Some(o)) => Some(format!("LIMIT {} OFFSET {}", l, o)),
            (None, Some(o)) => Some(format!("LIMIT -1 OFFSET {}", o)),
        }
    }

    fn write_value(&self, column: &ColumnDefinition, value: &Value) -> Result<Value> {
        check_enum(column, value)?;
        let written = match value {
            Value::Bool(b) => Value::Int(*b as i64),
            Value::Uuid(u) => match get_db_type(column, DatabaseType::Sqlite)?.name.as_str() {
                "binary" | "varbinary" | "blob" => Value::Bytes(u.as_bytes().to_vec()),
                _ => Value::Text(u.hyphenated().to_string()),
            },
            Value::DateTime(d) => Value::Text(d.format(DATETIME_TEXT_FORMAT).to_string()),
            Value::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
            Value::IpAddr(ip) => Value::Text(ip.to_string()),
            other => other.clone(),
        };
        Ok(written)
    }

    fn create_table_sql(&self, database: &DatabaseDefinition, table: &TableDefinition) -> Result<String> {
        let inline_pk = Self::inline_primary_key(table);
        let mut lines = Vec::with_capacity(table.columns.len() + 1);
        for column in &table.columns {
            let name = self.quote_identifier(&column.name);
            if inline_pk == Some(column.index()) {
                lines.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name));
                continue;
            }
            let mut line = format!("{} {}", name, self.column_type_sql(column)?);
            if !column.nullable {
                line.push_str(" NOT NULL");
            }
            lines.push(line);
        }
        if inline_pk.is_none() && table.has_primary_key() {
            lines.push(format!("PRIMARY KEY ({})", quoted_columns(self, table, &table.primary_keys)));
        }
        lines.extend(foreign_key_clauses(self, database, table));
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            lines.join(",\n  ")
        ))
    }

    fn create_index_sql(&self, table: &TableDefinition, index: &ColumnIndex) -> Option<String> {
        if is_implicit_index(index) {
            return None;
        }
        let unique = if index.kind == IndexKind::Unique { "UNIQUE " } else { "" };
        Some(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            unique,
            self.quote_identifier(&index.name),
            self.quote_identifier(&table.name),
            quoted_columns(self, table, &index.columns)
        ))
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
                    .column(ColumnBuilder::new("active", HostType::Bool))
                    .column(ColumnBuilder::new("email", HostType::String).nullable())
                    .unique("uq_users_email", &["email"]),
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
    fn uuid_primary_key_is_text() {
        let db = database();
        let sql = SqliteDialect.create_table_sql(&db, &db.tables[0]).unwrap();
        assert!(sql.contains(r#""id" TEXT NOT NULL"#), "{}", sql);
        assert!(sql.contains(r#""email" TEXT,"#), "{}", sql);
        assert!(sql.contains(r#"PRIMARY KEY ("id")"#), "{}", sql);

        let id = Uuid::new_v4();
        let written = SqliteDialect.write_value(&db.tables[0].columns[0], &Value::Uuid(id)).unwrap();
        assert_eq!(written, Value::Text(id.to_string()));
        assert_eq!(
            SqliteDialect.write_value(&db.tables[0].columns[1], &Value::Bool(true)).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn uuid_declared_as_blob_is_bound_as_bytes() {
        let db = DatabaseBuilder::new("app")
            .table(
                TableBuilder::new("sessions")
                    .column(ColumnBuilder::new("id", HostType::Int64).primary_key())
                    .column(ColumnBuilder::new("token", HostType::Uuid).db_type(DatabaseType::Sqlite, "blob")),
            )
            .build()
            .unwrap();
        let sessions = &db.tables[0];
        let sql = SqliteDialect.create_table_sql(&db, sessions).unwrap();
        assert!(sql.contains(r#""token" BLOB NOT NULL"#), "{}", sql);

        let token = Uuid::new_v4();
        let written = SqliteDialect.write_value(&sessions.columns[1], &Value::Uuid(token)).unwrap();
        assert_eq!(written, Value::Bytes(token.as_bytes().to_vec()));
        assert_eq!(SqliteDialect.read_value(&sessions.columns[1], written).unwrap(), Value::Uuid(token));
    }

    #[test]
    fn auto_increment_key_is_inline() {
        let db = database();
        let sql = SqliteDialect.create_table_sql(&db, &db.tables[1]).unwrap();
        assert!(sql.contains(r#""id" INTEGER PRIMARY KEY AUTOINCREMENT"#), "{}", sql);
        assert!(!sql.contains("PRIMARY KEY (\"id\")"), "{}", sql);
        assert!(
            sql.contains(r#"CONSTRAINT "fk_posts_author_id" FOREIGN KEY ("author_id") REFERENCES "users" ("id")"#),
            "{}",
            sql
        );
    }

    #[test]
    fn secondary_indices_are_separate_statements() {
        let db = database();
        let users = &db.tables[0];
        let statements: Vec<String> = users
            .indices
            .iter()
            .filter_map(|i| SqliteDialect.create_index_sql(users, i))
            .collect();
        assert_eq!(
            statements,
            vec![r#"CREATE UNIQUE INDEX IF NOT EXISTS "uq_users_email" ON "users" ("email")"#.to_string()]
        );
    }

    #[test]
    fn offset_without_limit() {
        assert_eq!(SqliteDialect.limit_offset(None, Some(3)).as_deref(), Some("LIMIT -1 OFFSET 3"));
        assert_eq!(SqliteDialect.limit_offset(None, None), None);
    }
}
