use std::fmt;
use crate::core::error::{Error, Result};
use crate::core::types::{PrimaryKeys, Value};
use crate::dialect::SqlDialect;
use crate::query::where_clause::WhereGroup;
use crate::schema::TableDefinition;

/// A named, already-converted statement parameter
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    /// Name without the dialect sigil, e.g. `p0`
    pub name: String,
    pub value: Value,
}

/// Statement text plus its parameters, ready for a connector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    pub text: String,
    pub params: Vec<SqlParam>,
}

impl Sql {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Add a parameter and return the marker to splice into the text
    pub fn bind(&mut self, dialect: &dyn SqlDialect, value: Value) -> String {
        let name = format!("p{}", self.params.len());
        let marker = dialect.parameter_marker(&name);
        self.params.push(SqlParam { name, value });
        marker
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Every column in table order
    All,
    /// Primary-key columns only
    Keys,
    /// `COUNT(*)`
    Count,
}

/// SELECT over one table
#[derive(Debug, Clone)]
pub struct SelectQuery<'a> {
    table: &'a TableDefinition,
    projection: Projection,
    filter: Option<&'a WhereGroup>,
    order: Vec<(usize, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl<'a> SelectQuery<'a> {
    pub fn new(table: &'a TableDefinition, projection: Projection) -> Self {
        SelectQuery {
            table,
            projection,
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, filter: &'a WhereGroup) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order(mut self, order: Vec<(usize, bool)>) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: Option<u64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn build(&self, dialect: &dyn SqlDialect) -> Result<Sql> {
        let table = self.table;
        let mut sql = Sql::new();
        let columns = match self.projection {
            Projection::Count => "COUNT(*)".to_string(),
            Projection::All => column_list(dialect, table, 0..table.columns.len()),
            Projection::Keys => {
                if !table.has_primary_key() {
                    return Err(Error::invalid_argument(format!(
                        "table '{}' has no primary key to select",
                        table.name
                    )));
                }
                column_list(dialect, table, table.primary_keys.iter().copied())
            }
        };
        sql.push(&format!("SELECT {} FROM {}", columns, dialect.quote_identifier(&table.name)));

        if let Some(filter) = self.filter.filter(|f| !f.is_empty()) {
            sql.push(" WHERE ");
            filter.render(table, dialect, &mut sql)?;
        }

        if !self.order.is_empty() && self.projection != Projection::Count {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|&(column, descending)| {
                    let name = dialect.quote_identifier(&table.columns[column].name);
                    if descending { format!("{} DESC", name) } else { name }
                })
                .collect();
            sql.push(&format!(" ORDER BY {}", terms.join(", ")));
        }

        if self.projection != Projection::Count {
            if let Some(clause) = dialect.limit_offset(self.limit, self.offset) {
                sql.push(" ");
                sql.push(&clause);
            }
        }
        Ok(sql)
    }
}

fn column_list(dialect: &dyn SqlDialect, table: &TableDefinition, columns: impl Iterator<Item = usize>) -> String {
    columns
        .map(|i| dialect.quote_identifier(&table.columns[i].name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rows of `table` whose primary keys are in `keys`
pub fn select_by_keys(dialect: &dyn SqlDialect, table: &TableDefinition, keys: &[PrimaryKeys]) -> Result<Sql> {
    let filter = WhereGroup::for_keys(table, keys);
    SelectQuery::new(table, Projection::All).filter(&filter).build(dialect)
}

/// INSERT of a full row. A null auto-increment column is left out so the backend assigns it.
pub fn insert_sql(dialect: &dyn SqlDialect, table: &TableDefinition, values: &[Value]) -> Result<Sql> {
    let mut sql = Sql::new();
    let mut names = Vec::new();
    let mut markers = Vec::new();
    for (column, value) in table.columns.iter().zip(values) {
        if column.auto_increment && value.is_null() {
            continue;
        }
        names.push(dialect.quote_identifier(&column.name));
        markers.push(sql.bind(dialect, dialect.write_value(column, value)?));
    }
    let table_name = dialect.quote_identifier(&table.name);
    if names.is_empty() {
        sql.push(&format!("INSERT INTO {} DEFAULT VALUES", table_name));
    } else {
        sql.push(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name,
            names.join(", "),
            markers.join(", ")
        ));
    }
    Ok(sql)
}

/// UPDATE of the given `(column, value)` pairs on the row identified by `keys`
pub fn update_sql(
    dialect: &dyn SqlDialect,
    table: &TableDefinition,
    keys: &PrimaryKeys,
    changes: &[(usize, Value)],
) -> Result<Sql> {
    if changes.is_empty() {
        return Err(Error::invalid_argument(format!(
            "update of '{}' {} has no changed columns",
            table.name, keys
        )));
    }
    let mut sql = Sql::new();
    let mut assignments = Vec::with_capacity(changes.len());
    for (index, value) in changes {
        let column = &table.columns[*index];
        let marker = sql.bind(dialect, dialect.write_value(column, value)?);
        assignments.push(format!("{} = {}", dialect.quote_identifier(&column.name), marker));
    }
    sql.push(&format!(
        "UPDATE {} SET {} WHERE ",
        dialect.quote_identifier(&table.name),
        assignments.join(", ")
    ));
    key_filter(table, keys)?.render(table, dialect, &mut sql)?;
    Ok(sql)
}

pub fn delete_sql(dialect: &dyn SqlDialect, table: &TableDefinition, keys: &PrimaryKeys) -> Result<Sql> {
    let mut sql = Sql::new();
    sql.push(&format!("DELETE FROM {} WHERE ", dialect.quote_identifier(&table.name)));
    key_filter(table, keys)?.render(table, dialect, &mut sql)?;
    Ok(sql)
}

fn key_filter(table: &TableDefinition, keys: &PrimaryKeys) -> Result<WhereGroup> {
    if !table.has_primary_key() || keys.len() != table.primary_keys.len() || keys.has_null() {
        return Err(Error::invalid_argument(format!(
            "keys {} do not identify a row of '{}'",
            keys, table.name
        )));
    }
    Ok(WhereGroup::for_keys(table, std::slice::from_ref(keys)))
}
