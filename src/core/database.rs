use std::path::Path;
use std::sync::Arc;
use crate::backend::{Connector, ResultSet, SqliteConnector};
use crate::cache::{DatabaseCache, RowSource, TableCache};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::DatabaseCacheStats;
use crate::core::transaction::Transaction;
use crate::core::types::{PrimaryKeys, RowData, Value};
use crate::dialect::{dialect_for, SqlDialect};
use crate::query::select::Select;
use crate::query::sql::{select_by_keys, Projection, Sql, SelectQuery};
use crate::query::where_clause::{Relation, WhereGroup};
use crate::schema::{DatabaseDefinition, DatabaseModel, DefinitionRegistry, RelationSide, TableDefinition};

/// Entry point for one logical database: metadata, backend and cache.
pub struct DataSource {
    definition: Arc<DatabaseDefinition>,
    connector: Arc<dyn Connector>,
    dialect: Arc<dyn SqlDialect>,
    cache: Arc<DatabaseCache>,
}

impl DataSource {
    pub fn open(definition: Arc<DatabaseDefinition>, connector: Arc<dyn Connector>) -> Result<Self> {
        let dialect: Arc<dyn SqlDialect> = Arc::from(dialect_for(connector.database_type())?);
        let cache = DatabaseCache::new(definition.clone())?;
        log::info!(
            "data source '{}' opened on {} ({} tables, cache {})",
            definition.name,
            dialect.database_type(),
            definition.tables.len(),
            if definition.cache.use_cache { "on" } else { "off" }
        );
        Ok(DataSource { definition, connector, dialect, cache })
    }

    /// Open a SQLite file with the definition declared by `M`, loading it through `registry`
    pub fn open_sqlite<M: DatabaseModel>(registry: &DefinitionRegistry, path: impl AsRef<Path>) -> Result<Self> {
        let definition = registry.get_or_load::<M>()?;
        DataSource::open(definition, Arc::new(SqliteConnector::open(path)?))
    }

    pub fn definition(&self) -> &Arc<DatabaseDefinition> {
        &self.definition
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    pub fn cache(&self) -> &Arc<DatabaseCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> DatabaseCacheStats {
        self.cache.stats()
    }

    /// Table by database name or model name
    pub fn table(&self, name: &str) -> Result<&Arc<TableDefinition>> {
        self.definition.require_table(name)
    }

    pub(crate) fn reader(&self) -> DataReader<'_> {
        DataReader { connector: self.connector.as_ref(), dialect: self.dialect.as_ref() }
    }

    pub(crate) fn table_cache(&self, table: &TableDefinition) -> &TableCache {
        self.cache.table(table.id)
    }

    /// Create every table, then every secondary index, if they do not exist yet
    pub fn create_schema(&self) -> Result<()> {
        let mut statements = Vec::new();
        for table in &self.definition.tables {
            statements.push(self.dialect.create_table_sql(&self.definition, table)?);
        }
        for table in &self.definition.tables {
            statements.extend(table.indices.iter().filter_map(|idx| self.dialect.create_index_sql(table, idx)));
        }

        let mut tx = self.connector.begin()?;
        for text in statements {
            log::debug!("{}", text);
            let sql = Sql { text, params: Vec::new() };
            if let Err(e) = tx.execute(&sql) {
                let _ = tx.rollback();
                return Err(e);
            }
        }
        tx.commit()
    }

    pub fn query(&self, table: &str) -> Result<Select<'_>> {
        Ok(Select::new(self, self.table(table)?.clone()))
    }

    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self)
    }

    /// Row by primary key, through the row cache
    pub fn get(&self, table: &str, keys: &PrimaryKeys) -> Result<Option<Arc<RowData>>> {
        let table = self.table(table)?;
        if !table.has_primary_key() || keys.len() != table.primary_keys.len() {
            return Err(Error::invalid_argument(format!(
                "keys {} do not identify a row of '{}'",
                keys, table.name
            )));
        }
        self.table_cache(table).get_row(keys, &self.reader())
    }

    /// Rows whose `column` equals `value`, served through the index cache where one exists
    pub fn get_rows_by(&self, table: &str, column: &str, value: impl Into<Value>) -> Result<Vec<Arc<RowData>>> {
        let table = self.table(table)?;
        let index = table.column_index(column).ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("table '{}' has no column '{}'", table.name, column))
        })?;
        let value = value.into();
        if !table.has_primary_key() {
            let rows = self.reader().load_rows_by_value(table, index, &value)?;
            return Ok(rows.into_iter().map(Arc::new).collect());
        }
        self.table_cache(table).get_rows(index, &value, &self.reader())
    }

    /// Follow a relation from `row` by navigation name.
    ///
    /// From the referenced side this yields every child; from the foreign-key
    /// side at most the one parent row.
    pub fn related(&self, row: &RowData, relation: &str) -> Result<Vec<Arc<RowData>>> {
        let table = row.table();
        let part = self.definition.relation_part(table.id, relation).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("table '{}' has no relation '{}'", table.name, relation),
            )
        })?;
        let other = self.definition.other_side(part);
        let own_columns = &table.indices[part.index].columns;
        let other_table = self.definition.table_by_id(other.table);
        let other_columns = &other_table.indices[other.index].columns;

        let values: Vec<Value> = own_columns
            .iter()
            .map(|&c| row.value_at(c).cloned().unwrap_or(Value::Null))
            .collect();
        if values.iter().any(Value::is_null) {
            return Ok(Vec::new());
        }

        let cache = self.table_cache(other_table);
        let reader = self.reader();
        if part.side == RelationSide::ForeignKey && other_columns == &other_table.primary_keys {
            let parent = cache.get_row(&PrimaryKeys::new(values), &reader)?;
            return Ok(parent.into_iter().collect());
        }
        match (other_columns.as_slice(), values.as_slice()) {
            ([column], [value]) if other_table.has_primary_key() => cache.get_rows(*column, value, &reader),
            _ => {
                let mut filter = WhereGroup::and();
                for (&column, value) in other_columns.iter().zip(&values) {
                    filter = filter.compare(column, Relation::Equal, value.clone());
                }
                let sql = SelectQuery::new(other_table, Projection::All).filter(&filter).build(self.dialect())?;
                let generation = cache.generation();
                let rows = reader.materialize(other_table, reader.run(&sql)?)?;
                Ok(cache.admit_rows(rows, generation))
            }
        }
    }
}

/// Loads rows for the cache through the connector's shared read path
pub struct DataReader<'a> {
    connector: &'a dyn Connector,
    dialect: &'a dyn SqlDialect,
}

impl DataReader<'_> {
    pub(crate) fn run(&self, sql: &Sql) -> Result<ResultSet> {
        log::debug!("{}", sql);
        self.connector.query(sql)
    }

    /// Convert a full-width result set into rows of `table`
    pub(crate) fn materialize(&self, table: &Arc<TableDefinition>, result: ResultSet) -> Result<Vec<RowData>> {
        result
            .rows
            .into_iter()
            .map(|raw| {
                let values = table
                    .columns
                    .iter()
                    .zip(raw)
                    .map(|(column, value)| self.dialect.read_value(column, value))
                    .collect::<Result<Vec<_>>>()?;
                RowData::new(table.clone(), values)
            })
            .collect()
    }

    /// Convert a key-only result set into primary keys
    pub(crate) fn keys(&self, table: &TableDefinition, result: ResultSet) -> Result<Vec<PrimaryKeys>> {
        result
            .rows
            .into_iter()
            .map(|raw| {
                let values = table
                    .primary_key_columns()
                    .zip(raw)
                    .map(|(column, value)| self.dialect.read_value(column, value))
                    .collect::<Result<Vec<_>>>()?;
                Ok(PrimaryKeys::new(values))
            })
            .collect()
    }

    fn by_value(&self, table: &TableDefinition, projection: Projection, column: usize, value: &Value) -> Result<ResultSet> {
        let filter = WhereGroup::and().compare(column, Relation::Equal, value.clone());
        let sql = SelectQuery::new(table, projection).filter(&filter).build(self.dialect)?;
        self.run(&sql)
    }
}

impl RowSource for DataReader<'_> {
    fn load_rows_by_keys(&self, table: &Arc<TableDefinition>, keys: &[PrimaryKeys]) -> Result<Vec<RowData>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = select_by_keys(self.dialect, table, keys)?;
        let result = self.run(&sql)?;
        self.materialize(table, result)
    }

    fn load_keys_by_value(&self, table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<PrimaryKeys>> {
        let result = self.by_value(table, Projection::Keys, column, value)?;
        self.keys(table, result)
    }

    fn load_rows_by_value(&self, table: &Arc<TableDefinition>, column: usize, value: &Value) -> Result<Vec<RowData>> {
        let result = self.by_value(table, Projection::All, column, value)?;
        self.materialize(table, result)
    }
}
