use std::sync::Arc;
use crate::core::database::DataSource;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{PrimaryKeys, RowData, Value};
use crate::query::ast::{Expr, OrderBy};
use crate::query::sql::{Projection, SelectQuery, Sql};
use crate::query::translator::{translate, translate_order};
use crate::query::where_clause::WhereGroup;
use crate::schema::TableDefinition;

/// Fluent query over one table of a `DataSource`.
///
/// Rows are fetched as a key list first and then materialized through the
/// row cache, so repeated queries hand back the same cached instances.
pub struct Select<'a> {
    source: &'a DataSource,
    table: Arc<TableDefinition>,
    filter: Option<Expr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl<'a> Select<'a> {
    pub(crate) fn new(source: &'a DataSource, table: Arc<TableDefinition>) -> Self {
        Select {
            source,
            table,
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn table(&self) -> &Arc<TableDefinition> {
        &self.table
    }

    /// Add a predicate; several calls are combined with AND
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn where_group(&self) -> Result<WhereGroup> {
        match &self.filter {
            Some(expr) => translate(&self.table, expr),
            None => Ok(WhereGroup::and()),
        }
    }

    fn build(&self, projection: Projection, filter: &WhereGroup) -> Result<Sql> {
        let order = translate_order(&self.table, &self.order)?;
        SelectQuery::new(&self.table, projection)
            .filter(filter)
            .order(order)
            .limit(self.limit)
            .offset(self.offset)
            .build(self.source.dialect())
    }

    /// The statement `to_rows` would run for a table without caching
    pub fn to_sql(&self) -> Result<Sql> {
        let filter = self.where_group()?;
        self.build(Projection::All, &filter)
    }

    /// Primary keys of the matching rows, in query order
    pub fn keys(&self) -> Result<Vec<PrimaryKeys>> {
        let filter = self.where_group()?;
        let sql = self.build(Projection::Keys, &filter)?;
        let reader = self.source.reader();
        let result = reader.run(&sql)?;
        reader.keys(&self.table, result)
    }

    pub fn to_rows(&self) -> Result<Vec<Arc<RowData>>> {
        let cache = self.source.table_cache(&self.table);
        if self.table.has_primary_key() && cache.is_enabled() {
            let keys = self.keys()?;
            return cache.get_rows_by_keys(&keys, &self.source.reader());
        }
        let sql = self.to_sql()?;
        let reader = self.source.reader();
        let rows = reader.materialize(&self.table, reader.run(&sql)?)?;
        Ok(rows.into_iter().map(Arc::new).collect())
    }

    pub fn first(&self) -> Result<Option<Arc<RowData>>> {
        let single = Select {
            source: self.source,
            table: self.table.clone(),
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: Some(1),
            offset: self.offset,
        };
        Ok(single.to_rows()?.into_iter().next())
    }

    /// Number of matching rows; limit and offset are ignored
    pub fn count(&self) -> Result<u64> {
        let filter = self.where_group()?;
        let sql = SelectQuery::new(&self.table, Projection::Count)
            .filter(&filter)
            .build(self.source.dialect())?;
        let result = self.source.reader().run(&sql)?;
        match result.rows.first().and_then(|r| r.first()) {
            Some(Value::Int(n)) if *n >= 0 => Ok(*n as u64),
            other => Err(Error::new(
                ErrorKind::Backend,
                format!("COUNT(*) on '{}' returned {:?}", self.table.name, other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteConnector;
    use crate::core::types::MutableRow;
    use crate::query::ast::{constant, field, list};
    use crate::schema::{ColumnBuilder, DatabaseBuilder, HostType, TableBuilder};
    use tempfile::TempDir;

    fn source(dir: &TempDir) -> DataSource {
        let def = DatabaseBuilder::new("zoo")
            .table(
                TableBuilder::new("animals")
                    .column(ColumnBuilder::new("id", HostType::Int64).primary_key())
                    .column(ColumnBuilder::new("name", HostType::String))
                    .column(ColumnBuilder::new("legs", HostType::Int32))
                    .column(ColumnBuilder::new("tame", HostType::Bool).nullable()),
            )
            .build()
            .unwrap();
        let source = DataSource::open(Arc::new(def), Arc::new(SqliteConnector::open(dir.path().join("zoo.db")).unwrap())).unwrap();
        source.create_schema().unwrap();

        let animals = source.table("animals").unwrap().clone();
        {
            let mut tx = source.transaction().unwrap();
            let rows: [(i64, &str, i32, Option<bool>); 5] = [
                (1, "cat", 4, Some(true)),
                (2, "eagle", 2, Some(false)),
                (3, "snake", 0, None),
                (4, "dog", 4, Some(true)),
                (5, "wolf", 4, Some(false)),
            ];
            for (id, name, legs, tame) in rows {
                let row = MutableRow::new(animals.clone())
                    .with("id", id)
                    .unwrap()
                    .with("name", name)
                    .unwrap()
                    .with("legs", legs)
                    .unwrap()
                    .with("tame", tame)
                    .unwrap();
                tx.insert(row).unwrap();
            }
            tx.commit().unwrap();
        }
        source
    }

    fn names(rows: &[Arc<RowData>]) -> Vec<String> {
        rows.iter().map(|r| r.get("name").unwrap().as_str().unwrap().to_string()).collect()
    }

    #[test]
    fn filters_orders_and_pages() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let rows = source
            .query("animals")
            .unwrap()
            .filter(field("legs").equals(4))
            .order_by(OrderBy::desc(field("name")))
            .limit(2)
            .offset(1)
            .to_rows()
            .unwrap();
        assert_eq!(names(&rows), vec!["dog", "cat"]);
    }

    #[test]
    fn repeated_queries_share_cached_rows() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        source.cache().clear();
        let query = source.query("animals").unwrap().filter(field("legs").gt(1));
        let first = query.to_rows().unwrap();
        let second = query.to_rows().unwrap();
        assert_eq!(first.len(), 4);
        assert!(first.iter().zip(&second).all(|(a, b)| Arc::ptr_eq(a, b)));
        let stats = source.cache_stats();
        assert_eq!(stats.table("animals").unwrap().hit_count, 4);
    }

    #[test]
    fn negated_membership_excludes_values() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let all = source.query("animals").unwrap().count().unwrap();
        let excluded = source
            .query("animals")
            .unwrap()
            .filter(!list([1i64, 3]).contains(field("id")))
            .count()
            .unwrap();
        assert_eq!(excluded, all - 2);
    }

    #[test]
    fn empty_membership_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let none = source
            .query("animals")
            .unwrap()
            .filter(list(Vec::<i64>::new()).contains(field("id")))
            .to_rows()
            .unwrap();
        assert!(none.is_empty());
        let everything = source
            .query("animals")
            .unwrap()
            .filter(!list(Vec::<i64>::new()).contains(field("id")))
            .count()
            .unwrap();
        assert_eq!(everything, 5);
    }

    #[test]
    fn constant_membership_folds_to_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let everything = source
            .query("animals")
            .unwrap()
            .filter(list([1i64, 2]).contains(constant(1i64)))
            .to_rows()
            .unwrap();
        assert_eq!(everything.len(), 5);
        let tame_or_listed = source
            .query("animals")
            .unwrap()
            .filter(field("tame").equals(true) | list([1i64, 2]).contains(constant(2i64)))
            .count()
            .unwrap();
        assert_eq!(tame_or_listed, 5);
        let nothing = source
            .query("animals")
            .unwrap()
            .filter(!list([1i64, 2]).contains(constant(1i64)))
            .count()
            .unwrap();
        assert_eq!(nothing, 0);
    }

    #[test]
    fn like_arguments_match_literally() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let animals = source.table("animals").unwrap().clone();
        {
            let mut tx = source.transaction().unwrap();
            for (id, name) in [(6i64, "c_t"), (7, "50% cat")] {
                let row = MutableRow::new(animals.clone())
                    .with("id", id)
                    .unwrap()
                    .with("name", name)
                    .unwrap()
                    .with("legs", 4)
                    .unwrap();
                tx.insert(row).unwrap();
            }
            tx.commit().unwrap();
        }

        let underscore = source.query("animals").unwrap().filter(field("name").starts_with("c_")).to_rows().unwrap();
        assert_eq!(names(&underscore), vec!["c_t"]);
        let percent = source.query("animals").unwrap().filter(field("name").contains(constant("0%"))).to_rows().unwrap();
        assert_eq!(names(&percent), vec!["50% cat"]);
        let loose = source.query("animals").unwrap().filter(field("name").starts_with("c")).count().unwrap();
        assert_eq!(loose, 2);
    }

    #[test]
    fn nullable_bool_inequality_includes_nulls() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let mut wild = names(
            &source
                .query("animals")
                .unwrap()
                .filter(field("tame").not_equals(true))
                .to_rows()
                .unwrap(),
        );
        wild.sort();
        assert_eq!(wild, vec!["eagle", "snake", "wolf"]);
    }

    #[test]
    fn first_and_keys() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let query = source
            .query("animals")
            .unwrap()
            .filter(field("name").starts_with("e") | field("name").ends_with("f"))
            .order_by(OrderBy::asc(field("id")));
        assert_eq!(query.keys().unwrap(), vec![PrimaryKeys::single(2i64), PrimaryKeys::single(5i64)]);
        let first = query.first().unwrap().unwrap();
        assert_eq!(first.keys(), &PrimaryKeys::single(2i64));
        assert!(source
            .query("animals")
            .unwrap()
            .filter(field("legs").gt(10))
            .first()
            .unwrap()
            .is_none());
    }

    #[test]
    fn untranslatable_predicates_are_reported() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir);
        let err = source
            .query("animals")
            .unwrap()
            .filter(field("name").call("to_upper", vec![]))
            .to_rows()
            .unwrap_err();
        assert!(err.is(ErrorKind::NotImplemented));
    }
}
