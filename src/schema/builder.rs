use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use regex::Regex;
use crate::core::config::CacheSettings;
use crate::core::error::{Error, Result};
use crate::dialect::types::resolve_column_type;
use crate::schema::column::{ColumnDefinition, DefaultValue, HostType, ValueProperty};
use crate::schema::database::DatabaseDefinition;
use crate::schema::db_type::{DatabaseColumnType, DatabaseType};
use crate::schema::relation::{ColumnIndex, IndexKind, RelationDefinition, RelationPart, RelationSide};
use crate::schema::table::TableDefinition;
use crate::schema::{ColumnId, RelationId, TableId};

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

/// Descriptor for one column, normally emitted by a code generator
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    name: String,
    property: Option<String>,
    host_type: HostType,
    db_types: Vec<(DatabaseType, String)>,
    nullable: bool,
    auto_increment: bool,
    primary_key: bool,
    default: Option<DefaultValue>,
}

impl ColumnBuilder {
    pub fn new(name: &str, host_type: HostType) -> Self {
        ColumnBuilder {
            name: name.to_string(),
            property: None,
            host_type,
            db_types: Vec::new(),
            nullable: false,
            auto_increment: false,
            primary_key: false,
            default: None,
        }
    }

    pub fn property(mut self, name: &str) -> Self {
        self.property = Some(name.to_string());
        self
    }

    /// Declare the column type for one backend, e.g. `(DatabaseType::MySql, "varchar(50)")`
    pub fn db_type(mut self, database: DatabaseType, declaration: &str) -> Self {
        self.db_types.push((database, declaration.to_string()));
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone)]
struct ForeignKeySpec {
    column: String,
    references_table: String,
    references_column: String,
    constraint: String,
    /// Navigation name from this table to the referenced row
    name: String,
    /// Navigation name from the referenced table back to this one
    inverse_name: String,
}

#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    model: Option<String>,
    columns: Vec<ColumnBuilder>,
    indices: Vec<(String, Vec<String>, bool)>,
    foreign_keys: Vec<ForeignKeySpec>,
    use_cache: bool,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        TableBuilder {
            name: name.to_string(),
            model: None,
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            use_cache: true,
        }
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn column(mut self, column: ColumnBuilder) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indices.push((name.to_string(), columns.iter().map(|c| c.to_string()).collect(), false));
        self
    }

    pub fn unique(mut self, name: &str, columns: &[&str]) -> Self {
        self.indices.push((name.to_string(), columns.iter().map(|c| c.to_string()).collect(), true));
        self
    }

    /// `column` references `table.references`; `name` navigates to the parent,
    /// `inverse_name` navigates from the parent to its children
    pub fn foreign_key(
        mut self,
        column: &str,
        table: &str,
        references: &str,
        name: &str,
        inverse_name: &str,
    ) -> Self {
        self.foreign_keys.push(ForeignKeySpec {
            column: column.to_string(),
            references_table: table.to_string(),
            references_column: references.to_string(),
            constraint: format!("fk_{}_{}", self.name, column),
            name: name.to_string(),
            inverse_name: inverse_name.to_string(),
        });
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Builds and validates a `DatabaseDefinition`.
///
/// All problems found are collected and reported together.
#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    name: String,
    model_type: String,
    tables: Vec<TableBuilder>,
    cache: CacheSettings,
}

impl DatabaseBuilder {
    pub fn new(name: &str) -> Self {
        DatabaseBuilder {
            name: name.to_string(),
            model_type: name.to_string(),
            tables: Vec::new(),
            cache: CacheSettings::default(),
        }
    }

    pub fn model_type(mut self, model_type: &str) -> Self {
        self.model_type = model_type.to_string();
        self
    }

    pub fn table(mut self, table: TableBuilder) -> Self {
        self.tables.push(table);
        self
    }

    pub fn cache(mut self, settings: CacheSettings) -> Self {
        self.cache = settings;
        self
    }

    pub fn build(self) -> Result<DatabaseDefinition> {
        let mut errors = Vec::new();
        let mut tables = Vec::with_capacity(self.tables.len());
        let mut seen_tables = HashSet::new();

        for (table_index, tb) in self.tables.iter().enumerate() {
            if !seen_tables.insert(tb.name.clone()) {
                errors.push(Error::invalid_model(format!(
                    "database '{}' declares table '{}' more than once",
                    self.name, tb.name
                )));
                continue;
            }
            check_identifier(&tb.name, &format!("table '{}'", tb.name), &mut errors);
            tables.push(build_table(TableId(table_index), tb, &mut errors));
        }

        if !errors.is_empty() {
            return Err(Error::aggregate(errors));
        }

        let mut relations = Vec::new();
        for tb in &self.tables {
            for fk in &tb.foreign_keys {
                match link_foreign_key(&mut tables, &tb.name, fk, RelationId(relations.len())) {
                    Ok(relation) => relations.push(relation),
                    Err(e) => errors.push(e),
                }
            }
        }

        for table in &mut tables {
            let model = table.model_name.clone();
            for column in &mut table.columns {
                for database in DatabaseType::BACKENDS {
                    match resolve_column_type(&column.db_types, &column.property.host_type, database) {
                        Some(ty) => column.resolved.push(ty),
                        None => errors.push(Error::invalid_model(format!(
                            "cannot resolve a {} type for column '{}.{}' (model '{}', property '{}', host type {})",
                            database, table.name, column.name, model, column.property.name, column.property.host_type
                        ))),
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(Error::aggregate(errors));
        }

        let mut cache = self.cache;
        cache.validate()?;
        cache.apply_defaults();

        Ok(DatabaseDefinition {
            name: self.name,
            model_type: self.model_type,
            tables: tables.into_iter().map(Arc::new).collect(),
            relations,
            cache,
        })
    }
}

fn check_identifier(name: &str, what: &str, errors: &mut Vec<Error>) {
    if !identifier_pattern().is_match(name) {
        errors.push(Error::invalid_model(format!("{} has an invalid identifier '{}'", what, name)));
    }
}

fn build_table(id: TableId, tb: &TableBuilder, errors: &mut Vec<Error>) -> TableDefinition {
    let model_name = tb.model.clone().unwrap_or_else(|| tb.name.clone());
    let mut columns = Vec::with_capacity(tb.columns.len());
    let mut seen = HashSet::new();

    for cb in &tb.columns {
        let what = format!("column '{}.{}'", tb.name, cb.name);
        check_identifier(&cb.name, &what, errors);
        if !seen.insert(cb.name.clone()) {
            errors.push(Error::invalid_model(format!("{} is declared more than once", what)));
            continue;
        }
        let mut db_types = Vec::new();
        for (database, declaration) in &cb.db_types {
            match DatabaseColumnType::parse(*database, declaration) {
                Ok(ty) => db_types.push(ty),
                Err(e) => errors.push(Error::invalid_model(format!(
                    "{} (model '{}'): {}",
                    what, model_name, e.context
                ))),
            }
        }
        if cb.primary_key && cb.nullable {
            errors.push(Error::invalid_model(format!("{} is a primary key and cannot be nullable", what)));
        }
        columns.push(ColumnDefinition {
            id: ColumnId { table: id, index: columns.len() },
            name: cb.name.clone(),
            db_types,
            nullable: cb.nullable,
            auto_increment: cb.auto_increment,
            primary_key: cb.primary_key,
            foreign_key: false,
            property: ValueProperty {
                name: cb.property.clone().unwrap_or_else(|| cb.name.clone()),
                host_type: cb.host_type.clone(),
                default: cb.default.clone(),
            },
            resolved: Vec::new(),
        });
    }

    let primary_keys: Vec<usize> = columns.iter().filter(|c| c.primary_key).map(|c| c.id.index).collect();
    let mut indices = Vec::new();
    if !primary_keys.is_empty() {
        indices.push(ColumnIndex {
            name: format!("pk_{}", tb.name),
            table: id,
            columns: primary_keys.clone(),
            kind: IndexKind::PrimaryKey,
            relation_parts: Vec::new(),
        });
    }

    for (name, cols, unique) in &tb.indices {
        let mut positions = Vec::new();
        for col in cols {
            match columns.iter().position(|c| &c.name == col) {
                Some(pos) => positions.push(pos),
                None => errors.push(Error::invalid_model(format!(
                    "index '{}' on table '{}' references unknown column '{}'",
                    name, tb.name, col
                ))),
            }
        }
        indices.push(ColumnIndex {
            name: name.clone(),
            table: id,
            columns: positions,
            kind: if *unique { IndexKind::Unique } else { IndexKind::Index },
            relation_parts: Vec::new(),
        });
    }

    TableDefinition {
        id,
        name: tb.name.clone(),
        model_name,
        columns,
        primary_keys,
        indices,
        use_cache: tb.use_cache,
    }
}

/// Reuse a non-primary index on exactly `column` or add one of `kind`
fn ensure_index(table: &mut TableDefinition, column: usize, kind: IndexKind, name: String) -> usize {
    if let Some(pos) = table.index_on_column(column) {
        if kind == IndexKind::ForeignKey && table.indices[pos].kind == IndexKind::Index {
            table.indices[pos].kind = IndexKind::ForeignKey;
        }
        return pos;
    }
    table.indices.push(ColumnIndex {
        name,
        table: table.id,
        columns: vec![column],
        kind,
        relation_parts: Vec::new(),
    });
    table.indices.len() - 1
}

fn link_foreign_key(
    tables: &mut [TableDefinition],
    table_name: &str,
    fk: &ForeignKeySpec,
    relation_id: RelationId,
) -> Result<RelationDefinition> {
    let fk_table = tables
        .iter()
        .position(|t| t.name == table_name)
        .ok_or_else(|| Error::invalid_model(format!("unknown table '{}'", table_name)))?;
    let ck_table = tables
        .iter()
        .position(|t| t.name == fk.references_table)
        .ok_or_else(|| {
            Error::invalid_model(format!(
                "foreign key '{}' on '{}.{}' references unknown table '{}'",
                fk.constraint, table_name, fk.column, fk.references_table
            ))
        })?;
    let fk_column = tables[fk_table].column_index(&fk.column).ok_or_else(|| {
        Error::invalid_model(format!(
            "foreign key '{}' uses unknown column '{}.{}'",
            fk.constraint, table_name, fk.column
        ))
    })?;
    let ck_column = tables[ck_table].column_index(&fk.references_column).ok_or_else(|| {
        Error::invalid_model(format!(
            "foreign key '{}' references unknown column '{}.{}'",
            fk.constraint, fk.references_table, fk.references_column
        ))
    })?;

    tables[fk_table].columns[fk_column].foreign_key = true;
    let fk_index = ensure_index(&mut tables[fk_table], fk_column, IndexKind::ForeignKey, fk.constraint.clone());

    let ck_is_pk = tables[ck_table].primary_keys == [ck_column];
    let ck_index = if ck_is_pk {
        0
    } else {
        let name = format!("uq_{}_{}", fk.references_table, fk.references_column);
        ensure_index(&mut tables[ck_table], ck_column, IndexKind::Unique, name)
    };

    tables[fk_table].indices[fk_index]
        .relation_parts
        .push((relation_id, RelationSide::ForeignKey));
    tables[ck_table].indices[ck_index]
        .relation_parts
        .push((relation_id, RelationSide::CandidateKey));

    Ok(RelationDefinition {
        id: relation_id,
        constraint_name: fk.constraint.clone(),
        foreign_key: RelationPart {
            relation: relation_id,
            side: RelationSide::ForeignKey,
            table: TableId(fk_table),
            index: fk_index,
            name: fk.name.clone(),
        },
        candidate_key: RelationPart {
            relation: relation_id,
            side: RelationSide::CandidateKey,
            table: TableId(ck_table),
            index: ck_index,
            name: fk.inverse_name.clone(),
        },
    })
}
