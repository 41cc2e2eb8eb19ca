use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use crate::core::config::CacheSettings;
use crate::core::error::{Error, ErrorKind, Result};
use crate::schema::column::ColumnDefinition;
use crate::schema::relation::{RelationDefinition, RelationPart};
use crate::schema::table::TableDefinition;
use crate::schema::{ColumnId, RelationId, TableId};

/// Metadata graph for one logical database.
///
/// Tables live in an arena indexed by `TableId`; columns and relation parts
/// refer to each other by id, never by reference.
#[derive(Debug)]
pub struct DatabaseDefinition {
    pub name: String,
    /// Host type the definition was declared by
    pub model_type: String,
    pub tables: Vec<Arc<TableDefinition>>,
    pub relations: Vec<RelationDefinition>,
    pub cache: CacheSettings,
}

impl DatabaseDefinition {
    pub fn table(&self, name: &str) -> Option<&Arc<TableDefinition>> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_by_model(&self, model_name: &str) -> Option<&Arc<TableDefinition>> {
        self.tables.iter().find(|t| t.model_name == model_name)
    }

    pub fn table_by_id(&self, id: TableId) -> &Arc<TableDefinition> {
        &self.tables[id.0]
    }

    pub fn require_table(&self, name: &str) -> Result<&Arc<TableDefinition>> {
        self.table(name)
            .or_else(|| self.table_by_model(name))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("database '{}' has no table or model '{}'", self.name, name),
                )
            })
    }

    pub fn column(&self, id: ColumnId) -> &ColumnDefinition {
        &self.tables[id.table.0].columns[id.index]
    }

    pub fn relation(&self, id: RelationId) -> &RelationDefinition {
        &self.relations[id.0]
    }

    pub fn other_side(&self, part: &RelationPart) -> &RelationPart {
        self.relation(part.relation).other_side(part)
    }

    /// Relation parts owned by a table, found through the table's indices
    pub fn relation_parts(&self, table: TableId) -> impl Iterator<Item = &RelationPart> {
        self.tables[table.0]
            .indices
            .iter()
            .flat_map(|idx| idx.relation_parts.iter())
            .map(move |(rel, side)| self.relation(*rel).part(*side))
    }

    /// Find a relation part of `table` by its navigation name
    pub fn relation_part(&self, table: TableId, name: &str) -> Option<&RelationPart> {
        self.relation_parts(table).find(|p| p.name == name)
    }
}

/// Host-side declaration of a database; implemented by model crates or generated code
pub trait DatabaseModel: 'static {
    fn definition() -> Result<DatabaseDefinition>;
}

/// Loaded definitions keyed by the declaring host type, each built at most once
#[derive(Default)]
pub struct DefinitionRegistry {
    loaded: Mutex<HashMap<TypeId, Arc<DatabaseDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<M: DatabaseModel>(&self) -> Result<Arc<DatabaseDefinition>> {
        let mut loaded = self.loaded.lock();
        if let Some(def) = loaded.get(&TypeId::of::<M>()) {
            return Ok(def.clone());
        }
        let def = Arc::new(M::definition()?);
        log::info!(
            "loaded database definition '{}' ({} tables, {} relations)",
            def.name,
            def.tables.len(),
            def.relations.len()
        );
        loaded.insert(TypeId::of::<M>(), def.clone());
        Ok(def)
    }

    pub fn get<M: DatabaseModel>(&self) -> Option<Arc<DatabaseDefinition>> {
        self.loaded.lock().get(&TypeId::of::<M>()).cloned()
    }

    pub fn len(&self) -> usize {
        self.loaded.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
