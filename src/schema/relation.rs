use crate::schema::{RelationId, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Index,
}

/// An index over one or more columns of a table
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    pub name: String,
    pub table: TableId,
    /// Column positions within the owning table
    pub columns: Vec<usize>,
    pub kind: IndexKind,
    /// Relation parts that navigate through this index
    pub relation_parts: Vec<(RelationId, RelationSide)>,
}

impl ColumnIndex {
    pub fn is_single_column(&self) -> bool {
        self.columns.len() == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationSide {
    ForeignKey,
    CandidateKey,
}

impl RelationSide {
    pub fn other(self) -> RelationSide {
        match self {
            RelationSide::ForeignKey => RelationSide::CandidateKey,
            RelationSide::CandidateKey => RelationSide::ForeignKey,
        }
    }
}

/// One end of a relation: the table, the index it goes through and the
/// navigation name used from that table
#[derive(Debug, Clone)]
pub struct RelationPart {
    pub relation: RelationId,
    pub side: RelationSide,
    pub table: TableId,
    /// Position in the owning table's `indices`
    pub index: usize,
    pub name: String,
}

/// One-to-many relation between a foreign key and the key it references
#[derive(Debug, Clone)]
pub struct RelationDefinition {
    pub id: RelationId,
    pub constraint_name: String,
    pub foreign_key: RelationPart,
    pub candidate_key: RelationPart,
}

impl RelationDefinition {
    pub fn part(&self, side: RelationSide) -> &RelationPart {
        match side {
            RelationSide::ForeignKey => &self.foreign_key,
            RelationSide::CandidateKey => &self.candidate_key,
        }
    }

    pub fn other_side(&self, part: &RelationPart) -> &RelationPart {
        self.part(part.side.other())
    }
}
