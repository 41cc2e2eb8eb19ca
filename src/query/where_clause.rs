use crate::core::error::Result;
use crate::core::types::{PrimaryKeys, Value};
use crate::dialect::SqlDialect;
use crate::query::sql::Sql;
use crate::schema::TableDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Relation {
    fn operator(&self) -> &'static str {
        match self {
            Relation::Equal => "=",
            Relation::NotEqual => "<>",
            Relation::GreaterThan => ">",
            Relation::GreaterThanOrEqual => ">=",
            Relation::LessThan => "<",
            Relation::LessThanOrEqual => "<=",
            Relation::Like => "LIKE",
            Relation::In => "IN",
            Relation::NotIn => "NOT IN",
            Relation::IsNull => "IS NULL",
            Relation::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanType {
    And,
    Or,
}

/// `column <relation> operands`, optionally wrapped in NOT
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Column position within the table
    pub column: usize,
    pub relation: Relation,
    pub operands: Vec<Value>,
    pub negated: bool,
}

impl Comparison {
    pub fn new(column: usize, relation: Relation, operands: Vec<Value>) -> Self {
        Comparison { column, relation, operands, negated: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    Comparison(Comparison),
    Group(WhereGroup),
    /// Constant-folded predicate
    Literal(bool),
}

/// AND/OR group of predicates
#[derive(Debug, Clone, PartialEq)]
pub struct WhereGroup {
    pub kind: BooleanType,
    pub negated: bool,
    pub nodes: Vec<WhereNode>,
}

impl WhereGroup {
    pub fn new(kind: BooleanType) -> Self {
        WhereGroup { kind, negated: false, nodes: Vec::new() }
    }

    pub fn and() -> Self {
        WhereGroup::new(BooleanType::And)
    }

    pub fn or() -> Self {
        WhereGroup::new(BooleanType::Or)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: WhereNode) {
        self.nodes.push(node);
    }

    pub fn compare(mut self, column: usize, relation: Relation, value: Value) -> Self {
        self.nodes.push(WhereNode::Comparison(Comparison::new(column, relation, vec![value])));
        self
    }

    /// Comparisons that appear anywhere under this group
    pub fn comparison_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| match n {
                WhereNode::Comparison(_) => 1,
                WhereNode::Group(g) => g.comparison_count(),
                WhereNode::Literal(_) => 0,
            })
            .sum()
    }

    /// `(k1 = ? AND k2 = ?) OR (...)` over a set of primary keys
    pub fn for_keys(table: &TableDefinition, keys: &[PrimaryKeys]) -> Self {
        let mut group = WhereGroup::or();
        for key in keys {
            let mut conj = WhereGroup::and();
            for (&column, value) in table.primary_keys.iter().zip(key.values()) {
                conj = conj.compare(column, Relation::Equal, value.clone());
            }
            group.push(WhereNode::Group(conj));
        }
        group
    }

    pub fn render(&self, table: &TableDefinition, dialect: &dyn SqlDialect, sql: &mut Sql) -> Result<()> {
        if self.negated {
            sql.push("NOT ");
        }
        if self.nodes.is_empty() {
            let empty = match self.kind {
                BooleanType::And => "1=1",
                BooleanType::Or => "1=0",
            };
            sql.push(empty);
            return Ok(());
        }
        let wrap = self.negated || self.nodes.len() > 1;
        if wrap {
            sql.push("(");
        }
        let joiner = match self.kind {
            BooleanType::And => " AND ",
            BooleanType::Or => " OR ",
        };
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                sql.push(joiner);
            }
            match node {
                WhereNode::Comparison(cmp) => render_comparison(cmp, table, dialect, sql)?,
                WhereNode::Group(group) => group.render(table, dialect, sql)?,
                WhereNode::Literal(true) => sql.push("1=1"),
                WhereNode::Literal(false) => sql.push("1=0"),
            }
        }
        if wrap {
            sql.push(")");
        }
        Ok(())
    }
}

fn render_comparison(cmp: &Comparison, table: &TableDefinition, dialect: &dyn SqlDialect, sql: &mut Sql) -> Result<()> {
    let column = &table.columns[cmp.column];
    if cmp.negated {
        sql.push("NOT (");
    }
    match cmp.relation {
        Relation::In | Relation::NotIn if cmp.operands.is_empty() => {
            // an empty IN list is rejected by most backends
            sql.push(if cmp.relation == Relation::In { "1=0" } else { "1=1" });
        }
        Relation::In | Relation::NotIn => {
            let mut markers = Vec::with_capacity(cmp.operands.len());
            for value in &cmp.operands {
                markers.push(sql.bind(dialect, dialect.write_value(column, value)?));
            }
            let text = format!(
                "{} {} ({})",
                dialect.quote_identifier(&column.name),
                cmp.relation.operator(),
                markers.join(", ")
            );
            sql.push(&text);
        }
        Relation::IsNull | Relation::IsNotNull => {
            let text = format!("{} {}", dialect.quote_identifier(&column.name), cmp.relation.operator());
            sql.push(&text);
        }
        _ => {
            let value = cmp.operands.first().cloned().unwrap_or(Value::Null);
            let marker = sql.bind(dialect, dialect.write_value(column, &value)?);
            let mut text = format!(
                "{} {} {}",
                dialect.quote_identifier(&column.name),
                cmp.relation.operator(),
                marker
            );
            if cmp.relation == Relation::Like {
                text.push(' ');
                text.push_str(dialect.like_escape());
            }
            sql.push(&text);
        }
    }
    if cmp.negated {
        sql.push(")");
    }
    Ok(())
}
