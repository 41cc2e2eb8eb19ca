//! Predicate trees, their translation to WHERE groups, and SQL assembly.

pub mod ast;
pub mod select;
pub mod sql;
pub mod translator;
pub mod where_clause;

pub use ast::{constant, field, list, BinaryOp, Expr, OrderBy};
pub use select::Select;
pub use sql::{Projection, SelectQuery, Sql, SqlParam};
pub use translator::{translate, translate_order};
pub use where_clause::{BooleanType, Comparison, Relation, WhereGroup, WhereNode};
