//! Lowers a predicate tree into nested AND/OR groups of simple comparisons.
//!
//! NOT nodes are not emitted directly: they bump a pending-negation counter
//! which the next comparison or group consumes. That makes `!(a && b)` a
//! negated group instead of two negated comparisons, and lets membership
//! tests turn into `NOT IN` without double negation.

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::query::ast::{BinaryOp, Expr, OrderBy};
use crate::query::where_clause::{BooleanType, Comparison, Relation, WhereGroup, WhereNode};
use crate::schema::{HostType, TableDefinition};

/// Translate a predicate into a WHERE group for `table`
pub fn translate(table: &TableDefinition, expr: &Expr) -> Result<WhereGroup> {
    let mut translator = PredicateTranslator::new(table);
    translator.visit(expr)?;
    Ok(translator.finish())
}

/// Translate ORDER BY terms into `(column, descending)` pairs
pub fn translate_order(table: &TableDefinition, orders: &[OrderBy]) -> Result<Vec<(usize, bool)>> {
    orders
        .iter()
        .map(|order| match member(&order.expr) {
            Some(name) => Ok((resolve_column(table, name)?, order.descending)),
            None => Err(Error::not_implemented(format!(
                "cannot order by {:?}; only field accesses are supported",
                order.expr
            ))),
        })
        .collect()
}

enum Operand {
    Column(usize),
    Value(Value),
}

pub struct PredicateTranslator<'a> {
    table: &'a TableDefinition,
    negations: u32,
    root: WhereGroup,
    stack: Vec<WhereGroup>,
}

impl<'a> PredicateTranslator<'a> {
    pub fn new(table: &'a TableDefinition) -> Self {
        PredicateTranslator {
            table,
            negations: 0,
            root: WhereGroup::and(),
            stack: Vec::new(),
        }
    }

    pub fn finish(self) -> WhereGroup {
        self.root
    }

    fn current(&mut self) -> &mut WhereGroup {
        match self.stack.last_mut() {
            Some(group) => group,
            None => &mut self.root,
        }
    }

    /// Consume all pending NOTs; an odd count negates
    fn take_negation(&mut self) -> bool {
        let negated = self.negations % 2 == 1;
        self.negations = 0;
        negated
    }

    fn emit(&mut self, node: WhereNode) {
        self.current().push(node);
    }

    pub fn visit(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Not(inner) => {
                self.negations += 1;
                self.visit(inner)
            }
            Expr::Binary { op: BinaryOp::And, left, right } => self.visit_group(BooleanType::And, left, right),
            Expr::Binary { op: BinaryOp::Or, left, right } => self.visit_group(BooleanType::Or, left, right),
            Expr::Binary { op, left, right } => self.visit_comparison(*op, left, right),
            Expr::Call { target, method, args } => self.visit_call(target, method, args),
            Expr::Constant(Value::Bool(b)) => {
                let negated = self.take_negation();
                self.emit(WhereNode::Literal(*b != negated));
                Ok(())
            }
            Expr::Field(_) | Expr::Unwrap(_) => {
                // a bare boolean member used as a predicate means `member == true`
                let column = self.column_operand(expr)?;
                if self.table.columns[column].property.host_type != HostType::Bool {
                    return Err(Error::not_implemented(format!(
                        "non-boolean column '{}' used as a predicate",
                        self.table.columns[column].name
                    )));
                }
                self.push_comparison(column, BinaryOp::Eq, Value::Bool(true))
            }
            other => Err(Error::not_implemented(format!("cannot translate {:?} to a predicate", other))),
        }
    }

    fn visit_group(&mut self, kind: BooleanType, left: &Expr, right: &Expr) -> Result<()> {
        let negated = self.take_negation();
        if !negated && self.current().kind == kind {
            self.visit(left)?;
            return self.visit(right);
        }

        self.stack.push(WhereGroup { kind, negated, nodes: Vec::new() });
        let result = self.visit(left).and_then(|_| self.visit(right));
        let group = match self.stack.pop() {
            Some(group) => group,
            None => return Err(Error::new(ErrorKind::InvalidState, "predicate group stack underflow".to_string())),
        };
        result?;

        if !group.negated && group.nodes.len() == 1 {
            self.emit(group.nodes.into_iter().next().unwrap_or(WhereNode::Literal(true)));
        } else {
            self.emit(WhereNode::Group(group));
        }
        Ok(())
    }

    fn visit_comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<()> {
        let (column, op, value) = match (self.operand(left)?, self.operand(right)?) {
            (Operand::Column(c), Operand::Value(v)) => (c, op, v),
            (Operand::Value(v), Operand::Column(c)) => (c, op.mirrored(), v),
            (Operand::Value(a), Operand::Value(b)) => {
                let result = match op {
                    BinaryOp::Eq => a == b,
                    BinaryOp::Ne => a != b,
                    _ => {
                        return Err(Error::not_implemented(format!(
                            "cannot fold constant comparison {:?} {:?} {:?}",
                            a, op, b
                        )));
                    }
                };
                let negated = self.take_negation();
                self.emit(WhereNode::Literal(result != negated));
                return Ok(());
            }
            (Operand::Column(_), Operand::Column(_)) => {
                return Err(Error::not_implemented("column-to-column comparisons are not supported"));
            }
        };
        self.push_comparison(column, op, value)
    }

    fn push_comparison(&mut self, column: usize, op: BinaryOp, value: Value) -> Result<()> {
        let negated = self.take_negation();
        let col = &self.table.columns[column];

        // negated equality on a nullable boolean must also match NULL
        let effective_ne = match op {
            BinaryOp::Eq => negated,
            BinaryOp::Ne => !negated,
            _ => false,
        };
        if let Value::Bool(b) = value {
            if (op == BinaryOp::Eq || op == BinaryOp::Ne) && col.property.host_type == HostType::Bool {
                if !effective_ne {
                    self.emit(cmp(column, Relation::Equal, Value::Bool(b)));
                } else if col.nullable {
                    let mut group = WhereGroup::or();
                    group.push(cmp(column, Relation::IsNull, Value::Null));
                    group.push(cmp(column, Relation::NotEqual, Value::Bool(b)));
                    self.emit(WhereNode::Group(group));
                } else {
                    self.emit(cmp(column, Relation::NotEqual, Value::Bool(b)));
                }
                return Ok(());
            }
        }

        let relation = match (op, value.is_null()) {
            (BinaryOp::Eq, true) => Relation::IsNull,
            (BinaryOp::Ne, true) => Relation::IsNotNull,
            (BinaryOp::Eq, false) => Relation::Equal,
            (BinaryOp::Ne, false) => Relation::NotEqual,
            (BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le, true) => {
                return Err(Error::invalid_argument(format!(
                    "column '{}' cannot be ordered against null",
                    self.table.columns[column].name
                )));
            }
            (BinaryOp::Gt, _) => Relation::GreaterThan,
            (BinaryOp::Ge, _) => Relation::GreaterThanOrEqual,
            (BinaryOp::Lt, _) => Relation::LessThan,
            (BinaryOp::Le, _) => Relation::LessThanOrEqual,
            (BinaryOp::And | BinaryOp::Or, _) => {
                return Err(Error::new(ErrorKind::InvalidArgument, format!("{:?} is not a comparison", op)));
            }
        };
        let operands = if value.is_null() { Vec::new() } else { vec![value] };
        self.emit(WhereNode::Comparison(Comparison {
            column,
            relation,
            operands,
            negated,
        }));
        Ok(())
    }

    fn visit_call(&mut self, target: &Expr, method: &str, args: &[Expr]) -> Result<()> {
        match (method, args) {
            ("contains", [item]) => match list_values(target) {
                Some(values) => self.visit_membership(values, item),
                None => self.visit_like(target, item, |s| format!("%{}%", s)),
            },
            ("starts_with", [prefix]) => self.visit_like(target, prefix, |s| format!("{}%", s)),
            ("ends_with", [suffix]) => self.visit_like(target, suffix, |s| format!("%{}", s)),
            _ => Err(Error::not_implemented(format!(
                "method '{}' with {} argument(s) cannot be translated to SQL",
                method,
                args.len()
            ))),
        }
    }

    fn visit_membership(&mut self, values: &[Value], item: &Expr) -> Result<()> {
        match self.operand(item)? {
            Operand::Value(v) => {
                let negated = self.take_negation();
                self.emit(WhereNode::Literal(values.contains(&v) != negated));
            }
            Operand::Column(column) => {
                let negated = self.take_negation();
                if values.is_empty() {
                    // nothing is in an empty set; everything is outside it
                    self.emit(WhereNode::Literal(negated));
                } else {
                    let relation = if negated { Relation::NotIn } else { Relation::In };
                    self.emit(WhereNode::Comparison(Comparison::new(column, relation, values.to_vec())));
                }
            }
        }
        Ok(())
    }

    fn visit_like(&mut self, target: &Expr, arg: &Expr, pattern: impl Fn(&str) -> String) -> Result<()> {
        let column = self.column_operand(target)?;
        let text = match self.operand(arg)? {
            Operand::Value(Value::Text(s)) => escape_like(&s),
            _ => {
                return Err(Error::not_implemented(format!(
                    "string match on '{}' needs a constant string argument",
                    self.table.columns[column].name
                )));
            }
        };
        let negated = self.take_negation();
        self.emit(WhereNode::Comparison(Comparison {
            column,
            relation: Relation::Like,
            operands: vec![Value::Text(pattern(&text))],
            negated,
        }));
        Ok(())
    }

    fn column_operand(&self, expr: &Expr) -> Result<usize> {
        match self.operand(expr)? {
            Operand::Column(c) => Ok(c),
            Operand::Value(v) => Err(Error::not_implemented(format!("expected a field, found constant {}", v))),
        }
    }

    fn operand(&self, expr: &Expr) -> Result<Operand> {
        match expr {
            Expr::Field(name) => Ok(Operand::Column(resolve_column(self.table, name)?)),
            // `.Value` keeps the field reference; the cast is implicit in SQL
            Expr::Unwrap(inner) => self.operand(inner),
            Expr::Constant(v) => Ok(Operand::Value(v.clone())),
            other => Err(Error::not_implemented(format!("unsupported operand {:?}", other))),
        }
    }
}

fn cmp(column: usize, relation: Relation, value: Value) -> WhereNode {
    let operands = if value.is_null() { Vec::new() } else { vec![value] };
    WhereNode::Comparison(Comparison::new(column, relation, operands))
}

/// Escapes LIKE wildcards so the argument matches literally; pairs with `ESCAPE '\'`
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn list_values(expr: &Expr) -> Option<&[Value]> {
    match expr {
        Expr::List(values) => Some(values),
        Expr::Span(inner) => list_values(inner),
        _ => None,
    }
}

fn member(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Field(name) => Some(name),
        Expr::Unwrap(inner) => member(inner),
        _ => None,
    }
}

fn resolve_column(table: &TableDefinition, name: &str) -> Result<usize> {
    table.column_index(name).ok_or_else(|| {
        Error::invalid_argument(format!("table '{}' has no column '{}'", table.name, name))
    })
}
