use std::ops::{BitAnd, BitOr, Not};
use crate::core::types::Value;

/// Predicate tree over a table's fields, as a host query surface would build it
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference by database or property name
    Field(String),
    Constant(Value),
    List(Vec<Value>),
    /// Borrowed view over a list; translated as the list itself
    Span(Box<Expr>),
    /// Unwrapped value of a nullable field
    Unwrap(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Call {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Operator to use when the operands are swapped
    pub fn mirrored(&self) -> BinaryOp {
        match self {
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            other => *other,
        }
    }
}

pub fn field(name: &str) -> Expr {
    Expr::Field(name.to_string())
}

pub fn constant(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

pub fn list<I, V>(values: I) -> Expr
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Expr::List(values.into_iter().map(Into::into).collect())
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(self, op: BinaryOp, value: impl Into<Value>) -> Expr {
        Expr::binary(op, self, Expr::Constant(value.into()))
    }

    pub fn equals(self, value: impl Into<Value>) -> Expr {
        self.compare(BinaryOp::Eq, value)
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Expr {
        self.compare(BinaryOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Expr {
        self.compare(BinaryOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Expr {
        self.compare(BinaryOp::Ge, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Expr {
        self.compare(BinaryOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Expr {
        self.compare(BinaryOp::Le, value)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    /// `.Value` on a nullable field
    pub fn value(self) -> Expr {
        Expr::Unwrap(Box::new(self))
    }

    pub fn as_span(self) -> Expr {
        Expr::Span(Box::new(self))
    }

    pub fn call(self, method: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            target: Box::new(self),
            method: method.to_string(),
            args,
        }
    }

    /// Membership when called on a list, substring match when called on a field
    pub fn contains(self, item: Expr) -> Expr {
        self.call("contains", vec![item])
    }

    pub fn starts_with(self, prefix: &str) -> Expr {
        self.call("starts_with", vec![constant(prefix)])
    }

    pub fn ends_with(self, suffix: &str) -> Expr {
        self.call("ends_with", vec![constant(suffix)])
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        OrderBy { expr, descending: false }
    }

    pub fn desc(expr: Expr) -> Self {
        OrderBy { expr, descending: true }
    }
}
