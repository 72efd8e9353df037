use std::fmt;
use std::ops::Not;

use super::Value;

/// Comparison operators supported in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Arithmetic operators. `Add` also concatenates when either side is a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Expression AST for dynamic property values.
///
/// Paths are dotted segments: the first names a context key (or `properties`
/// for the current property map), later segments walk object fields and maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Compare {
        lhs: Box<Expr>,
        op: CompareOp,
        rhs: Box<Expr>,
    },
    Arith {
        lhs: Box<Expr>,
        op: ArithOp,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Neq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
            ArithOp::Rem => write!(f, "%"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Path(segments) => write!(f, "{}", segments.join(".")),
            Expr::Index { target, index } => write!(f, "{target}[{index}]"),
            Expr::Compare { lhs, op, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Arith { lhs, op, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::And(a, b) => write!(f, "({a} && {b})"),
            Expr::Or(a, b) => write!(f, "({a} || {b})"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => write!(f, "({condition} ? {then} : {otherwise})"),
        }
    }
}

impl Expr {
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn compare(self, op: CompareOp, rhs: Expr) -> Expr {
        Expr::Compare {
            lhs: Box::new(self),
            op,
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn arith(self, op: ArithOp, rhs: Expr) -> Expr {
        Expr::Arith {
            lhs: Box::new(self),
            op,
            rhs: Box::new(rhs),
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// Intermediate builder for path comparison expressions.
/// Created by [`field()`]; requires a comparison method to produce an [`Expr`].
#[derive(Debug, Clone)]
pub struct FieldExpr {
    path: String,
}

impl FieldExpr {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Expr {
        path(&self.path).compare(op, Expr::Literal(value.into()))
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    #[must_use]
    pub fn neq(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Neq, value)
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gte, value)
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lte, value)
    }
}

#[must_use]
pub fn field(path: &str) -> FieldExpr {
    FieldExpr {
        path: path.to_owned(),
    }
}

/// A dotted path expression, e.g. `path("object.name")`.
#[must_use]
pub fn path(dotted: &str) -> Expr {
    Expr::Path(dotted.split('.').map(str::to_owned).collect())
}

#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_eq_i64() {
        let expr = field("object.age").eq(18_i64);
        assert_eq!(
            expr,
            Expr::Compare {
                lhs: Box::new(Expr::Path(vec!["object".into(), "age".into()])),
                op: CompareOp::Eq,
                rhs: Box::new(Expr::Literal(Value::Int(18))),
            }
        );
    }

    #[test]
    fn field_gte_with_into() {
        let expr = field("score").gte(90_i64);
        assert!(matches!(
            expr,
            Expr::Compare {
                op: CompareOp::Gte,
                ..
            }
        ));
    }

    #[test]
    fn and_or_not_compose() {
        let both = field("a").eq(1_i64).and(field("b").eq(2_i64));
        let expr = (!both).or(field("c").lt(3_i64));
        assert!(matches!(expr, Expr::Or(ref lhs, _) if matches!(**lhs, Expr::Not(_))));
    }

    #[test]
    fn display() {
        let expr = field("object.age").gte(18_i64);
        assert_eq!(expr.to_string(), "(object.age >= 18)");
        let sum = path("a").arith(ArithOp::Add, lit("x"));
        assert_eq!(sum.to_string(), "(a + \"x\")");
        let cond = Expr::Conditional {
            condition: Box::new(path("editing")),
            then: Box::new(lit(1_i64)),
            otherwise: Box::new(lit(2_i64)),
        };
        assert_eq!(cond.to_string(), "(editing ? 1 : 2)");
    }
}
