//! Lazily resolved property values.
//!
//! A [`DynamicValue`] is one of a closed set of variants. Capabilities are
//! queried with methods rather than type tests:
//!
//! | variant          | evaluate | settable | statically resolvable |
//! |------------------|----------|----------|-----------------------|
//! | field path       | yes      | yes      | no                    |
//! | expression       | yes      | no       | no                    |
//! | deferred merge   | yes      | no       | if both operands are  |
//! | static wrapper   | once     | no       | yes                   |

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::context::Context;
use crate::error::MetaError;
use crate::evaluate::{self, EvalError};
use crate::merge::PropertyMerger;
use crate::parse::{self, ParseError};
use crate::types::{Expr, Value};

#[derive(Debug)]
enum DynamicKind {
    FieldPath(Vec<String>),
    Expression {
        source: String,
        expr: Expr,
    },
    Deferred {
        merger: Arc<dyn PropertyMerger>,
        orig: Value,
        incoming: Value,
        is_declare: bool,
    },
    StaticWrapper {
        inner: Value,
        resolved: OnceLock<Value>,
    },
}

/// A property value resolved against a [`Context`] when read.
///
/// Cheap to clone; equality and hashing are by identity.
#[derive(Clone)]
pub struct DynamicValue(Arc<DynamicKind>);

impl DynamicValue {
    fn from_kind(kind: DynamicKind) -> Self {
        Self(Arc::new(kind))
    }

    /// Dereference a dotted path: the first segment names a context key
    /// (or `properties`), the rest walk object fields and maps.
    #[must_use]
    pub fn field_path(dotted: &str) -> Self {
        Self::from_kind(DynamicKind::FieldPath(
            dotted.split('.').map(str::to_owned).collect(),
        ))
    }

    /// Compile an expression evaluated on every read.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if `source` is not a valid expression.
    pub fn expression(source: &str) -> Result<Self, ParseError> {
        let expr = parse::parse_expression(source)?;
        Ok(Self::from_kind(DynamicKind::Expression {
            source: source.trim().to_owned(),
            expr,
        }))
    }

    /// Compile an expression resolved once per match path, then memoized.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if `source` is not a valid expression.
    pub fn static_expression(source: &str) -> Result<Self, ParseError> {
        Ok(Self::statically_resolved(Value::Dynamic(Self::expression(
            source,
        )?)))
    }

    #[must_use]
    pub fn from_expr(expr: Expr) -> Self {
        Self::from_kind(DynamicKind::Expression {
            source: expr.to_string(),
            expr,
        })
    }

    /// Wrap a value so its resolution is computed once and then reused.
    #[must_use]
    pub fn statically_resolved(inner: Value) -> Self {
        Self::from_kind(DynamicKind::StaticWrapper {
            inner,
            resolved: OnceLock::new(),
        })
    }

    pub(crate) fn deferred(
        merger: Arc<dyn PropertyMerger>,
        orig: Value,
        incoming: Value,
        is_declare: bool,
    ) -> Self {
        Self::from_kind(DynamicKind::Deferred {
            merger,
            orig,
            incoming,
            is_declare,
        })
    }

    /// Whether the value depends only on the match path, not on per-context state.
    #[must_use]
    pub fn is_statically_resolvable(&self) -> bool {
        match &*self.0 {
            DynamicKind::StaticWrapper { .. } => true,
            DynamicKind::Deferred { orig, incoming, .. } => {
                static_operand(orig) && static_operand(incoming)
            }
            DynamicKind::FieldPath(_) | DynamicKind::Expression { .. } => false,
        }
    }

    #[must_use]
    pub fn is_settable(&self) -> bool {
        matches!(&*self.0, DynamicKind::FieldPath(_))
    }

    /// Resolve against `context`. The result may itself be dynamic; use
    /// [`Context::resolve_value`] to resolve fully.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::Evaluation`] when an expression fails.
    pub fn evaluate(&self, context: &mut Context) -> Result<Value, MetaError> {
        match &*self.0 {
            DynamicKind::FieldPath(path) => context.resolve_path(path),
            DynamicKind::Expression { source, expr } => {
                evaluate::evaluate(expr, context).map_err(|e| match e {
                    EvalError::Meta(inner) => inner,
                    EvalError::Failed(message) => MetaError::Evaluation {
                        expression: source.clone(),
                        message,
                        context: context.debug_string(),
                    },
                })
            }
            DynamicKind::Deferred {
                merger,
                orig,
                incoming,
                is_declare,
            } => {
                let orig = context.resolve_value(orig.clone())?;
                let incoming = context.resolve_value(incoming.clone())?;
                Ok(merger.merge(&orig, &incoming, *is_declare))
            }
            DynamicKind::StaticWrapper { inner, resolved } => {
                if let Some(value) = resolved.get() {
                    return Ok(value.clone());
                }
                let value = context.resolve_value(inner.clone())?;
                let _ = resolved.set(value.clone());
                Ok(value)
            }
        }
    }

    /// Write `value` through the path this value reads.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::NotSettable`] unless the value is a field path
    /// ending at a writable object field.
    pub fn evaluate_set(&self, context: &mut Context, value: Value) -> Result<(), MetaError> {
        match &*self.0 {
            DynamicKind::FieldPath(path) => context.assign_path(path, value),
            _ => Err(MetaError::NotSettable {
                path: self.to_string(),
            }),
        }
    }

    /// A fresh instance for a new match path, so memos are not shared between paths.
    pub(crate) fn awaken(&self) -> Option<DynamicValue> {
        match &*self.0 {
            DynamicKind::StaticWrapper { inner, .. } => Some(Self::statically_resolved(inner.clone())),
            DynamicKind::Deferred {
                merger,
                orig,
                incoming,
                is_declare,
            } => {
                let fresh_orig = awaken_operand(orig);
                let fresh_incoming = awaken_operand(incoming);
                if fresh_orig.is_none() && fresh_incoming.is_none() {
                    return None;
                }
                Some(Self::deferred(
                    Arc::clone(merger),
                    fresh_orig.unwrap_or_else(|| orig.clone()),
                    fresh_incoming.unwrap_or_else(|| incoming.clone()),
                    *is_declare,
                ))
            }
            DynamicKind::FieldPath(_) | DynamicKind::Expression { .. } => None,
        }
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

fn static_operand(value: &Value) -> bool {
    match value {
        Value::Dynamic(d) => d.is_statically_resolvable(),
        _ => true,
    }
}

fn awaken_operand(value: &Value) -> Option<Value> {
    match value {
        Value::Dynamic(d) => d.awaken().map(Value::Dynamic),
        _ => None,
    }
}

impl PartialEq for DynamicValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            DynamicKind::FieldPath(path) => write!(f, "${}", path.join(".")),
            DynamicKind::Expression { source, .. } => write!(f, "${{{source}}}"),
            DynamicKind::Deferred { orig, incoming, .. } => {
                write!(f, "merge({orig}, {incoming})")
            }
            DynamicKind::StaticWrapper { inner, .. } => write!(f, "${inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::AndMerger;

    #[test]
    fn capabilities() {
        let path = DynamicValue::field_path("object.name");
        assert!(path.is_settable());
        assert!(!path.is_statically_resolvable());

        let expr = DynamicValue::expression("1 + 2").unwrap();
        assert!(!expr.is_settable());
        assert!(!expr.is_statically_resolvable());

        let wrapped = DynamicValue::static_expression("1 + 2").unwrap();
        assert!(wrapped.is_statically_resolvable());
    }

    #[test]
    fn deferred_static_only_with_static_operands() {
        let merger: Arc<dyn PropertyMerger> = Arc::new(AndMerger);
        let stat = Value::Dynamic(DynamicValue::static_expression("true").unwrap());
        let dynamic = Value::Dynamic(DynamicValue::expression("true").unwrap());
        let a = DynamicValue::deferred(Arc::clone(&merger), Value::Bool(true), stat, false);
        let b = DynamicValue::deferred(merger, Value::Bool(true), dynamic, false);
        assert!(a.is_statically_resolvable());
        assert!(!b.is_statically_resolvable());
    }

    #[test]
    fn display_forms() {
        assert_eq!(DynamicValue::field_path("a.b").to_string(), "$a.b");
        assert_eq!(DynamicValue::expression(" x + 1 ").unwrap().to_string(), "${x + 1}");
        assert_eq!(DynamicValue::static_expression("x").unwrap().to_string(), "$${x}");
    }

    #[test]
    fn awaken_renews_wrappers_only() {
        let wrapped = DynamicValue::static_expression("1").unwrap();
        let fresh = wrapped.awaken().unwrap();
        assert_ne!(wrapped, fresh);
        assert!(DynamicValue::expression("1").unwrap().awaken().is_none());
    }

    #[test]
    fn invalid_expression_is_parse_error() {
        assert!(DynamicValue::expression("1 +").is_err());
    }
}
