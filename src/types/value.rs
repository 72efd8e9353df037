use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::expr::CompareOp;
use crate::dynamic::DynamicValue;

/// A domain object reachable from field paths and expressions.
pub trait MetaObject: fmt::Debug + Send + Sync {
    /// Read a named field. `None` means the object has no such field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Write a named field.
    ///
    /// # Errors
    ///
    /// Returns a description of why the write was refused. Objects are
    /// read-only unless they override this.
    fn set_field(&self, name: &str, value: Value) -> Result<(), String> {
        let _ = value;
        Err(format!("field '{name}' is read-only"))
    }
}

/// Shared handle to a [`MetaObject`]. Compared and hashed by identity.
#[derive(Debug, Clone)]
pub struct ObjectRef(Arc<dyn MetaObject>);

impl ObjectRef {
    pub fn new(object: impl MetaObject + 'static) -> Self {
        Self(Arc::new(object))
    }

    #[must_use]
    pub fn from_arc(object: Arc<dyn MetaObject>) -> Self {
        Self(object)
    }

    #[must_use]
    pub fn get(&self) -> &dyn MetaObject {
        self.0.as_ref()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

/// Values carried by context assignments, rule selectors and properties.
///
/// `Null` is a real value: an explicit `key = null` assignment is distinct
/// from a key that was never assigned, and selectors use it to require absence.
/// Floats compare and hash by bit pattern so every value can key an index.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectRef),
    /// A lazily resolved value, see [`DynamicValue`].
    Dynamic(DynamicValue),
    /// Replaces the prior value of a property whatever its merge policy.
    Override(Box<Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Value::Dynamic(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Lenient boolean reading used by conjunctive merges and conditions.
    /// `null`, `false`, `0`, `""` and the strings `"false"`/`"no"` are false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => {
                !(s.is_empty() || s.eq_ignore_ascii_case("false") || s.eq_ignore_ascii_case("no"))
            }
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(_) | Value::Dynamic(_) => true,
            Value::Override(inner) => inner.truthy(),
        }
    }

    /// Flatten into list items: a list yields its elements, `null` nothing,
    /// anything else itself.
    #[must_use]
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Compare this value to another using the given operator.
    /// Returns `None` for incompatible types or unsupported operations (e.g. Gt on bools).
    /// Equality operators never fail across types: differently typed values are unequal.
    #[must_use]
    pub fn compare(&self, op: CompareOp, other: &Value) -> Option<bool> {
        let Some(ord) = self.partial_cmp_value(other) else {
            return match op {
                CompareOp::Eq if !self.same_kind(other) => Some(false),
                CompareOp::Neq if !self.same_kind(other) => Some(true),
                _ => None,
            };
        };
        Some(match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Neq => ord != Ordering::Equal,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Gte => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Lte => ord != Ordering::Greater,
        })
    }

    fn same_kind(&self, other: &Value) -> bool {
        let numeric = |v: &Value| matches!(v, Value::Int(_) | Value::Float(_));
        std::mem::discriminant(self) == std::mem::discriminant(other)
            || (numeric(self) && numeric(other))
    }

    #[allow(clippy::cast_precision_loss)]
    fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            // Only Eq/Neq are meaningful for bools
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::List(_), Value::List(_))
            | (Value::Map(_), Value::Map(_))
            | (Value::Object(_), Value::Object(_)) => {
                if self == other {
                    Some(Ordering::Equal)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Dynamic(a), Value::Dynamic(b)) => a == b,
            (Value::Override(a), Value::Override(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(map) => map.hash(state),
            Value::Object(o) => o.addr().hash(state),
            Value::Dynamic(d) => d.addr().hash(state),
            Value::Override(inner) => inner.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl From<DynamicValue> for Value {
    fn from(v: DynamicValue) -> Self {
        Value::Dynamic(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "\"{v}\""),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Object(o) => write!(f, "<{:?}>", o.get()),
            Value::Dynamic(d) => write!(f, "{d}"),
            Value::Override(inner) => write!(f, "{inner}!"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug)]
    struct Probe;

    impl MetaObject for Probe {
        fn field(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn conversions_pick_the_natural_variant() {
        assert_eq!(Value::from(7_i64), Value::Int(7));
        assert_eq!(Value::from(0.25_f64), Value::Float(0.25));
        assert_eq!(Value::from("Invoice"), Value::String("Invoice".to_owned()));
        assert_eq!(Value::from(String::from("amount")).as_str(), Some("amount"));
    }

    #[test]
    fn from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::String("hello".into()).to_string(), "\"hello\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("a")]).to_string(),
            "[1, \"a\"]"
        );
        assert_eq!(
            Value::Override(Box::new(Value::Bool(false))).to_string(),
            "false!"
        );
    }

    #[test]
    fn floats_hash_by_bits() {
        let mut set = HashSet::new();
        set.insert(Value::Float(f64::NAN));
        assert!(set.contains(&Value::Float(f64::NAN)));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = ObjectRef::new(Probe);
        let b = ObjectRef::new(Probe);
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
        assert_ne!(Value::Object(b), Value::Object(ObjectRef::new(Probe)));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::from("false").truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::from("Invoice").truthy());
        assert!(Value::Bool(true).truthy());
    }

    #[test]
    fn into_items_flattens() {
        assert!(Value::Null.into_items().is_empty());
        assert_eq!(Value::Int(1).into_items(), vec![Value::Int(1)]);
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).into_items().len(),
            2
        );
    }

    #[test]
    fn numbers_order_across_int_and_float() {
        let ten = Value::Int(10);
        assert_eq!(ten.compare(CompareOp::Lt, &Value::Int(11)), Some(true));
        assert_eq!(ten.compare(CompareOp::Gte, &ten), Some(true));
        assert_eq!(ten.compare(CompareOp::Eq, &Value::Float(10.0)), Some(true));
        assert_eq!(Value::Float(9.5).compare(CompareOp::Gt, &ten), Some(false));
    }

    #[test]
    fn strings_order_lexically() {
        let amount = Value::from("amount");
        let total = Value::from("total");
        assert_eq!(amount.compare(CompareOp::Lte, &total), Some(true));
        assert_eq!(total.compare(CompareOp::Neq, &total), Some(false));
    }

    #[test]
    fn compare_null() {
        assert_eq!(Value::Null.compare(CompareOp::Eq, &Value::Null), Some(true));
        assert_eq!(Value::Null.compare(CompareOp::Neq, &Value::from("x")), Some(true));
    }

    #[test]
    fn compare_type_mismatch() {
        let i = Value::Int(1);
        let s = Value::from("hello");
        assert_eq!(i.compare(CompareOp::Eq, &s), Some(false));
        assert_eq!(i.compare(CompareOp::Neq, &s), Some(true));
        assert_eq!(i.compare(CompareOp::Lt, &s), None);
    }

    #[test]
    fn nan_ordering_returns_none() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.compare(CompareOp::Eq, &Value::Float(1.0)), None);
    }
}
