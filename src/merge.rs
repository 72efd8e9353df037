//! Property merge policies.
//!
//! Rules are applied in rank order; each property value is folded into the
//! map through the merger registered for its name. Without a merger the later
//! value overwrites, except that two maps merge key-wise.

use std::fmt;
use std::sync::Arc;

use crate::dynamic::DynamicValue;
use crate::types::Value;

/// Strategy for combining a property's existing value with an incoming one.
pub trait PropertyMerger: fmt::Debug + Send + Sync {
    /// Combine `orig` (the value so far) with `incoming` (the next rule's value).
    /// `is_declare` is set while the context is evaluating a declaration.
    fn merge(&self, orig: &Value, incoming: &Value, is_declare: bool) -> Value;

    /// Mergers that resolve dynamic operands themselves return `true`; for
    /// the rest, a dynamic operand defers the merge to read time.
    fn handles_dynamic(&self) -> bool {
        false
    }
}

/// Conjunction: `false` on either side wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct AndMerger;

impl PropertyMerger for AndMerger {
    fn merge(&self, orig: &Value, incoming: &Value, _is_declare: bool) -> Value {
        Value::Bool(orig.truthy() && incoming.truthy())
    }
}

/// Accumulates unique values into a list, in first-seen order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListMerger;

impl PropertyMerger for ListMerger {
    fn merge(&self, orig: &Value, incoming: &Value, _is_declare: bool) -> Value {
        accumulate(orig, incoming)
    }
}

/// Validation results: the first failing value wins.
///
/// `null` and `true` pass; `false`, an error message string or any other
/// value fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidMerger;

impl ValidMerger {
    fn passes(value: &Value) -> bool {
        matches!(value, Value::Null | Value::Bool(true))
    }
}

impl PropertyMerger for ValidMerger {
    fn merge(&self, orig: &Value, incoming: &Value, _is_declare: bool) -> Value {
        if Self::passes(orig) {
            incoming.clone()
        } else {
            orig.clone()
        }
    }
}

/// Accumulates a list of declared names while evaluating a declaration and
/// otherwise passes the latest value through.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclareListMerger;

impl PropertyMerger for DeclareListMerger {
    fn merge(&self, orig: &Value, incoming: &Value, is_declare: bool) -> Value {
        if is_declare {
            accumulate(orig, incoming)
        } else {
            incoming.clone()
        }
    }
}

fn accumulate(orig: &Value, incoming: &Value) -> Value {
    let mut items = orig.clone().into_items();
    for item in incoming.clone().into_items() {
        if !items.contains(&item) {
            items.push(item);
        }
    }
    Value::List(items)
}

/// Per-property policy: an optional merger and an optional mirrored context key.
#[derive(Debug, Clone, Default)]
pub(crate) struct PropertyManager {
    pub(crate) merger: Option<Arc<dyn PropertyMerger>>,
    pub(crate) mirror_to: Option<String>,
}

impl PropertyManager {
    pub(crate) fn merge_property(&self, orig: Option<&Value>, incoming: &Value, is_declare: bool) -> Value {
        if let Value::Override(inner) = incoming {
            return (**inner).clone();
        }
        let Some(orig) = orig else {
            return incoming.clone();
        };
        match &self.merger {
            None => match (orig, incoming) {
                (Value::Map(base), Value::Map(update)) => {
                    let mut merged = base.clone();
                    merged.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Value::Map(merged)
                }
                _ => incoming.clone(),
            },
            Some(merger) if !merger.handles_dynamic() && (orig.is_dynamic() || incoming.is_dynamic()) => {
                Value::Dynamic(DynamicValue::deferred(
                    Arc::clone(merger),
                    orig.clone(),
                    incoming.clone(),
                    is_declare,
                ))
            }
            Some(merger) => merger.merge(orig, incoming, is_declare),
        }
    }
}
