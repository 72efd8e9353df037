use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Value;
use crate::error::MetaError;
use crate::index_set;
use crate::match_result::MatchValue;
use crate::meta::{KeyInitObserver, ValueTransformer, KEY_ANY};

/// Rule match masks are `u64`, one bit per context key.
pub(crate) const MAX_CONTEXT_KEYS: usize = 64;

pub(crate) type KeyId = usize;

pub(crate) fn key_mask(id: KeyId) -> u64 {
    1u64 << id
}

pub(crate) fn is_any(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == KEY_ANY)
}

/// Rules indexed under one value, plus its parent link.
/// `merged` memoizes the union along the parent chain for one index version.
#[derive(Debug, Default)]
struct ValueMatches {
    rules: Vec<u32>,
    parent: Option<Value>,
    merged: Mutex<Option<(u64, Arc<[u32]>)>>,
}

/// Per-key index from value to the rules selecting it.
pub(crate) struct KeyData {
    pub(crate) name: String,
    values: HashMap<Value, ValueMatches>,
    any: Vec<u32>,
    pub(crate) transformer: Option<Arc<dyn ValueTransformer>>,
    pub(crate) observers: Vec<Arc<dyn KeyInitObserver>>,
    initialized: Mutex<HashSet<Value>>,
    pub(crate) property_scope: bool,
}

impl KeyData {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            values: HashMap::new(),
            any: Vec::new(),
            transformer: None,
            observers: Vec::new(),
            initialized: Mutex::new(HashSet::new()),
            property_scope: false,
        }
    }

    /// Canonical form of `value` for indexing and matching.
    pub(crate) fn transform(&self, value: &Value) -> Value {
        match &self.transformer {
            Some(transformer) if !value.is_null() => transformer.transform(value),
            _ => value.clone(),
        }
    }

    pub(crate) fn add_entry(&mut self, value: &Value, rule: u32) {
        match value {
            Value::List(items) => {
                for item in items {
                    self.add_entry(item, rule);
                }
            }
            v if is_any(v) => index_set::insert(&mut self.any, rule),
            v => {
                let entry = self.values.entry(v.clone()).or_default();
                index_set::insert(&mut entry.rules, rule);
            }
        }
    }

    pub(crate) fn set_parent(&mut self, value: Value, parent: Value) -> Result<(), MetaError> {
        if self.is_same_or_descendant(&parent, &value) {
            return Err(MetaError::CyclicValueParent {
                key: self.name.clone(),
                value: parent.to_string(),
            });
        }
        self.values.entry(value).or_default().parent = Some(parent);
        Ok(())
    }

    fn is_same_or_descendant<'a>(&'a self, value: &'a Value, ancestor: &Value) -> bool {
        let mut current = Some(value);
        while let Some(v) = current {
            if v == ancestor {
                return true;
            }
            current = self.values.get(v).and_then(|m| m.parent.as_ref());
        }
        false
    }

    /// Rules selecting `value`, its ancestors, or any value of this key.
    /// `false` and `null` never match `*`.
    pub(crate) fn lookup(&self, value: &Value, version: u64) -> Arc<[u32]> {
        match value {
            Value::Null => Vec::<u32>::new().into(),
            Value::List(items) => {
                let mut out = Vec::new();
                for item in items {
                    out = index_set::union(&out, &self.lookup(item, version));
                }
                out.into()
            }
            v if is_any(v) => self.any.as_slice().into(),
            v => match self.values.get(v) {
                Some(matches) => {
                    let mut merged = matches.merged.lock();
                    if let Some((stamp, rules)) = merged.as_ref() {
                        if *stamp == version {
                            return Arc::clone(rules);
                        }
                    }
                    let rules: Arc<[u32]> = self.collect_chain(v).into();
                    *merged = Some((version, Arc::clone(&rules)));
                    rules
                }
                None if *v == Value::Bool(false) => Vec::<u32>::new().into(),
                None => self.any.as_slice().into(),
            },
        }
    }

    fn collect_chain(&self, value: &Value) -> Vec<u32> {
        let mut out = Vec::new();
        let mut current = Some(value);
        while let Some(v) = current {
            let Some(matches) = self.values.get(v) else {
                break;
            };
            out = index_set::union(&out, &matches.rules);
            current = matches.parent.as_ref();
        }
        if *value != Value::Bool(false) {
            out = index_set::union(&out, &self.any);
        }
        out
    }

    /// Residual check of a selector value against the value bound in a match.
    pub(crate) fn value_matches(&self, expected: &Value, actual: &MatchValue) -> bool {
        match actual {
            MatchValue::Single(v) => self.accepts(expected, v),
            MatchValue::Multi(values) => values.iter().any(|v| self.accepts(expected, v)),
        }
    }

    fn accepts(&self, expected: &Value, actual: &Value) -> bool {
        match expected {
            Value::List(options) => options.iter().any(|o| self.accepts(o, actual)),
            e if is_any(e) => !actual.is_null() && *actual != Value::Bool(false),
            e => self.is_same_or_descendant(actual, e),
        }
    }

    /// Returns `true` the first time `value` is seen.
    pub(crate) fn mark_initialized(&self, value: &Value) -> bool {
        self.initialized.lock().insert(value.clone())
    }
}

/// Maps context key names to dense ids, capped at [`MAX_CONTEXT_KEYS`].
#[derive(Default)]
pub(crate) struct KeyRegistry {
    ids: HashMap<String, KeyId>,
    keys: Vec<KeyData>,
}

impl KeyRegistry {
    /// Register a key, returning its id. Already registered keys keep their id.
    pub(crate) fn register(&mut self, name: &str) -> Result<KeyId, MetaError> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        let id = self.keys.len();
        if id >= MAX_CONTEXT_KEYS {
            return Err(MetaError::TooManyContextKeys {
                key: name.to_owned(),
                limit: MAX_CONTEXT_KEYS,
            });
        }
        self.ids.insert(name.to_owned(), id);
        self.keys.push(KeyData::new(name));
        Ok(id)
    }

    pub(crate) fn get(&self, name: &str) -> Option<KeyId> {
        self.ids.get(name).copied()
    }

    pub(crate) fn data(&self, id: KeyId) -> &KeyData {
        &self.keys[id]
    }

    pub(crate) fn data_mut(&mut self, id: KeyId) -> &mut KeyData {
        &mut self.keys[id]
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&KeyData> {
        self.get(name).map(|id| &self.keys[id])
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether registering every name in `names` stays within the cap.
    pub(crate) fn has_room_for<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        let fresh: HashSet<&str> = names
            .into_iter()
            .filter(|name| !self.ids.contains_key(*name))
            .collect();
        self.keys.len() + fresh.len() <= MAX_CONTEXT_KEYS
    }
}
