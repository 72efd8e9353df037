//! Incremental match chains.
//!
//! Each [`MatchResult`] node binds one key to one value on top of the
//! previous node. Its candidate set is derived from the previous node's set
//! and the key's value index, memoized per rule-store generation, and only
//! filtered into the final rule list when properties are requested.

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::index_set;
use crate::meta::Counters;
use crate::store::{RuleStore, StoredRule};
use crate::types::{key_mask, KeyId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchKind {
    /// Narrow the previous candidates by this binding.
    Intersect,
    /// Also credit rules matching this (overridden) binding.
    Union,
}

/// The value(s) bound to a key along a chain, for residual checks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchValue {
    Single(Value),
    Multi(Vec<Value>),
}

/// A node's candidate set for one generation.
#[derive(Debug)]
pub(crate) struct Computed {
    generation: u64,
    pub(crate) matches: Arc<[u32]>,
    /// Keys bound to a non-null value somewhere on the chain.
    pub(crate) keys_matched: u64,
    has_union: bool,
    filtered: OnceLock<Arc<[u32]>>,
}

pub(crate) struct MatchResult {
    key: KeyId,
    value: Value,
    prev: Option<Arc<MatchResult>>,
    kind: MatchKind,
    computed: Mutex<Option<Arc<Computed>>>,
}

impl MatchResult {
    pub(crate) fn new(
        key: KeyId,
        value: Value,
        prev: Option<Arc<MatchResult>>,
        kind: MatchKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            value,
            prev,
            kind,
            computed: Mutex::new(None),
        })
    }

    pub(crate) fn key(&self) -> KeyId {
        self.key
    }

    /// The canonical (transformed) value bound by this node.
    pub(crate) fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn prev(&self) -> Option<&Arc<MatchResult>> {
        self.prev.as_ref()
    }

    /// Candidate set for `generation`, recomputed when the memo is older.
    pub(crate) fn computed(
        &self,
        store: &RuleStore,
        generation: u64,
        counters: &Counters,
    ) -> Arc<Computed> {
        if let Some(computed) = self.computed.lock().as_ref() {
            if computed.generation == generation {
                return Arc::clone(computed);
            }
        }
        let prev = self
            .prev
            .as_ref()
            .map(|prev| prev.computed(store, generation, counters));

        counters.index_lookups.fetch_add(1, Ordering::Relaxed);
        let found = store.keys.data(self.key).lookup(&self.value, store.index_version);
        let own_mask = if self.value.is_null() {
            0
        } else {
            key_mask(self.key)
        };

        let (matches, keys_matched, has_union) = match (prev, self.kind) {
            (None, kind) => (
                index_set::union(&found, &store.unindexed),
                own_mask,
                kind == MatchKind::Union,
            ),
            (Some(prev), MatchKind::Intersect) => (
                index_set::intersect(&prev.matches, &found, prev.keys_matched, own_mask, |id| {
                    store.rules[id as usize].indexed_mask
                }),
                prev.keys_matched | own_mask,
                prev.has_union,
            ),
            (Some(prev), MatchKind::Union) => (
                index_set::union(&prev.matches, &found),
                prev.keys_matched | own_mask,
                true,
            ),
        };
        counters.match_computations.fetch_add(1, Ordering::Relaxed);

        let computed = Arc::new(Computed {
            generation,
            matches: matches.into(),
            keys_matched,
            has_union,
            filtered: OnceLock::new(),
        });
        *self.computed.lock() = Some(Arc::clone(&computed));
        computed
    }

    /// The candidates that actually match the chain.
    ///
    /// A rule survives if it is enabled, every key it selects on is bound,
    /// no key it requires absent is bound, and, when some of its selectors
    /// were never checked through the index, those hold against the bound
    /// values.
    pub(crate) fn filtered(&self, computed: &Computed, store: &RuleStore) -> Arc<[u32]> {
        let filtered = computed.filtered.get_or_init(|| {
            let keys = computed.keys_matched;
            computed
                .matches
                .iter()
                .copied()
                .filter(|&id| {
                    let rule = &store.rules[id as usize];
                    !rule.is_disabled()
                        && rule.matches_mask & !keys == 0
                        && rule.anti_mask & keys == 0
                        && ((rule.matches_mask == rule.indexed_mask && !computed.has_union)
                            || self.residual_holds(rule, store))
                })
                .collect::<Vec<_>>()
                .into()
        });
        Arc::clone(filtered)
    }

    fn residual_holds(&self, rule: &StoredRule, store: &RuleStore) -> bool {
        rule.conditions.iter().all(|(key, expected)| {
            self.bound_value(*key).is_some_and(|bound| {
                store.keys.data(*key).value_matches(expected, &bound)
            })
        })
    }

    /// Values bound to `key`: the latest intersecting binding plus any
    /// union bindings after it.
    fn bound_value(&self, key: KeyId) -> Option<MatchValue> {
        let mut values = Vec::new();
        let mut node = Some(self);
        while let Some(current) = node {
            if current.key == key && !current.value.is_null() {
                values.extend(current.value.clone().into_items());
                if current.kind == MatchKind::Intersect {
                    break;
                }
            }
            node = current.prev.as_deref();
        }
        match values.len() {
            0 => None,
            1 => values.pop().map(MatchValue::Single),
            _ => Some(MatchValue::Multi(values)),
        }
    }
}
