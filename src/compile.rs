use std::sync::Arc;

use tracing::trace;

use crate::error::MetaError;
use crate::merge::DeclareListMerger;
use crate::meta::scope_flag_key;
use crate::store::{RuleStore, StoredRule};
use crate::types::{is_any, key_mask, KeyData, Rule, Selector, Value};

impl RuleStore {
    /// Validate, expand and index a rule, returning its id.
    ///
    /// A trailing declaration selector adds a companion `declare=<key>` rule.
    /// A rule selecting a property scope key is restricted to contexts where
    /// that key is the current scope, and indexed only from that selector on.
    pub(crate) fn add_rule(&mut self, mut rule: Rule) -> Result<u32, MetaError> {
        self.check_rule(&rule)?;
        if let Some(decl) = rule.declaration() {
            let declared = decl.properties[0].0.clone();
            let manager = self.manager_mut(&declared);
            if manager.merger.is_none() {
                manager.merger = Some(Arc::new(DeclareListMerger));
            }
            self.insert_rule(decl)?;
            if let Some(last) = rule.selectors.last_mut() {
                last.is_decl = false;
            }
        }
        self.insert_rule(rule)
    }

    /// Structural checks, run before anything is indexed.
    pub(crate) fn check_rule(&self, rule: &Rule) -> Result<(), MetaError> {
        let invalid = |reason: String| Err(MetaError::InvalidRule { reason });
        let count = rule.selectors.len();
        for (i, selector) in rule.selectors.iter().enumerate() {
            if selector.key.is_empty() {
                return invalid(format!("selector {i} has an empty key"));
            }
            if selector.is_decl {
                if i + 1 != count {
                    return invalid(format!(
                        "declaration '{selector}' must be the last selector"
                    ));
                }
                if selector.value.is_null()
                    || is_any(&selector.value)
                    || matches!(selector.value, Value::List(_))
                {
                    return invalid(format!("declaration '{selector}' needs a single value"));
                }
            }
        }
        if let Some((name, _)) = rule.properties.iter().find(|(name, _)| name.is_empty()) {
            return invalid(format!("empty property name '{name}'"));
        }
        let keys = rule.selectors.iter().map(|s| s.key.as_str());
        if !self.keys.has_room_for(keys) {
            let key = rule
                .selectors
                .iter()
                .find(|s| self.keys.get(&s.key).is_none())
                .map_or_else(String::new, |s| s.key.clone());
            return Err(MetaError::TooManyContextKeys {
                key,
                limit: crate::types::MAX_CONTEXT_KEYS,
            });
        }
        Ok(())
    }

    fn insert_rule(&mut self, mut rule: Rule) -> Result<u32, MetaError> {
        let id = u32::try_from(self.rules.len()).map_err(|_| MetaError::InvalidRule {
            reason: "rule store is full".to_owned(),
        })?;

        let scope_at = rule.selectors.iter().rposition(|s| {
            !s.is_anti()
                && self
                    .keys
                    .by_name(&s.key)
                    .is_some_and(|data| data.property_scope)
        });
        if let Some(pos) = scope_at {
            let flag = scope_flag_key(&rule.selectors[pos].key);
            if !rule.selectors.iter().any(|s| s.key == flag) {
                rule.selectors.push(Selector::new(&flag, true));
            }
        }
        let index_from = scope_at.unwrap_or(0);

        let rank = match rule.rank {
            Some(rank) => rank,
            None => self.next_rank(),
        };

        let mut matches_mask = 0;
        let mut indexed_mask = 0;
        let mut anti_mask = 0;
        let mut conditions = Vec::new();
        for (i, selector) in rule.selectors.iter().enumerate() {
            let key = self.keys.register(&selector.key)?;
            let mask = key_mask(key);
            if selector.is_anti() {
                anti_mask |= mask;
                continue;
            }
            let data = self.keys.data_mut(key);
            let value = canonical_selector(data, &selector.value);
            matches_mask |= mask;
            if i >= index_from {
                data.add_entry(&value, id);
                indexed_mask |= mask;
            }
            conditions.push((key, value));
        }
        if indexed_mask == 0 {
            self.unindexed.push(id);
        }
        self.index_version += 1;

        let rule_set = self.open_rule_set;
        if let Some(set) = rule_set {
            self.rule_sets[set.0].rule_ids.push(id);
        }
        trace!(target: "metarule::meta", id, rank, rule = %rule, "rule indexed");
        self.rules.push(StoredRule {
            rule,
            rank,
            rule_set,
            matches_mask,
            indexed_mask,
            anti_mask,
            conditions,
        });
        Ok(id)
    }
}

fn canonical_selector(data: &KeyData, value: &Value) -> Value {
    match value {
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| canonical_selector(data, item))
                .collect(),
        ),
        v if is_any(v) => v.clone(),
        v => data.transform(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::KEY_DECLARE;

    fn store() -> RuleStore {
        RuleStore::new().unwrap()
    }

    #[test]
    fn masks_and_index() {
        let mut store = store();
        let rule = Rule::builder()
            .select("class", "Invoice")
            .absent("readonly")
            .property("visible", true)
            .build();
        let id = store.add_rule(rule).unwrap();
        let stored = &store.rules[id as usize];
        let class = store.keys.get("class").unwrap();
        let readonly = store.keys.get("readonly").unwrap();
        assert_eq!(stored.matches_mask, key_mask(class));
        assert_eq!(stored.indexed_mask, key_mask(class));
        assert_eq!(stored.anti_mask, key_mask(readonly));
        assert_eq!(
            &*store.keys.data(class).lookup(&Value::from("Invoice"), store.index_version),
            &[id]
        );
    }

    #[test]
    fn rules_without_positive_selectors_are_unindexed() {
        let mut store = store();
        let a = store.add_rule(Rule::builder().property("x", 1_i64).build()).unwrap();
        let b = store
            .add_rule(Rule::builder().absent("k").property("x", 2_i64).build())
            .unwrap();
        assert_eq!(store.unindexed, vec![a, b]);
    }

    #[test]
    fn scope_selector_adds_flag_and_partial_index() {
        let mut store = store();
        let field = store.keys.register("field").unwrap();
        store.keys.data_mut(field).property_scope = true;
        let id = store
            .add_rule(
                Rule::builder()
                    .select("class", "Invoice")
                    .select("field", "amount")
                    .property("visible", true)
                    .build(),
            )
            .unwrap();
        let stored = &store.rules[id as usize];
        assert_eq!(stored.rule.selectors().len(), 3);
        assert_eq!(stored.rule.selectors()[2], Selector::new("field_p", true));
        let class = store.keys.get("class").unwrap();
        let flag = store.keys.get("field_p").unwrap();
        assert_eq!(stored.indexed_mask, key_mask(field) | key_mask(flag));
        assert_eq!(stored.matches_mask & key_mask(class), key_mask(class));
        assert!(store
            .keys
            .data(class)
            .lookup(&Value::from("Invoice"), store.index_version)
            .is_empty());
    }

    #[test]
    fn declaration_expands_to_companion() {
        let mut store = store();
        let id = store
            .add_rule(
                Rule::builder()
                    .select("class", "Invoice")
                    .declare("field", "notes")
                    .property("visible", true)
                    .build(),
            )
            .unwrap();
        assert_eq!(id, 1);
        let companion = &store.rules[0];
        assert_eq!(companion.rule.selectors()[1], Selector::new(KEY_DECLARE, "field"));
        assert_eq!(companion.rule.properties()[0].1, Value::from("notes"));
        assert!(!store.rules[1].rule.selectors()[1].is_declaration());
        assert!(store.manager("field").unwrap().merger.is_some());
    }

    #[test]
    fn invalid_rules_rejected() {
        let mut store = store();
        let misplaced = Rule::new(
            vec![Selector::declaration("field", "a"), Selector::new("class", "B")],
            vec![],
            None,
        );
        assert!(matches!(store.add_rule(misplaced), Err(MetaError::InvalidRule { .. })));
        let wildcard = Rule::new(vec![Selector::declaration("field", "*")], vec![], None);
        assert!(matches!(store.add_rule(wildcard), Err(MetaError::InvalidRule { .. })));
        let empty_key = Rule::new(vec![Selector::new("", "x")], vec![], None);
        assert!(store.add_rule(empty_key).is_err());
        assert!(store.rules.is_empty());
    }

    #[test]
    fn explicit_rank_kept() {
        let mut store = store();
        let id = store
            .add_rule(Rule::builder().select("a", 1_i64).rank(42).build())
            .unwrap();
        assert_eq!(store.rules[id as usize].rank, 42);
    }
}
