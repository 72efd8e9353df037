use std::collections::HashMap;

use tracing::debug;

use crate::error::MetaError;
use crate::merge::PropertyManager;
use crate::meta::{KEY_DECLARE, KEY_SCOPE};
use crate::types::{key_mask, KeyId, KeyRegistry, Rule, Value};

/// Rank of a disabled rule. Disabled rules keep their slot so ids stay stable.
pub(crate) const DISABLED_RANK: i32 = i32::MIN;

/// Ranks reserved per rule set, so a reloaded set keeps its place in merge order.
const RULE_SET_RANK_BAND: i32 = 10_000;

/// A rule as indexed by the store.
pub(crate) struct StoredRule {
    pub(crate) rule: Rule,
    pub(crate) rank: i32,
    pub(crate) rule_set: Option<RuleSetId>,
    /// Keys with a positive selector.
    pub(crate) matches_mask: u64,
    /// Keys whose value index lists this rule.
    pub(crate) indexed_mask: u64,
    /// Keys that must be absent.
    pub(crate) anti_mask: u64,
    /// Transformed positive selectors, for the residual check.
    pub(crate) conditions: Vec<(KeyId, Value)>,
}

impl StoredRule {
    pub(crate) fn is_disabled(&self) -> bool {
        self.rank == DISABLED_RANK
    }
}

/// Handle to a batch of rules added between `begin_rule_set` and `end_rule_set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleSetId(pub(crate) usize);

/// Summary of a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSetInfo {
    pub source: String,
    pub rule_count: usize,
    pub start_rank: i32,
    pub disabled: bool,
}

pub(crate) struct RuleSetRecord {
    pub(crate) source: String,
    pub(crate) start_rank: i32,
    next_rank: i32,
    pub(crate) rule_ids: Vec<u32>,
    pub(crate) disabled: bool,
}

/// Append-only rule array with its key indices and property policies.
pub(crate) struct RuleStore {
    pub(crate) rules: Vec<StoredRule>,
    pub(crate) keys: KeyRegistry,
    /// Rules not indexed on any key; they seed every match chain.
    pub(crate) unindexed: Vec<u32>,
    pub(crate) managers: HashMap<String, PropertyManager>,
    /// Bumped on every index change; stamps memoized value unions.
    pub(crate) index_version: u64,
    pub(crate) rule_sets: Vec<RuleSetRecord>,
    pub(crate) open_rule_set: Option<RuleSetId>,
    next_rank: i32,
    pub(crate) declare_mask: u64,
}

impl RuleStore {
    pub(crate) fn new() -> Result<Self, MetaError> {
        let mut keys = KeyRegistry::default();
        let declare = keys.register(KEY_DECLARE)?;
        keys.register(KEY_SCOPE)?;
        Ok(Self {
            rules: Vec::new(),
            keys,
            unindexed: Vec::new(),
            managers: HashMap::new(),
            index_version: 0,
            rule_sets: Vec::new(),
            open_rule_set: None,
            next_rank: 0,
            declare_mask: key_mask(declare),
        })
    }

    pub(crate) fn manager(&self, property: &str) -> Option<&PropertyManager> {
        self.managers.get(property)
    }

    pub(crate) fn manager_mut(&mut self, property: &str) -> &mut PropertyManager {
        self.managers.entry(property.to_owned()).or_default()
    }

    /// Rank for a rule without an explicit one: program order within the
    /// open rule set, or globally.
    pub(crate) fn next_rank(&mut self) -> i32 {
        if let Some(id) = self.open_rule_set {
            let set = &mut self.rule_sets[id.0];
            let rank = set.next_rank;
            set.next_rank += 1;
            return rank;
        }
        let rank = self.next_rank;
        self.next_rank += 1;
        rank
    }

    pub(crate) fn begin_rule_set(
        &mut self,
        source: &str,
        start_rank: Option<i32>,
    ) -> Result<RuleSetId, MetaError> {
        if let Some(open) = self.open_rule_set {
            return Err(MetaError::RuleSet {
                reason: format!(
                    "cannot begin '{source}' while '{}' is open",
                    self.rule_sets[open.0].source
                ),
            });
        }
        let start_rank = start_rank.unwrap_or(self.next_rank);
        let id = RuleSetId(self.rule_sets.len());
        self.rule_sets.push(RuleSetRecord {
            source: source.to_owned(),
            start_rank,
            next_rank: start_rank,
            rule_ids: Vec::new(),
            disabled: false,
        });
        self.open_rule_set = Some(id);
        debug!(target: "metarule::meta", source, start_rank, "rule set begun");
        Ok(id)
    }

    pub(crate) fn end_rule_set(&mut self) -> Result<RuleSetId, MetaError> {
        let Some(id) = self.open_rule_set.take() else {
            return Err(MetaError::RuleSet {
                reason: "no rule set is open".to_owned(),
            });
        };
        let set = &self.rule_sets[id.0];
        let band_end = set
            .next_rank
            .max(set.start_rank.saturating_add(RULE_SET_RANK_BAND));
        self.next_rank = self.next_rank.max(band_end);
        debug!(
            target: "metarule::meta",
            source = %set.source,
            rules = set.rule_ids.len(),
            "rule set ended"
        );
        Ok(id)
    }

    /// Disable every rule of a set. Returns `false` if it was already disabled.
    pub(crate) fn disable_rule_set(&mut self, id: RuleSetId) -> bool {
        let Some(set) = self.rule_sets.get_mut(id.0) else {
            return false;
        };
        if set.disabled {
            return false;
        }
        set.disabled = true;
        for &rule in &set.rule_ids {
            self.rules[rule as usize].rank = DISABLED_RANK;
        }
        debug!(target: "metarule::meta", source = %set.source, "rule set disabled");
        true
    }

    pub(crate) fn enabled_sets_for_source(&self, source: &str) -> Vec<RuleSetId> {
        self.rule_sets
            .iter()
            .enumerate()
            .filter(|(_, set)| !set.disabled && set.source == source)
            .map(|(i, _)| RuleSetId(i))
            .collect()
    }

    pub(crate) fn rule_set_info(&self, id: RuleSetId) -> Option<RuleSetInfo> {
        self.rule_sets.get(id.0).map(|set| RuleSetInfo {
            source: set.source.clone(),
            rule_count: set.rule_ids.len(),
            start_rank: set.start_rank,
            disabled: set.disabled,
        })
    }

    pub(crate) fn source_of(&self, rule: &StoredRule) -> Option<&str> {
        rule.rule_set
            .and_then(|id| self.rule_sets.get(id.0))
            .map(|set| set.source.as_str())
    }
}
