//! The shared rule base.
//!
//! A [`Meta`] owns the rule store, the per-key value indices and the caches
//! derived from them. It is shared as `Arc<Meta>` by any number of
//! [`Context`]s, possibly on different threads; every mutation bumps the
//! generation, which lazily invalidates match memos and activation caches.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::context::{ActivationTree, Context};
use crate::error::MetaError;
use crate::match_result::{MatchKind, MatchResult};
use crate::merge::{PropertyManager, PropertyMerger};
use crate::parse;
use crate::store::{RuleSetId, RuleSetInfo, RuleStore};
use crate::types::{KeyId, MatchedRule, PropertyMap, Rule, RuleBuilder, Selector, Value};

/// Selector value matching any present value of a key.
pub const KEY_ANY: &str = "*";
/// Context key bound while a declaration is evaluated.
pub const KEY_DECLARE: &str = "declare";
/// Context key naming the property scope explicitly.
pub const KEY_SCOPE: &str = "scopeKey";

const SCOPE_FLAG_SUFFIX: &str = "_p";

/// The synthetic key asserted when `key` becomes the current property scope.
pub(crate) fn scope_flag_key(key: &str) -> String {
    format!("{key}{SCOPE_FLAG_SUFFIX}")
}

/// Canonicalizes a key's values before they are indexed or matched.
pub trait ValueTransformer: Send + Sync {
    fn transform(&self, value: &Value) -> Value;
}

impl<F> ValueTransformer for F
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    fn transform(&self, value: &Value) -> Value {
        self(value)
    }
}

/// Maps any present value to `true`, so rules can select on presence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceTransformer;

impl ValueTransformer for PresenceTransformer {
    fn transform(&self, value: &Value) -> Value {
        Value::Bool(!value.is_null() && *value != Value::Bool(false))
    }
}

/// Notified the first time a value of a key is matched, before its rules
/// are looked up. Observers may add rules.
pub trait KeyInitObserver: Send + Sync {
    fn key_initialized(&self, meta: &Meta, key: &str, value: &Value);
}

impl<F> KeyInitObserver for F
where
    F: Fn(&Meta, &str, &Value) + Send + Sync,
{
    fn key_initialized(&self, meta: &Meta, key: &str, value: &Value) {
        self(meta, key, value);
    }
}

/// Bounds applied to every context of a [`Meta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaConfig {
    /// Assignments a context may hold; exceeding it while chaining is an error.
    pub max_context_entries: usize,
    /// Nesting of dynamic value evaluation.
    pub max_evaluation_depth: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            max_context_entries: 250,
            max_evaluation_depth: 32,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) match_computations: AtomicU64,
    pub(crate) property_maps: AtomicU64,
    pub(crate) activation_hits: AtomicU64,
    pub(crate) activation_misses: AtomicU64,
    pub(crate) index_lookups: AtomicU64,
}

/// Instrumentation counters, see [`Meta::stats()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaStats {
    /// Match chain nodes whose candidate set was computed.
    pub match_computations: u64,
    /// Property maps merged (cache misses).
    pub property_maps: u64,
    /// Context assignments replayed from the activation cache.
    pub activation_hits: u64,
    /// Context assignments computed from scratch.
    pub activation_misses: u64,
    /// Value index lookups.
    pub index_lookups: u64,
}

type PropertyCacheKey = (Arc<[u32]>, u64);

#[derive(Default)]
struct PropertyCache {
    generation: u64,
    maps: HashMap<PropertyCacheKey, Arc<PropertyMap>>,
}

/// A rule base shared by many contexts.
pub struct Meta {
    config: MetaConfig,
    pub(crate) store: RwLock<RuleStore>,
    property_cache: RwLock<PropertyCache>,
    activations: RwLock<Arc<ActivationTree>>,
    generation: AtomicU64,
    pub(crate) counters: Counters,
}

impl Meta {
    #[must_use]
    pub fn builder() -> MetaBuilder {
        MetaBuilder::default()
    }

    fn new(config: MetaConfig) -> Result<Self, MetaError> {
        Ok(Self {
            config,
            store: RwLock::new(RuleStore::new()?),
            property_cache: RwLock::new(PropertyCache::default()),
            activations: RwLock::new(Arc::new(ActivationTree::new(0))),
            generation: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    /// Version of the rule base; bumped by every rule or policy change.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> MetaStats {
        let c = &self.counters;
        MetaStats {
            match_computations: c.match_computations.load(Ordering::Relaxed),
            property_maps: c.property_maps.load(Ordering::Relaxed),
            activation_hits: c.activation_hits.load(Ordering::Relaxed),
            activation_misses: c.activation_misses.load(Ordering::Relaxed),
            index_lookups: c.index_lookups.load(Ordering::Relaxed),
        }
    }

    /// Rules ever added, including disabled ones.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.store.read().rules.len()
    }

    /// A fresh, empty context over this rule base.
    #[must_use]
    pub fn new_context(self: &Arc<Self>) -> Context {
        Context::new(Arc::clone(self))
    }

    /// Run a fallible mutation under the store write lock and bump the generation.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut RuleStore) -> Result<R, MetaError>,
    ) -> Result<R, MetaError> {
        let mut store = self.store.write();
        let result = f(&mut store);
        self.bump_generation();
        result
    }

    /// [`Meta::update`] for mutations that cannot fail.
    fn modify<R>(&self, f: impl FnOnce(&mut RuleStore) -> R) -> R {
        let mut store = self.store.write();
        let result = f(&mut store);
        self.bump_generation();
        result
    }

    fn bump_generation(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(target: "metarule::meta", generation, "generation bumped");
    }

    // Registration

    pub fn register_property_merger(&self, property: &str, merger: Arc<dyn PropertyMerger>) {
        self.modify(|store| store.manager_mut(property).merger = Some(merger));
    }

    /// Re-assert `property`'s value as the context key `key` whenever a
    /// match yields it, chaining further matches.
    pub fn mirror_property_to_context(&self, property: &str, key: &str) {
        self.modify(|store| store.manager_mut(property).mirror_to = Some(key.to_owned()));
    }

    /// Make `key` a property scope key. Rules added afterwards that select
    /// on it only apply while it is the current scope.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::TooManyContextKeys`] if the key or its scope
    /// flag cannot be registered.
    pub fn define_key_as_property_scope(&self, key: &str) -> Result<(), MetaError> {
        self.update(|store| {
            let flag = scope_flag_key(key);
            if !store.keys.has_room_for([key, flag.as_str()]) {
                return Err(MetaError::TooManyContextKeys {
                    key: key.to_owned(),
                    limit: crate::types::MAX_CONTEXT_KEYS,
                });
            }
            let id = store.keys.register(key)?;
            store.keys.register(&flag)?;
            store.keys.data_mut(id).property_scope = true;
            debug!(target: "metarule::meta", key, "property scope key defined");
            Ok(())
        })
    }

    /// Register the transformer applied to `key`'s values. Rules added
    /// before the registration keep the values they were indexed with.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::TooManyContextKeys`] if the key cannot be registered.
    pub fn register_value_transformer(
        &self,
        key: &str,
        transformer: Arc<dyn ValueTransformer>,
    ) -> Result<(), MetaError> {
        self.update(|store| {
            let id = store.keys.register(key)?;
            store.keys.data_mut(id).transformer = Some(transformer);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns [`MetaError::TooManyContextKeys`] if the key cannot be registered.
    pub fn register_key_init_observer(
        &self,
        key: &str,
        observer: Arc<dyn KeyInitObserver>,
    ) -> Result<(), MetaError> {
        let mut store = self.store.write();
        let id = store.keys.register(key)?;
        store.keys.data_mut(id).observers.push(observer);
        Ok(())
    }

    /// Link `value` of `key` to a parent value: rules selecting the parent
    /// also match the child.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::CyclicValueParent`] if `parent` descends from
    /// `value`, or [`MetaError::TooManyContextKeys`].
    pub fn set_value_parent(
        &self,
        key: &str,
        value: impl Into<Value>,
        parent: impl Into<Value>,
    ) -> Result<(), MetaError> {
        let (value, parent) = (value.into(), parent.into());
        self.update(|store| {
            let id = store.keys.register(key)?;
            let data = store.keys.data_mut(id);
            let value = data.transform(&value);
            let parent = data.transform(&parent);
            data.set_parent(value, parent)?;
            store.index_version += 1;
            Ok(())
        })
    }

    // Rules

    /// Add a rule, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidRule`] for malformed rules and
    /// [`MetaError::TooManyContextKeys`] when a selector needs a new key
    /// beyond the cap. Nothing is added on error.
    pub fn add_rule(&self, rule: Rule) -> Result<u32, MetaError> {
        self.update(|store| store.add_rule(rule))
    }

    /// Add a rule from a predicate map and a property map.
    ///
    /// # Errors
    ///
    /// See [`Meta::add_rule`].
    pub fn add_rules(
        &self,
        selectors: &[(&str, Value)],
        properties: &[(&str, Value)],
    ) -> Result<u32, MetaError> {
        let selectors = selectors
            .iter()
            .map(|(key, value)| Selector::new(key, value.clone()))
            .collect();
        let properties = properties
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect();
        self.add_rule(Rule::new(selectors, properties, None))
    }

    /// Open a rule set: rules added until [`Meta::end_rule_set`] belong to
    /// it and take consecutive ranks.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::RuleSet`] if a rule set is already open.
    pub fn begin_rule_set(&self, source: &str) -> Result<RuleSetId, MetaError> {
        self.update(|store| store.begin_rule_set(source, None))
    }

    /// Like [`Meta::begin_rule_set`], with an explicit first rank.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::RuleSet`] if a rule set is already open.
    pub fn begin_rule_set_with_rank(&self, source: &str, rank: i32) -> Result<RuleSetId, MetaError> {
        self.update(|store| store.begin_rule_set(source, Some(rank)))
    }

    /// # Errors
    ///
    /// Returns [`MetaError::RuleSet`] if no rule set is open.
    pub fn end_rule_set(&self) -> Result<RuleSetId, MetaError> {
        self.update(RuleStore::end_rule_set)
    }

    /// Disable every rule of a set. Returns `false` if it was already disabled.
    pub fn disable_rule_set(&self, id: RuleSetId) -> bool {
        self.modify(|store| store.disable_rule_set(id))
    }

    #[must_use]
    pub fn rule_set(&self, id: RuleSetId) -> Option<RuleSetInfo> {
        self.store.read().rule_set_info(id)
    }

    /// Parse rules in notation form and load them as the rule set for
    /// `source`, replacing any set previously loaded from it.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::Parse`] if the text does not parse, or any error
    /// of [`Meta::reload_rules`].
    pub fn load_rules(&self, source: &str, text: &str) -> Result<RuleSetId, MetaError> {
        let rules = parse::parse_rules(text)?;
        self.reload_rules(source, rules)
    }

    /// Atomically replace the rule set loaded from `source`. The previous set
    /// is disabled and its rank band reused, so the new rules merge at the
    /// same point. Rules are validated before anything changes.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidRule`], [`MetaError::TooManyContextKeys`],
    /// or [`MetaError::RuleSet`] if another rule set is open.
    pub fn reload_rules(&self, source: &str, rules: Vec<Rule>) -> Result<RuleSetId, MetaError> {
        self.update(|store| {
            if store.open_rule_set.is_some() {
                return Err(MetaError::RuleSet {
                    reason: format!("cannot reload '{source}' while a rule set is open"),
                });
            }
            for rule in &rules {
                store.check_rule(rule)?;
            }
            let keys = rules
                .iter()
                .flat_map(|rule| rule.selectors().iter().map(Selector::key));
            if !store.keys.has_room_for(keys) {
                return Err(MetaError::TooManyContextKeys {
                    key: source.to_owned(),
                    limit: crate::types::MAX_CONTEXT_KEYS,
                });
            }

            let previous = store.enabled_sets_for_source(source);
            let start_rank = previous
                .first()
                .and_then(|id| store.rule_set_info(*id))
                .map(|info| info.start_rank);
            for id in &previous {
                store.disable_rule_set(*id);
            }

            let id = store.begin_rule_set(source, start_rank)?;
            let count = rules.len();
            let added = rules
                .into_iter()
                .try_for_each(|rule| store.add_rule(rule).map(|_| ()));
            store.end_rule_set()?;
            if let Err(e) = added {
                store.disable_rule_set(id);
                return Err(e);
            }
            debug!(
                target: "metarule::meta",
                source,
                rules = count,
                replaced = previous.len(),
                "rule set loaded"
            );
            Ok(id)
        })
    }

    // Matching internals

    pub(crate) fn key_id(&self, key: &str) -> Result<KeyId, MetaError> {
        if let Some(id) = self.store.read().keys.get(key) {
            return Ok(id);
        }
        self.store.write().keys.register(key)
    }

    pub(crate) fn transform_value(&self, key: &str, value: &Value) -> Value {
        match self.store.read().keys.by_name(key) {
            Some(data) => data.transform(value),
            None => value.clone(),
        }
    }

    pub(crate) fn is_property_scope(&self, key: &str) -> bool {
        self.store
            .read()
            .keys
            .by_name(key)
            .is_some_and(|data| data.property_scope)
    }

    /// Merge a value into a context key's current value with the policy
    /// registered for a property of the same name.
    pub(crate) fn merge_context_value(&self, key: &str, orig: &Value, incoming: &Value) -> Value {
        let store = self.store.read();
        match store.manager(key) {
            Some(manager) => manager.merge_property(Some(orig), incoming, false),
            None => PropertyManager::default().merge_property(Some(orig), incoming, false),
        }
    }

    /// Extend a match chain, notifying key observers on first sight of the value.
    pub(crate) fn new_match(
        &self,
        key: KeyId,
        value: Value,
        prev: Option<Arc<MatchResult>>,
        kind: MatchKind,
    ) -> Arc<MatchResult> {
        self.notify_key_init(key, &value);
        MatchResult::new(key, value, prev, kind)
    }

    fn notify_key_init(&self, key: KeyId, value: &Value) {
        let (name, observers) = {
            let store = self.store.read();
            let data = store.keys.data(key);
            if data.observers.is_empty() || !data.mark_initialized(value) {
                return;
            }
            (data.name.clone(), data.observers.clone())
        };
        trace!(target: "metarule::meta", key = %name, %value, "notifying key observers");
        for observer in observers {
            observer.key_initialized(self, &name, value);
        }
    }

    /// The merged properties of the rules matching `result`.
    ///
    /// Maps are cached by the matching rule set and the bound keys, so every
    /// path reaching the same match shares one map. Statically resolved
    /// values in it must not be resolved in place; bind a copy from
    /// [`PropertyMap::awakened`] to a single match path first.
    pub(crate) fn properties_for_match(&self, result: &MatchResult) -> Arc<PropertyMap> {
        let store = self.store.read();
        let generation = self.generation();
        let computed = result.computed(&store, generation, &self.counters);
        let filtered = result.filtered(&computed, &store);
        let key = (filtered, computed.keys_matched);

        {
            let cache = self.property_cache.read();
            if cache.generation == generation {
                if let Some(map) = cache.maps.get(&key) {
                    return Arc::clone(map);
                }
            }
        }

        let is_declare = computed.keys_matched & store.declare_mask != 0;
        let map = Arc::new(merge_properties(&store, &key.0, is_declare));
        self.counters.property_maps.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.property_cache.write();
        if cache.generation != generation {
            cache.maps.clear();
            cache.generation = generation;
        }
        Arc::clone(cache.maps.entry(key).or_insert(map))
    }

    /// The rules matching `result`, in merge order.
    pub(crate) fn matched_rules(&self, result: &MatchResult) -> Vec<MatchedRule> {
        let store = self.store.read();
        let computed = result.computed(&store, self.generation(), &self.counters);
        let filtered = result.filtered(&computed, &store);
        rank_order(&store, &filtered)
            .into_iter()
            .map(|id| {
                let stored = &store.rules[id as usize];
                MatchedRule {
                    id,
                    rank: stored.rank,
                    source: store.source_of(stored).map(str::to_owned),
                    line: stored.rule.line(),
                    text: stored.rule.to_string(),
                }
            })
            .collect()
    }

    /// The activation cache for the current generation.
    pub(crate) fn activation_tree(&self) -> Arc<ActivationTree> {
        let generation = self.generation();
        {
            let tree = self.activations.read();
            if tree.generation() == generation {
                return Arc::clone(&tree);
            }
        }
        let mut tree = self.activations.write();
        if tree.generation() != generation {
            debug!(target: "metarule::meta", generation, "activation cache reset");
            *tree = Arc::new(ActivationTree::new(generation));
        }
        Arc::clone(&tree)
    }
}

fn rank_order(store: &RuleStore, ids: &[u32]) -> Vec<u32> {
    let mut ordered = ids.to_vec();
    ordered.sort_by_key(|&id| (store.rules[id as usize].rank, id));
    ordered
}

fn merge_properties(store: &RuleStore, ids: &[u32], is_declare: bool) -> PropertyMap {
    let fallback = PropertyManager::default();
    let mut map = PropertyMap::default();
    for id in rank_order(store, ids) {
        for (name, value) in store.rules[id as usize].rule.properties() {
            let manager = store.manager(name).unwrap_or(&fallback);
            let merged = manager.merge_property(map.get(name), value, is_declare);
            if map.get(name) != Some(&merged) {
                if let Some(key) = &manager.mirror_to {
                    map.note_context_key(name, key);
                }
            }
            map.insert(name, merged);
        }
    }
    map
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.read();
        f.debug_struct("Meta")
            .field("config", &self.config)
            .field("generation", &self.generation())
            .field("rules", &store.rules.len())
            .field("keys", &store.keys.len())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Meta`]. Registrations are applied before any rule.
#[derive(Default)]
#[must_use]
pub struct MetaBuilder {
    config: MetaConfig,
    scopes: Vec<String>,
    mirrors: Vec<(String, String)>,
    mergers: Vec<(String, Arc<dyn PropertyMerger>)>,
    transformers: Vec<(String, Arc<dyn ValueTransformer>)>,
    observers: Vec<(String, Arc<dyn KeyInitObserver>)>,
    parents: Vec<(String, Value, Value)>,
    rules: Vec<Rule>,
    notations: Vec<(String, String)>,
}

impl MetaBuilder {
    pub fn config(mut self, config: MetaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn property_scope(mut self, key: &str) -> Self {
        self.scopes.push(key.to_owned());
        self
    }

    pub fn mirror(mut self, property: &str, key: &str) -> Self {
        self.mirrors.push((property.to_owned(), key.to_owned()));
        self
    }

    pub fn merger(mut self, property: &str, merger: impl PropertyMerger + 'static) -> Self {
        self.mergers.push((property.to_owned(), Arc::new(merger)));
        self
    }

    pub fn transformer(mut self, key: &str, transformer: impl ValueTransformer + 'static) -> Self {
        self.transformers.push((key.to_owned(), Arc::new(transformer)));
        self
    }

    pub fn observer(mut self, key: &str, observer: impl KeyInitObserver + 'static) -> Self {
        self.observers.push((key.to_owned(), Arc::new(observer)));
        self
    }

    pub fn value_parent(mut self, key: &str, value: impl Into<Value>, parent: impl Into<Value>) -> Self {
        self.parents.push((key.to_owned(), value.into(), parent.into()));
        self
    }

    /// Add a rule built in place.
    pub fn rule(mut self, build: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        self.rules.push(build(Rule::builder()).build());
        self
    }

    /// Add a prebuilt rule.
    pub fn add(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Load rules in notation form as the rule set for `source`.
    pub fn notation(mut self, source: &str, text: &str) -> Self {
        self.notations.push((source.to_owned(), text.to_owned()));
        self
    }

    /// # Errors
    ///
    /// Returns the first registration, rule or parse error.
    pub fn build(self) -> Result<Arc<Meta>, MetaError> {
        let meta = Meta::new(self.config)?;
        for key in &self.scopes {
            meta.define_key_as_property_scope(key)?;
        }
        for (property, key) in &self.mirrors {
            meta.mirror_property_to_context(property, key);
        }
        for (property, merger) in self.mergers {
            meta.register_property_merger(&property, merger);
        }
        for (key, transformer) in self.transformers {
            meta.register_value_transformer(&key, transformer)?;
        }
        for (key, observer) in self.observers {
            meta.register_key_init_observer(&key, observer)?;
        }
        for (key, value, parent) in self.parents {
            meta.set_value_parent(&key, value, parent)?;
        }
        for rule in self.rules {
            meta.add_rule(rule)?;
        }
        for (source, text) in &self.notations {
            meta.load_rules(source, text)?;
        }
        Ok(Arc::new(meta))
    }
}
