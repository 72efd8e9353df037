//! Per-request assignment stacks.
//!
//! A [`Context`] is a stack of key/value assignments over a shared
//! [`Meta`], delimited into frames by [`Context::push`] and
//! [`Context::pop`]. Every `set` either replays the records a previous
//! identical `set` produced (found in the meta's activation tree) or
//! computes them: the explicit assignment, then chained assignments of
//! mirrored properties until no more keys change.
//!
//! Overriding a value masks its record and every live record after it.
//! The later explicit records are asserted again in order before the new
//! value, so the live state is the one a fresh context would reach by
//! setting the surviving explicit values in order.

mod activation;
mod snapshot;

pub(crate) use activation::ActivationTree;
pub use snapshot::{Snapshot, SnapshotAssignment};

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{trace, warn};

use crate::error::MetaError;
use crate::match_result::{MatchKind, MatchResult};
use crate::meta::{scope_flag_key, Meta, KEY_SCOPE};
use crate::types::{MatchReport, PropertyMap, Value};
use activation::{ActivationKey, ScopedProperties, ROOT};

/// One assignment as computed, shared between every context that replays it.
pub(crate) struct StaticRec {
    key: String,
    /// The value as assigned, before any transformer.
    value: Value,
    /// Chain covering every unmasked record up to and including this one.
    match_result: Arc<MatchResult>,
    salience: usize,
    from_chaining: bool,
    /// Indexes of the records this assignment masks.
    masks: Vec<usize>,
    origin: Origin,
}

/// Where the value of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// The value passed to `set`.
    Assigned,
    /// A mirrored property or scope flag.
    Derived,
    /// The value of the record at this index, asserted again after an
    /// override masked it.
    Replayed(usize),
}

struct ContextRec {
    srec: Arc<StaticRec>,
    /// Replaces `srec.value` when replayed with a different value that
    /// transforms to the same canonical form.
    val: Option<Value>,
    masked_by: Option<usize>,
}

impl ContextRec {
    fn value(&self) -> &Value {
        self.val.as_ref().unwrap_or(&self.srec.value)
    }

    fn is_live(&self) -> bool {
        self.masked_by.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    mark: usize,
    activation: Option<usize>,
}

/// A stack of assignments and the properties they select.
///
/// Contexts are cheap; create one per request with [`Meta::new_context`].
/// A context is used from one thread at a time, while its [`Meta`] may be
/// shared by many.
///
/// ```
/// use metarule::Meta;
///
/// let meta = Meta::builder()
///     .property_scope("field")
///     .rule(|r| r.select("class", "Invoice").select("field", "amount").property("visible", true))
///     .rule(|r| r.select("field", "amount").property("editable", false))
///     .build()?;
///
/// let mut ctx = meta.new_context();
/// ctx.push();
/// ctx.set("class", "Invoice")?;
/// ctx.set("field", "amount")?;
/// assert!(ctx.boolean_property_for_key("visible", false)?);
/// assert!(!ctx.boolean_property_for_key("editable", true)?);
/// ctx.pop();
/// # Ok::<(), metarule::MetaError>(())
/// ```
pub struct Context {
    meta: Arc<Meta>,
    tree: Arc<ActivationTree>,
    entries: Vec<ContextRec>,
    frames: Vec<Frame>,
    values: HashMap<String, Value>,
    /// Node of `tree` describing `entries`, if they were reached through it.
    activation: Option<usize>,
    properties: Option<Arc<PropertyMap>>,
    eval_depth: usize,
}

impl Context {
    #[must_use]
    pub fn new(meta: Arc<Meta>) -> Self {
        let tree = meta.activation_tree();
        Self {
            meta,
            tree,
            entries: Vec::new(),
            frames: Vec::new(),
            values: HashMap::new(),
            activation: Some(ROOT),
            properties: None,
            eval_depth: 0,
        }
    }

    #[must_use]
    pub fn meta(&self) -> &Arc<Meta> {
        &self.meta
    }

    /// Open a frame. Everything assigned until the matching [`Context::pop`]
    /// is undone by it.
    pub fn push(&mut self) {
        self.frames.push(Frame {
            mark: self.entries.len(),
            activation: self.activation,
        });
    }

    /// Close the innermost frame, restoring the values and properties seen
    /// before the matching [`Context::push`].
    ///
    /// # Panics
    ///
    /// Panics if no frame is open.
    pub fn pop(&mut self) {
        let Some(frame) = self.frames.pop() else {
            panic!("Context::pop without a matching push");
        };
        self.unwind_to(frame.mark);
        self.activation = frame.activation;
    }

    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Assign `value` to `key`, overriding any current value.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::ChainingLimit`] if the assignment or the chained
    /// assignments it implies exceed the configured bound, and any error
    /// raised resolving mirrored properties. The context is left unchanged
    /// on error.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MetaError> {
        self.set_internal(key, value.into(), false, false)
    }

    /// Like [`Context::set`], but combine `value` with the current value
    /// using the merger registered for a property named `key`.
    ///
    /// # Errors
    ///
    /// See [`Context::set`].
    pub fn merge(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MetaError> {
        self.set_internal(key, value.into(), true, false)
    }

    /// Assign `value` as an inferred value: it does not replace an explicit
    /// value, nor a chained one asserted at a deeper frame.
    ///
    /// # Errors
    ///
    /// See [`Context::set`].
    pub fn set_chaining(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MetaError> {
        self.set_internal(key, value.into(), false, true)
    }

    /// Make `key` the current property scope.
    ///
    /// # Errors
    ///
    /// See [`Context::set`].
    pub fn set_scope_key(&mut self, key: &str) -> Result<(), MetaError> {
        self.set(KEY_SCOPE, key)
    }

    /// The resolved value of a context key, `Null` if unset.
    ///
    /// # Errors
    ///
    /// Returns the error of a failing dynamic value.
    pub fn value(&mut self, key: &str) -> Result<Value, MetaError> {
        let value = self.values.get(key).cloned().unwrap_or_default();
        self.resolve_value(value)
    }

    /// Current values of every assigned key, unresolved.
    #[must_use]
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// The resolved value of a property, `Null` if no matching rule sets it.
    ///
    /// # Errors
    ///
    /// Returns the error of a failing dynamic value.
    pub fn property_for_key(&mut self, key: &str) -> Result<Value, MetaError> {
        let value = self.all_properties()?.get(key).cloned().unwrap_or_default();
        self.resolve_value(value)
    }

    /// # Errors
    ///
    /// See [`Context::property_for_key`].
    pub fn list_property_for_key(&mut self, key: &str) -> Result<Vec<Value>, MetaError> {
        Ok(self.property_for_key(key)?.into_items())
    }

    /// # Errors
    ///
    /// See [`Context::property_for_key`].
    pub fn boolean_property_for_key(&mut self, key: &str, default: bool) -> Result<bool, MetaError> {
        let value = self.property_for_key(key)?;
        Ok(if value.is_null() { default } else { value.truthy() })
    }

    /// The merged properties under the current property scope, unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::ChainingLimit`] if the scope flag does not fit.
    pub fn all_properties(&mut self) -> Result<Arc<PropertyMap>, MetaError> {
        if let Some(properties) = &self.properties {
            return Ok(Arc::clone(properties));
        }
        let properties = self.scoped_properties()?.properties;
        self.properties = Some(Arc::clone(&properties));
        Ok(properties)
    }

    /// Properties of the current match, also crediting rules that matched
    /// values since overridden.
    ///
    /// # Errors
    ///
    /// See [`Context::all_properties`].
    pub fn properties_with_overrides(&mut self) -> Result<Arc<PropertyMap>, MetaError> {
        let Some(mut result) = self.scoped_properties()?.match_result else {
            return Ok(Arc::default());
        };
        if self.entries.iter().all(ContextRec::is_live) {
            return self.all_properties();
        }
        for rec in self.entries.iter().filter(|rec| !rec.is_live()) {
            let masked = &rec.srec.match_result;
            result = self.meta.new_match(
                masked.key(),
                masked.value().clone(),
                Some(result),
                MatchKind::Union,
            );
        }
        Ok(PropertyMap::awakened(&self.meta.properties_for_match(&result)))
    }

    /// Write through a settable (field path) property.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::NotSettable`] if the property is not a field
    /// path, or its target refuses the write.
    pub fn set_property_value(&mut self, name: &str, value: impl Into<Value>) -> Result<(), MetaError> {
        match self.all_properties()?.get(name) {
            Some(Value::Dynamic(dynamic)) if dynamic.is_settable() => {
                dynamic.clone().evaluate_set(self, value.into())
            }
            _ => Err(MetaError::NotSettable {
                path: format!("properties.{name}"),
            }),
        }
    }

    /// The rules behind the current properties, in merge order.
    ///
    /// # Errors
    ///
    /// See [`Context::all_properties`].
    pub fn explain(&mut self) -> Result<MatchReport, MetaError> {
        let start = Instant::now();
        let scoped = self.scoped_properties()?;
        let rules = scoped
            .match_result
            .as_ref()
            .map(|result| self.meta.matched_rules(result))
            .unwrap_or_default();
        Ok(MatchReport::new(rules, scoped.properties, start.elapsed()))
    }

    /// Capture the live explicit assignments and the frames they were made in.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let assignments = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, rec)| rec.is_live() && !rec.srec.from_chaining)
            .map(|(index, rec)| SnapshotAssignment {
                key: rec.srec.key.clone(),
                value: rec.value().clone(),
                frame: self.frame_of(index),
            })
            .collect();
        Snapshot::new(assignments, self.frames.len())
    }

    /// Resolve dynamic values until a plain value is reached.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::ChainingLimit`] when dynamic values nest deeper
    /// than the configured evaluation depth, or the value's own error.
    pub fn resolve_value(&mut self, value: Value) -> Result<Value, MetaError> {
        let mut value = value;
        loop {
            value = match value {
                Value::Override(inner) => *inner,
                Value::Dynamic(dynamic) => {
                    let limit = self.meta.config().max_evaluation_depth;
                    if self.eval_depth >= limit {
                        warn!(target: "metarule::context", limit, "evaluation depth exceeded");
                        return Err(MetaError::ChainingLimit {
                            limit,
                            context: self.debug_string(),
                        });
                    }
                    self.eval_depth += 1;
                    let result = dynamic.evaluate(self);
                    self.eval_depth -= 1;
                    result?
                }
                other => return Ok(other),
            };
        }
    }

    /// Follow a dotted path: the first segment names a context key, or
    /// `properties` followed by a property name; the rest walk object
    /// fields and maps. Missing steps yield `Null`.
    pub(crate) fn resolve_path(&mut self, path: &[String]) -> Result<Value, MetaError> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(Value::Null);
        };
        let (mut current, rest) = if first.as_str() == "properties" {
            match rest.split_first() {
                Some((name, rest)) => (self.property_for_key(name)?, rest),
                None => return Ok(Value::Null),
            }
        } else {
            (self.value(first)?, rest)
        };
        for segment in rest {
            let next = match &current {
                Value::Object(object) => object.get().field(segment).unwrap_or_default(),
                Value::Map(map) => map.get(segment).cloned().unwrap_or_default(),
                _ => return Ok(Value::Null),
            };
            current = self.resolve_value(next)?;
        }
        Ok(current)
    }

    /// Write `value` at a dotted path: a bare key is assigned in the
    /// context, a longer path sets the last field on the object before it.
    pub(crate) fn assign_path(&mut self, path: &[String], value: Value) -> Result<(), MetaError> {
        let not_settable = || MetaError::NotSettable {
            path: path.join("."),
        };
        match path {
            [key] if key.as_str() != "properties" => self.set(key, value),
            [parent @ .., field] if !parent.is_empty() => match self.resolve_path(parent)? {
                Value::Object(object) => object.get().set_field(field, value).map_err(|reason| {
                    trace!(target: "metarule::context", %reason, "field write refused");
                    not_settable()
                }),
                _ => Err(not_settable()),
            },
            _ => Err(not_settable()),
        }
    }

    /// One line per record: index, key, value, and whether it was chained
    /// or is masked.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for (index, rec) in self.entries.iter().enumerate() {
            let _ = write!(out, "{index}: {} = {}", rec.srec.key, rec.value());
            if rec.srec.from_chaining {
                out.push_str(" (chained)");
            }
            if let Some(by) = rec.masked_by {
                let _ = write!(out, " (masked by {by})");
            }
            out.push('\n');
        }
        out
    }

    // Assignment

    fn tree_is_fresh(&self) -> bool {
        self.tree.generation() == self.meta.generation()
    }

    fn set_internal(
        &mut self,
        key: &str,
        value: Value,
        merge: bool,
        chaining: bool,
    ) -> Result<(), MetaError> {
        if self.entries.is_empty() && !self.tree_is_fresh() {
            self.tree = self.meta.activation_tree();
            self.activation = Some(ROOT);
            for frame in &mut self.frames {
                frame.activation = Some(ROOT);
            }
        }
        self.properties = None;
        let salience = self.frames.len();
        let parent = self.activation.filter(|_| !merge && self.tree_is_fresh());
        let activation_key = ActivationKey {
            key: key.to_owned(),
            value: self.meta.transform_value(key, &value),
            chaining,
            salience,
        };

        if let Some(parent) = parent {
            if let Some(child) = self.tree.child(parent, &activation_key) {
                self.meta.counters.activation_hits.fetch_add(1, Ordering::Relaxed);
                trace!(target: "metarule::context", key, node = child, "activation cache hit");
                let recs = self.tree.recs(child);
                for srec in recs.iter() {
                    let val = match srec.origin {
                        Origin::Assigned => Some(&value),
                        Origin::Replayed(index) => Some(self.entries[index].value()),
                        Origin::Derived => None,
                    }
                    .filter(|current| **current != srec.value)
                    .cloned();
                    self.push_rec(Arc::clone(srec), val);
                }
                self.activation = Some(child);
                return Ok(());
            }
        }

        self.meta.counters.activation_misses.fetch_add(1, Ordering::Relaxed);
        trace!(target: "metarule::context", key, "activation cache miss");
        let mark = self.entries.len();
        let value = match self.last_live(key) {
            Some(i) if merge => self
                .meta
                .merge_context_value(key, self.entries[i].value(), &value),
            _ => value,
        };
        let result = match self.assign(key, value, chaining, salience, Origin::Assigned) {
            Ok(true) => self.apply_mirrored_properties(salience),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.unwind_to(mark);
            return Err(e);
        }

        match parent {
            Some(parent) if self.tree_is_fresh() => {
                let recs = self.entries[mark..]
                    .iter()
                    .map(|rec| Arc::clone(&rec.srec))
                    .collect();
                self.activation = Some(self.tree.insert_child(parent, activation_key, recs));
            }
            _ if self.entries.len() > mark => self.activation = None,
            _ => {}
        }
        Ok(())
    }

    /// Record one assignment. Returns `false` if nothing changed: the value
    /// is already current, or a chained value yields to the existing one.
    fn assign(
        &mut self,
        key: &str,
        value: Value,
        chaining: bool,
        salience: usize,
        origin: Origin,
    ) -> Result<bool, MetaError> {
        let Some(existing) = self.last_live(key) else {
            if value.is_null() {
                return Ok(false);
            }
            self.push_assignment(key, value, chaining, salience, origin, Vec::new())?;
            return Ok(true);
        };
        let rec = &self.entries[existing];
        if *rec.value() == value {
            return Ok(false);
        }
        if chaining && (!rec.srec.from_chaining || rec.srec.salience > salience) {
            trace!(target: "metarule::context", key, "chained value yields to existing assignment");
            return Ok(false);
        }

        let mut masks = self.live_from(existing);
        let replays: Vec<(usize, String, Value, bool)> = masks[1..]
            .iter()
            .map(|&index| (index, &self.entries[index]))
            .filter(|(_, rec)| rec.srec.origin != Origin::Derived)
            .map(|(index, rec)| {
                (index, rec.srec.key.clone(), rec.value().clone(), rec.srec.from_chaining)
            })
            .collect();
        trace!(
            target: "metarule::context",
            key,
            masked = masks.len(),
            replayed = replays.len(),
            "override"
        );
        for (index, replay_key, replay_value, replay_chaining) in replays {
            let origin = Origin::Replayed(index);
            if masks.is_empty() {
                self.assign(&replay_key, replay_value, replay_chaining, salience, origin)?;
            } else if replay_value.is_null() {
                continue;
            } else {
                let masks = std::mem::take(&mut masks);
                self.push_assignment(
                    &replay_key,
                    replay_value,
                    replay_chaining,
                    salience,
                    origin,
                    masks,
                )?;
            }
            self.apply_mirrored_properties(salience)?;
        }
        if masks.is_empty() {
            self.assign(key, value, chaining, salience, origin)?;
        } else {
            self.push_assignment(key, value, chaining, salience, origin, masks)?;
        }
        Ok(true)
    }

    /// Push a record for `key`. A record masking others matches on top of
    /// the live records before the first one it masks.
    fn push_assignment(
        &mut self,
        key: &str,
        value: Value,
        chaining: bool,
        salience: usize,
        origin: Origin,
        masks: Vec<usize>,
    ) -> Result<(), MetaError> {
        let limit = self.meta.config().max_context_entries;
        if self.entries.len() >= limit {
            warn!(target: "metarule::context", key, limit, "context assignment limit reached");
            return Err(MetaError::ChainingLimit {
                limit,
                context: self.debug_string(),
            });
        }

        let key_id = self.meta.key_id(key)?;
        let transformed = self.meta.transform_value(key, &value);
        let prefix = match masks.first() {
            Some(&first) => self.prefix_before(first),
            None => self.current_match(),
        };
        let match_result = self
            .meta
            .new_match(key_id, transformed, prefix, MatchKind::Intersect);
        self.push_rec(
            Arc::new(StaticRec {
                key: key.to_owned(),
                value,
                match_result,
                salience,
                from_chaining: chaining,
                masks,
                origin,
            }),
            None,
        );
        Ok(())
    }

    /// The record at `index` plus every live record after it.
    fn live_from(&self, index: usize) -> Vec<usize> {
        let mut records = vec![index];
        records.extend(
            self.entries
                .iter()
                .enumerate()
                .skip(index + 1)
                .filter(|(_, rec)| rec.is_live())
                .map(|(i, _)| i),
        );
        records
    }

    /// The match chain of the live records before `first`.
    ///
    /// The current chain holds one node per live record, in order, so it is
    /// the current chain with the nodes of later live records dropped.
    fn prefix_before(&self, first: usize) -> Option<Arc<MatchResult>> {
        let live = self.entries.iter().filter(|rec| rec.is_live()).count();
        let kept = self.entries[..first].iter().filter(|rec| rec.is_live()).count();
        let mut prefix = self.current_match();
        for _ in kept..live {
            prefix = prefix.and_then(|node| node.prev().cloned());
        }
        prefix
    }

    fn push_rec(&mut self, srec: Arc<StaticRec>, val: Option<Value>) {
        let index = self.entries.len();
        let mut keys = vec![srec.key.clone()];
        for &masked in &srec.masks {
            let rec = &mut self.entries[masked];
            rec.masked_by = Some(index);
            keys.push(rec.srec.key.clone());
        }
        self.entries.push(ContextRec {
            srec,
            val,
            masked_by: None,
        });
        for key in &keys {
            self.refresh_value(key);
        }
    }

    /// Assert mirrored properties as chained values until none changes.
    fn apply_mirrored_properties(&mut self, salience: usize) -> Result<(), MetaError> {
        loop {
            let before = self.entries.len();
            let properties = self.compute_scoped()?.properties;
            for mirrored in properties.context_keys_updated() {
                let Some(value) = properties.get(&mirrored.property) else {
                    continue;
                };
                let value = match value {
                    Value::Dynamic(dynamic) if !dynamic.is_statically_resolvable() => value.clone(),
                    Value::Dynamic(dynamic) => {
                        let fresh = dynamic.awaken().unwrap_or_else(|| dynamic.clone());
                        self.resolve_value(Value::Dynamic(fresh))?
                    }
                    _ => self.resolve_value(value.clone())?,
                };
                if value.is_null() {
                    continue;
                }
                trace!(
                    target: "metarule::context",
                    key = %mirrored.context_key,
                    %value,
                    "chained assignment"
                );
                self.assign(&mirrored.context_key, value, true, salience, Origin::Derived)?;
            }
            if self.entries.len() == before {
                return Ok(());
            }
        }
    }

    fn unwind_to(&mut self, mark: usize) {
        if self.entries.len() <= mark {
            return;
        }
        let mut keys: HashSet<String> = self
            .entries
            .drain(mark..)
            .map(|rec| rec.srec.key.clone())
            .collect();
        for rec in &mut self.entries {
            if rec.masked_by.is_some_and(|by| by >= mark) {
                rec.masked_by = None;
                keys.insert(rec.srec.key.clone());
            }
        }
        for key in &keys {
            self.refresh_value(key);
        }
        self.properties = None;
    }

    fn refresh_value(&mut self, key: &str) {
        match self.last_live(key) {
            Some(i) => {
                let value = self.entries[i].value().clone();
                self.values.insert(key.to_owned(), value);
            }
            None => {
                self.values.remove(key);
            }
        }
    }

    fn last_live(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|rec| rec.is_live() && rec.srec.key == key)
    }

    fn current_match(&self) -> Option<Arc<MatchResult>> {
        self.entries
            .last()
            .map(|rec| Arc::clone(&rec.srec.match_result))
    }

    fn frame_of(&self, index: usize) -> usize {
        self.frames
            .iter()
            .take_while(|frame| frame.mark <= index)
            .count()
    }

    // Property scope

    /// The scope key named by `scopeKey`, else the latest explicitly
    /// assigned scope key, else the latest chained one.
    fn current_scope_key(&self) -> Option<String> {
        if let Some(Value::String(name)) = self.values.get(KEY_SCOPE) {
            if self.meta.is_property_scope(name) {
                return Some(name.clone());
            }
        }
        let mut chained = None;
        for rec in self.entries.iter().rev() {
            if !rec.is_live() || rec.value().is_null() || !self.meta.is_property_scope(&rec.srec.key) {
                continue;
            }
            if !rec.srec.from_chaining {
                return Some(rec.srec.key.clone());
            }
            chained.get_or_insert_with(|| rec.srec.key.clone());
        }
        chained
    }

    fn scoped_properties(&mut self) -> Result<ScopedProperties, MetaError> {
        let node = self.activation.filter(|_| self.tree_is_fresh());
        if let Some(scoped) = node.and_then(|node| self.tree.scoped(node)) {
            return Ok(scoped);
        }
        let mut scoped = self.compute_scoped()?;
        scoped.properties = PropertyMap::awakened(&scoped.properties);
        Ok(match node {
            Some(node) => self.tree.set_scoped(node, scoped),
            None => scoped,
        })
    }

    /// Assert the current scope's flag key, take the properties, and undo.
    fn compute_scoped(&mut self) -> Result<ScopedProperties, MetaError> {
        let Some(current) = self.current_match() else {
            return Ok(ScopedProperties {
                match_result: None,
                properties: Arc::default(),
            });
        };
        let Some(scope) = self.current_scope_key() else {
            let properties = self.meta.properties_for_match(&current);
            return Ok(ScopedProperties {
                match_result: Some(current),
                properties,
            });
        };
        let mark = self.entries.len();
        let salience = self.frames.len() + 1;
        let flag = scope_flag_key(&scope);
        let scoped = self
            .assign(&flag, Value::Bool(true), true, salience, Origin::Derived)
            .map(|_| {
                let result = self.current_match().unwrap_or(current);
                ScopedProperties {
                    properties: self.meta.properties_for_match(&result),
                    match_result: Some(result),
                }
            });
        self.unwind_to(mark);
        scoped
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.entries.len())
            .field("frames", &self.frames.len())
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}
