use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::Value;

/// A property whose value is re-asserted into the context under `context_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredProperty {
    pub property: String,
    pub context_key: String,
}

/// The merged properties of every rule matching a context.
///
/// Maps are shared between contexts reaching the same match. Values that
/// memoize their resolution (statically resolved expressions) are only
/// resolved on a copy made by [`PropertyMap::awakened`] for one match path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: BTreeMap<String, Value>,
    context_keys_updated: Vec<MirroredProperty>,
}

impl PropertyMap {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Mirrored properties whose value changed while this map was merged.
    #[must_use]
    pub fn context_keys_updated(&self) -> &[MirroredProperty] {
        &self.context_keys_updated
    }

    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        self.entries.insert(name.to_owned(), value);
    }

    pub(crate) fn note_context_key(&mut self, property: &str, context_key: &str) {
        if self
            .context_keys_updated
            .iter()
            .any(|m| m.property == property)
        {
            return;
        }
        self.context_keys_updated.push(MirroredProperty {
            property: property.to_owned(),
            context_key: context_key.to_owned(),
        });
    }

    /// A copy with fresh, unresolved instances of every memoizing value, or
    /// the same map if it holds none.
    pub(crate) fn awakened(map: &Arc<Self>) -> Arc<Self> {
        let fresh: Vec<(String, Value)> = map
            .entries
            .iter()
            .filter_map(|(name, value)| match value {
                Value::Dynamic(dynamic) => dynamic
                    .awaken()
                    .map(|fresh| (name.clone(), Value::Dynamic(fresh))),
                _ => None,
            })
            .collect();
        if fresh.is_empty() {
            return Arc::clone(map);
        }
        let mut copy = Self::clone(map);
        copy.entries.extend(fresh);
        Arc::new(copy)
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
