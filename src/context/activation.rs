use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::StaticRec;
use crate::match_result::MatchResult;
use crate::types::{PropertyMap, Value};

pub(crate) const ROOT: usize = 0;

/// What a cached activation was produced by, relative to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ActivationKey {
    pub(crate) key: String,
    /// Canonical (transformed) value.
    pub(crate) value: Value,
    pub(crate) chaining: bool,
    pub(crate) salience: usize,
}

/// Properties visible under the current scope key, with the match that
/// produced them.
#[derive(Clone)]
pub(crate) struct ScopedProperties {
    pub(crate) match_result: Option<Arc<MatchResult>>,
    pub(crate) properties: Arc<PropertyMap>,
}

#[derive(Default)]
struct ActivationNode {
    recs: Arc<[Arc<StaticRec>]>,
    children: HashMap<ActivationKey, usize>,
    scoped: Option<ScopedProperties>,
}

/// Arena of activations for one generation, shared by every context.
///
/// Node `ROOT` is the empty context; each child records the assignments a
/// `set` produced on top of its parent. Nodes are addressed by index.
pub(crate) struct ActivationTree {
    generation: u64,
    nodes: RwLock<Vec<ActivationNode>>,
}

impl ActivationTree {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            nodes: RwLock::new(vec![ActivationNode {
                recs: Vec::new().into(),
                ..ActivationNode::default()
            }]),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn child(&self, parent: usize, key: &ActivationKey) -> Option<usize> {
        self.nodes.read()[parent].children.get(key).copied()
    }

    pub(crate) fn recs(&self, node: usize) -> Arc<[Arc<StaticRec>]> {
        Arc::clone(&self.nodes.read()[node].recs)
    }

    /// Insert a child unless another context got there first; either way
    /// return the child's index.
    pub(crate) fn insert_child(
        &self,
        parent: usize,
        key: ActivationKey,
        recs: Vec<Arc<StaticRec>>,
    ) -> usize {
        let mut nodes = self.nodes.write();
        if let Some(&existing) = nodes[parent].children.get(&key) {
            return existing;
        }
        let index = nodes.len();
        nodes.push(ActivationNode {
            recs: recs.into(),
            ..ActivationNode::default()
        });
        nodes[parent].children.insert(key, index);
        index
    }

    pub(crate) fn scoped(&self, node: usize) -> Option<ScopedProperties> {
        self.nodes.read()[node].scoped.clone()
    }

    /// Store the scoped properties of `node` unless already stored, and
    /// return the stored ones.
    pub(crate) fn set_scoped(&self, node: usize, scoped: ScopedProperties) -> ScopedProperties {
        let mut nodes = self.nodes.write();
        nodes[node].scoped.get_or_insert(scoped).clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.nodes.read().len()
    }
}
