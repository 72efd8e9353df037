use std::sync::Arc;

use super::Context;
use crate::error::MetaError;
use crate::meta::Meta;
use crate::types::Value;

/// One explicit assignment captured by [`Context::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotAssignment {
    pub key: String,
    pub value: Value,
    /// Frame depth the assignment was made at.
    pub frame: usize,
}

/// The live explicit assignments of a context, replayable into a fresh
/// context of the same [`Meta`]. Chained values are not captured; they are
/// re-derived on replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    assignments: Vec<SnapshotAssignment>,
    depth: usize,
}

impl Snapshot {
    pub(crate) fn new(assignments: Vec<SnapshotAssignment>, depth: usize) -> Self {
        Self { assignments, depth }
    }

    #[must_use]
    pub fn assignments(&self) -> &[SnapshotAssignment] {
        &self.assignments
    }

    /// Frame depth of the captured context.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Rebuild a context with the same frames and assignments.
    ///
    /// # Errors
    ///
    /// Returns the first error raised replaying an assignment.
    pub fn hydrate(&self, meta: &Arc<Meta>) -> Result<Context, MetaError> {
        let mut context = meta.new_context();
        for assignment in &self.assignments {
            while context.frame_depth() < assignment.frame {
                context.push();
            }
            context.set(&assignment.key, assignment.value.clone())?;
        }
        while context.frame_depth() < self.depth {
            context.push();
        }
        Ok(context)
    }

    /// Encode into the binary snapshot format.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if a value
    /// is an object or dynamic value, or encoding fails.
    #[cfg(feature = "binary-snapshot")]
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode(self)
    }

    /// Decode a snapshot produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, integrity, or validation failure.
    #[cfg(feature = "binary-snapshot")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hydrate_restores_values_and_frames() {
        let meta = Meta::builder()
            .property_scope("field")
            .mirror("type", "type")
            .rule(|r| r.select("field", "birthDay").property("type", "Date"))
            .build()
            .unwrap();
        let mut ctx = meta.new_context();
        ctx.set("class", "Person").unwrap();
        ctx.push();
        ctx.set("field", "birthDay").unwrap();
        ctx.push();

        let snap = ctx.snapshot();
        assert_eq!(snap.assignments().len(), 2);
        assert_eq!(snap.depth(), 2);

        let mut restored = snap.hydrate(&meta).unwrap();
        assert_eq!(restored.values(), ctx.values());
        assert_eq!(restored.frame_depth(), 2);
        restored.pop();
        restored.pop();
        assert_eq!(restored.values().len(), 1);
        assert_eq!(restored.value("class").unwrap(), Value::from("Person"));
    }

    #[test]
    fn empty_snapshot_hydrates_empty_context() {
        let meta = Meta::builder().build().unwrap();
        let ctx = Snapshot::default().hydrate(&meta).unwrap();
        assert!(ctx.values().is_empty());
        assert_eq!(ctx.frame_depth(), 0);
    }
}
