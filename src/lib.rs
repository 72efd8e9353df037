mod compile;
mod context;
mod dynamic;
mod error;
mod evaluate;
pub mod index_set;
mod match_result;
mod merge;
mod meta;
pub mod parse;
#[cfg(feature = "binary-snapshot")]
pub mod serial;
mod store;
mod types;

pub use context::{Context, Snapshot, SnapshotAssignment};
pub use dynamic::DynamicValue;
pub use error::MetaError;
pub use merge::{AndMerger, DeclareListMerger, ListMerger, PropertyMerger, ValidMerger};
pub use meta::{
    KEY_ANY, KEY_DECLARE, KEY_SCOPE, KeyInitObserver, Meta, MetaBuilder, MetaConfig, MetaStats,
    PresenceTransformer, ValueTransformer,
};
pub use parse::ParseError;
pub use store::{RuleSetId, RuleSetInfo};
pub use types::{
    ArithOp, CompareOp, Expr, FieldExpr, MatchReport, MatchedRule, MetaObject, MirroredProperty,
    ObjectRef, PropertyMap, Rule, RuleBuilder, Selector, Value, field, lit, path,
};
