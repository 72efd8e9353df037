mod expr;
mod key_registry;
mod property_map;
mod report;
mod rule;
mod value;

pub use expr::{ArithOp, CompareOp, Expr, FieldExpr, field, lit, path};
pub(crate) use key_registry::{KeyData, KeyId, KeyRegistry, MAX_CONTEXT_KEYS, is_any, key_mask};
pub use property_map::{MirroredProperty, PropertyMap};
pub use report::{MatchReport, MatchedRule};
pub use rule::{Rule, RuleBuilder, Selector};
pub use value::{MetaObject, ObjectRef, Value};
