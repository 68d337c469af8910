//! Operator-editable rule set: normalization, compilation and hot reload.

pub mod compiler;
pub mod normalize;
pub mod snapshot;
pub mod store;

pub use snapshot::{AlertPattern, Keyword, RuleSnapshot, SkippedPattern, SourceVersion};
pub use store::{FileRuleSource, RuleSource, RuleStore};
