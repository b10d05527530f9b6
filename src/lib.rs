//! Deterministic, network-free evaluation of feature flags and experiments.
//!
//! Feature definitions are loaded into a [Store] (usually a [FeatureMap] deserialized from
//! JSON). An [Evaluator] combines them with an [EvaluationContext] describing the current
//! subject, resolves features by key, runs inline experiments, and reports experiment exposures
//! to a tracking callback and to change subscribers.
//!
//! Bucketing is reproducible across implementations: the same subject, seed and hash version
//! always land in the same bucket.

mod attribute_path;
mod attribute_value;
mod bucket;
mod condition;
mod context;
mod eval;
mod evaluator;
mod experiment;
mod feature;
mod feature_value;
mod store;
mod test_common;
mod tracking;

pub use attribute_path::*;
pub use attribute_value::*;
pub use bucket::*;
pub use condition::*;
pub use context::*;
pub use eval::*;
pub use evaluator::*;
pub use experiment::*;
pub use feature::*;
pub use feature_value::*;
pub use store::*;
pub use tracking::*;
