use log::debug;
use serde::Serialize;

use crate::attribute_value::AttributeValue;
use crate::bucket::{effective_coverage, hash};
use crate::context::EvaluationContext;
use crate::experiment::{evaluate_experiment, Experiment, ExperimentResult};
use crate::feature::{FeatureRule, ForceRule};
use crate::feature_value::FeatureValue;
use crate::store::Store;
use crate::tracking::ExperimentRecorder;

/// Where the value of a [FeatureResult] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// No rule concluded; the feature's default value was used.
    DefaultValue,
    /// A force rule set the value.
    Force,
    /// An experiment rule placed the context in a variation.
    Experiment,
    /// No feature with the requested key exists.
    UnknownFeature,
}

/// The result of resolving a feature for a context.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResult {
    pub value: FeatureValue,
    pub source: Source,
    /// Whether [FeatureResult::value] is truthy.
    pub on: bool,
    pub off: bool,
    /// The experiment that set the value, when [FeatureResult::source] is
    /// [Source::Experiment].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Experiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_result: Option<ExperimentResult>,
}

impl FeatureResult {
    fn new(value: FeatureValue, source: Source) -> Self {
        let on = value.is_truthy();
        FeatureResult {
            value,
            source,
            on,
            off: !on,
            experiment: None,
            experiment_result: None,
        }
    }

    fn unknown() -> Self {
        FeatureResult::new(FeatureValue::Null, Source::UnknownFeature)
    }

    fn from_experiment(experiment: Experiment, result: ExperimentResult) -> Self {
        FeatureResult {
            experiment: Some(experiment),
            ..FeatureResult::new(result.value.clone(), Source::Experiment)
        }
        .with_result(result)
    }

    fn with_result(mut self, result: ExperimentResult) -> Self {
        self.experiment_result = Some(result);
        self
    }
}

/// Resolve the feature named `feature_key` for `context`.
///
/// Rules are tried in declaration order and the first one that concludes sets the value; if none
/// does, the feature's default value is used. Every experiment rule that gets evaluated is handed
/// to `recorder`, which decides whether it counts as an exposure. Resolution never fails: an
/// unknown key yields a null value with [Source::UnknownFeature].
pub fn resolve_feature(
    store: &dyn Store,
    feature_key: &str,
    context: &EvaluationContext,
    recorder: Option<&dyn ExperimentRecorder>,
) -> FeatureResult {
    let feature = match store.feature(feature_key) {
        Some(feature) => feature,
        None => {
            debug!("unknown feature {}", feature_key);
            return FeatureResult::unknown();
        }
    };

    for (rule_index, rule) in feature.rules.iter().enumerate() {
        match rule {
            FeatureRule::Force(rule) => {
                if force_rule_applies(rule, feature_key, context) {
                    return FeatureResult::new(rule.value.clone(), Source::Force);
                }
            }
            FeatureRule::Experiment(rule) => {
                let experiment = rule.to_experiment(feature_key);
                let result = evaluate_experiment(&experiment, context, Some(feature_key));
                if let Some(recorder) = recorder {
                    recorder.report(&experiment, &result);
                }
                if result.in_experiment {
                    return FeatureResult::from_experiment(experiment, result);
                }
                debug!(
                    "feature {} rule {}: not in experiment {}",
                    feature_key, rule_index, experiment.key
                );
            }
            FeatureRule::Malformed(_) => {
                debug!("feature {} rule {} is malformed", feature_key, rule_index);
            }
        }
    }

    FeatureResult::new(feature.default_value.clone(), Source::DefaultValue)
}

fn force_rule_applies(rule: &ForceRule, feature_key: &str, context: &EvaluationContext) -> bool {
    if let Some(condition) = &rule.condition {
        if !condition.matches(&context.attributes) {
            return false;
        }
    }

    let coverage = match rule.coverage {
        Some(coverage) => effective_coverage(Some(coverage)),
        None => return true,
    };
    let hash_value = match context
        .attributes
        .get_value(&rule.hash_attribute)
        .and_then(AttributeValue::as_hashable)
    {
        Some(value) => value,
        None => {
            debug!(
                "feature {}: force rule skipped, no usable value for {}",
                feature_key, rule.hash_attribute
            );
            return false;
        }
    };
    let seed = rule.seed.as_deref().unwrap_or(feature_key);
    hash(seed, &hash_value, rule.hash_version) < coverage
}
