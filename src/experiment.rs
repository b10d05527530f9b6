use log::debug;
use serde::{Deserialize, Serialize};

use crate::attribute_path::AttributePath;
use crate::attribute_value::AttributeValue;
use crate::bucket::{
    choose_variation, effective_coverage, effective_weights, hash, HashVersion, Namespace,
    VariationIndex,
};
use crate::condition::{Condition, Pattern};
use crate::context::EvaluationContext;
use crate::feature_value::FeatureValue;
use crate::tracking::ExperimentRecorder;

pub(crate) const DEFAULT_HASH_ATTRIBUTE: &str = "id";

pub(crate) fn default_hash_attribute() -> AttributePath {
    AttributePath::new(DEFAULT_HASH_ATTRIBUTE)
}

fn default_true() -> bool {
    true
}

/// An experiment that splits subjects between two or more variations.
///
/// Inline experiments are run directly with [run_experiment]; experiment rules attached to a
/// feature are turned into one of these and go through the same pipeline.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// Tracking key; also the hash seed unless [Experiment::seed] is set.
    pub key: String,
    pub variations: Vec<FeatureValue>,
    /// Fraction of the hash range each variation receives. Defaults to an equal split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Fraction of eligible subjects included; the rest see the control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    /// Assigns every eligible subject this variation instead of hashing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<VariationIndex>,
    #[serde(default = "default_hash_attribute")]
    pub hash_attribute: AttributePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default)]
    pub hash_version: HashVersion,
    /// When set, the experiment only runs for context urls matching this pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Pattern>,
}

/// The outcome of running an [Experiment] for one context.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResult {
    pub value: FeatureValue,
    pub variation_id: VariationIndex,
    /// True if the subject was assigned a variation, either by hashing or by an override.
    pub in_experiment: bool,
    /// True if the variation came from bucketing rather than an override.
    pub hash_used: bool,
    pub hash_attribute: String,
    /// The stringified attribute value that was (or would be) hashed; empty if absent.
    pub hash_value: String,
    /// The feature this experiment belongs to, if it came from a feature rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
}

impl Experiment {
    pub fn new(key: impl Into<String>, variations: Vec<FeatureValue>) -> Self {
        Experiment {
            key: key.into(),
            variations,
            weights: None,
            active: true,
            coverage: None,
            condition: None,
            namespace: None,
            force: None,
            hash_attribute: default_hash_attribute(),
            seed: None,
            hash_version: HashVersion::default(),
            url: None,
        }
    }

    /// The seed used for bucketing.
    pub fn seed(&self) -> &str {
        self.seed.as_deref().unwrap_or(&self.key)
    }

    fn hash_value(&self, context: &EvaluationContext) -> Option<String> {
        context
            .attributes
            .get_value(&self.hash_attribute)
            .and_then(AttributeValue::as_hashable)
    }

    fn result(
        &self,
        context: &EvaluationContext,
        variation: Option<VariationIndex>,
        hash_used: bool,
        feature_id: Option<&str>,
    ) -> ExperimentResult {
        let (variation_id, in_experiment, hash_used) = match variation {
            Some(index) if index < self.variations.len() => (index, true, hash_used),
            Some(index) => {
                debug!(
                    "experiment {} has no variation {}; using the control",
                    self.key, index
                );
                (0, false, false)
            }
            None => (0, false, false),
        };

        ExperimentResult {
            value: self
                .variations
                .get(variation_id)
                .cloned()
                .unwrap_or_default(),
            variation_id,
            in_experiment,
            hash_used,
            hash_attribute: self.hash_attribute.to_string(),
            hash_value: self.hash_value(context).unwrap_or_default(),
            feature_id: feature_id.map(str::to_owned),
        }
    }

    fn control(&self, context: &EvaluationContext, feature_id: Option<&str>) -> ExperimentResult {
        self.result(context, None, false, feature_id)
    }
}

/// Runs `experiment` for `context` without reporting the result anywhere.
///
/// Every short-circuit yields the control: variation 0, not in the experiment.
pub(crate) fn evaluate_experiment(
    experiment: &Experiment,
    context: &EvaluationContext,
    feature_id: Option<&str>,
) -> ExperimentResult {
    let key = &experiment.key;
    let num_variations = experiment.variations.len();

    if num_variations < 2 {
        debug!("experiment {} has fewer than two variations", key);
        return experiment.control(context, feature_id);
    }
    if !context.enabled {
        debug!("experiment {} not run: evaluation is disabled", key);
        return experiment.control(context, feature_id);
    }
    if !experiment.active {
        debug!("experiment {} is inactive", key);
        return experiment.control(context, feature_id);
    }
    if let Some(condition) = &experiment.condition {
        if !condition.matches(&context.attributes) {
            debug!("experiment {} condition does not match", key);
            return experiment.control(context, feature_id);
        }
    }
    if let Some(pattern) = &experiment.url {
        if !context.url_matches(pattern) {
            debug!("experiment {} not targeted at this url", key);
            return experiment.control(context, feature_id);
        }
    }

    if let Some(index) = context.query_string_override(key, num_variations) {
        return experiment.result(context, Some(index), false, feature_id);
    }
    if let Some(index) = context.forced_variations.get(key) {
        return experiment.result(context, Some(*index), false, feature_id);
    }

    let hash_value = match experiment.hash_value(context) {
        Some(value) => value,
        None => {
            debug!(
                "experiment {} skipped: no usable value for {}",
                key, experiment.hash_attribute
            );
            return experiment.control(context, feature_id);
        }
    };

    if let Some(namespace) = &experiment.namespace {
        if !namespace.contains(&hash_value) {
            debug!("experiment {} excluded by namespace {}", key, namespace.id);
            return experiment.control(context, feature_id);
        }
    }
    if context.qa_mode {
        return experiment.control(context, feature_id);
    }
    if let Some(index) = experiment.force {
        return experiment.result(context, Some(index), false, feature_id);
    }

    let bucket = hash(experiment.seed(), &hash_value, experiment.hash_version);
    let weights = effective_weights(num_variations, experiment.weights.as_deref());
    let coverage = effective_coverage(experiment.coverage);
    let assigned = choose_variation(bucket, &weights, coverage);
    if assigned.is_none() {
        debug!("experiment {} left bucket {} unassigned", key, bucket);
    }
    experiment.result(context, assigned, true, feature_id)
}

/// Runs an inline experiment for `context`.
///
/// The result is handed to `recorder`, if any, before it is returned; the recorder decides
/// whether it counts as an exposure.
pub fn run_experiment(
    experiment: &Experiment,
    context: &EvaluationContext,
    recorder: Option<&dyn ExperimentRecorder>,
) -> ExperimentResult {
    let result = evaluate_experiment(experiment, context, None);
    if let Some(recorder) = recorder {
        recorder.report(experiment, &result);
    }
    result
}
