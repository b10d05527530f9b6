use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::attribute_path::AttributePath;
use crate::bucket::{HashVersion, Namespace, VariationIndex};
use crate::condition::Condition;
use crate::experiment::{default_hash_attribute, Experiment};
use crate::feature_value::FeatureValue;

/// A named feature: a default value and an ordered list of rules that may override it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(default)]
    pub default_value: FeatureValue,
    #[serde(default)]
    pub rules: Vec<FeatureRule>,
}

/// One rule of a [Feature]. Rules are tried in order and the first one that concludes wins.
///
/// A rule with a `variations` list is an experiment rule; otherwise a rule with a `force` value
/// is a force rule. Anything else, or a rule that fails to parse as its kind, is kept as
/// [FeatureRule::Malformed] and never concludes.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureRule {
    Experiment(ExperimentRule),
    Force(ForceRule),
    Malformed(Value),
}

impl<'de> Deserialize<'de> for FeatureRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let parsed = if value.get("variations").is_some() {
            ExperimentRule::deserialize(&value).map(FeatureRule::Experiment)
        } else if value.get("force").is_some() {
            ForceRule::deserialize(&value).map(FeatureRule::Force)
        } else {
            warn!("rule is neither a force nor an experiment rule: {}", value);
            return Ok(FeatureRule::Malformed(value));
        };

        Ok(parsed.unwrap_or_else(|e| {
            warn!("malformed rule ({}): {}", e, value);
            FeatureRule::Malformed(value)
        }))
    }
}

/// Sets the feature to a fixed value for every context matching the condition, optionally only
/// for a hashed fraction of them.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(rename = "force")]
    pub value: FeatureValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default = "default_hash_attribute")]
    pub hash_attribute: AttributePath,
    /// Hash seed for coverage; defaults to the feature key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default)]
    pub hash_version: HashVersion,
}

/// Runs an experiment and, if the context is placed in it, resolves the feature to the
/// assigned variation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Tracking key; defaults to the feature key.
    #[serde(default, alias = "trackingKey", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub variations: Vec<FeatureValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default = "default_hash_attribute")]
    pub hash_attribute: AttributePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<VariationIndex>,
    #[serde(default)]
    pub hash_version: HashVersion,
}

impl ExperimentRule {
    /// The experiment this rule runs when evaluated as part of `feature_key`.
    pub fn to_experiment(&self, feature_key: &str) -> Experiment {
        Experiment {
            key: self.key.clone().unwrap_or_else(|| feature_key.to_owned()),
            variations: self.variations.clone(),
            weights: self.weights.clone(),
            active: true,
            coverage: self.coverage,
            condition: self.condition.clone(),
            namespace: self.namespace.clone(),
            force: self.force,
            hash_attribute: self.hash_attribute.clone(),
            seed: self.seed.clone(),
            hash_version: self.hash_version,
            url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;

    #[test]
    fn deserializes_feature() {
        let feature: Feature = serde_json::from_value(json!({
            "defaultValue": "gray",
            "rules": [
                {"condition": {"country": "US"}, "force": "red"},
                {"key": "btn", "variations": ["blue", "green"], "coverage": 0.5},
                {"condition": {"beta": true}},
                {"variations": "not a list"}
            ]
        }))
        .unwrap();

        assert_that!(feature.default_value).is_equal_to(FeatureValue::from("gray"));
        assert_that!(feature.rules).has_length(4);

        match &feature.rules[0] {
            FeatureRule::Force(rule) => {
                assert_that!(rule.value).is_equal_to(FeatureValue::from("red"));
                assert!(rule.condition.is_some());
                assert_that!(rule.hash_attribute.to_string()).is_equal_to("id".to_string());
            }
            other => panic!("expected force rule, got {:?}", other),
        }
        match &feature.rules[1] {
            FeatureRule::Experiment(rule) => {
                assert_that!(rule.key).contains_value("btn".to_string());
                assert_that!(rule.variations).has_length(2);
                assert_that!(rule.coverage).contains_value(0.5_f64);
            }
            other => panic!("expected experiment rule, got {:?}", other),
        }
        assert!(matches!(feature.rules[2], FeatureRule::Malformed(_)));
        assert!(matches!(feature.rules[3], FeatureRule::Malformed(_)));
    }

    #[test]
    fn force_rule_may_force_null() {
        let rule: FeatureRule = serde_json::from_value(json!({"force": null})).unwrap();
        assert_that!(rule).is_equal_to(FeatureRule::Force(ForceRule {
            condition: None,
            value: FeatureValue::Null,
            coverage: None,
            hash_attribute: AttributePath::new("id"),
            seed: None,
            hash_version: HashVersion::V1,
        }));
    }

    #[test]
    fn experiment_rule_with_force_index_is_an_experiment() {
        let rule: FeatureRule =
            serde_json::from_value(json!({"variations": [false, true], "force": 1})).unwrap();
        assert!(matches!(rule, FeatureRule::Experiment(ExperimentRule { force: Some(1), .. })));
    }

    #[test]
    fn tracking_key_alias() {
        let rule: ExperimentRule =
            serde_json::from_value(json!({"trackingKey": "btn", "variations": [1, 2]})).unwrap();
        assert_that!(rule.key).contains_value("btn".to_string());
    }

    #[test]
    fn to_experiment_defaults_key_to_feature() {
        let rule: ExperimentRule = serde_json::from_value(json!({
            "variations": ["blue", "green"],
            "weights": [0.3, 0.7],
            "namespace": ["ns", 0, 0.5],
            "hashVersion": 2
        }))
        .unwrap();

        let experiment = rule.to_experiment("signup-button-color");
        assert_that!(experiment.key.as_str()).is_equal_to("signup-button-color");
        assert_that!(experiment.seed()).is_equal_to("signup-button-color");
        assert_that!(experiment.weights).contains_value(vec![0.3, 0.7]);
        assert_that!(experiment.namespace).contains_value(Namespace::new("ns", 0.0, 0.5));
        assert_that!(experiment.hash_version).is_equal_to(HashVersion::V2);
        assert!(experiment.active);
    }

    #[test]
    fn malformed_rules_round_trip_as_given() {
        let source = json!({"condition": {"beta": true}});
        let rule: FeatureRule = serde_json::from_value(source.clone()).unwrap();
        assert_that!(serde_json::to_value(&rule).unwrap()).is_equal_to(source);
    }
}
