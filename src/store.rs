use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::feature::Feature;

/// Store is an interface for the loaded feature definitions an evaluation reads from.
///
/// Ordinarily the only implementation is [FeatureMap], but callers holding definitions in their
/// own structures can implement it directly.
pub trait Store {
    /// Retrieve the feature with key `feature_key`.
    fn feature(&self, feature_key: &str) -> Option<&Feature>;
}

/// The default in-memory [Store]: features keyed by name.
///
/// Inserting a key that already exists replaces the earlier definition, including when a JSON
/// document repeats a key.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FeatureMap(HashMap<String, Feature>);

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a feature, returning the definition it replaced.
    pub fn insert(&mut self, key: impl Into<String>, feature: Feature) -> Option<Feature> {
        self.0.insert(key.into(), feature)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl Store for FeatureMap {
    fn feature(&self, feature_key: &str) -> Option<&Feature> {
        self.0.get(feature_key)
    }
}

impl From<HashMap<String, Feature>> for FeatureMap {
    fn from(features: HashMap<String, Feature>) -> Self {
        FeatureMap(features)
    }
}

impl<S: Into<String>> FromIterator<(S, Feature)> for FeatureMap {
    fn from_iter<I: IntoIterator<Item = (S, Feature)>>(iter: I) -> Self {
        FeatureMap(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
