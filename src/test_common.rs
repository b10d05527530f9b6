#![cfg(test)]

use std::sync::{Arc, Mutex};

use crate::experiment::{Experiment, ExperimentResult};
use crate::feature::Feature;
use crate::store::{FeatureMap, Store};
use crate::tracking::{ExperimentRecorder, Subscriber, TrackingCallback, TrackingError};

pub struct TestStore {
    features: FeatureMap,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            features: test_features(),
        }
    }
}

impl Store for TestStore {
    fn feature(&self, feature_key: &str) -> Option<&Feature> {
        self.features.feature(feature_key)
    }
}

pub fn test_features() -> FeatureMap {
    serde_json::from_str(
        r#"{
            "plain": {
                "defaultValue": true
            },
            "signup-button-color": {
                "defaultValue": "gray",
                "rules": [
                    {
                        "key": "btn",
                        "variations": ["blue", "green"],
                        "coverage": 1,
                        "hashAttribute": "id"
                    }
                ]
            },
            "half-covered": {
                "defaultValue": "gray",
                "rules": [
                    {
                        "key": "btn",
                        "variations": ["blue", "green"],
                        "coverage": 0.5
                    }
                ]
            },
            "regional": {
                "defaultValue": 0,
                "rules": [
                    {
                        "condition": {"country": {"$in": ["US", "CA"]}},
                        "force": 2
                    }
                ]
            },
            "signup-button-rollout": {
                "defaultValue": "old",
                "rules": [
                    {
                        "force": "new",
                        "coverage": 0.5,
                        "seed": "signup-button-color"
                    },
                    {
                        "force": "old"
                    }
                ]
            },
            "broken": {
                "defaultValue": "default",
                "rules": [
                    {"condition": {"beta": true}},
                    {"key": "broken", "variations": "blue"},
                    {"force": "fallback"}
                ]
            }
        }"#,
    )
    .unwrap()
}

/// Collects every report as `(experiment key, result)`.
#[derive(Default)]
pub struct RecordingRecorder {
    reports: Mutex<Vec<(String, ExperimentResult)>>,
}

impl RecordingRecorder {
    pub fn reports(&self) -> Vec<(String, ExperimentResult)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ExperimentRecorder for RecordingRecorder {
    fn report(&self, experiment: &Experiment, result: &ExperimentResult) {
        self.reports
            .lock()
            .unwrap()
            .push((experiment.key.clone(), result.clone()));
    }
}

pub type Calls = Arc<Mutex<Vec<(String, ExperimentResult)>>>;

/// A tracking callback that appends to `calls`.
pub fn recording_callback(calls: &Calls) -> Arc<dyn TrackingCallback> {
    let calls = Arc::clone(calls);
    Arc::new(
        move |experiment: &Experiment, result: &ExperimentResult| -> Result<(), TrackingError> {
            calls
                .lock()
                .unwrap()
                .push((experiment.key.clone(), result.clone()));
            Ok(())
        },
    )
}

/// A subscriber that appends to `calls`.
pub fn recording_subscriber(calls: &Calls) -> Subscriber {
    let calls = Arc::clone(calls);
    Arc::new(move |experiment: &Experiment, result: &ExperimentResult| {
        calls
            .lock()
            .unwrap()
            .push((experiment.key.clone(), result.clone()));
    })
}
