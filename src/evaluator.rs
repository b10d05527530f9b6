use std::collections::HashMap;
use std::sync::Arc;

use crate::attribute_value::Attributes;
use crate::bucket::VariationIndex;
use crate::context::EvaluationContext;
use crate::eval::{self, FeatureResult};
use crate::experiment::{self, Experiment, ExperimentResult};
use crate::feature_value::FeatureValue;
use crate::store::{FeatureMap, Store};
use crate::tracking::{
    Subscriber, SubscriptionId, TrackingCallback, TrackingDispatcher, TrackingPolicy,
};

/// A long-lived evaluation engine for one subject.
///
/// The evaluator owns the feature definitions, the [EvaluationContext] and a
/// [TrackingDispatcher] whose assignment ledger lives as long as the evaluator. Configuration
/// changes take `&mut self`, evaluations take `&self`, so an evaluator can be shared between
/// threads for evaluation while the context stays fixed.
///
/// # Example
/// ```
/// # use feature_evaluation::{Attributes, EvaluationContext, Evaluator, FeatureMap, FeatureValue};
/// let features: FeatureMap = serde_json::from_str(r#"{
///     "signup-button-color": {
///         "defaultValue": "gray",
///         "rules": [{"key": "btn", "variations": ["blue", "green"]}]
///     }
/// }"#).unwrap();
///
/// let context = EvaluationContext::new(Attributes::from_iter([("id", "123")]));
/// let evaluator = Evaluator::new(features, context);
///
/// assert_eq!(evaluator.resolve_feature("signup-button-color").value, FeatureValue::from("green"));
/// assert!(evaluator.is_off("missing"));
/// ```
#[derive(Debug)]
pub struct Evaluator<S: Store = FeatureMap> {
    store: S,
    context: EvaluationContext,
    dispatcher: TrackingDispatcher,
}

impl<S: Store + Default> Default for Evaluator<S> {
    fn default() -> Self {
        Evaluator::new(S::default(), EvaluationContext::default())
    }
}

impl<S: Store> Evaluator<S> {
    pub fn new(store: S, context: EvaluationContext) -> Self {
        Evaluator {
            store,
            context,
            dispatcher: TrackingDispatcher::default(),
        }
    }

    /// Sets the callback invoked for every tracked experiment evaluation.
    pub fn with_tracking_callback(mut self, callback: Arc<dyn TrackingCallback>) -> Self {
        self.dispatcher.set_callback(Some(callback));
        self
    }

    pub fn with_tracking_policy(mut self, policy: TrackingPolicy) -> Self {
        self.dispatcher.set_policy(policy);
        self
    }

    /// Resolve a feature by key for the current context.
    pub fn resolve_feature(&self, feature_key: &str) -> FeatureResult {
        eval::resolve_feature(&self.store, feature_key, &self.context, Some(&self.dispatcher))
    }

    /// Run an inline experiment for the current context.
    pub fn run(&self, experiment: &Experiment) -> ExperimentResult {
        experiment::run_experiment(experiment, &self.context, Some(&self.dispatcher))
    }

    pub fn is_on(&self, feature_key: &str) -> bool {
        self.resolve_feature(feature_key).on
    }

    pub fn is_off(&self, feature_key: &str) -> bool {
        self.resolve_feature(feature_key).off
    }

    /// Returns the resolved value, or `fallback` if the feature resolves to null.
    pub fn feature_value_or(&self, feature_key: &str, fallback: FeatureValue) -> FeatureValue {
        let value = self.resolve_feature(feature_key).value;
        if value.is_null() {
            fallback
        } else {
            value
        }
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub fn attributes(&self) -> &Attributes {
        &self.context.attributes
    }

    /// Replaces the attributes wholesale.
    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.context.attributes = attributes;
    }

    pub fn set_forced_variations(&mut self, forced_variations: HashMap<String, VariationIndex>) {
        self.context.forced_variations = forced_variations;
    }

    pub fn set_qa_mode(&mut self, qa_mode: bool) {
        self.context.qa_mode = qa_mode;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.context.enabled = enabled;
    }

    pub fn set_url(&mut self, url: Option<String>) {
        self.context.url = url;
    }

    /// Replaces the feature definitions. The assignment ledger is kept.
    pub fn set_features(&mut self, store: S) {
        self.store = store;
    }

    pub fn features(&self) -> &S {
        &self.store
    }

    pub fn set_tracking_callback(&mut self, callback: Option<Arc<dyn TrackingCallback>>) {
        self.dispatcher.set_callback(callback);
    }

    /// Registers a listener called whenever the variation assigned in an experiment changes.
    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        self.dispatcher.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// The last variation recorded for each experiment key.
    pub fn assigned_variations(&self) -> HashMap<String, VariationIndex> {
        self.dispatcher.assigned_variations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_value::AttributeValue;
    use crate::test_common::{recording_callback, recording_subscriber, test_features, Calls};
    use maplit::hashmap;
    use spectral::prelude::*;
    use std::sync::Mutex;
    use std::thread;

    fn evaluator_for(id: &str) -> Evaluator {
        Evaluator::new(
            test_features(),
            EvaluationContext::new(Attributes::from_iter([("id", id)])),
        )
    }

    fn btn() -> Experiment {
        Experiment::new("btn", vec!["blue".into(), "green".into()])
    }

    fn calls() -> Calls {
        Arc::new(Mutex::new(vec![]))
    }

    #[test]
    fn evaluator_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Evaluator>();
    }

    #[test]
    fn resolves_features() {
        let evaluator = evaluator_for("123");
        assert_that!(evaluator.resolve_feature("signup-button-color").value)
            .is_equal_to(FeatureValue::from("green"));
        assert!(evaluator.is_on("plain"));
        assert!(evaluator.is_off("regional"));
        assert!(evaluator.is_off("missing"));
        assert_that!(evaluator.feature_value_or("missing", "fallback".into()))
            .is_equal_to(FeatureValue::from("fallback"));
        assert_that!(evaluator.feature_value_or("regional", "fallback".into()))
            .is_equal_to(FeatureValue::from(0.0));
    }

    #[test]
    fn tracking_and_change_only_subscription() {
        let tracked = calls();
        let notified = calls();
        let evaluator = evaluator_for("123").with_tracking_callback(recording_callback(&tracked));
        evaluator.subscribe(recording_subscriber(&notified));

        let first = evaluator.run(&btn());
        let second = evaluator.run(&btn());
        assert_that!(second).is_equal_to(&first);

        assert_that!(*tracked.lock().unwrap()).has_length(2);
        assert_that!(*notified.lock().unwrap()).has_length(1);
        assert_that!(evaluator.assigned_variations())
            .is_equal_to(hashmap! {"btn".to_string() => 1_usize});
    }

    #[test]
    fn feature_resolution_is_tracked_under_the_rule_key() {
        let tracked = calls();
        let evaluator = evaluator_for("123").with_tracking_callback(recording_callback(&tracked));

        evaluator.resolve_feature("signup-button-color");
        let tracked = tracked.lock().unwrap();
        assert_that!(*tracked).has_length(1);
        assert_that!(tracked[0].0.as_str()).is_equal_to("btn");
        assert_that!(tracked[0].1.feature_id).contains_value("signup-button-color".to_string());
    }

    #[test]
    fn disabled_evaluator_returns_control_without_tracking() {
        let tracked = calls();
        let mut evaluator =
            evaluator_for("123").with_tracking_callback(recording_callback(&tracked));
        evaluator.set_enabled(false);

        let result = evaluator.run(&btn());
        assert_that!(result.variation_id).is_equal_to(0);
        assert!(!result.in_experiment);
        assert!(tracked.lock().unwrap().is_empty());
        assert!(evaluator.assigned_variations().is_empty());
    }

    #[test]
    fn all_evaluations_policy_tracks_control() {
        let tracked = calls();
        let mut evaluator = evaluator_for("123")
            .with_tracking_callback(recording_callback(&tracked))
            .with_tracking_policy(TrackingPolicy::AllEvaluations);
        evaluator.set_enabled(false);

        evaluator.run(&btn());
        assert_that!(*tracked.lock().unwrap()).has_length(1);
    }

    #[test]
    fn forced_variations_and_qa_mode() {
        let mut evaluator = evaluator_for("123");
        evaluator.set_qa_mode(true);
        assert!(!evaluator.run(&btn()).in_experiment);

        evaluator.set_forced_variations(hashmap! {"btn".to_string() => 0});
        let result = evaluator.run(&btn());
        assert!(result.in_experiment);
        assert!(!result.hash_used);
        assert_that!(result.value).is_equal_to(FeatureValue::from("blue"));
    }

    #[test]
    fn url_override() {
        let mut evaluator = evaluator_for("123");
        evaluator.set_url(Some("https://example.com/signup?btn=0".to_string()));
        assert_that!(evaluator.run(&btn()).variation_id).is_equal_to(0);

        evaluator.set_url(None);
        assert_that!(evaluator.run(&btn()).variation_id).is_equal_to(1);
    }

    #[test]
    fn changing_attributes_notifies_subscribers() {
        let notified = calls();
        let mut evaluator = evaluator_for("123");
        evaluator.subscribe(recording_subscriber(&notified));

        evaluator.run(&btn());
        evaluator.set_attributes(Attributes::from_iter([("id", "4")]));
        assert_that!(evaluator.attributes().as_map().get("id"))
            .contains_value(&AttributeValue::from("4"));
        evaluator.run(&btn());
        evaluator.run(&btn());

        let notified = notified.lock().unwrap();
        assert_that!(*notified).has_length(2);
        assert_that!(notified[1].1.variation_id).is_equal_to(0);
    }

    #[test]
    fn unsubscribed_listeners_are_not_called() {
        let notified = calls();
        let evaluator = evaluator_for("123");
        let id = evaluator.subscribe(recording_subscriber(&notified));
        assert!(evaluator.unsubscribe(id));

        evaluator.run(&btn());
        assert!(notified.lock().unwrap().is_empty());
    }

    #[test]
    fn callbacks_may_call_back_into_the_evaluator() {
        let evaluator = Arc::new(evaluator_for("123"));
        let seen = calls();
        let inner = Arc::downgrade(&evaluator);
        let sink = Arc::clone(&seen);
        evaluator.subscribe(Arc::new(move |_: &Experiment, result: &ExperimentResult| {
            if let Some(evaluator) = inner.upgrade() {
                evaluator.assigned_variations();
                evaluator.run(&btn());
            }
            sink.lock().unwrap().push(("btn".to_string(), result.clone()));
        }));

        evaluator.run(&btn());
        assert_that!(*seen.lock().unwrap()).has_length(1);
    }

    #[test]
    fn set_features_keeps_the_ledger() {
        let mut evaluator = evaluator_for("123");
        evaluator.resolve_feature("signup-button-color");
        evaluator.set_features(FeatureMap::new());

        assert_that!(evaluator.resolve_feature("signup-button-color").value)
            .is_equal_to(FeatureValue::Null);
        assert_that!(evaluator.assigned_variations().get("btn")).contains_value(&1_usize);
        assert!(evaluator.features().is_empty());
    }

    #[test]
    fn concurrent_evaluation() {
        let notified = calls();
        let evaluator = Arc::new(evaluator_for("123"));
        evaluator.subscribe(recording_subscriber(&notified));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let evaluator = Arc::clone(&evaluator);
                thread::spawn(move || {
                    for _ in 0..50 {
                        assert_eq!(
                            evaluator.resolve_feature("signup-button-color").value,
                            FeatureValue::from("green")
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_that!(*notified.lock().unwrap()).has_length(1);
    }
}
