use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::bucket::VariationIndex;
use crate::experiment::{Experiment, ExperimentResult};

/// Error type returned by a failing [TrackingCallback].
pub type TrackingError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every experiment exposure, typically to forward it to an analytics pipeline.
///
/// Any closure of the form `Fn(&Experiment, &ExperimentResult) -> Result<(), TrackingError>`
/// implements this trait. Errors and panics are logged and never reach the evaluation caller.
pub trait TrackingCallback: Send + Sync {
    fn track(&self, experiment: &Experiment, result: &ExperimentResult)
        -> Result<(), TrackingError>;
}

impl<F> TrackingCallback for F
where
    F: Fn(&Experiment, &ExperimentResult) -> Result<(), TrackingError> + Send + Sync,
{
    fn track(
        &self,
        experiment: &Experiment,
        result: &ExperimentResult,
    ) -> Result<(), TrackingError> {
        self(experiment, result)
    }
}

/// A listener notified when the variation recorded for an experiment changes.
pub type Subscriber = Arc<dyn Fn(&Experiment, &ExperimentResult) + Send + Sync>;

/// Handle returned by [TrackingDispatcher::subscribe], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Which experiment evaluations count as exposures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingPolicy {
    /// Only results where the subject was placed in the experiment.
    #[default]
    Exposures,
    /// Every experiment evaluation, including control results for non-participants.
    AllEvaluations,
}

impl TrackingPolicy {
    fn tracks(&self, result: &ExperimentResult) -> bool {
        match self {
            TrackingPolicy::Exposures => result.in_experiment,
            TrackingPolicy::AllEvaluations => true,
        }
    }
}

/// Trait used by [crate::resolve_feature] and [crate::run_experiment] to hand off every
/// experiment they evaluate.
pub trait ExperimentRecorder {
    /// Record the result of one experiment evaluation.
    fn report(&self, experiment: &Experiment, result: &ExperimentResult);
}

#[derive(Default)]
struct DispatchState {
    // Experiment key to the last variation reported for it.
    ledger: HashMap<String, VariationIndex>,
    subscriptions: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

/// Fans experiment results out to the tracking callback and to change subscribers.
///
/// The tracking callback sees every result the [TrackingPolicy] admits. Subscribers only hear
/// about a result when its variation differs from the last one recorded for the same experiment
/// key. The assignment ledger lives as long as the dispatcher.
#[derive(Default)]
pub struct TrackingDispatcher {
    policy: TrackingPolicy,
    callback: Option<Arc<dyn TrackingCallback>>,
    state: Mutex<DispatchState>,
}

impl fmt::Debug for TrackingDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingDispatcher")
            .field("policy", &self.policy)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl TrackingDispatcher {
    pub fn new(policy: TrackingPolicy) -> Self {
        TrackingDispatcher {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> TrackingPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: TrackingPolicy) {
        self.policy = policy;
    }

    pub fn set_callback(&mut self, callback: Option<Arc<dyn TrackingCallback>>) {
        self.callback = callback;
    }

    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.subscriptions.push((id, subscriber));
        id
    }

    /// Removes a subscriber; returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|(existing, _)| *existing != id);
        state.subscriptions.len() != before
    }

    /// Snapshot of the last variation recorded for each experiment key.
    pub fn assigned_variations(&self) -> HashMap<String, VariationIndex> {
        self.lock().ledger.clone()
    }

    // A panicking callback cannot leave the state half-updated, since callbacks never run while
    // the lock is held.
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, experiment: &Experiment, result: &ExperimentResult) {
        let callback = match &self.callback {
            Some(callback) => callback,
            None => return,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| callback.track(experiment, result))) {
            Ok(Ok(())) => (),
            Ok(Err(e)) => error!(
                "tracking callback failed for experiment {}: {}",
                experiment.key, e
            ),
            Err(_) => error!("tracking callback panicked for experiment {}", experiment.key),
        }
    }

    fn changed_subscribers(&self, key: &str, variation_id: VariationIndex) -> Vec<Subscriber> {
        let mut state = self.lock();
        let previous = state.ledger.insert(key.to_owned(), variation_id);
        if previous == Some(variation_id) {
            return vec![];
        }
        state
            .subscriptions
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect()
    }
}

impl ExperimentRecorder for TrackingDispatcher {
    fn report(&self, experiment: &Experiment, result: &ExperimentResult) {
        if !self.policy.tracks(result) {
            debug!(
                "not tracking experiment {}: subject not in experiment",
                experiment.key
            );
            return;
        }

        self.track(experiment, result);

        // Subscribers run after the lock is released. Concurrent reports of different variations
        // for one key may therefore notify in a different order than the ledger records them;
        // the ledger holds the last write and `assigned_variations` reads it.
        for subscriber in self.changed_subscribers(&experiment.key, result.variation_id) {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(experiment, result))).is_err() {
                error!("subscriber panicked for experiment {}", experiment.key);
            }
        }
    }
}
