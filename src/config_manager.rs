//! Owns the configuration lifecycle: fetching, assignment bookkeeping, trigger evaluation entry
//! point, and paywall preloading.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use rand::{thread_rng, Rng};
use tokio::sync::watch;

use crate::{
    assignments::{AssignmentMap, AssignmentPersistence, AssignmentPostback, AssignmentSnapshot},
    config::{Config, ConfigState},
    config_client::RemoteConfigClient,
    config_logic,
    error::TriggerEvaluationError,
    eval::{evaluate_rules, RuleEvaluationOutcome},
    events::EventData,
    expression::ExpressionEvaluator,
    occurrences::OccurrenceStore,
    paywall_manager::{retry_count_for, PaywallAcquisition, PaywallManager},
    presentation::SubscriptionStatus,
    triggers::{ConfirmableAssignment, Trigger, TriggerResult, TriggerRuleOccurrence},
    Error, Result,
};

/// Configuration for [`ConfigManager`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct ConfigManagerConfig {
    /// Number of extra fetch attempts after the first one fails with a recoverable error.
    ///
    /// Defaults to [`ConfigManagerConfig::DEFAULT_FETCH_MAX_RETRIES`].
    pub fetch_max_retries: u32,
    /// Interval to wait between fetch attempts.
    pub fetch_retry_interval: Duration,
    /// Jitter applies a randomized duration to wait between fetch attempts. This helps to avoid
    /// multiple clients synchronizing and producing spiky network load.
    pub fetch_retry_jitter: Duration,
    /// Preload paywall artifacts for assigned treatments as soon as configuration arrives.
    pub should_preload: bool,
}

impl ConfigManagerConfig {
    /// Default value for [`ConfigManagerConfig::fetch_max_retries`].
    pub const DEFAULT_FETCH_MAX_RETRIES: u32 = 6;
}

impl Default for ConfigManagerConfig {
    fn default() -> ConfigManagerConfig {
        ConfigManagerConfig {
            fetch_max_retries: ConfigManagerConfig::DEFAULT_FETCH_MAX_RETRIES,
            fetch_retry_interval: Duration::from_millis(500),
            fetch_retry_jitter: Duration::from_millis(250),
            should_preload: true,
        }
    }
}

/// The configuration manager.
///
/// Holds the fetched configuration and the trigger table derived from it, keeps confirmed
/// assignments in the host's persistence and unconfirmed ones in memory, and fans preloads out to
/// the [`PaywallManager`].
///
/// All assignment updates go through [`ConfigManager::update_assignments`], which holds one lock
/// across the read-modify-persist cycle so concurrent updates cannot interleave.
pub struct ConfigManager<C, A> {
    config_client: Arc<C>,
    paywall_manager: Arc<PaywallManager<A>>,
    persistence: Arc<dyn AssignmentPersistence>,
    evaluator: ExpressionEvaluator,
    occurrences: Arc<dyn OccurrenceStore>,
    options: ConfigManagerConfig,

    config_state: watch::Sender<ConfigState>,
    // Kept so the channel never closes and to hand out subscriptions.
    config_state_rx: watch::Receiver<ConfigState>,

    /// Trigger table keyed by event name, rebuilt on every successful fetch.
    triggers: std::sync::RwLock<HashMap<String, Trigger>>,
    /// Unconfirmed assignments. Guards the whole read-modify-persist cycle, not just this map.
    unconfirmed: std::sync::Mutex<AssignmentMap>,

    subscription_status: watch::Receiver<SubscriptionStatus>,
}

impl<C: RemoteConfigClient, A: PaywallAcquisition> ConfigManager<C, A> {
    pub fn new(
        config_client: Arc<C>,
        paywall_manager: Arc<PaywallManager<A>>,
        persistence: Arc<dyn AssignmentPersistence>,
        evaluator: ExpressionEvaluator,
        occurrences: Arc<dyn OccurrenceStore>,
        subscription_status: watch::Receiver<SubscriptionStatus>,
        options: ConfigManagerConfig,
    ) -> ConfigManager<C, A> {
        let (config_state, config_state_rx) = watch::channel(ConfigState::default());
        ConfigManager {
            config_client,
            paywall_manager,
            persistence,
            evaluator,
            occurrences,
            options,
            config_state,
            config_state_rx,
            triggers: std::sync::RwLock::new(HashMap::new()),
            unconfirmed: std::sync::Mutex::new(AssignmentMap::new()),
            subscription_status,
        }
    }

    /// Subscribe to configuration state transitions.
    pub fn config_state(&self) -> watch::Receiver<ConfigState> {
        self.config_state_rx.clone()
    }

    /// Fetch configuration, retrying recoverable errors with jittered waits in between.
    ///
    /// Unauthorized and invalid-URL errors are unrecoverable and fail the fetch immediately. Once
    /// configuration arrives, the trigger table is rebuilt, variants are drawn for unassigned
    /// experiments, server-held assignments are reconciled, and preloading starts if enabled.
    pub async fn fetch_configuration(&self) -> Result<()> {
        self.config_state.send_replace(ConfigState::Retrieving);

        let mut attempts_left = self.options.fetch_max_retries;
        let config = loop {
            match self.config_client.fetch_config().await {
                Ok(config) => break config,
                Err(err @ (Error::Unauthorized | Error::InvalidBaseUrl(_))) => {
                    self.config_state.send_replace(ConfigState::Failed(err.clone()));
                    return Err(err);
                }
                Err(err) if attempts_left == 0 => {
                    log::warn!(target: "paywall", "giving up fetching configuration: {err}");
                    self.config_state
                        .send_replace(ConfigState::Failed(Error::ConfigFetchFailed));
                    return Err(Error::ConfigFetchFailed);
                }
                Err(err) => {
                    attempts_left -= 1;
                    log::debug!(target: "paywall",
                        attempts_left;
                        "retrying configuration fetch after error: {err}");
                    self.config_state.send_replace(ConfigState::Retrying);
                    tokio::time::sleep(jitter(
                        self.options.fetch_retry_interval,
                        self.options.fetch_retry_jitter,
                    ))
                    .await;
                }
            }
        };

        self.process_config(config).await;
        Ok(())
    }

    async fn process_config(&self, config: Config) {
        let config = Arc::new(config);

        {
            let mut triggers = self
                .triggers
                .write()
                .expect("thread holding trigger table lock should not panic");
            *triggers = config_logic::triggers_by_event_name(config.valid_triggers().cloned());
        }
        // Variants are drawn before the configuration is published, so the first evaluation a
        // waiter runs already sees its assignments.
        if let Err(err) = self.choose_paywall_variants() {
            log::warn!(target: "paywall", "failed to choose paywall variants: {err}");
        }
        self.config_state
            .send_replace(ConfigState::Retrieved(Arc::clone(&config)));

        if let Err(err) = self.reconcile_server_assignments().await {
            log::debug!(target: "paywall", "could not reconcile server assignments: {err}");
        }
        if self.options.should_preload {
            self.preload_all_paywalls();
        }
    }

    /// Block until the first configuration outcome: the fetched configuration, or the error that
    /// exhausted the fetch.
    pub async fn await_first_valid_config(&self) -> Result<Arc<Config>> {
        let mut rx = self.config_state_rx.clone();
        loop {
            {
                let state = rx.borrow_and_update();
                match &*state {
                    ConfigState::Retrieved(config) => return Ok(Arc::clone(config)),
                    ConfigState::Failed(err) => return Err(err.clone()),
                    ConfigState::Retrieving | ConfigState::Retrying => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(Error::ConfigFetchFailed);
            }
        }
    }

    /// Evaluate the trigger registered for `event` against the current configuration.
    pub fn evaluate_event(&self, event: &EventData) -> RuleEvaluationOutcome {
        if self.config_state_rx.borrow().config().is_none() {
            return RuleEvaluationOutcome {
                trigger_result: TriggerResult::Error(TriggerEvaluationError::ConfigurationMissing),
                confirmable_assignment: None,
                unsaved_occurrence: None,
            };
        }
        let confirmed = match self.persistence.get_confirmed_assignments() {
            Ok(confirmed) => confirmed,
            Err(err) => {
                return RuleEvaluationOutcome {
                    trigger_result: TriggerResult::Error(
                        TriggerEvaluationError::StorageFailure {
                            reason: err.to_string(),
                        },
                    ),
                    confirmable_assignment: None,
                    unsaved_occurrence: None,
                }
            }
        };

        let triggers = self
            .triggers
            .read()
            .expect("thread holding trigger table lock should not panic");
        let mut unconfirmed = self
            .unconfirmed
            .lock()
            .expect("thread holding assignment lock should not panic");
        evaluate_rules(
            event,
            &triggers,
            &confirmed,
            &mut unconfirmed,
            &self.evaluator,
            self.occurrences.as_ref(),
            &mut thread_rng(),
        )
    }

    /// Confirm an assignment: post it to the server (best effort, detached) and move it from
    /// unconfirmed to confirmed locally.
    pub fn confirm_assignment(&self, assignment: ConfirmableAssignment) {
        let postback = AssignmentPostback::create(&assignment);
        let client = Arc::clone(&self.config_client);
        tokio::spawn(async move {
            if let Err(err) = client.confirm_assignments(postback).await {
                log::warn!(target: "paywall", "failed to post assignment confirmation: {err}");
            }
        });

        if let Err(err) = self.update_assignments(|confirmed, unconfirmed| {
            config_logic::move_assignment(&assignment, unconfirmed, confirmed)
        }) {
            log::warn!(target: "paywall",
                experiment_id = assignment.experiment_id;
                "failed to store confirmed assignment: {err}");
        }
    }

    /// Current confirmed and unconfirmed assignments.
    pub fn get_assignments(&self) -> Result<AssignmentSnapshot> {
        let unconfirmed = self
            .unconfirmed
            .lock()
            .expect("thread holding assignment lock should not panic");
        let confirmed = self.persistence.get_confirmed_assignments()?;
        Ok(AssignmentSnapshot {
            confirmed,
            unconfirmed: unconfirmed.clone(),
        })
    }

    /// Forget unconfirmed assignments, re-draw variants from the current configuration, and
    /// restart preloading. Confirmed assignments survive a reset so users keep the experiment
    /// variants already reported for them.
    pub fn reset(&self) -> Result<()> {
        {
            let mut unconfirmed = self
                .unconfirmed
                .lock()
                .expect("thread holding assignment lock should not panic");
            unconfirmed.clear();
        }
        if self.config_state_rx.borrow().config().is_none() {
            return Ok(());
        }
        self.choose_paywall_variants()?;
        if self.options.should_preload {
            self.preload_all_paywalls();
        }
        Ok(())
    }

    /// Record that a paywall for `occurrence` was actually shown.
    pub fn record_occurrence(&self, occurrence: &TriggerRuleOccurrence) {
        if let Err(err) = self.occurrences.record_occurrence(&occurrence.key) {
            log::warn!(target: "paywall",
                occurrence_key = occurrence.key;
                "failed to record rule occurrence: {err}");
        }
    }

    /// Drop the cached artifact for `identifier` so it is re-acquired next time.
    pub fn remove_paywall(&self, identifier: &str) {
        self.paywall_manager.remove_paywall(identifier);
    }

    /// Draw variants for every trigger rule that is not already confirmed.
    fn choose_paywall_variants(&self) -> Result<()> {
        let triggers = self.trigger_snapshot();
        self.update_assignments(|confirmed, _unconfirmed| {
            config_logic::choose_assignments(triggers.iter(), confirmed, &mut thread_rng())
        })
    }

    async fn reconcile_server_assignments(&self) -> Result<()> {
        let response = self.config_client.get_assignments().await?;
        let triggers = self.trigger_snapshot();
        self.update_assignments(|confirmed, unconfirmed| {
            config_logic::transfer_assignments_from_server_to_disk(
                &response,
                triggers.iter(),
                confirmed,
                unconfirmed,
            )
        })
    }

    /// Snapshot of the trigger table.
    ///
    /// Cloned out before the assignment lock is taken so no update path holds both locks;
    /// evaluation is the only place they are held together, trigger lock first.
    fn trigger_snapshot(&self) -> Vec<Trigger> {
        self.triggers
            .read()
            .expect("thread holding trigger table lock should not panic")
            .values()
            .cloned()
            .collect()
    }

    /// Apply a functional assignment update atomically.
    ///
    /// The unconfirmed lock is held across reading persisted assignments, computing the new
    /// snapshot, and writing both sides back, so no other update can interleave.
    fn update_assignments(
        &self,
        f: impl FnOnce(&AssignmentMap, &AssignmentMap) -> AssignmentSnapshot,
    ) -> Result<()> {
        let mut unconfirmed = self
            .unconfirmed
            .lock()
            .expect("thread holding assignment lock should not panic");
        let confirmed = self.persistence.get_confirmed_assignments()?;
        let snapshot = f(&confirmed, &unconfirmed);
        if snapshot.confirmed != confirmed {
            self.persistence
                .save_confirmed_assignments(snapshot.confirmed)?;
        }
        *unconfirmed = snapshot.unconfirmed;
        Ok(())
    }

    /// Preload artifacts for every assigned treatment across the configuration, honoring the
    /// configuration's preloading opt-outs.
    pub fn preload_all_paywalls(&self) {
        let Some(config) = self.config_state_rx.borrow().config().cloned() else {
            return;
        };
        let triggers =
            config_logic::filter_triggers(config.valid_triggers(), &config.preloading_disabled);
        self.preload_paywalls_for(&triggers);
    }

    /// Preload artifacts only for the triggers registered under `event_names`.
    pub fn preload_paywalls_by_names(&self, event_names: &HashSet<String>) {
        let triggers: Vec<Trigger> = {
            let table = self
                .triggers
                .read()
                .expect("thread holding trigger table lock should not panic");
            event_names
                .iter()
                .filter_map(|name| table.get(name))
                .cloned()
                .collect()
        };
        self.preload_paywalls_for(&triggers);
    }

    fn preload_paywalls_for(&self, triggers: &[Trigger]) {
        let snapshot = match self.get_assignments() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(target: "paywall", "skipping preload, assignments unavailable: {err}");
                return;
            }
        };
        let ids = config_logic::get_active_treatment_paywall_ids(
            triggers,
            &snapshot.confirmed,
            &snapshot.unconfirmed,
        );
        let retry_count = retry_count_for(&self.subscription_status.borrow());
        for id in ids {
            let manager = Arc::clone(&self.paywall_manager);
            tokio::spawn(async move {
                if let Err(err) = manager.get_paywall(&id, retry_count).await {
                    log::debug!(target: "paywall",
                        identifier = id.as_str();
                        "paywall preload failed: {err}");
                }
            });
        }
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
