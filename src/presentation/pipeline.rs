//! Staged resolution of a presentation request.
//!
//! Stages run strictly in order: wait for configuration, evaluate the trigger, gate on
//! subscription status, confirm the assignment, acquire the artifact, and finally hand it to the
//! presentation surface. Every request ends with exactly one terminal [`PaywallState`] on its
//! stream (plus [`PaywallState::Closed`] later, when a presented paywall is dismissed).
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    config_client::RemoteConfigClient,
    config_manager::ConfigManager,
    events::{AnalyticsSink, PresentationRequestStatus, TrackedEvent},
    paywall_manager::{retry_count_for, PaywallAcquisition, PaywallManager},
    presentation::{
        request::{
            PaywallInfo, PaywallSkippedReason, PaywallState, PresentationInfo,
            PresentationRequest, PresentationRequestType, PresentationSurface, PresentedPaywall,
        },
        SubscriptionStatus,
    },
    triggers::TriggerResult,
    Error,
};

/// Resolves presentation requests against the configuration, assignment, and acquisition layers.
pub struct PresentationPipeline<C, A> {
    config_manager: Arc<ConfigManager<C, A>>,
    paywall_manager: Arc<PaywallManager<A>>,
    surface: Arc<dyn PresentationSurface>,
    analytics: Arc<dyn AnalyticsSink>,
    presented: Arc<PresentedPaywall>,
}

// Not derived: `C` and `A` are not `Clone`, only the `Arc`s are.
impl<C, A> Clone for PresentationPipeline<C, A> {
    fn clone(&self) -> Self {
        PresentationPipeline {
            config_manager: Arc::clone(&self.config_manager),
            paywall_manager: Arc::clone(&self.paywall_manager),
            surface: Arc::clone(&self.surface),
            analytics: Arc::clone(&self.analytics),
            presented: Arc::clone(&self.presented),
        }
    }
}

impl<C: RemoteConfigClient, A: PaywallAcquisition> PresentationPipeline<C, A> {
    pub fn new(
        config_manager: Arc<ConfigManager<C, A>>,
        paywall_manager: Arc<PaywallManager<A>>,
        surface: Arc<dyn PresentationSurface>,
        analytics: Arc<dyn AnalyticsSink>,
        presented: Arc<PresentedPaywall>,
    ) -> PresentationPipeline<C, A> {
        PresentationPipeline {
            config_manager,
            paywall_manager,
            surface,
            analytics,
            presented,
        }
    }

    /// Start resolving `request` and return the stream its terminal state will arrive on.
    ///
    /// Resolution runs detached; dropping the receiver abandons interest in the outcome but does
    /// not cancel side effects already in flight.
    pub fn request_presentation(
        &self,
        request: PresentationRequest,
    ) -> mpsc::UnboundedReceiver<PaywallState> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(request, tx).await;
        });
        rx
    }

    async fn run(self, request: PresentationRequest, tx: mpsc::UnboundedSender<PaywallState>) {
        if let Err(err) = self.config_manager.await_first_valid_config().await {
            self.track_no_presentation(&request);
            let _ = tx.send(PaywallState::PresentationError(err));
            return;
        }

        let mut confirmable = None;
        let mut unsaved_occurrence = None;
        let (identifier, experiment) = match &request.info {
            PresentationInfo::FromIdentifier { identifier, .. } => (identifier.clone(), None),
            PresentationInfo::ExplicitTrigger(event)
            | PresentationInfo::ImplicitTrigger(event) => {
                let mut outcome = self.config_manager.evaluate_event(event);
                confirmable = outcome.confirmable_assignment.take();
                unsaved_occurrence = outcome.unsaved_occurrence.take();
                match outcome.trigger_result {
                    TriggerResult::EventNotFound => {
                        self.track_no_presentation(&request);
                        let _ = tx.send(PaywallState::PresentationError(Error::EventNotFound {
                            event_name: event.name.clone(),
                        }));
                        return;
                    }
                    TriggerResult::Error(err) => {
                        self.track_no_presentation(&request);
                        let _ = tx.send(PaywallState::PresentationError(err.into()));
                        return;
                    }
                    TriggerResult::NoRuleMatch => {
                        self.track_no_presentation(&request);
                        let _ = tx.send(PaywallState::Skipped(PaywallSkippedReason::NoRuleMatch));
                        return;
                    }
                    TriggerResult::Holdout(experiment) => {
                        if self.user_is_subscribed(&request) {
                            self.track_no_presentation(&request);
                            let _ = tx.send(PaywallState::Skipped(
                                PaywallSkippedReason::UserIsSubscribed,
                            ));
                            return;
                        }
                        // Holdout enrollment still counts; the absence of a paywall is the
                        // treatment being measured.
                        if request.request_type.could_present() {
                            if let Some(assignment) = confirmable.take() {
                                self.config_manager.confirm_assignment(assignment);
                            }
                        }
                        self.track_no_presentation(&request);
                        let _ = tx.send(PaywallState::Skipped(PaywallSkippedReason::Holdout(
                            experiment,
                        )));
                        return;
                    }
                    TriggerResult::Paywall(experiment) => {
                        let Some(identifier) = experiment.variant.paywall_id.clone() else {
                            log::warn!(target: "paywall",
                                experiment_id = experiment.id;
                                "treatment variant declares no paywall");
                            self.track_no_presentation(&request);
                            let _ =
                                tx.send(PaywallState::PresentationError(Error::PaywallNotFound {
                                    identifier: experiment.variant.id.clone(),
                                }));
                            return;
                        };
                        (identifier, Some(experiment))
                    }
                }
            }
        };

        if self.user_is_subscribed(&request) {
            self.track_no_presentation(&request);
            let _ = tx.send(PaywallState::Skipped(PaywallSkippedReason::UserIsSubscribed));
            return;
        }

        if request.request_type.could_present() {
            if let Some(assignment) = confirmable.take() {
                self.config_manager.confirm_assignment(assignment);
            }
        }

        let info = PaywallInfo {
            identifier: identifier.clone(),
            experiment,
            presented_by_event_name: request.info.event_name().map(str::to_owned),
            free_trial_override: request.info.free_trial_override(),
        };

        let retry_count = retry_count_for(&request.flags.subscription_status.borrow());
        let artifact = match self.paywall_manager.get_paywall(&identifier, retry_count).await {
            Ok(artifact) => artifact,
            Err(err) => {
                // The status may have flipped while acquiring. A subscribed user who cannot load
                // a paywall is a skip, not a failure.
                self.track_no_presentation(&request);
                if self.user_is_subscribed(&request) {
                    let _ =
                        tx.send(PaywallState::Skipped(PaywallSkippedReason::UserIsSubscribed));
                } else {
                    let _ = tx.send(PaywallState::PresentationError(err));
                }
                return;
            }
        };

        if self.user_is_subscribed(&request) {
            self.track_no_presentation(&request);
            let _ = tx.send(PaywallState::Skipped(PaywallSkippedReason::UserIsSubscribed));
            return;
        }

        if !request.request_type.could_present() {
            // Result-only requests still acquire, so they report acquisition failures the same
            // way a presenting request would, then stop short of the surface.
            let _ = tx.send(PaywallState::Presented(info));
            return;
        }

        if request.request_type == PresentationRequestType::Presentation {
            if let Err(err) = self.presented.begin(info.clone(), tx.clone()) {
                self.track_no_presentation(&request);
                let _ = tx.send(PaywallState::PresentationError(err));
                return;
            }
            self.analytics.track(TrackedEvent::PresentationRequest {
                event_name: request.info.event_name().map(str::to_owned),
                request_type: request.request_type,
                status: PresentationRequestStatus::Presentation,
            });
            match self.surface.present(
                &artifact,
                &info,
                &request.overrides,
                request.presenter.as_ref(),
            ) {
                Ok(()) => {
                    self.activate_session(&request, &info);
                    if let Some(occurrence) = &unsaved_occurrence {
                        self.config_manager.record_occurrence(occurrence);
                    }
                    let _ = tx.send(PaywallState::Presented(info));
                }
                Err(err) => {
                    self.presented.abandon();
                    let _ = tx.send(PaywallState::PresentationError(err));
                }
            }
        } else {
            // GetPaywall: the host presents it itself, but the session starts now.
            self.activate_session(&request, &info);
            let _ = tx.send(PaywallState::Presented(info));
        }
    }

    fn user_is_subscribed(&self, request: &PresentationRequest) -> bool {
        if request.flags.is_debugger_launched || request.overrides.ignore_subscription_status {
            return false;
        }
        *request.flags.subscription_status.borrow() == SubscriptionStatus::Active
    }

    fn track_no_presentation(&self, request: &PresentationRequest) {
        self.analytics.track(TrackedEvent::PresentationRequest {
            event_name: request.info.event_name().map(str::to_owned),
            request_type: request.request_type,
            status: PresentationRequestStatus::NoPresentation,
        });
    }

    fn activate_session(&self, request: &PresentationRequest, info: &PaywallInfo) {
        self.analytics.track(TrackedEvent::SessionActivated {
            event_name: request.info.event_name().map(str::to_owned),
            paywall_identifier: info.identifier.clone(),
            experiment_id: info.experiment.as_ref().map(|e| e.id.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use tokio::sync::watch;

    use super::*;
    use crate::{
        assignments::{AssignmentPostback, AssignmentsResponse, InMemoryAssignmentPersistence},
        attributes::{AttributesFactory, RuleAttributes},
        config::{Config, TryParse},
        config_manager::ConfigManagerConfig,
        events::EventData,
        expression::{ExpressionEvaluator, NoScriptSandbox},
        occurrences::{InMemoryOccurrenceStore, OccurrenceStore},
        paywall_manager::PaywallArtifact,
        presentation::request::{PaywallOverrides, RequestFlags},
        triggers::{
            OccurrenceInterval, Trigger, TriggerRule, TriggerRuleOccurrence, VariantOption,
            VariantType,
        },
        Result,
    };

    struct MockConfigClient {
        config: Config,
        confirm_calls: AtomicU32,
    }

    impl RemoteConfigClient for MockConfigClient {
        async fn fetch_config(&self) -> Result<Config> {
            Ok(self.config.clone())
        }

        async fn get_assignments(&self) -> Result<AssignmentsResponse> {
            Ok(AssignmentsResponse::default())
        }

        async fn confirm_assignments(&self, _postback: AssignmentPostback) -> Result<()> {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockAcquisition {
        calls: AtomicU32,
        fail: bool,
        /// Status to flip the subscription to while acquisition is in flight.
        set_status: Option<(watch::Sender<SubscriptionStatus>, SubscriptionStatus)>,
    }

    impl MockAcquisition {
        fn ok() -> MockAcquisition {
            MockAcquisition {
                calls: AtomicU32::new(0),
                fail: false,
                set_status: None,
            }
        }
    }

    impl PaywallAcquisition for MockAcquisition {
        async fn acquire_paywall(&self, identifier: &str) -> Result<PaywallArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((sender, status)) = &self.set_status {
                sender.send_replace(*status);
            }
            if self.fail {
                return Err(Error::PaywallNotFound {
                    identifier: identifier.to_owned(),
                });
            }
            Ok(PaywallArtifact {
                identifier: identifier.to_owned(),
                contents: json!({}),
            })
        }
    }

    struct MockSurface {
        calls: AtomicU32,
        fail: bool,
    }

    impl PresentationSurface for MockSurface {
        fn present(
            &self,
            _artifact: &PaywallArtifact,
            _info: &PaywallInfo,
            _overrides: &PaywallOverrides,
            _presenter: Option<&crate::presentation::PresenterHandle>,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::PaywallAlreadyPresented);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAnalytics {
        events: std::sync::Mutex<Vec<TrackedEvent>>,
    }

    impl AnalyticsSink for RecordingAnalytics {
        fn track(&self, event: TrackedEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct TestAttributesFactory;
    impl AttributesFactory for TestAttributesFactory {
        fn make_rule_attributes(&self, _event: Option<&EventData>) -> Result<RuleAttributes> {
            Ok(json!({"user": {"id": "123"}}).as_object().unwrap().clone())
        }
    }

    struct Harness {
        pipeline: PresentationPipeline<MockConfigClient, MockAcquisition>,
        paywall_manager: Arc<PaywallManager<MockAcquisition>>,
        client: Arc<MockConfigClient>,
        presented: Arc<PresentedPaywall>,
        surface: Arc<MockSurface>,
        analytics: Arc<RecordingAnalytics>,
        occurrences: Arc<InMemoryOccurrenceStore>,
        status: watch::Sender<SubscriptionStatus>,
    }

    async fn harness(config: Config, acquisition: MockAcquisition) -> Harness {
        harness_with_surface(config, acquisition, MockSurface {
            calls: AtomicU32::new(0),
            fail: false,
        })
        .await
    }

    async fn harness_with_surface(
        config: Config,
        acquisition: MockAcquisition,
        surface: MockSurface,
    ) -> Harness {
        let (status, _) = watch::channel(SubscriptionStatus::Unknown);
        harness_with_status(config, acquisition, surface, status).await
    }

    async fn harness_with_status(
        config: Config,
        acquisition: MockAcquisition,
        surface: MockSurface,
        status: watch::Sender<SubscriptionStatus>,
    ) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let client = Arc::new(MockConfigClient {
            config,
            confirm_calls: AtomicU32::new(0),
        });
        let paywall_manager = Arc::new(PaywallManager::new(acquisition));
        let occurrences = Arc::new(InMemoryOccurrenceStore::default());
        let status_rx = status.subscribe();
        let config_manager = Arc::new(ConfigManager::new(
            Arc::clone(&client),
            Arc::clone(&paywall_manager),
            Arc::new(InMemoryAssignmentPersistence::default()),
            ExpressionEvaluator::new(Arc::new(TestAttributesFactory), Arc::new(NoScriptSandbox)),
            Arc::clone(&occurrences) as Arc<dyn OccurrenceStore>,
            status_rx,
            ConfigManagerConfig {
                should_preload: false,
                ..ConfigManagerConfig::default()
            },
        ));
        config_manager.fetch_configuration().await.unwrap();

        let surface = Arc::new(surface);
        let analytics = Arc::new(RecordingAnalytics::default());
        let presented = Arc::new(PresentedPaywall::default());
        let pipeline = PresentationPipeline::new(
            config_manager,
            Arc::clone(&paywall_manager),
            Arc::clone(&surface) as Arc<dyn PresentationSurface>,
            Arc::clone(&analytics) as Arc<dyn AnalyticsSink>,
            Arc::clone(&presented),
        );
        Harness {
            pipeline,
            paywall_manager,
            client,
            presented,
            surface,
            analytics,
            occurrences,
            status,
        }
    }

    fn request(h: &Harness, request_type: PresentationRequestType) -> PresentationRequest {
        PresentationRequest {
            info: PresentationInfo::ExplicitTrigger(EventData::new("campaign_trigger")),
            overrides: PaywallOverrides::default(),
            flags: RequestFlags {
                subscription_status: h.status.subscribe(),
                is_debugger_launched: false,
            },
            request_type,
            presenter: None,
        }
    }

    fn rule(
        variant_type: VariantType,
        paywall_id: Option<&str>,
        expression: Option<&str>,
        occurrence: Option<TriggerRuleOccurrence>,
    ) -> TriggerRule {
        TriggerRule {
            experiment_id: "exp-1".to_owned(),
            experiment_group_id: "campaign-1".to_owned(),
            variants: vec![VariantOption {
                variant_type,
                id: "v1".to_owned(),
                percentage: 100,
                paywall_id: paywall_id.map(str::to_owned),
            }],
            expression: expression.map(str::to_owned),
            expression_js: None,
            preload: Default::default(),
            occurrence,
        }
    }

    fn config_with_rule(rule: TriggerRule) -> Config {
        Config {
            built_at: None,
            triggers: vec![TryParse::Parsed(Trigger {
                event_name: "campaign_trigger".to_owned(),
                rules: vec![rule],
            })],
            preloading_disabled: Default::default(),
        }
    }

    fn treatment_config() -> Config {
        config_with_rule(rule(VariantType::Treatment, Some("pw-1"), None, None))
    }

    #[tokio::test]
    async fn holdout_is_skipped_without_acquisition() {
        let h = harness(
            config_with_rule(rule(VariantType::Holdout, None, None, None)),
            MockAcquisition::ok(),
        )
        .await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        let state = rx.recv().await.unwrap();

        let PaywallState::Skipped(PaywallSkippedReason::Holdout(experiment)) = state else {
            panic!("expected holdout skip, got {state:?}");
        };
        assert_eq!(experiment.id, "exp-1");
        assert_eq!(h.paywall_manager.acquisition.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_rule_match_is_skipped() {
        let h = harness(
            config_with_rule(rule(
                VariantType::Treatment,
                Some("pw-1"),
                Some("user.id == 'someone-else'"),
                None,
            )),
            MockAcquisition::ok(),
        )
        .await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::Skipped(PaywallSkippedReason::NoRuleMatch)
        ));
    }

    #[tokio::test]
    async fn unknown_event_is_an_error() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;

        let mut rx = h.pipeline.request_presentation(PresentationRequest {
            info: PresentationInfo::ExplicitTrigger(EventData::new("unregistered_event")),
            overrides: PaywallOverrides::default(),
            flags: RequestFlags {
                subscription_status: h.status.subscribe(),
                is_debugger_launched: false,
            },
            request_type: PresentationRequestType::Presentation,
            presenter: None,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::PresentationError(Error::EventNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn subscribed_user_is_skipped_before_acquisition() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;
        h.status.send_replace(SubscriptionStatus::Active);

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::Skipped(PaywallSkippedReason::UserIsSubscribed)
        ));
        assert_eq!(h.paywall_manager.acquisition.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ignore_subscription_override_presents_to_subscribers() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;
        h.status.send_replace(SubscriptionStatus::Active);

        let mut req = request(&h, PresentationRequestType::Presentation);
        req.overrides.ignore_subscription_status = true;
        let mut rx = h.pipeline.request_presentation(req);

        assert!(matches!(rx.recv().await.unwrap(), PaywallState::Presented(_)));
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribing_during_failed_acquisition_is_a_skip() {
        let (status, _) = watch::channel(SubscriptionStatus::Unknown);
        let acquisition = MockAcquisition {
            calls: AtomicU32::new(0),
            fail: true,
            set_status: Some((status.clone(), SubscriptionStatus::Active)),
        };
        let h = harness_with_status(
            treatment_config(),
            acquisition,
            MockSurface {
                calls: AtomicU32::new(0),
                fail: false,
            },
            status,
        )
        .await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::Skipped(PaywallSkippedReason::UserIsSubscribed)
        ));
    }

    #[tokio::test]
    async fn failed_acquisition_is_an_error_for_free_users() {
        let acquisition = MockAcquisition {
            calls: AtomicU32::new(0),
            fail: true,
            set_status: None,
        };
        let h = harness(treatment_config(), acquisition).await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::PresentationError(Error::AcquisitionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn presentation_reports_session_and_occurrence() {
        let h = harness(
            config_with_rule(rule(
                VariantType::Treatment,
                Some("pw-1"),
                None,
                Some(TriggerRuleOccurrence {
                    key: "occ".to_owned(),
                    max_count: 3,
                    interval: OccurrenceInterval::Infinity,
                }),
            )),
            MockAcquisition::ok(),
        )
        .await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        let state = rx.recv().await.unwrap();

        let PaywallState::Presented(info) = state else {
            panic!("expected presented, got {state:?}");
        };
        assert_eq!(info.identifier, "pw-1");
        assert_eq!(info.experiment.as_ref().unwrap().id, "exp-1");
        assert_eq!(info.presented_by_event_name.as_deref(), Some("campaign_trigger"));
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.occurrences
                .count_occurrences("occ", &OccurrenceInterval::Infinity)
                .unwrap(),
            1
        );

        let events = h.analytics.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            TrackedEvent::PresentationRequest {
                status: PresentationRequestStatus::Presentation,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackedEvent::SessionActivated { .. })));
        drop(events);

        // Dismissal closes the state stream.
        let dismissed = h.presented.dismiss().unwrap();
        assert_eq!(dismissed.identifier, "pw-1");
        assert!(matches!(rx.recv().await.unwrap(), PaywallState::Closed));
    }

    #[tokio::test]
    async fn second_presentation_is_rejected_while_one_is_on_screen() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;

        let mut first = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(first.recv().await.unwrap(), PaywallState::Presented(_)));

        let mut second = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(
            second.recv().await.unwrap(),
            PaywallState::PresentationError(Error::PaywallAlreadyPresented)
        ));
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_surface_frees_the_presentation_slot() {
        let h = harness_with_surface(
            treatment_config(),
            MockAcquisition::ok(),
            MockSurface {
                calls: AtomicU32::new(0),
                fail: true,
            },
        )
        .await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::Presentation));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::PresentationError(_)
        ));
        assert_eq!(h.presented.current(), None);
    }

    #[tokio::test]
    async fn result_only_request_acquires_without_confirming_or_presenting() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::GetPresentationResult));
        let state = rx.recv().await.unwrap();

        let PaywallState::Presented(info) = state else {
            panic!("expected presented, got {state:?}");
        };
        assert_eq!(info.identifier, "pw-1");
        assert_eq!(h.paywall_manager.acquisition.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.client.confirm_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn result_only_request_surfaces_acquisition_failures() {
        let acquisition = MockAcquisition {
            calls: AtomicU32::new(0),
            fail: true,
            set_status: None,
        };
        let h = harness(treatment_config(), acquisition).await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::GetPresentationResult));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PaywallState::PresentationError(Error::AcquisitionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn launched_debugger_disables_the_subscription_gate() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;
        h.status.send_replace(SubscriptionStatus::Active);

        let mut req = request(&h, PresentationRequestType::Presentation);
        req.flags.is_debugger_launched = true;
        let mut rx = h.pipeline.request_presentation(req);

        assert!(matches!(rx.recv().await.unwrap(), PaywallState::Presented(_)));
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_paywall_acquires_and_activates_session_without_presenting() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;

        let mut rx = h
            .pipeline
            .request_presentation(request(&h, PresentationRequestType::GetPaywall));
        assert!(matches!(rx.recv().await.unwrap(), PaywallState::Presented(_)));
        assert_eq!(h.paywall_manager.acquisition.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.surface.calls.load(Ordering::SeqCst), 0);

        let events = h.analytics.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackedEvent::SessionActivated { .. })));
    }

    #[tokio::test]
    async fn identifier_request_bypasses_evaluation() {
        let h = harness(treatment_config(), MockAcquisition::ok()).await;

        let mut rx = h.pipeline.request_presentation(PresentationRequest {
            info: PresentationInfo::FromIdentifier {
                identifier: "pw-direct".to_owned(),
                free_trial_override: true,
            },
            overrides: PaywallOverrides::default(),
            flags: RequestFlags {
                subscription_status: h.status.subscribe(),
                is_debugger_launched: false,
            },
            request_type: PresentationRequestType::Presentation,
            presenter: None,
        });
        let state = rx.recv().await.unwrap();

        let PaywallState::Presented(info) = state else {
            panic!("expected presented, got {state:?}");
        };
        assert_eq!(info.identifier, "pw-direct");
        assert_eq!(info.experiment, None);
        assert_eq!(info.presented_by_event_name, None);
        assert_eq!(info.free_trial_override, Some(true));
    }
}
