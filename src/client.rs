//! The top-level paywall client, tying configuration, evaluation, acquisition, and presentation
//! together behind one object.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{mpsc, watch};

use crate::{
    assignments::{AssignmentPersistence, AssignmentSnapshot},
    attributes::AttributesFactory,
    config::ConfigState,
    config_client::RemoteConfigClient,
    config_manager::{ConfigManager, ConfigManagerConfig},
    events::{AnalyticsSink, EventData},
    expression::{ExpressionEvaluator, ScriptSandbox},
    occurrences::OccurrenceStore,
    paywall_manager::{retry_count_for, PaywallAcquisition, PaywallArtifact, PaywallManager},
    presentation::{
        PaywallInfo, PaywallOverrides, PaywallState, PresentationInfo, PresentationPipeline,
        PresentationRequest, PresentationRequestType, PresentationSurface, PresentedPaywall,
        PresenterHandle, RequestFlags, SubscriptionStatus,
    },
    triggers::{ConfirmableAssignment, TriggerResult},
    Result,
};

/// Host-provided collaborators the client is assembled from.
///
/// The config client and acquisition are generic so their futures stay concrete; everything else
/// is object-safe and shared.
pub struct Collaborators<C, A> {
    #[allow(missing_docs)]
    pub config_client: C,
    #[allow(missing_docs)]
    pub acquisition: A,
    #[allow(missing_docs)]
    pub persistence: Arc<dyn AssignmentPersistence>,
    #[allow(missing_docs)]
    pub attributes_factory: Arc<dyn AttributesFactory>,
    #[allow(missing_docs)]
    pub occurrence_store: Arc<dyn OccurrenceStore>,
    #[allow(missing_docs)]
    pub script_sandbox: Arc<dyn ScriptSandbox>,
    #[allow(missing_docs)]
    pub surface: Arc<dyn PresentationSurface>,
    #[allow(missing_docs)]
    pub analytics: Arc<dyn AnalyticsSink>,
}

/// The paywall client.
///
/// Cheap to share: hand out `Arc<PaywallClient<_, _>>` and call it from any task.
pub struct PaywallClient<C, A> {
    config_manager: Arc<ConfigManager<C, A>>,
    paywall_manager: Arc<PaywallManager<A>>,
    pipeline: PresentationPipeline<C, A>,
    presented: Arc<PresentedPaywall>,
    subscription_status: watch::Sender<SubscriptionStatus>,
    debugger_launched: AtomicBool,
}

impl<C: RemoteConfigClient, A: PaywallAcquisition> PaywallClient<C, A> {
    /// Assemble a client. Configuration is not fetched until
    /// [`fetch_configuration`](Self::fetch_configuration) is called.
    pub fn new(collaborators: Collaborators<C, A>, options: ConfigManagerConfig) -> PaywallClient<C, A> {
        let (subscription_status, status_rx) = watch::channel(SubscriptionStatus::default());
        let paywall_manager = Arc::new(PaywallManager::new(collaborators.acquisition));
        let evaluator = ExpressionEvaluator::new(
            collaborators.attributes_factory,
            collaborators.script_sandbox,
        );
        let config_manager = Arc::new(ConfigManager::new(
            Arc::new(collaborators.config_client),
            Arc::clone(&paywall_manager),
            collaborators.persistence,
            evaluator,
            collaborators.occurrence_store,
            status_rx,
            options,
        ));
        let presented = Arc::new(PresentedPaywall::default());
        let pipeline = PresentationPipeline::new(
            Arc::clone(&config_manager),
            Arc::clone(&paywall_manager),
            collaborators.surface,
            collaborators.analytics,
            Arc::clone(&presented),
        );
        PaywallClient {
            config_manager,
            paywall_manager,
            pipeline,
            presented,
            subscription_status,
            debugger_launched: AtomicBool::new(false),
        }
    }

    /// Fetch configuration from the server, retrying recoverable errors.
    pub async fn fetch_configuration(&self) -> Result<()> {
        self.config_manager.fetch_configuration().await
    }

    /// Subscribe to configuration state transitions.
    pub fn config_state(&self) -> watch::Receiver<ConfigState> {
        self.config_manager.config_state()
    }

    /// Report the user's entitlement standing. Re-read at every presentation gate.
    pub fn set_subscription_status(&self, status: SubscriptionStatus) {
        self.subscription_status.send_replace(status);
    }

    #[allow(missing_docs)]
    pub fn subscription_status(&self) -> SubscriptionStatus {
        *self.subscription_status.borrow()
    }

    /// Mark the host's paywall debugger as on or off screen. While it is on screen, presentation
    /// requests ignore the subscription gate.
    pub fn set_debugger_launched(&self, launched: bool) {
        self.debugger_launched.store(launched, Ordering::Relaxed);
    }

    /// Evaluate `event` against the trigger table without presenting anything and without
    /// confirming assignments.
    pub fn evaluate_trigger(&self, event: &EventData) -> TriggerResult {
        self.config_manager.evaluate_event(event).trigger_result
    }

    /// Submit a fully described presentation request.
    pub fn request_presentation(
        &self,
        request: PresentationRequest,
    ) -> mpsc::UnboundedReceiver<PaywallState> {
        self.pipeline.request_presentation(request)
    }

    /// Register `event` for presentation: evaluate its trigger and put the selected paywall on
    /// screen if one applies.
    pub fn register(&self, event: EventData) -> mpsc::UnboundedReceiver<PaywallState> {
        self.register_with(event, PaywallOverrides::default(), None)
    }

    /// [`register`](Self::register) with overrides and a presenter handle.
    pub fn register_with(
        &self,
        event: EventData,
        overrides: PaywallOverrides,
        presenter: Option<PresenterHandle>,
    ) -> mpsc::UnboundedReceiver<PaywallState> {
        self.request_presentation(PresentationRequest {
            info: PresentationInfo::ExplicitTrigger(event),
            overrides,
            flags: self.request_flags(),
            request_type: PresentationRequestType::Presentation,
            presenter,
        })
    }

    /// Compute what [`register`](Self::register) would do for `event` without presenting
    /// anything.
    pub fn get_presentation_result(
        &self,
        event: EventData,
    ) -> mpsc::UnboundedReceiver<PaywallState> {
        self.request_presentation(PresentationRequest {
            info: PresentationInfo::ExplicitTrigger(event),
            overrides: PaywallOverrides::default(),
            flags: self.request_flags(),
            request_type: PresentationRequestType::GetPresentationResult,
            presenter: None,
        })
    }

    /// Present the named paywall directly, bypassing trigger evaluation. `free_trial_override`
    /// forces the free-trial offer on or off for this presentation.
    pub fn present_by_identifier(
        &self,
        identifier: impl Into<String>,
        free_trial_override: bool,
    ) -> mpsc::UnboundedReceiver<PaywallState> {
        self.request_presentation(PresentationRequest {
            info: PresentationInfo::FromIdentifier {
                identifier: identifier.into(),
                free_trial_override,
            },
            overrides: PaywallOverrides::default(),
            flags: self.request_flags(),
            request_type: PresentationRequestType::Presentation,
            presenter: None,
        })
    }

    /// The acquired artifact for `identifier`, acquiring it if necessary.
    pub async fn get_paywall_artifact(&self, identifier: &str) -> Result<PaywallArtifact> {
        let retry_count = retry_count_for(&self.subscription_status.borrow());
        self.paywall_manager.get_paywall(identifier, retry_count).await
    }

    /// Confirm an assignment produced by [`evaluate_trigger`](Self::evaluate_trigger) when the
    /// host presents the outcome itself. Presentation requests confirm automatically.
    pub fn confirm_assignment(&self, assignment: ConfirmableAssignment) {
        self.config_manager.confirm_assignment(assignment)
    }

    /// Current confirmed and unconfirmed assignments.
    pub fn get_assignments(&self) -> Result<AssignmentSnapshot> {
        self.config_manager.get_assignments()
    }

    /// Forget unconfirmed assignments, re-draw variants, and restart preloading. Confirmed
    /// assignments are kept.
    pub fn reset_assignments(&self) -> Result<()> {
        self.config_manager.reset()
    }

    /// Preload artifacts for every assigned treatment.
    pub fn preload_all_paywalls(&self) {
        self.config_manager.preload_all_paywalls()
    }

    /// Preload artifacts only for the triggers registered under `event_names`.
    pub fn preload_paywalls_by_names(&self, event_names: &std::collections::HashSet<String>) {
        self.config_manager.preload_paywalls_by_names(event_names)
    }

    /// Dismiss the currently presented paywall, emitting [`PaywallState::Closed`] on its stream.
    pub fn dismiss(&self) -> Option<PaywallInfo> {
        self.presented.dismiss()
    }

    /// Info of the currently presented paywall, if any.
    pub fn presented_paywall(&self) -> Option<PaywallInfo> {
        self.presented.current()
    }

    fn request_flags(&self) -> RequestFlags {
        RequestFlags {
            subscription_status: self.subscription_status.subscribe(),
            is_debugger_launched: self.debugger_launched.load(Ordering::Relaxed),
        }
    }
}
