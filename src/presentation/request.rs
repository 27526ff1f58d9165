//! Request and state types for paywall presentation.
use std::{any::Any, collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::{
    events::EventData,
    paywall_manager::PaywallArtifact,
    presentation::SubscriptionStatus,
    triggers::Experiment,
    Error, Result,
};

/// What the caller wants out of a presentation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresentationRequestType {
    /// Present the paywall on the host's surface.
    Presentation,
    /// Acquire the paywall and hand it back without presenting; the host presents it itself.
    GetPaywall,
    /// Compute what would happen without presenting anything.
    GetPresentationResult,
    /// Like [`GetPresentationResult`](Self::GetPresentationResult), for implicitly tracked events.
    GetImplicitPresentationResult,
}

impl PresentationRequestType {
    /// Whether this request can end with a paywall in front of the user. Assignment confirmation
    /// and session activation only happen for such requests.
    pub fn could_present(&self) -> bool {
        match self {
            PresentationRequestType::Presentation | PresentationRequestType::GetPaywall => true,
            PresentationRequestType::GetPresentationResult
            | PresentationRequestType::GetImplicitPresentationResult => false,
        }
    }
}

/// What drives the presentation: a tracked event routed through the trigger table, or a specific
/// paywall requested by identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationInfo {
    /// The host explicitly registered this event for presentation.
    ExplicitTrigger(EventData),
    /// The event was tracked implicitly (e.g., app lifecycle) and happened to match a trigger.
    ImplicitTrigger(EventData),
    /// Present the named paywall directly, bypassing trigger evaluation.
    FromIdentifier {
        #[allow(missing_docs)]
        identifier: String,
        /// Force the free-trial offer on or off for this presentation.
        free_trial_override: bool,
    },
}

impl PresentationInfo {
    /// The event behind the request, if it is trigger-driven.
    pub fn event_data(&self) -> Option<&EventData> {
        match self {
            PresentationInfo::ExplicitTrigger(event)
            | PresentationInfo::ImplicitTrigger(event) => Some(event),
            PresentationInfo::FromIdentifier { .. } => None,
        }
    }

    /// Name of the event behind the request, if any.
    pub fn event_name(&self) -> Option<&str> {
        self.event_data().map(|event| event.name.as_str())
    }

    /// The free-trial override, carried only by identifier-driven requests.
    pub fn free_trial_override(&self) -> Option<bool> {
        match self {
            PresentationInfo::FromIdentifier {
                free_trial_override,
                ..
            } => Some(*free_trial_override),
            _ => None,
        }
    }
}

/// Style the host should use when putting the paywall on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum PresentationStyle {
    Modal,
    Fullscreen,
    Push,
    Drawer,
    None,
}

/// Caller-supplied overrides applied on top of the configured paywall.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaywallOverrides {
    /// Products to substitute into the paywall, keyed by product slot name.
    pub products: HashMap<String, serde_json::Value>,
    /// Overrides the configured presentation style.
    pub presentation_style: Option<PresentationStyle>,
    /// Present even if the user is already subscribed.
    pub ignore_subscription_status: bool,
}

/// Runtime inputs a request is resolved against.
#[derive(Debug, Clone)]
pub struct RequestFlags {
    /// Live subscription status; re-read at every gate so a status change mid-request is honored.
    pub subscription_status: watch::Receiver<SubscriptionStatus>,
    /// The host's paywall debugger is on screen. Disables the subscription gate so paywalls stay
    /// inspectable for subscribed developers.
    pub is_debugger_launched: bool,
}

/// Opaque handle to the host's presenter (an activity, view controller, window).
///
/// The core never inspects it; it is carried through to the [`PresentationSurface`].
pub type PresenterHandle = Arc<dyn Any + Send + Sync>;

/// A fully described request for paywall presentation.
pub struct PresentationRequest {
    #[allow(missing_docs)]
    pub info: PresentationInfo,
    #[allow(missing_docs)]
    pub overrides: PaywallOverrides,
    #[allow(missing_docs)]
    pub flags: RequestFlags,
    #[allow(missing_docs)]
    pub request_type: PresentationRequestType,
    /// Presenter to attach the paywall to, for hosts that need one.
    pub presenter: Option<PresenterHandle>,
}

/// Why a request resolved without presenting a paywall.
#[derive(Debug, Clone, PartialEq)]
pub enum PaywallSkippedReason {
    /// The user is enrolled in the experiment's holdout group.
    Holdout(Experiment),
    /// No rule of the matched trigger applied.
    NoRuleMatch,
    /// The user already holds an active subscription.
    UserIsSubscribed,
}

/// Terminal states of a presentation request, delivered on the request's state stream.
#[derive(Debug, Clone)]
pub enum PaywallState {
    /// A paywall was resolved. For presenting request types it is on screen; for result-only types
    /// it is the paywall that would have been shown.
    Presented(PaywallInfo),
    /// The request finished without a paywall.
    Skipped(PaywallSkippedReason),
    /// The request failed.
    PresentationError(Error),
    /// The presented paywall was dismissed.
    Closed,
}

/// Everything the host needs to know about a resolved paywall.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaywallInfo {
    #[allow(missing_docs)]
    pub identifier: String,
    /// Experiment the paywall was selected by, absent for identifier-driven requests.
    pub experiment: Option<Experiment>,
    /// Name of the event that caused the presentation, if any.
    pub presented_by_event_name: Option<String>,
    /// Free-trial override requested for this presentation, if any.
    pub free_trial_override: Option<bool>,
}

/// Puts an acquired paywall artifact on screen. Implemented by the host over its UI toolkit.
pub trait PresentationSurface: Send + Sync {
    /// Present the artifact. An error means nothing was put on screen.
    fn present(
        &self,
        artifact: &PaywallArtifact,
        info: &PaywallInfo,
        overrides: &PaywallOverrides,
        presenter: Option<&PresenterHandle>,
    ) -> Result<()>;
}

struct PresentedEntry {
    info: PaywallInfo,
    state: mpsc::UnboundedSender<PaywallState>,
}

/// Tracks the single paywall that may be on screen at a time.
///
/// `begin` claims the slot before the surface is invoked; a second request while the slot is
/// occupied fails with [`Error::PaywallAlreadyPresented`]. `dismiss` releases the slot and closes
/// the presented paywall's state stream.
#[derive(Default)]
pub struct PresentedPaywall {
    current: std::sync::Mutex<Option<PresentedEntry>>,
}

impl PresentedPaywall {
    /// Claim the presentation slot for `info`.
    pub fn begin(
        &self,
        info: PaywallInfo,
        state: mpsc::UnboundedSender<PaywallState>,
    ) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .expect("thread holding presented paywall lock should not panic");
        if current.is_some() {
            return Err(Error::PaywallAlreadyPresented);
        }
        *current = Some(PresentedEntry { info, state });
        Ok(())
    }

    /// Release the slot without notifying the stream. Used when the surface fails after the slot
    /// was claimed.
    pub(crate) fn abandon(&self) {
        let mut current = self
            .current
            .lock()
            .expect("thread holding presented paywall lock should not panic");
        *current = None;
    }

    /// Dismiss the currently presented paywall, emitting [`PaywallState::Closed`] on its stream.
    ///
    /// Returns the dismissed paywall's info, or `None` if nothing was presented.
    pub fn dismiss(&self) -> Option<PaywallInfo> {
        let entry = {
            let mut current = self
                .current
                .lock()
                .expect("thread holding presented paywall lock should not panic");
            current.take()
        }?;
        // The receiver may be long gone; dismissal still succeeds.
        let _ = entry.state.send(PaywallState::Closed);
        Some(entry.info)
    }

    /// Info of the currently presented paywall, if any.
    pub fn current(&self) -> Option<PaywallInfo> {
        let current = self
            .current
            .lock()
            .expect("thread holding presented paywall lock should not panic");
        current.as_ref().map(|entry| entry.info.clone())
    }
}
