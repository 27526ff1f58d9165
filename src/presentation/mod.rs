//! Presentation requests and the pipeline that resolves them into paywall states.
use serde::{Deserialize, Serialize};

mod pipeline;
mod request;

pub use pipeline::PresentationPipeline;
pub use request::{
    PaywallInfo, PaywallOverrides, PaywallSkippedReason, PaywallState, PresentationInfo,
    PresentationRequest, PresentationRequestType, PresentationStyle, PresentationSurface,
    PresentedPaywall, PresenterHandle, RequestFlags,
};

/// Entitlement standing of the current user, as reported by the host.
///
/// `Unknown` is treated as not subscribed: the pipeline would rather present to a subscriber than
/// silently drop a paywall for a free user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// The user holds an active subscription.
    Active,
    /// The user holds no active subscription.
    Inactive,
    /// The host has not reported a status yet.
    #[default]
    Unknown,
}
