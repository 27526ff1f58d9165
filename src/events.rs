use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::presentation::PresentationRequestType;

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// An application event against which triggers are evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    /// Name of the event. Triggers are keyed by this name.
    pub name: String,
    /// Event parameters, exposed to rule expressions under the `params` namespace.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// When the event occurred.
    pub created_at: Timestamp,
}

impl EventData {
    /// Create an event with the given name, no parameters, timestamped now.
    pub fn new(name: impl Into<String>) -> EventData {
        EventData {
            name: name.into(),
            parameters: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a parameter to the event.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> EventData {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Status of a presentation request at tracking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresentationRequestStatus {
    /// A paywall is about to be presented.
    Presentation,
    /// The request finished without presenting a paywall.
    NoPresentation,
}

/// Events emitted by the presentation pipeline. They need to be submitted to the host
/// application's analytics storage for further analysis.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum TrackedEvent {
    /// A presentation request reached its terminal stage.
    #[serde(rename_all = "camelCase")]
    PresentationRequest {
        /// Name of the event that triggered the request, if any.
        event_name: Option<String>,
        /// Kind of the request.
        request_type: PresentationRequestType,
        /// Whether a paywall is being presented.
        status: PresentationRequestStatus,
    },
    /// A paywall session started for a trigger/experiment pairing.
    #[serde(rename_all = "camelCase")]
    SessionActivated {
        /// Name of the event that triggered the session, if any.
        event_name: Option<String>,
        /// Identifier of the paywall driving the session.
        paywall_identifier: String,
        /// Experiment the user is enrolled in, if any.
        experiment_id: Option<String>,
    },
}

/// Sink for analytics events produced by the core. Implementations forward events to the host
/// application's analytics transport; delivery is best-effort and must not block.
pub trait AnalyticsSink: Send + Sync {
    /// Record a single event.
    fn track(&self, event: TrackedEvent);
}

/// An [`AnalyticsSink`] that discards all events.
pub struct NoopAnalyticsSink;
impl AnalyticsSink for NoopAnalyticsSink {
    fn track(&self, _event: TrackedEvent) {}
}

impl<T: Fn(TrackedEvent) + Send + Sync> AnalyticsSink for T {
    fn track(&self, event: TrackedEvent) {
        self(event);
    }
}
