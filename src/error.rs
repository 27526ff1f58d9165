use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Represents a result type for operations in the paywall SDK core.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// SDK-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK core.
///
/// `Error` is `Clone` because a single failure may need to be delivered to multiple waiters (e.g.,
/// concurrent presentation requests sharing one single-flight paywall acquisition).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Error evaluating a trigger.
    #[error(transparent)]
    TriggerEvaluation(TriggerEvaluationError),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// Configuration could not be fetched and retries are exhausted. Presentation is blocked until
    /// a fetch succeeds.
    #[error("failed to fetch configuration")]
    ConfigFetchFailed,

    /// The paywall artifact could not be acquired after the policy-determined number of retries.
    #[error("failed to acquire paywall {identifier:?}")]
    AcquisitionFailed {
        /// Identifier of the paywall that failed to load.
        identifier: String,
    },

    /// The presented event name is not registered as a trigger.
    #[error("event {event_name:?} is not registered as a trigger")]
    EventNotFound {
        /// Name of the unregistered event.
        event_name: String,
    },

    /// The requested paywall identifier is not present in the configuration.
    #[error("paywall {identifier:?} not found in configuration")]
    PaywallNotFound {
        /// Identifier of the missing paywall.
        identifier: String,
    },

    /// A paywall is already being presented. Non-retryable: the caller must dismiss the current
    /// paywall first.
    #[error("trying to present a paywall while another paywall is presented")]
    PaywallAlreadyPresented,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<TriggerEvaluationError> for Error {
    fn from(value: TriggerEvaluationError) -> Self {
        Error::TriggerEvaluation(value)
    }
}

/// Enum representing possible errors that can occur during trigger evaluation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TriggerEvaluationError {
    /// Configuration has not been fetched yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// A matched rule declares no variants, so no variant can be selected.
    #[error("rule for experiment {experiment_id:?} has no variants")]
    NoVariants {
        /// Experiment whose rule is misconfigured.
        experiment_id: String,
    },

    /// The attributes factory failed to assemble rule attributes.
    #[error("failed to build rule attributes: {reason}")]
    AttributesUnavailable {
        /// Human-readable cause.
        reason: String,
    },

    /// The occurrence store failed while counting rule occurrences.
    #[error("failed to read rule occurrences: {reason}")]
    OccurrenceStoreFailure {
        /// Human-readable cause.
        reason: String,
    },

    /// The assignment persistence failed while reading confirmed assignments.
    #[error("failed to read persisted assignments: {reason}")]
    StorageFailure {
        /// Human-readable cause.
        reason: String,
    },
}

impl TriggerEvaluationError {
    /// Return `true` if the error is a normal running condition that should be handled silently
    /// (no paywall is shown and no error is surfaced to the caller).
    pub fn is_normal(&self) -> bool {
        match self {
            TriggerEvaluationError::ConfigurationMissing => true,

            TriggerEvaluationError::NoVariants { .. }
            | TriggerEvaluationError::AttributesUnavailable { .. }
            | TriggerEvaluationError::OccurrenceStoreFailure { .. }
            | TriggerEvaluationError::StorageFailure { .. } => false,
        }
    }
}
