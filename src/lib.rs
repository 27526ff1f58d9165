//! `paywall_core` is the core decision pipeline for paywall SDKs: it decides *whether*, *which*,
//! and *when* a paywall is shown, leaving rendering and storage to the host.
//!
//! # Overview
//!
//! [`Config`](config::Config) is the server-provided configuration: a set of
//! [`Trigger`](triggers::Trigger)s keyed by event name, each carrying ordered rules with variant
//! partitions, optional predicates, and occurrence limits. Individual triggers that fail to parse
//! are isolated and skipped, so a format change on the server degrades a single campaign rather
//! than the whole SDK.
//!
//! [`ConfigManager`](config_manager::ConfigManager) owns the configuration lifecycle. It fetches
//! configuration (with jittered retries), maintains the trigger table, keeps confirmed experiment
//! assignments in the host's [persistence](assignments::AssignmentPersistence) and unconfirmed
//! ones in memory, reconciles server-held assignments, and preloads paywall artifacts for assigned
//! treatments.
//!
//! [`eval`] contains the pure rule-evaluation function: given an event, the trigger table, and the
//! assignment maps, it produces a [`TriggerResult`](triggers::TriggerResult). Randomness is
//! injected, so evaluation is fully reproducible in tests.
//!
//! [`PaywallManager`](paywall_manager::PaywallManager) acquires paywall artifacts through the
//! host's [`PaywallAcquisition`](paywall_manager::PaywallAcquisition), collapsing concurrent
//! acquisitions of the same paywall into a single flight and caching successes.
//!
//! [`presentation`] is the staged request pipeline: wait for configuration, evaluate the trigger,
//! gate on subscription status, confirm the assignment, acquire the artifact, and present it on
//! the host's [`PresentationSurface`](presentation::PresentationSurface). Every request resolves
//! to exactly one terminal [`PaywallState`](presentation::PaywallState) on its stream.
//!
//! [`events`] defines the analytics events the pipeline emits. They need to be submitted to the
//! host application's analytics storage for further analysis.
//!
//! [`PaywallClient`](client::PaywallClient) ties all of the above together behind one object;
//! most hosts only need [`register`](client::PaywallClient::register) and
//! [`dismiss`](client::PaywallClient::dismiss).

#![warn(rustdoc::missing_crate_level_docs)]

pub mod assignments;
pub mod client;
pub mod config;
pub mod config_client;
pub mod config_logic;
pub mod config_manager;
pub mod eval;
pub mod events;
pub mod expression;
pub mod occurrences;
pub mod paywall_manager;
pub mod presentation;
pub mod triggers;

mod attributes;
mod error;

pub use attributes::{lookup_path, AttributesFactory, RuleAttributes};
pub use client::{Collaborators, PaywallClient};
pub use error::{Error, Result, TriggerEvaluationError};
pub use events::{AnalyticsSink, EventData, TrackedEvent};
pub use presentation::{PaywallState, SubscriptionStatus};
pub use triggers::{Experiment, Trigger, TriggerResult, Variant, VariantType};
