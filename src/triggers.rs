use serde::{Deserialize, Serialize};

use crate::error::TriggerEvaluationError;

/// Identifier of an experiment. A trigger rule resolves to exactly one experiment.
pub type ExperimentId = String;

/// A named hook point tied to an application event, bearing ordered targeting rules.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Event name this trigger fires on. Unique within a configuration.
    pub event_name: String,
    /// Targeting rules, evaluated in declaration order. First match wins.
    pub rules: Vec<TriggerRule>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct TriggerRule {
    pub experiment_id: ExperimentId,
    pub experiment_group_id: String,
    /// Variant options partitioning the 0-100 percentage space. Must be non-empty.
    pub variants: Vec<VariantOption>,
    /// Comparison-grammar predicate. At most one of `expression`/`expression_js` is used; if both
    /// are absent the rule always matches.
    #[serde(default)]
    pub expression: Option<String>,
    /// Sandboxed scripting predicate.
    #[serde(default)]
    pub expression_js: Option<String>,
    #[serde(default)]
    pub preload: TriggerPreload,
    /// Occurrence limit for this rule, if any.
    #[serde(default)]
    pub occurrence: Option<TriggerRuleOccurrence>,
}

/// Preload policy attached to a trigger rule.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPreload {
    /// When the referenced paywall should be preloaded.
    pub behavior: PreloadBehavior,
    /// Whether the rule must be re-evaluated (and its cached paywall dropped) before each
    /// presentation.
    #[serde(default)]
    pub requires_re_evaluation: bool,
}

impl Default for TriggerPreload {
    fn default() -> TriggerPreload {
        TriggerPreload {
            behavior: PreloadBehavior::Always,
            requires_re_evaluation: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum PreloadBehavior {
    Always,
    Campaign,
    Event,
}

/// One entry in a rule's variant partition.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantOption {
    /// Whether this slot is a holdout or shows a paywall.
    #[serde(rename = "variantType")]
    pub variant_type: VariantType,
    /// Identifier of the variant.
    pub id: String,
    /// Share of the 0-100 percentage space occupied by this variant.
    pub percentage: u8,
    /// Paywall shown when this variant is a treatment. May be absent for holdouts.
    #[serde(default)]
    pub paywall_id: Option<String>,
}

impl VariantOption {
    /// Convert the wire option into a resolved [`Variant`].
    pub fn to_variant(&self) -> Variant {
        Variant {
            id: self.id.clone(),
            variant_type: self.variant_type,
            paywall_id: self.paywall_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum VariantType {
    Holdout,
    Treatment,
}

/// A variant assigned to the user for one experiment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub variant_type: VariantType,
    /// Paywall to show when this variant is a treatment.
    pub paywall_id: Option<String>,
}

/// A trigger rule's resolved (id, variant) pairing for one user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    #[allow(missing_docs)]
    pub id: ExperimentId,
    /// Campaign/group the experiment belongs to.
    pub group_id: String,
    /// The variant the user was assigned.
    pub variant: Variant,
}

/// A variant selection pending confirmation to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmableAssignment {
    #[allow(missing_docs)]
    pub experiment_id: ExperimentId,
    #[allow(missing_docs)]
    pub variant: Variant,
}

/// Occurrence limit declared on a trigger rule. The rule stops matching once the event has fired
/// `max_count` times within `interval`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRuleOccurrence {
    /// Key under which occurrences are counted.
    pub key: String,
    /// Maximum number of matches allowed within the interval.
    pub max_count: u32,
    /// Window over which occurrences are counted.
    pub interval: OccurrenceInterval,
}

/// Counting window for an occurrence limit: either unbounded or the trailing `minutes`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum OccurrenceInterval {
    /// Count all occurrences ever recorded.
    Infinity,
    /// Count occurrences within the trailing window of `minutes`.
    Minutes {
        #[allow(missing_docs)]
        minutes: u64,
    },
}

/// Terminal output of rule evaluation for one trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerResult {
    /// The event name is not registered as a trigger.
    EventNotFound,
    /// No rule of the trigger matched the event.
    NoRuleMatch,
    /// A rule matched and the assigned variant shows a paywall.
    Paywall(Experiment),
    /// A rule matched but the user is held out from seeing a paywall.
    Holdout(Experiment),
    /// Evaluation failed. Faults never escape the evaluation boundary as panics.
    Error(TriggerEvaluationError),
}

/// Intermediate per-rule result of expression/occurrence evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerRuleOutcome {
    #[allow(missing_docs)]
    Match(MatchedItem),
    #[allow(missing_docs)]
    NoMatch(UnmatchedRule),
}

impl TriggerRuleOutcome {
    /// Construct a match outcome for the given rule.
    pub fn matched(rule: &TriggerRule) -> TriggerRuleOutcome {
        TriggerRuleOutcome::Match(MatchedItem { rule: rule.clone() })
    }

    /// Construct a no-match outcome attributed to `source`.
    pub fn no_match(source: UnmatchedSource, experiment_id: impl Into<ExperimentId>) -> TriggerRuleOutcome {
        TriggerRuleOutcome::NoMatch(UnmatchedRule {
            source,
            experiment_id: experiment_id.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct MatchedItem {
    pub rule: TriggerRule,
}

#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct UnmatchedRule {
    pub source: UnmatchedSource,
    pub experiment_id: ExperimentId,
}

/// Which check failed for an unmatched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum UnmatchedSource {
    Expression,
    Occurrence,
}
