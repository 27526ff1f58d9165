use std::collections::HashMap;

use rand::Rng;

use crate::{
    assignments::AssignmentMap,
    config_logic,
    error::TriggerEvaluationError,
    events::EventData,
    expression::ExpressionEvaluator,
    occurrences::OccurrenceStore,
    triggers::{
        ConfirmableAssignment, Experiment, Trigger, TriggerResult, TriggerRuleOccurrence,
        TriggerRuleOutcome, VariantType,
    },
};

/// Result of evaluating one trigger for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluationOutcome {
    /// Terminal trigger outcome.
    pub trigger_result: TriggerResult,
    /// Assignment to confirm with the backend, present when the resolved variant was not already
    /// confirmed.
    pub confirmable_assignment: Option<ConfirmableAssignment>,
    /// Occurrence to record once a paywall is actually presented.
    pub unsaved_occurrence: Option<TriggerRuleOccurrence>,
}

impl RuleEvaluationOutcome {
    fn result(trigger_result: TriggerResult) -> RuleEvaluationOutcome {
        RuleEvaluationOutcome {
            trigger_result,
            confirmable_assignment: None,
            unsaved_occurrence: None,
        }
    }
}

/// Evaluate the trigger registered for `event` and resolve the user's variant.
///
/// Rules are evaluated strictly in declaration order and the first match wins; a rule rejected by
/// its occurrence limit does not match and evaluation continues with the next rule. Freshly drawn
/// variants are placed into `unconfirmed`; `confirmed` is never modified here.
///
/// Faults (attribute assembly, occurrence store, misconfigured variants) are mapped to
/// [`TriggerResult::Error`] and logged; this function does not panic past its boundary.
pub fn evaluate_rules<R: Rng + ?Sized>(
    event: &EventData,
    triggers: &HashMap<String, Trigger>,
    confirmed: &AssignmentMap,
    unconfirmed: &mut AssignmentMap,
    evaluator: &ExpressionEvaluator,
    occurrences: &dyn OccurrenceStore,
    rng: &mut R,
) -> RuleEvaluationOutcome {
    let Some(trigger) = triggers.get(&event.name) else {
        log::trace!(target: "paywall", event_name = event.name; "event is not registered as a trigger");
        return RuleEvaluationOutcome::result(TriggerResult::EventNotFound);
    };

    for rule in &trigger.rules {
        let outcome = match evaluator.evaluate_expression(rule, event) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!(target: "paywall",
                    event_name = event.name,
                    experiment_id = rule.experiment_id;
                    "error occurred while evaluating a rule: {err}");
                return RuleEvaluationOutcome::result(TriggerResult::Error(err));
            }
        };
        let TriggerRuleOutcome::Match(_) = outcome else {
            continue;
        };

        // The expression matched; the occurrence limit decides whether the rule may fire again.
        let mut unsaved_occurrence = None;
        if let Some(occurrence) = &rule.occurrence {
            let count =
                match occurrences.count_occurrences(&occurrence.key, &occurrence.interval) {
                    Ok(count) => count,
                    Err(err) => {
                        log::warn!(target: "paywall",
                            event_name = event.name,
                            occurrence_key = occurrence.key;
                            "error occurred while counting rule occurrences: {err}");
                        return RuleEvaluationOutcome::result(TriggerResult::Error(
                            TriggerEvaluationError::OccurrenceStoreFailure {
                                reason: err.to_string(),
                            },
                        ));
                    }
                };
            if count + 1 > occurrence.max_count {
                log::trace!(target: "paywall",
                    event_name = event.name,
                    experiment_id = rule.experiment_id,
                    count;
                    "rule reached its occurrence limit");
                // Treated exactly like an expression no-match: later rules still get their turn.
                continue;
            }
            unsaved_occurrence = Some(occurrence.clone());
        }

        let (variant, was_confirmed) = if let Some(variant) = confirmed.get(&rule.experiment_id) {
            (variant.clone(), true)
        } else if let Some(variant) = unconfirmed.get(&rule.experiment_id) {
            (variant.clone(), false)
        } else {
            let Some(variant) = config_logic::choose_variant(&rule.variants, rng) else {
                return RuleEvaluationOutcome::result(TriggerResult::Error(
                    TriggerEvaluationError::NoVariants {
                        experiment_id: rule.experiment_id.clone(),
                    },
                ));
            };
            unconfirmed.insert(rule.experiment_id.clone(), variant.clone());
            (variant, false)
        };

        let experiment = Experiment {
            id: rule.experiment_id.clone(),
            group_id: rule.experiment_group_id.clone(),
            variant: variant.clone(),
        };
        let confirmable_assignment = (!was_confirmed).then(|| ConfirmableAssignment {
            experiment_id: rule.experiment_id.clone(),
            variant,
        });

        let trigger_result = match experiment.variant.variant_type {
            VariantType::Holdout => TriggerResult::Holdout(experiment),
            VariantType::Treatment => TriggerResult::Paywall(experiment),
        };
        log::trace!(target: "paywall",
            event_name = event.name,
            experiment_id = rule.experiment_id;
            "evaluated a trigger");
        return RuleEvaluationOutcome {
            trigger_result,
            confirmable_assignment,
            unsaved_occurrence,
        };
    }

    RuleEvaluationOutcome::result(TriggerResult::NoRuleMatch)
}
