//! Rule evaluation: turning an application event into a trigger outcome.
mod eval_rules;

pub use eval_rules::{evaluate_rules, RuleEvaluationOutcome};
