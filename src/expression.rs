//! Evaluation of trigger rule predicates against the assembled attribute tree.
//!
//! Two dialects exist: a restricted comparison grammar (`user.id == '123'`) evaluated natively,
//! and a sandboxed scripting predicate delegated to an injected [`ScriptSandbox`]. A rule with
//! neither predicate always matches.
use std::sync::Arc;

use crate::{
    attributes::{lookup_path, AttributesFactory, RuleAttributes},
    error::TriggerEvaluationError,
    events::EventData,
    triggers::{TriggerRule, TriggerRuleOutcome, UnmatchedSource},
};

/// Evaluates a sandboxed scripting predicate against the attribute tree.
///
/// The scripting engine itself (e.g., a web-view JavaScript bridge) is a host concern. Returns
/// `Some(bool)` with the predicate's verdict, or `None` if the predicate errored or returned a
/// non-boolean; both are treated as a non-match, never as a pipeline fault.
pub trait ScriptSandbox: Send + Sync {
    /// Run the predicate source against the attributes.
    fn evaluate_predicate(&self, source: &str, attributes: &RuleAttributes) -> Option<bool>;
}

/// A [`ScriptSandbox`] for hosts without a scripting engine. Every predicate is a non-match.
pub struct NoScriptSandbox;
impl ScriptSandbox for NoScriptSandbox {
    fn evaluate_predicate(&self, _source: &str, _attributes: &RuleAttributes) -> Option<bool> {
        None
    }
}

/// Evaluates a single trigger rule's predicate.
///
/// The evaluator holds no mutable state; concurrent evaluations with different rules and
/// attributes are independent.
pub struct ExpressionEvaluator {
    factory: Arc<dyn AttributesFactory>,
    sandbox: Arc<dyn ScriptSandbox>,
}

impl ExpressionEvaluator {
    #[allow(missing_docs)]
    pub fn new(
        factory: Arc<dyn AttributesFactory>,
        sandbox: Arc<dyn ScriptSandbox>,
    ) -> ExpressionEvaluator {
        ExpressionEvaluator { factory, sandbox }
    }

    /// Evaluate `rule`'s predicate against attributes assembled for `event`.
    ///
    /// Malformed expression syntax and erroring script predicates yield
    /// `NoMatch(Expression)`; only attribute assembly failures are surfaced as errors.
    pub fn evaluate_expression(
        &self,
        rule: &TriggerRule,
        event: &EventData,
    ) -> Result<TriggerRuleOutcome, TriggerEvaluationError> {
        if rule.expression.is_none() && rule.expression_js.is_none() {
            return Ok(TriggerRuleOutcome::matched(rule));
        }

        let mut attributes = self.factory.make_rule_attributes(Some(event)).map_err(|err| {
            TriggerEvaluationError::AttributesUnavailable {
                reason: err.to_string(),
            }
        })?;
        attributes
            .entry("params")
            .or_insert_with(|| serde_json::Value::Object(event.parameters.clone()));

        let matched = if let Some(expression) = &rule.expression {
            match eval_comparison(expression, &attributes) {
                Ok(matched) => matched,
                Err(err) => {
                    log::debug!(target: "paywall",
                        expression,
                        experiment_id = rule.experiment_id;
                        "failed to parse rule expression: {err}");
                    false
                }
            }
        } else if let Some(source) = &rule.expression_js {
            self.sandbox
                .evaluate_predicate(source, &attributes)
                .unwrap_or(false)
        } else {
            unreachable!("one predicate is present, checked above")
        };

        if matched {
            Ok(TriggerRuleOutcome::matched(rule))
        } else {
            Ok(TriggerRuleOutcome::no_match(
                UnmatchedSource::Expression,
                rule.experiment_id.clone(),
            ))
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
enum ExpressionSyntaxError {
    #[error("expected exactly one `==` comparison")]
    MissingComparison,
    #[error("invalid attribute path {path:?}")]
    InvalidPath { path: String },
    #[error("invalid literal {literal:?}")]
    InvalidLiteral { literal: String },
}

/// Evaluate a `path == literal` comparison. Unknown paths compare as absent and never match.
fn eval_comparison(
    expression: &str,
    attributes: &RuleAttributes,
) -> Result<bool, ExpressionSyntaxError> {
    let (lhs, rhs) = expression
        .split_once("==")
        .ok_or(ExpressionSyntaxError::MissingComparison)?;
    if rhs.contains("==") {
        return Err(ExpressionSyntaxError::MissingComparison);
    }

    let path = lhs.trim();
    let is_valid_path = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !is_valid_path {
        return Err(ExpressionSyntaxError::InvalidPath {
            path: path.to_owned(),
        });
    }

    let literal = parse_literal(rhs.trim())?;

    let Some(value) = lookup_path(attributes, path) else {
        return Ok(false);
    };
    Ok(literal_equals(&literal, value))
}

#[derive(Debug, PartialEq)]
enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
}

fn parse_literal(raw: &str) -> Result<Literal, ExpressionSyntaxError> {
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        if (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
        {
            return Ok(Literal::String(raw[1..raw.len() - 1].to_owned()));
        }
    }
    match raw {
        "true" => return Ok(Literal::Boolean(true)),
        "false" => return Ok(Literal::Boolean(false)),
        _ => {}
    }
    if let Ok(number) = raw.parse::<f64>() {
        return Ok(Literal::Number(number));
    }
    Err(ExpressionSyntaxError::InvalidLiteral {
        literal: raw.to_owned(),
    })
}

fn literal_equals(literal: &Literal, value: &serde_json::Value) -> bool {
    match literal {
        Literal::String(s) => value.as_str() == Some(s),
        Literal::Number(n) => value.as_f64() == Some(*n),
        Literal::Boolean(b) => value.as_bool() == Some(*b),
    }
}
