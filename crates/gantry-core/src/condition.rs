//! Job condition predicates over trigger parameters.
//!
//! Conditions are written as small expressions:
//!
//! ```text
//! ${{ trigger.event }} == release
//! ${{ trigger.channel }} != nightly && ${{ trigger.event }} == push
//! ${{ trigger.is_release }}
//! ```
//!
//! `&&` binds tighter than `||`; parentheses are not supported. Operands are
//! either `${{ trigger.<field> }}` references or literals (bare or quoted).

use crate::trigger::TriggerParameters;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const TRIGGER_FIELDS: &[&str] = &[
    "event",
    "channel",
    "toolchain",
    "release_tag",
    "tag",
    "is_release",
];

/// Condition as declared on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ConditionExpression {
    Simple(String),
    Structured {
        #[serde(rename = "if", default)]
        if_expr: Option<String>,
        #[serde(default)]
        unless: Option<String>,
    },
}

impl ConditionExpression {
    /// Shorthand for `if: <expr>`.
    pub fn when(expr: impl Into<String>) -> Self {
        ConditionExpression::Simple(expr.into())
    }

    /// Parse the expression(s) into an evaluable predicate.
    pub fn compile(&self) -> Result<CompiledCondition, String> {
        match self {
            ConditionExpression::Simple(expr) => Ok(CompiledCondition {
                if_pred: Some(Predicate::parse(expr)?),
                unless_pred: None,
            }),
            ConditionExpression::Structured { if_expr, unless } => Ok(CompiledCondition {
                if_pred: if_expr.as_deref().map(Predicate::parse).transpose()?,
                unless_pred: unless.as_deref().map(Predicate::parse).transpose()?,
            }),
        }
    }
}

/// A validated condition, ready to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledCondition {
    if_pred: Option<Predicate>,
    unless_pred: Option<Predicate>,
}

impl CompiledCondition {
    /// A condition that always holds.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn evaluate(&self, params: &TriggerParameters) -> bool {
        if let Some(pred) = &self.if_pred
            && !pred.evaluate(params)
        {
            return false;
        }
        if let Some(pred) = &self.unless_pred
            && pred.evaluate(params)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Trigger(String),
    Literal(String),
}

impl Operand {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("missing operand".to_string());
        }

        if let Some(inner) = raw.strip_prefix("${{") {
            let inner = inner
                .strip_suffix("}}")
                .ok_or_else(|| format!("unterminated reference in '{raw}'"))?
                .trim();
            let field = inner
                .strip_prefix("trigger.")
                .ok_or_else(|| format!("unknown reference '{inner}', expected trigger.<field>"))?;
            if !TRIGGER_FIELDS.contains(&field) {
                return Err(format!("unknown trigger field '{field}'"));
            }
            return Ok(Operand::Trigger(field.to_string()));
        }

        for quote in ['\'', '"'] {
            if let Some(inner) = raw.strip_prefix(quote) {
                let inner = inner
                    .strip_suffix(quote)
                    .ok_or_else(|| format!("unterminated string {raw}"))?;
                return Ok(Operand::Literal(inner.to_string()));
            }
        }

        if raw.contains("${{") || raw.contains("}}") || raw.contains(char::is_whitespace) {
            return Err(format!("invalid operand '{raw}'"));
        }
        Ok(Operand::Literal(raw.to_string()))
    }

    fn resolve(&self, params: &TriggerParameters) -> String {
        match self {
            Operand::Trigger(field) => params.field(field).unwrap_or_default(),
            Operand::Literal(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Truthy(Operand),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    fn parse(expr: &str) -> Result<Self, String> {
        if expr.trim().is_empty() {
            return Err("empty condition".to_string());
        }

        let alternatives = expr
            .split("||")
            .map(|alt| {
                let terms = alt
                    .split("&&")
                    .map(Self::parse_comparison)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(collapse(terms, Predicate::And))
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(collapse(alternatives, Predicate::Or))
    }

    fn parse_comparison(term: &str) -> Result<Self, String> {
        if let Some((left, right)) = term.split_once("==") {
            return Ok(Predicate::Eq(Operand::parse(left)?, Operand::parse(right)?));
        }
        if let Some((left, right)) = term.split_once("!=") {
            return Ok(Predicate::Ne(Operand::parse(left)?, Operand::parse(right)?));
        }
        Ok(Predicate::Truthy(Operand::parse(term)?))
    }

    fn evaluate(&self, params: &TriggerParameters) -> bool {
        match self {
            Predicate::Truthy(op) => op.resolve(params) == "true",
            Predicate::Eq(l, r) => l.resolve(params) == r.resolve(params),
            Predicate::Ne(l, r) => l.resolve(params) != r.resolve(params),
            Predicate::And(terms) => terms.iter().all(|t| t.evaluate(params)),
            Predicate::Or(terms) => terms.iter().any(|t| t.evaluate(params)),
        }
    }
}

fn collapse(mut terms: Vec<Predicate>, wrap: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        wrap(terms)
    }
}
