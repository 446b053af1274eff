//! `${{ ... }}` template interpolation for step commands.

use crate::trigger::TriggerParameters;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // The pattern is a literal; compilation cannot fail.
        Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").unwrap_or_else(|_| unreachable!())
    })
}

/// Values visible to step templates.
#[derive(Debug, Clone)]
pub struct InterpolationContext<'a> {
    pub trigger: &'a TriggerParameters,
    /// Merged pipeline, job, and engine variables.
    pub env: &'a BTreeMap<String, String>,
    pub job: &'a str,
}

impl<'a> InterpolationContext<'a> {
    pub fn new(
        trigger: &'a TriggerParameters,
        env: &'a BTreeMap<String, String>,
        job: &'a str,
    ) -> Self {
        Self { trigger, env, job }
    }

    /// Interpolate references in `input`.
    ///
    /// Supports:
    /// - `${{ trigger.event }}`, `${{ trigger.channel }}`, `${{ trigger.release_tag }}`
    /// - `${{ env.NAME }}`, looked up in the merged variables
    /// - `${{ job.name }}`
    ///
    /// Unknown references expand to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        template_pattern()
            .replace_all(input, |caps: &Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve(expr)
            })
            .into_owned()
    }

    fn resolve(&self, expr: &str) -> String {
        if let Some(field) = expr.strip_prefix("trigger.") {
            return self.trigger.field(field).unwrap_or_default();
        }
        if let Some(name) = expr.strip_prefix("env.") {
            return self.env.get(name).cloned().unwrap_or_default();
        }
        if expr == "job.name" {
            return self.job.to_string();
        }
        String::new()
    }
}
