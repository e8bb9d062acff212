//! Expression languages used by rules, if-parts and timer triggers.
//!
//! Evaluators are registered per language tag from a fixed table at startup.
//! An expression without a language tag uses the registry's default language.

mod case_file;
mod constant;
mod duration;

pub use case_file::CaseFileEvaluator;
pub use constant::ConstantEvaluator;
pub use duration::parse_iso_duration;

use crate::definition::{Expression, Rule};
use crate::domain::errors::CaseError;
use crate::engine::case::Case;
use crate::engine::plan_item::PlanItem;
use chrono::Duration;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const CONSTANT_LANGUAGE: &str = "constant";
pub const CASE_FILE_LANGUAGE: &str = "casefile";

/// Languages available without registration.
pub const BUILTIN_LANGUAGES: [&str; 2] = [CONSTANT_LANGUAGE, CASE_FILE_LANGUAGE];

type PatternCell = OnceLock<Result<Regex, regex::Error>>;

/// Compiles `source` once per cell and hands out the shared regex.
fn compiled(cell: &'static PatternCell, source: &str) -> Result<&'static Regex, CaseError> {
    cell.get_or_init(|| Regex::new(source))
        .as_ref()
        .map_err(|e| CaseError::expression(format!("pattern {}: {}", source, e)))
}

/// What an expression may look at.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub case: &'a Case,
    /// The item owning the rule, criterion or trigger.
    pub plan_item: Option<&'a PlanItem>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(case: &'a Case, plan_item: Option<&'a PlanItem>) -> Self {
        Self { case, plan_item }
    }
}

pub trait ExpressionEvaluator: Send + Sync {
    fn language(&self) -> &'static str;

    fn evaluate_condition(
        &self,
        body: &str,
        context: &EvaluationContext<'_>,
    ) -> Result<bool, CaseError>;

    fn evaluate_duration(
        &self,
        body: &str,
        context: &EvaluationContext<'_>,
    ) -> Result<Duration, CaseError>;
}

pub struct EvaluatorRegistry {
    evaluators: BTreeMap<&'static str, Box<dyn ExpressionEvaluator>>,
    default_language: String,
}

impl EvaluatorRegistry {
    /// Registry holding the built-in languages.
    pub fn builtin(default_language: &str) -> Result<Self, CaseError> {
        let mut registry = Self::default();
        if !registry.evaluators.contains_key(default_language) {
            return Err(CaseError::expression(format!(
                "unknown default expression language '{}'",
                default_language
            )));
        }
        registry.default_language = default_language.to_string();
        Ok(registry)
    }

    pub fn register(&mut self, evaluator: Box<dyn ExpressionEvaluator>) {
        self.evaluators.insert(evaluator.language(), evaluator);
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn languages(&self) -> Vec<&'static str> {
        self.evaluators.keys().copied().collect()
    }

    fn evaluator(&self, expression: &Expression) -> Result<&dyn ExpressionEvaluator, CaseError> {
        let language = expression
            .language
            .as_deref()
            .unwrap_or(&self.default_language);
        self.evaluators
            .get(language)
            .map(|evaluator| evaluator.as_ref())
            .ok_or_else(|| {
                CaseError::expression(format!("no evaluator for language '{}'", language))
            })
    }

    pub fn condition(
        &self,
        expression: &Expression,
        context: &EvaluationContext<'_>,
    ) -> Result<bool, CaseError> {
        self.evaluator(expression)?
            .evaluate_condition(&expression.body, context)
    }

    pub fn duration(
        &self,
        expression: &Expression,
        context: &EvaluationContext<'_>,
    ) -> Result<Duration, CaseError> {
        self.evaluator(expression)?
            .evaluate_duration(&expression.body, context)
    }

    /// Absent rule is false; a rule without condition is true.
    pub fn rule(&self, rule: Option<&Rule>, context: &EvaluationContext<'_>) -> Result<bool, CaseError> {
        match rule {
            None => Ok(false),
            Some(Rule { condition: None }) => Ok(true),
            Some(Rule {
                condition: Some(condition),
            }) => self.condition(condition, context),
        }
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            evaluators: BTreeMap::new(),
            default_language: CONSTANT_LANGUAGE.to_string(),
        };
        registry.register(Box::new(ConstantEvaluator));
        registry.register(Box::new(CaseFileEvaluator));
        registry
    }
}

impl std::fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("languages", &self.languages())
            .field("default_language", &self.default_language)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/expression_tests.rs"]
mod tests;
