use super::{parse_iso_duration, EvaluationContext, ExpressionEvaluator, CONSTANT_LANGUAGE};
use crate::domain::errors::CaseError;
use chrono::Duration;

/// Literal language: `true`, `false`, or an ISO-8601 duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantEvaluator;

impl ExpressionEvaluator for ConstantEvaluator {
    fn language(&self) -> &'static str {
        CONSTANT_LANGUAGE
    }

    fn evaluate_condition(
        &self,
        body: &str,
        _context: &EvaluationContext<'_>,
    ) -> Result<bool, CaseError> {
        match body.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CaseError::expression(format!(
                "constant condition must be true or false, got '{}'",
                other
            ))),
        }
    }

    fn evaluate_duration(
        &self,
        body: &str,
        _context: &EvaluationContext<'_>,
    ) -> Result<Duration, CaseError> {
        parse_iso_duration(body)
    }
}
