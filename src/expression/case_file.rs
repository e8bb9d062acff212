use super::{
    compiled, parse_iso_duration, EvaluationContext, ExpressionEvaluator, PatternCell,
    CASE_FILE_LANGUAGE,
};
use crate::domain::errors::CaseError;
use chrono::Duration;
use serde_json::Value;
use std::cmp::Ordering;

const COMPARISON: &str = r"^\s*(@index|[A-Za-z0-9_\-/]+)\s*(==|!=|<=|>=|<|>)\s*(.+?)\s*$";
const OPERAND: &str = r"^\s*(@index|[A-Za-z0-9_\-/]+)\s*$";

/// Reads case-file values.
///
/// Conditions are either a bare path (truthy when the item holds a value other
/// than null, false, 0 or "") or `path <op> <json literal>`. `@index` stands
/// for the repetition index of the owning plan item. Durations read an ISO
/// string or a number of seconds from the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseFileEvaluator;

impl CaseFileEvaluator {
    fn operand(&self, name: &str, context: &EvaluationContext<'_>) -> Value {
        if name == "@index" {
            return context
                .plan_item
                .map(|item| Value::from(item.index))
                .unwrap_or(Value::Null);
        }
        context
            .case
            .case_file
            .value(name)
            .cloned()
            .unwrap_or(Value::Null)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

static OPERAND_PATTERN: PatternCell = PatternCell::new();
static COMPARISON_PATTERN: PatternCell = PatternCell::new();

impl ExpressionEvaluator for CaseFileEvaluator {
    fn language(&self) -> &'static str {
        CASE_FILE_LANGUAGE
    }

    fn evaluate_condition(
        &self,
        body: &str,
        context: &EvaluationContext<'_>,
    ) -> Result<bool, CaseError> {
        if let Some(caps) = compiled(&OPERAND_PATTERN, OPERAND)?.captures(body) {
            return Ok(truthy(&self.operand(&caps[1], context)));
        }
        let caps = compiled(&COMPARISON_PATTERN, COMPARISON)?
            .captures(body)
            .ok_or_else(|| CaseError::expression(format!("cannot parse '{}'", body)))?;
        let left = self.operand(&caps[1], context);
        let right: Value = serde_json::from_str(&caps[3]).map_err(|e| {
            CaseError::expression(format!("right operand of '{}' is not JSON: {}", body, e))
        })?;
        let ordering = compare(&left, &right);
        Ok(match &caps[2] {
            "==" => left == right,
            "!=" => left != right,
            "<" => ordering == Some(Ordering::Less),
            "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            ">" => ordering == Some(Ordering::Greater),
            ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            op => return Err(CaseError::expression(format!("unknown operator '{}'", op))),
        })
    }

    fn evaluate_duration(
        &self,
        body: &str,
        context: &EvaluationContext<'_>,
    ) -> Result<Duration, CaseError> {
        match self.operand(body.trim(), context) {
            Value::String(text) => parse_iso_duration(&text),
            Value::Number(n) => n
                .as_i64()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| CaseError::expression(format!("'{}' is not a whole number of seconds", n))),
            other => Err(CaseError::expression(format!(
                "case file item '{}' holds no duration ({})",
                body.trim(),
                other
            ))),
        }
    }
}
