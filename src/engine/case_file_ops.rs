//! Guarded content operations on case-file items.

use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::engine::case_file::CaseFile;
use crate::engine::context::CaseContext;
use crate::engine::state::{CaseFileItemState, CaseFileItemTransition};
use serde_json::Value;

fn check(
    ctx: &CaseContext<'_>,
    path: &str,
    transition: CaseFileItemTransition,
) -> Result<(), CaseError> {
    let item = ctx
        .case()
        .case_file
        .item(path)
        .ok_or_else(|| CaseError::not_found(format!("case file item '{}'", path)))?;
    if item.state != transition.required_state() {
        return Err(CaseError::denied(format!(
            "cannot {} case file item '{}' in state {}",
            transition, path, item.state
        )));
    }
    Ok(())
}

fn record(
    ctx: &mut CaseContext<'_>,
    path: &str,
    transition: CaseFileItemTransition,
    value: Option<Value>,
) -> Result<(), CaseError> {
    ctx.add_event(CaseEvent::CaseFileItemTransitioned {
        path: path.to_string(),
        transition,
        state: transition.target_state(),
        value,
    })
}

/// Creates a `Null` item. A nested item needs an available parent.
pub fn create(ctx: &mut CaseContext<'_>, path: &str, value: Value) -> Result<(), CaseError> {
    check(ctx, path, CaseFileItemTransition::Create)?;
    if let Some(parent) = CaseFile::parent(path) {
        let parent_state = ctx.case().case_file.item(parent).map(|item| item.state);
        if parent_state != Some(CaseFileItemState::Available) {
            return Err(CaseError::denied(format!(
                "cannot create '{}' before its parent '{}'",
                path, parent
            )));
        }
    }
    record(ctx, path, CaseFileItemTransition::Create, Some(value))
}

/// Merges object fields into the current value; any other value replaces it.
pub fn update(ctx: &mut CaseContext<'_>, path: &str, value: Value) -> Result<(), CaseError> {
    check(ctx, path, CaseFileItemTransition::Update)?;
    let current = ctx.case().case_file.value(path).cloned();
    record(
        ctx,
        path,
        CaseFileItemTransition::Update,
        Some(merge(current, value)),
    )
}

pub fn replace(ctx: &mut CaseContext<'_>, path: &str, value: Value) -> Result<(), CaseError> {
    check(ctx, path, CaseFileItemTransition::Replace)?;
    record(ctx, path, CaseFileItemTransition::Replace, Some(value))
}

/// Discards the item after discarding its available children.
pub fn delete(ctx: &mut CaseContext<'_>, path: &str) -> Result<(), CaseError> {
    check(ctx, path, CaseFileItemTransition::Delete)?;
    for child in ctx.case().case_file.children(path) {
        let available = ctx
            .case()
            .case_file
            .item(&child)
            .is_some_and(|item| item.state == CaseFileItemState::Available);
        if available {
            delete(ctx, &child)?;
        }
    }
    record(ctx, path, CaseFileItemTransition::Delete, None)
}

/// Writes a value the way a task output binding does: create when empty,
/// update otherwise.
pub fn write(ctx: &mut CaseContext<'_>, path: &str, value: Value) -> Result<(), CaseError> {
    let state = ctx
        .case()
        .case_file
        .item(path)
        .map(|item| item.state)
        .ok_or_else(|| CaseError::not_found(format!("case file item '{}'", path)))?;
    match state {
        CaseFileItemState::Null => create(ctx, path, value),
        CaseFileItemState::Available => update(ctx, path, value),
        CaseFileItemState::Discarded => Err(CaseError::denied(format!(
            "case file item '{}' was discarded",
            path
        ))),
    }
}

fn merge(current: Option<Value>, value: Value) -> Value {
    match (current, value) {
        (Some(Value::Object(mut base)), Value::Object(changes)) => {
            for (key, change) in changes {
                base.insert(key, change);
            }
            Value::Object(base)
        }
        (_, value) => value,
    }
}

#[cfg(test)]
#[path = "tests/case_file_ops_tests.rs"]
mod tests;
