//! Task parameters and the complete/fail-with-output protocol.
//!
//! The work of a task happens outside the engine. The engine binds inputs from
//! the case file when the task starts and writes bound outputs back when the
//! implementation reports completion.

use crate::definition::{ItemDefinition, ParameterDefinition, TaskDefinition};
use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::domain::types::PlanItemId;
use crate::engine::case::Case;
use crate::engine::case_file_ops;
use crate::engine::context::CaseContext;
use crate::engine::lifecycle::LifecycleHooks;
use crate::engine::stage;
use crate::engine::state::{State, Transition};
use serde_json::{Map, Value};

pub struct TaskHooks;

impl TaskHooks {
    fn fill_input(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        let Some(task) = task_definition(ctx.case(), id) else {
            return Ok(());
        };
        let input = bind_input(ctx.case(), &task.inputs);
        ctx.add_event(CaseEvent::TaskInputFilled {
            plan_item_id: id.clone(),
            input,
        })
    }
}

impl LifecycleHooks for TaskHooks {
    fn start(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.fill_input(ctx, id)?;
        let blocking = task_definition(ctx.case(), id).is_none_or(|task| task.is_blocking);
        if !blocking {
            tracing::debug!("Completing non-blocking task {}", id);
            ctx.make_transition(id, Transition::Complete)?;
        }
        Ok(())
    }

    fn reactivate(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.fill_input(ctx, id)
    }

    fn has_discretionary_items(&self, case: &Case, id: &PlanItemId) -> bool {
        case.item(id)
            .is_some_and(|item| stage::table_has_items(case, item))
    }
}

fn task_definition(case: &Case, id: &PlanItemId) -> Option<TaskDefinition> {
    case.item(id)
        .and_then(|item| case.item_definition(item))
        .and_then(ItemDefinition::task)
        .cloned()
}

/// Input parameter values read from their case-file bindings. Unbound or
/// empty parameters are passed as `null`.
fn bind_input(case: &Case, parameters: &[ParameterDefinition]) -> Map<String, Value> {
    parameters
        .iter()
        .map(|parameter| {
            let value = parameter
                .binding
                .as_deref()
                .and_then(|path| case.case_file.value(path))
                .cloned()
                .unwrap_or(Value::Null);
            (parameter.name.clone(), value)
        })
        .collect()
}

/// Resolves a task reference and checks it can accept output.
fn active_task(case: &Case, reference: &str) -> Result<(PlanItemId, TaskDefinition), CaseError> {
    let item = case
        .resolve(reference)
        .ok_or_else(|| CaseError::not_found(format!("task '{}'", reference)))?;
    if !item.item_type.is_task() {
        return Err(CaseError::invalid_command(format!(
            "{} is not a task",
            item.describe()
        )));
    }
    if item.state != State::Active {
        return Err(CaseError::invalid_command(format!(
            "{} must be Active to accept output",
            item.describe()
        )));
    }
    let task = task_definition(case, &item.id)
        .ok_or_else(|| CaseError::not_found(format!("definition of {}", item.describe())))?;
    Ok((item.id.clone(), task))
}

/// Completes an active task with output, writing bound parameters into the
/// case file before the task transitions.
///
/// The Complete transition is reserved first, so sentries fired by the case
/// file writes cannot move the task elsewhere in between.
pub fn complete_task(
    ctx: &mut CaseContext<'_>,
    reference: &str,
    output: Map<String, Value>,
) -> Result<(), CaseError> {
    let (id, task) = active_task(ctx.case(), reference)?;
    let missing: Vec<&str> = task
        .outputs
        .iter()
        .filter(|parameter| parameter.required && !output.contains_key(&parameter.name))
        .map(|parameter| parameter.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(CaseError::invalid_command(format!(
            "missing required output: {}",
            missing.join(", ")
        )));
    }
    if !ctx.prepare_transition(&id, Transition::Complete) {
        return Err(CaseError::denied(format!(
            "task '{}' is already in another transition",
            id
        )));
    }
    ctx.add_event(CaseEvent::TaskOutputFilled {
        plan_item_id: id.clone(),
        output: output.clone(),
    })?;
    for parameter in &task.outputs {
        let (Some(path), Some(value)) = (parameter.binding.as_deref(), output.get(&parameter.name))
        else {
            continue;
        };
        case_file_ops::write(ctx, path, value.clone())?;
    }
    ctx.make_transition(&id, Transition::Complete)?;
    Ok(())
}

/// Moves an active task to Failed, recording whatever output was given.
pub fn fail_task(
    ctx: &mut CaseContext<'_>,
    reference: &str,
    output: Map<String, Value>,
) -> Result<(), CaseError> {
    let (id, _) = active_task(ctx.case(), reference)?;
    if !ctx.prepare_transition(&id, Transition::Fault) {
        return Err(CaseError::denied(format!(
            "task '{}' is already in another transition",
            id
        )));
    }
    ctx.add_event(CaseEvent::TaskOutputFilled {
        plan_item_id: id.clone(),
        output,
    })?;
    ctx.make_transition(&id, Transition::Fault)?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;
