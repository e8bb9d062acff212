//! Stage behavior: child instantiation, completion and discretionary planning.
//!
//! The case plan is a stage as well; it only differs in its state machine.

use crate::definition::{ItemDefinition, PlanItemType};
use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::domain::types::PlanItemId;
use crate::engine::case::Case;
use crate::engine::context::CaseContext;
use crate::engine::lifecycle::{hooks_for, LifecycleHooks};
use crate::engine::plan_item::PlanItem;
use crate::engine::state::{State, Transition};
use crate::expression::{EvaluationContext, EvaluatorRegistry};
use serde::{Deserialize, Serialize};

pub struct StageHooks;

impl LifecycleHooks for StageHooks {
    fn start(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        // Discretionary items planned while the stage was waiting go first.
        create_null_children(ctx, id)?;
        let definitions: Vec<ChildTemplate> = ctx
            .case()
            .item(id)
            .and_then(|stage| ctx.case().item_definition(stage))
            .map(|definition| definition.children().iter().map(ChildTemplate::from).collect())
            .unwrap_or_default();
        for template in definitions {
            add_child(ctx, id, &template, PlanItemId::generate(), 0, false)?;
        }
        let empty = ctx
            .case()
            .item(id)
            .is_some_and(|stage| stage.children().is_empty());
        if empty {
            tracing::debug!("{} has no children, trying completion", id);
            try_completion(ctx, id)?;
        }
        Ok(())
    }

    fn suspend(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        propagate(ctx, id, |_| Transition::ParentSuspend)
    }

    fn resume(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        propagate(ctx, id, |_| Transition::ParentResume)?;
        create_null_children(ctx, id)
    }

    fn reactivate(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        create_null_children(ctx, id)
    }

    fn terminate(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        propagate(ctx, id, |child| {
            child.state_machine().termination_transition()
        })
    }

    fn has_discretionary_items(&self, case: &Case, id: &PlanItemId) -> bool {
        let Some(stage) = case.item(id) else {
            return false;
        };
        if table_has_items(case, stage) {
            return true;
        }
        stage.children().iter().any(|child| {
            case.item(child)
                .is_some_and(|item| hooks_for(item.item_type).has_discretionary_items(case, child))
        })
    }
}

/// Owned copy of what `PlanItemCreated` needs from a definition.
pub(crate) struct ChildTemplate {
    pub definition_id: String,
    pub name: String,
    pub item_type: PlanItemType,
}

impl From<&ItemDefinition> for ChildTemplate {
    fn from(definition: &ItemDefinition) -> Self {
        Self {
            definition_id: definition.id.clone(),
            name: definition.name.clone(),
            item_type: definition.item_type(),
        }
    }
}

/// Adds a child and begins its lifecycle when the stage is already active.
pub(crate) fn add_child(
    ctx: &mut CaseContext<'_>,
    stage_id: &PlanItemId,
    template: &ChildTemplate,
    plan_item_id: PlanItemId,
    index: u32,
    discretionary: bool,
) -> Result<(), CaseError> {
    ctx.add_event(CaseEvent::PlanItemCreated {
        plan_item_id: plan_item_id.clone(),
        stage_id: Some(stage_id.clone()),
        definition_id: template.definition_id.clone(),
        name: template.name.clone(),
        item_type: template.item_type,
        index,
        discretionary,
        created_at: ctx.now(),
    })?;
    let active = ctx
        .case()
        .item(stage_id)
        .is_some_and(|stage| stage.state == State::Active);
    if active {
        ctx.make_transition(&plan_item_id, Transition::Create)?;
    }
    Ok(())
}

/// Begins the lifecycle of children that were added while the stage waited.
pub(crate) fn create_null_children(
    ctx: &mut CaseContext<'_>,
    stage_id: &PlanItemId,
) -> Result<(), CaseError> {
    let waiting: Vec<PlanItemId> = children_of(ctx.case(), stage_id)
        .into_iter()
        .filter(|child| ctx.case().item(child).is_some_and(|item| item.state.is_null()))
        .collect();
    for child in waiting {
        ctx.make_transition(&child, Transition::Create)?;
    }
    Ok(())
}

fn propagate(
    ctx: &mut CaseContext<'_>,
    stage_id: &PlanItemId,
    transition: impl Fn(&PlanItem) -> Transition,
) -> Result<(), CaseError> {
    for child in children_of(ctx.case(), stage_id) {
        let Some(next) = ctx.case().item(&child).map(&transition) else {
            continue;
        };
        ctx.make_transition(&child, next)?;
    }
    Ok(())
}

fn children_of(case: &Case, stage_id: &PlanItemId) -> Vec<PlanItemId> {
    case.item(stage_id)
        .map(|stage| stage.children().to_vec())
        .unwrap_or_default()
}

fn auto_completes(case: &Case, stage: &PlanItem) -> bool {
    case.item_definition(stage)
        .and_then(ItemDefinition::stage)
        .is_some_and(|definition| definition.auto_complete)
}

/// Decides whether a stage may complete.
///
/// No child may be active. Children that are not semi-terminal block unless
/// the stage auto-completes or completion is manual, in which case only
/// required ones block. Outside those two modes, remaining discretionary
/// items block as well.
pub fn is_completion_allowed(case: &Case, stage_id: &PlanItemId, manual: bool) -> bool {
    let Some(stage) = case.item(stage_id) else {
        return false;
    };
    let auto = auto_completes(case, stage);
    for child in stage.children().iter().filter_map(|child| case.item(child)) {
        if child.state == State::Active {
            tracing::debug!(
                "{} cannot complete: {} is still Active",
                stage.describe(),
                child.describe()
            );
            return false;
        }
        if child.state.is_semi_terminal() {
            continue;
        }
        if auto || manual {
            if child.is_required() {
                tracing::debug!(
                    "{} cannot complete: {} is required",
                    stage.describe(),
                    child.describe()
                );
                return false;
            }
        } else {
            tracing::debug!(
                "{} cannot complete: {} is not finished",
                stage.describe(),
                child.describe()
            );
            return false;
        }
    }
    if !auto && !manual && StageHooks.has_discretionary_items(case, stage_id) {
        tracing::debug!(
            "{} cannot complete: discretionary items remain",
            stage.describe()
        );
        return false;
    }
    true
}

/// Completes the stage when nothing holds it back.
pub fn try_completion(ctx: &mut CaseContext<'_>, stage_id: &PlanItemId) -> Result<(), CaseError> {
    let Some(state) = ctx.case().item(stage_id).map(|stage| stage.state) else {
        return Ok(());
    };
    if state.is_semi_terminal() {
        return Ok(());
    }
    if is_completion_allowed(ctx.case(), stage_id, false) {
        tracing::debug!("Completing {}", stage_id);
        ctx.make_transition(stage_id, Transition::Complete)?;
    }
    Ok(())
}

/// Whether an item's planning table may be used in its current state.
pub fn is_planning_allowed(item: &PlanItem) -> bool {
    use State::*;
    match item.item_type {
        PlanItemType::CasePlan => matches!(
            item.state,
            Active | Failed | Suspended | Completed | Terminated
        ),
        PlanItemType::Stage => matches!(
            item.state,
            Active | Available | Enabled | Disabled | Failed | Suspended
        ),
        PlanItemType::HumanTask => item.state == Active,
        _ => false,
    }
}

/// Planning is allowed and the item's table (or a nested one) has entries.
pub(crate) fn table_has_items(case: &Case, owner: &PlanItem) -> bool {
    is_planning_allowed(owner)
        && case
            .item_definition(owner)
            .and_then(ItemDefinition::planning_table)
            .is_some_and(|table| table.has_items())
}

/// Stage that receives items planned through `owner`'s table.
fn containing_stage<'a>(case: &'a Case, owner: &'a PlanItem) -> Option<&'a PlanItem> {
    if owner.item_type.has_children() {
        Some(owner)
    } else {
        owner.stage_id.as_ref().and_then(|stage| case.item(stage))
    }
}

/// A discretionary item that can be planned right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscretionaryItem {
    /// Stage or human task owning the planning table.
    pub parent: PlanItemId,
    pub definition_id: String,
    pub name: String,
    pub item_type: PlanItemType,
}

/// Every discretionary item of the case that is currently plannable.
pub fn plannable_items(
    case: &Case,
    evaluators: &EvaluatorRegistry,
) -> Result<Vec<DiscretionaryItem>, CaseError> {
    let mut out = Vec::new();
    for owner in case.items.iter() {
        if !is_planning_allowed(owner) {
            continue;
        }
        let Some(table) = case
            .item_definition(owner)
            .and_then(ItemDefinition::planning_table)
        else {
            continue;
        };
        for definition in table.all_items() {
            if is_applicable(case, evaluators, owner, definition)? {
                out.push(DiscretionaryItem {
                    parent: owner.id.clone(),
                    definition_id: definition.id.clone(),
                    name: definition.name.clone(),
                    item_type: definition.item_type(),
                });
            }
        }
    }
    Ok(out)
}

fn is_applicable(
    case: &Case,
    evaluators: &EvaluatorRegistry,
    owner: &PlanItem,
    definition: &ItemDefinition,
) -> Result<bool, CaseError> {
    let already_planned = containing_stage(case, owner).is_some_and(|stage| {
        stage
            .children()
            .iter()
            .filter_map(|child| case.item(child))
            .any(|child| child.name == definition.name && !child.repetition_rule_outcome)
    });
    if already_planned {
        return Ok(false);
    }
    let context = EvaluationContext::new(case, Some(owner));
    for rule in &definition.applicability_rules {
        if !evaluators.condition(rule, &context)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Plans a discretionary item from `parent`'s planning table. Returns the id
/// of the new plan item.
pub fn plan_discretionary(
    ctx: &mut CaseContext<'_>,
    parent: &str,
    definition_id: &str,
    plan_item_id: Option<PlanItemId>,
) -> Result<PlanItemId, CaseError> {
    let case = ctx.case();
    let owner = case
        .resolve(parent)
        .ok_or_else(|| CaseError::not_found(format!("plan item '{}'", parent)))?;
    let owner_id = owner.id.clone();
    let plannable = plannable_items(case, &ctx.services().evaluators)?;
    let Some(item) = plannable
        .into_iter()
        .find(|item| item.parent == owner_id && item.definition_id == definition_id)
    else {
        return Err(CaseError::invalid_command(format!(
            "'{}' cannot be planned in {}",
            definition_id,
            owner.describe()
        )));
    };
    let stage_id = containing_stage(case, owner)
        .map(|stage| stage.id.clone())
        .ok_or_else(|| CaseError::not_found(format!("stage of {}", owner.describe())))?;
    let plan_item_id = plan_item_id.unwrap_or_else(PlanItemId::generate);
    if case.items.contains(&plan_item_id) {
        return Err(CaseError::invalid_command(format!(
            "plan item '{}' already exists",
            plan_item_id
        )));
    }
    let index = case
        .item(&stage_id)
        .map(|stage| {
            stage
                .children()
                .iter()
                .filter_map(|child| case.item(child))
                .filter(|child| child.definition_id == definition_id)
                .count()
        })
        .unwrap_or(0) as u32;
    let template = ChildTemplate {
        definition_id: item.definition_id,
        name: item.name,
        item_type: item.item_type,
    };
    add_child(ctx, &stage_id, &template, plan_item_id.clone(), index, true)?;
    Ok(plan_item_id)
}

#[cfg(test)]
#[path = "tests/stage_tests.rs"]
mod tests;
