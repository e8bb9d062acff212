//! Live migration of a running case to a new definition.
//!
//! The plan tree is matched against the new definition before anything is
//! emitted. Events then go out in a fixed order: drops, renames, the
//! definition swap, required-rule updates and finally new children.

use crate::definition::{CaseDefinition, ItemDefinition, Rule};
use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::domain::types::PlanItemId;
use crate::engine::case::Case;
use crate::engine::context::CaseContext;
use crate::engine::stage::{self, ChildTemplate};
use crate::engine::state::State;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MigrationPlan {
    renamed: Vec<(PlanItemId, String, String)>,
    /// Descendants before their ancestors.
    dropped: Vec<PlanItemId>,
}

fn find_candidate<'a>(
    candidates: &[&'a ItemDefinition],
    definition_id: &str,
    name: &str,
) -> Option<&'a ItemDefinition> {
    candidates
        .iter()
        .find(|candidate| candidate.id == definition_id)
        .or_else(|| candidates.iter().find(|candidate| candidate.name == name))
        .copied()
}

fn plan_stage(
    case: &Case,
    stage_id: &PlanItemId,
    new_definition: &ItemDefinition,
    plan: &mut MigrationPlan,
) {
    let Some(stage) = case.item(stage_id) else {
        return;
    };
    let candidates = new_definition.migration_candidates();
    for child_id in stage.children() {
        let Some(child) = case.item(child_id) else {
            continue;
        };
        match find_candidate(&candidates, &child.definition_id, &child.name) {
            Some(found) => {
                if found.id != child.definition_id || found.name != child.name {
                    plan.renamed
                        .push((child_id.clone(), found.id.clone(), found.name.clone()));
                }
                plan_stage(case, child_id, found, plan);
            }
            None => {
                tracing::debug!("{} has no definition after migration", child.describe());
                let mut doomed = case.items.descendants(child_id);
                doomed.reverse();
                plan.dropped.extend(doomed);
                plan.dropped.push(child_id.clone());
            }
        }
    }
}

fn required_rule<'a>(definition: &'a CaseDefinition, id: &str) -> Option<&'a Rule> {
    definition
        .item(id)
        .and_then(|item| item.control.required_rule.as_ref())
}

/// Moves the case onto `definition`.
pub fn migrate_definition(
    ctx: &mut CaseContext<'_>,
    definition: Arc<CaseDefinition>,
) -> Result<(), CaseError> {
    let old_definition = Arc::clone(&ctx.case().definition);
    let case_plan_id = ctx.case().case_plan_id();
    let previous: HashMap<PlanItemId, String> = ctx
        .case()
        .items
        .iter()
        .map(|item| (item.id.clone(), item.definition_id.clone()))
        .collect();
    let mut plan = MigrationPlan::default();
    if let Some(case_plan) = ctx.case().case_plan() {
        let root = &definition.case_plan;
        if root.id != case_plan.definition_id || root.name != case_plan.name {
            plan.renamed
                .push((case_plan_id.clone(), root.id.clone(), root.name.clone()));
        }
        plan_stage(ctx.case(), &case_plan_id, root, &mut plan);
    }

    for id in &plan.dropped {
        let pending = ctx
            .case()
            .item(id)
            .and_then(|item| item.pending_timer())
            .is_some();
        if pending {
            ctx.add_event(CaseEvent::TimerCanceled {
                plan_item_id: id.clone(),
            })?;
        }
        ctx.add_event(CaseEvent::PlanItemDropped {
            plan_item_id: id.clone(),
        })?;
    }
    for (id, definition_id, name) in plan.renamed {
        ctx.add_event(CaseEvent::PlanItemMigrated {
            plan_item_id: id,
            definition_id,
            name,
        })?;
    }
    ctx.add_event(CaseEvent::CaseDefinitionMigrated {
        definition: Arc::clone(&definition),
    })?;

    let ids: Vec<PlanItemId> = ctx.case().items.ids().to_vec();
    for id in &ids {
        let Some(item) = ctx.case().item(id) else {
            continue;
        };
        let old_id = previous.get(id).unwrap_or(&item.definition_id);
        let changed = required_rule(&old_definition, old_id)
            != required_rule(&definition, &item.definition_id);
        let eligible = !item.state.is_semi_terminal() || item.state == State::Failed;
        if !changed || !eligible {
            continue;
        }
        let value = ctx.evaluate_rule(id, |control| control.required_rule.as_ref())?;
        ctx.add_event(CaseEvent::RequiredRuleEvaluated {
            plan_item_id: id.clone(),
            value,
        })?;
    }

    for stage_id in ids {
        add_new_children(ctx, &stage_id)?;
    }
    Ok(())
}

/// Instantiates definition children a started stage does not have yet.
/// Stages that have not started pick up the new children on start.
fn add_new_children(ctx: &mut CaseContext<'_>, stage_id: &PlanItemId) -> Result<(), CaseError> {
    let case = ctx.case();
    let Some(stage) = case.item(stage_id) else {
        return Ok(());
    };
    if !stage.item_type.has_children() || !stage.state.is_started() {
        return Ok(());
    }
    let Some(definition) = case.item_definition(stage) else {
        return Ok(());
    };
    let existing: Vec<&str> = stage
        .children()
        .iter()
        .filter_map(|child| case.item(child))
        .map(|child| child.definition_id.as_str())
        .collect();
    let missing: Vec<ChildTemplate> = definition
        .children()
        .iter()
        .filter(|child| !existing.contains(&child.id.as_str()))
        .map(ChildTemplate::from)
        .collect();
    for template in missing {
        tracing::debug!("Adding {} to {} after migration", template.name, stage_id);
        stage::add_child(ctx, stage_id, &template, PlanItemId::generate(), 0, false)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/migration_tests.rs"]
mod tests;
