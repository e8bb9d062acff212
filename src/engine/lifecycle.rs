//! Per-kind lifecycle hooks invoked by state machine entry actions.
//!
//! The generic cascade in [`CaseContext`] owns transitions and criteria; the
//! hooks only add what a kind does on top of that (children for stages,
//! parameters for tasks, timer intents for timer events).

use crate::definition::{ItemKindDefinition, PlanItemType};
use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::domain::types::{PlanItemId, TimestampUtc};
use crate::engine::case::Case;
use crate::engine::context::CaseContext;
use crate::engine::stage::StageHooks;
use crate::engine::task::TaskHooks;
use crate::expression::EvaluationContext;

pub trait LifecycleHooks: Sync {
    fn create(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn start(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn suspend(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn resume(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn complete(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn terminate(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn fail(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    fn reactivate(&self, _ctx: &mut CaseContext<'_>, _id: &PlanItemId) -> Result<(), CaseError> {
        Ok(())
    }

    /// Whether discretionary items could still be planned under this item.
    fn has_discretionary_items(&self, _case: &Case, _id: &PlanItemId) -> bool {
        false
    }
}

pub struct MilestoneHooks;

impl LifecycleHooks for MilestoneHooks {}

pub struct UserEventHooks;

impl LifecycleHooks for UserEventHooks {}

/// Timer events compute their moment when created or resumed and withdraw
/// it when they leave `Available`.
pub struct TimerHooks;

impl TimerHooks {
    fn set_timer(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        let case = ctx.case();
        let Some(item) = case.item(id) else {
            return Ok(());
        };
        let trigger = match case.item_definition(item).map(|definition| &definition.kind) {
            Some(ItemKindDefinition::TimerEvent { trigger }) => trigger.clone(),
            _ => {
                return Err(CaseError::inconsistency(format!(
                    "'{}' has no timer trigger",
                    item.describe()
                )))
            }
        };
        let duration = ctx
            .services()
            .evaluators
            .duration(&trigger, &EvaluationContext::new(case, Some(item)))?;
        let moment = ctx
            .now()
            .0
            .checked_add_signed(duration)
            .map(TimestampUtc)
            .ok_or_else(|| {
                CaseError::expression(format!("timer {} is due beyond the supported calendar", id))
            })?;
        tracing::debug!("Timer {} set for {}", id, moment.to_rfc3339());
        ctx.add_event(CaseEvent::TimerSet {
            plan_item_id: id.clone(),
            moment,
        })
    }

    pub(crate) fn cancel_timer(
        &self,
        ctx: &mut CaseContext<'_>,
        id: &PlanItemId,
    ) -> Result<(), CaseError> {
        let pending = ctx
            .case()
            .item(id)
            .and_then(|item| item.pending_timer())
            .is_some();
        if !pending {
            return Ok(());
        }
        ctx.add_event(CaseEvent::TimerCanceled {
            plan_item_id: id.clone(),
        })
    }
}

impl LifecycleHooks for TimerHooks {
    fn create(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.set_timer(ctx, id)
    }

    fn resume(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.set_timer(ctx, id)
    }

    fn suspend(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.cancel_timer(ctx, id)
    }

    fn complete(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.cancel_timer(ctx, id)
    }

    fn terminate(&self, ctx: &mut CaseContext<'_>, id: &PlanItemId) -> Result<(), CaseError> {
        self.cancel_timer(ctx, id)
    }
}

pub fn hooks_for(item_type: PlanItemType) -> &'static dyn LifecycleHooks {
    match item_type {
        PlanItemType::CasePlan | PlanItemType::Stage => &StageHooks,
        PlanItemType::HumanTask | PlanItemType::ProcessTask | PlanItemType::CaseTask => {
            &TaskHooks
        }
        PlanItemType::Milestone => &MilestoneHooks,
        PlanItemType::UserEvent => &UserEventHooks,
        PlanItemType::TimerEvent => &TimerHooks,
    }
}
