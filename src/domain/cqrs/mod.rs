//! CQRS core types for the case aggregate.
//!
//! This module contains the core CQRS types:
//! - **Commands**: Intent to change state
//! - **Events**: Facts that have happened
//! - **Aggregate**: Command validation and event application
//! - **Query**: Read-side projection and timer dispatch
//!
//! Command handling runs the engine cascade on a copy of the case and returns
//! the events it produced. Applying those events is the only way the stored
//! case changes, both live and during recovery.

pub mod commands;
pub mod events;
pub mod query;

pub use commands::CaseCommand;
pub use events::CaseEvent;
pub use query::{CaseQuery, DebugLogQuery, TimerQuery};

use crate::definition::{CaseDefinition, PlanItemType};
use crate::domain::errors::CaseError;
use crate::domain::services::CaseServices;
use crate::domain::types::{CaseId, PlanItemId, TeamMember};
use crate::engine::case::Case;
use crate::engine::context::CaseContext;
use crate::engine::state::Transition;
use crate::engine::{case_file_ops, migration, stage, task};
use async_trait::async_trait;
use cqrs_es::{Aggregate, DomainEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Case aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum CaseState {
    /// No case has been started under this id.
    #[default]
    Uninitialized,
    /// Running (or finished) case, boxed for memory efficiency.
    Active(Box<Case>),
    /// An event could not be applied; the case refuses further commands.
    Broken { reason: String },
}

/// The case aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaseAggregate {
    pub state: CaseState,
}

impl CaseAggregate {
    pub fn case(&self) -> Option<&Case> {
        match &self.state {
            CaseState::Active(case) => Some(case),
            CaseState::Uninitialized | CaseState::Broken { .. } => None,
        }
    }
}

#[async_trait]
impl Aggregate for CaseAggregate {
    type Command = CaseCommand;
    type Event = CaseEvent;
    type Error = CaseError;
    type Services = CaseServices;

    fn aggregate_type() -> String {
        "case".to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match (&self.state, command) {
            (CaseState::Broken { reason }, _) => Err(CaseError::inconsistency(reason.clone())),
            (
                CaseState::Uninitialized,
                CaseCommand::StartCase {
                    case_id,
                    definition,
                    input,
                    team,
                    parent_case_id,
                    root_case_id,
                },
            ) => start_case(
                services,
                StartCase {
                    case_id,
                    definition,
                    input,
                    team,
                    parent_case_id,
                    root_case_id,
                },
            ),
            (CaseState::Active(_), CaseCommand::StartCase { .. }) => Err(CaseError::AlreadyStarted),
            (CaseState::Uninitialized, _) => Err(CaseError::NotInitialized),
            (CaseState::Active(case), command) => {
                let name = command.name();
                let mut ctx = CaseContext::new(case.as_ref().clone(), services);
                execute(&mut ctx, command)?;
                let events = ctx.into_events();
                if events.is_empty() {
                    tracing::debug!("{} on case {} had no effect", name, case.id);
                }
                Ok(events)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        let reason = match &mut self.state {
            CaseState::Uninitialized => match Case::from_event(&event) {
                Ok(case) => {
                    self.state = CaseState::Active(Box::new(case));
                    return;
                }
                Err(err) => format!("cannot initialize case: {}", err),
            },
            CaseState::Active(case) => match case.apply_event(&event) {
                Ok(()) => return,
                Err(err) => format!("case {} cannot apply {}: {}", case.id, event.event_type(), err),
            },
            CaseState::Broken { .. } => return,
        };
        tracing::error!("{}", reason);
        self.state = CaseState::Broken { reason };
    }
}

struct StartCase {
    case_id: CaseId,
    definition: Arc<CaseDefinition>,
    input: Map<String, Value>,
    team: Vec<TeamMember>,
    parent_case_id: Option<CaseId>,
    root_case_id: Option<CaseId>,
}

fn start_case(services: &CaseServices, start: StartCase) -> Result<Vec<CaseEvent>, CaseError> {
    validate(&start.definition)?;
    let plan_item_id = PlanItemId::from(&start.case_id);
    let case_plan = &start.definition.case_plan;
    let (definition_id, name) = (case_plan.id.clone(), case_plan.name.clone());
    let first = CaseEvent::CaseDefinitionApplied {
        root_case_id: start.root_case_id.unwrap_or_else(|| start.case_id.clone()),
        case_id: start.case_id,
        case_name: start.definition.name.clone(),
        definition: Arc::clone(&start.definition),
        parent_case_id: start.parent_case_id,
        team: start.team,
        created_at: services.clock.now(),
    };
    let mut ctx = CaseContext::start(first, services)?;

    for (name, value) in start.input {
        let is_root = !name.contains('/') && ctx.case().case_file.contains(&name);
        if !is_root {
            return Err(CaseError::invalid_command(format!(
                "input '{}' is not a root case file item",
                name
            )));
        }
        case_file_ops::create(&mut ctx, &name, value)?;
    }

    ctx.add_event(CaseEvent::PlanItemCreated {
        plan_item_id: plan_item_id.clone(),
        stage_id: None,
        definition_id,
        name,
        item_type: PlanItemType::CasePlan,
        index: 0,
        discretionary: false,
        created_at: ctx.now(),
    })?;
    ctx.make_transition(&plan_item_id, Transition::Create)?;
    Ok(ctx.into_events())
}

fn validate(definition: &CaseDefinition) -> Result<(), CaseError> {
    definition
        .validate()
        .map_err(|err| CaseError::InvalidDefinition {
            message: format!("{:#}", err),
        })
}

/// Runs a command against a started case.
fn execute(ctx: &mut CaseContext<'_>, command: CaseCommand) -> Result<(), CaseError> {
    match command {
        CaseCommand::StartCase { .. } => Err(CaseError::AlreadyStarted),
        CaseCommand::MakePlanItemTransition {
            plan_item,
            transition,
        } => ctx.request_transition(&plan_item, transition).map(|_| ()),
        CaseCommand::CompleteTask { plan_item, output } => {
            task::complete_task(ctx, &plan_item, output)
        }
        CaseCommand::FailTask { plan_item, output } => task::fail_task(ctx, &plan_item, output),
        CaseCommand::FireTimer { plan_item, moment } => {
            ctx.fire_timer(plan_item.as_str(), moment).map(|_| ())
        }
        CaseCommand::PlanDiscretionaryItem {
            parent,
            definition_id,
            plan_item_id,
        } => stage::plan_discretionary(ctx, &parent, &definition_id, plan_item_id).map(|_| ()),
        CaseCommand::CreateCaseFileItem { path, value } => case_file_ops::create(ctx, &path, value),
        CaseCommand::UpdateCaseFileItem { path, value } => case_file_ops::update(ctx, &path, value),
        CaseCommand::ReplaceCaseFileItem { path, value } => {
            case_file_ops::replace(ctx, &path, value)
        }
        CaseCommand::DeleteCaseFileItem { path } => case_file_ops::delete(ctx, &path),
        CaseCommand::MigrateDefinition { definition } => {
            validate(&definition)?;
            migration::migrate_definition(ctx, definition)
        }
        CaseCommand::AddTeamMember { member } => {
            ctx.add_event(CaseEvent::TeamMemberAdded { member })
        }
        CaseCommand::RemoveTeamMember { user_id } => {
            if !ctx.case().team.iter().any(|member| member.user_id == user_id) {
                return Err(CaseError::not_found(format!("team member '{}'", user_id)));
            }
            ctx.add_event(CaseEvent::TeamMemberRemoved { user_id })
        }
    }
}

#[cfg(test)]
#[path = "../tests/aggregate_tests.rs"]
mod tests;
