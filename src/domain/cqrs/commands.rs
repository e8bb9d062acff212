//! Case commands for the CQRS aggregate.
//!
//! Commands represent intent to change state. The aggregate validates commands
//! and produces events that are persisted to the event log.

use crate::definition::CaseDefinition;
use crate::domain::types::{CaseId, PlanItemId, TeamMember, TimestampUtc};
use crate::engine::state::Transition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Commands that can be executed against the case aggregate.
///
/// Plan items are referenced by id or, failing that, by the name of the most
/// recently created item carrying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseCommand {
    /// Start a new case from a definition.
    StartCase {
        case_id: CaseId,
        definition: Arc<CaseDefinition>,
        /// Values for root case-file items, keyed by item name.
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default)]
        team: Vec<TeamMember>,
        #[serde(default)]
        parent_case_id: Option<CaseId>,
        #[serde(default)]
        root_case_id: Option<CaseId>,
    },

    /// Manual transition on a plan item.
    MakePlanItemTransition {
        plan_item: String,
        transition: Transition,
    },

    /// The implementation of an active task finished.
    CompleteTask {
        plan_item: String,
        #[serde(default)]
        output: Map<String, Value>,
    },

    /// The implementation of an active task failed.
    FailTask {
        plan_item: String,
        #[serde(default)]
        output: Map<String, Value>,
    },

    /// Timer substrate callback for a timer event.
    FireTimer {
        plan_item: PlanItemId,
        moment: TimestampUtc,
    },

    /// Add a discretionary item from the planning table of `parent`.
    PlanDiscretionaryItem {
        parent: String,
        definition_id: String,
        #[serde(default)]
        plan_item_id: Option<PlanItemId>,
    },

    CreateCaseFileItem { path: String, value: Value },

    UpdateCaseFileItem { path: String, value: Value },

    ReplaceCaseFileItem { path: String, value: Value },

    DeleteCaseFileItem { path: String },

    /// Move the running case to a new definition.
    MigrateDefinition { definition: Arc<CaseDefinition> },

    AddTeamMember { member: TeamMember },

    RemoveTeamMember { user_id: String },
}

impl CaseCommand {
    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            CaseCommand::StartCase { .. } => "StartCase",
            CaseCommand::MakePlanItemTransition { .. } => "MakePlanItemTransition",
            CaseCommand::CompleteTask { .. } => "CompleteTask",
            CaseCommand::FailTask { .. } => "FailTask",
            CaseCommand::FireTimer { .. } => "FireTimer",
            CaseCommand::PlanDiscretionaryItem { .. } => "PlanDiscretionaryItem",
            CaseCommand::CreateCaseFileItem { .. } => "CreateCaseFileItem",
            CaseCommand::UpdateCaseFileItem { .. } => "UpdateCaseFileItem",
            CaseCommand::ReplaceCaseFileItem { .. } => "ReplaceCaseFileItem",
            CaseCommand::DeleteCaseFileItem { .. } => "DeleteCaseFileItem",
            CaseCommand::MigrateDefinition { .. } => "MigrateDefinition",
            CaseCommand::AddTeamMember { .. } => "AddTeamMember",
            CaseCommand::RemoveTeamMember { .. } => "RemoveTeamMember",
        }
    }
}
