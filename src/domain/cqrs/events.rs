//! Case events for the CQRS aggregate.
//!
//! Events represent facts that have happened. They are the single source of truth
//! for case state and are persisted to the event log. Applying them in order
//! to an empty case reproduces the live case exactly.

use crate::definition::{CaseDefinition, PlanItemType};
use crate::domain::types::{CaseId, PlanItemId, TeamMember, TimestampUtc};
use crate::engine::state::{CaseFileItemState, CaseFileItemTransition, State, Transition};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Events emitted by the case aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseEvent {
    /// Case was started with a definition.
    CaseDefinitionApplied {
        case_id: CaseId,
        case_name: String,
        definition: Arc<CaseDefinition>,
        parent_case_id: Option<CaseId>,
        root_case_id: CaseId,
        team: Vec<TeamMember>,
        created_at: TimestampUtc,
    },

    /// A plan item was instantiated in a stage (or as the case plan).
    PlanItemCreated {
        plan_item_id: PlanItemId,
        stage_id: Option<PlanItemId>,
        definition_id: String,
        name: String,
        item_type: PlanItemType,
        index: u32,
        discretionary: bool,
        created_at: TimestampUtc,
    },

    /// A plan item moved through its state machine.
    PlanItemTransitioned {
        plan_item_id: PlanItemId,
        transition: Transition,
        state: State,
        history_state: State,
    },

    /// Repetition rule outcome changed (or was first evaluated).
    RepetitionRuleEvaluated { plan_item_id: PlanItemId, value: bool },

    /// Required rule outcome changed (or was first evaluated).
    RequiredRuleEvaluated { plan_item_id: PlanItemId, value: bool },

    /// A case-file item was created, updated, replaced or deleted.
    CaseFileItemTransitioned {
        path: String,
        transition: CaseFileItemTransition,
        state: CaseFileItemState,
        value: Option<Value>,
    },

    /// Task input parameters were bound when the task started.
    TaskInputFilled {
        plan_item_id: PlanItemId,
        input: Map<String, Value>,
    },

    /// Task output parameters were recorded on completion or failure.
    TaskOutputFilled {
        plan_item_id: PlanItemId,
        output: Map<String, Value>,
    },

    /// A timer intent was registered.
    TimerSet {
        plan_item_id: PlanItemId,
        moment: TimestampUtc,
    },

    /// An outstanding timer intent was withdrawn.
    TimerCanceled { plan_item_id: PlanItemId },

    /// A plan item was rebound to a changed definition element.
    PlanItemMigrated {
        plan_item_id: PlanItemId,
        definition_id: String,
        name: String,
    },

    /// A plan item lost its definition element and was removed.
    PlanItemDropped { plan_item_id: PlanItemId },

    /// The case now runs on a new definition.
    CaseDefinitionMigrated { definition: Arc<CaseDefinition> },

    /// Team member added.
    TeamMemberAdded { member: TeamMember },

    /// Team member removed.
    TeamMemberRemoved { user_id: String },
}

impl CaseEvent {
    /// Plan item this event is about, if any.
    pub fn plan_item_id(&self) -> Option<&PlanItemId> {
        match self {
            Self::PlanItemCreated { plan_item_id, .. }
            | Self::PlanItemTransitioned { plan_item_id, .. }
            | Self::RepetitionRuleEvaluated { plan_item_id, .. }
            | Self::RequiredRuleEvaluated { plan_item_id, .. }
            | Self::TaskInputFilled { plan_item_id, .. }
            | Self::TaskOutputFilled { plan_item_id, .. }
            | Self::TimerSet { plan_item_id, .. }
            | Self::TimerCanceled { plan_item_id }
            | Self::PlanItemMigrated { plan_item_id, .. }
            | Self::PlanItemDropped { plan_item_id } => Some(plan_item_id),
            _ => None,
        }
    }
}

impl DomainEvent for CaseEvent {
    fn event_type(&self) -> String {
        match self {
            Self::CaseDefinitionApplied { .. } => "CaseDefinitionApplied".to_string(),
            Self::PlanItemCreated { .. } => "PlanItemCreated".to_string(),
            Self::PlanItemTransitioned { .. } => "PlanItemTransitioned".to_string(),
            Self::RepetitionRuleEvaluated { .. } => "RepetitionRuleEvaluated".to_string(),
            Self::RequiredRuleEvaluated { .. } => "RequiredRuleEvaluated".to_string(),
            Self::CaseFileItemTransitioned { .. } => "CaseFileItemTransitioned".to_string(),
            Self::TaskInputFilled { .. } => "TaskInputFilled".to_string(),
            Self::TaskOutputFilled { .. } => "TaskOutputFilled".to_string(),
            Self::TimerSet { .. } => "TimerSet".to_string(),
            Self::TimerCanceled { .. } => "TimerCanceled".to_string(),
            Self::PlanItemMigrated { .. } => "PlanItemMigrated".to_string(),
            Self::PlanItemDropped { .. } => "PlanItemDropped".to_string(),
            Self::CaseDefinitionMigrated { .. } => "CaseDefinitionMigrated".to_string(),
            Self::TeamMemberAdded { .. } => "TeamMemberAdded".to_string(),
            Self::TeamMemberRemoved { .. } => "TeamMemberRemoved".to_string(),
        }
    }

    fn event_version(&self) -> String {
        "1".to_string()
    }
}
