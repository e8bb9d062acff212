//! Case view projection for queries and the CLI.
//!
//! The CaseView is derived from CaseEvent only (no direct mutation) and keeps
//! just what callers ask about: plan item states, case-file states and
//! pending timers. It never evaluates definitions or criteria.

use crate::definition::PlanItemType;
use crate::domain::cqrs::CaseAggregate;
use crate::domain::types::{CaseId, PlanItemId, TeamMember, TimestampUtc};
use crate::domain::CaseEvent;
use crate::engine::state::{CaseFileItemState, State, Transition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flattened state of one plan item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItemSummary {
    pub id: PlanItemId,
    pub definition_id: String,
    pub name: String,
    pub item_type: PlanItemType,
    pub stage_id: Option<PlanItemId>,
    pub index: u32,
    pub discretionary: bool,
    pub state: State,
    pub last_transition: Transition,
    #[serde(default)]
    pub pending_timer: Option<TimestampUtc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFileEntry {
    pub state: CaseFileItemState,
    pub value: Option<Value>,
}

/// Read-only view of a case derived from events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseView {
    case_id: Option<CaseId>,
    case_name: Option<String>,
    definition_id: Option<String>,
    parent_case_id: Option<CaseId>,
    root_case_id: Option<CaseId>,
    created_at: Option<TimestampUtc>,
    /// Creation order.
    plan_items: Vec<PlanItemSummary>,
    case_file: BTreeMap<String, CaseFileEntry>,
    team: Vec<TeamMember>,
    migrations: u32,
    last_event_sequence: u64,
}

impl CaseView {
    /// Apply an event to update the view.
    pub fn apply_event(&mut self, aggregate_id: &str, event: &CaseEvent, sequence: u64) {
        if self.case_id.is_none() {
            self.case_id = Some(CaseId::from(aggregate_id));
        }
        self.last_event_sequence = sequence;

        match event {
            CaseEvent::CaseDefinitionApplied {
                case_name,
                definition,
                parent_case_id,
                root_case_id,
                team,
                created_at,
                ..
            } => {
                self.case_name = Some(case_name.clone());
                self.definition_id = Some(definition.id.clone());
                self.parent_case_id = parent_case_id.clone();
                self.root_case_id = Some(root_case_id.clone());
                self.created_at = Some(*created_at);
                self.team = team.clone();
            }
            CaseEvent::PlanItemCreated {
                plan_item_id,
                stage_id,
                definition_id,
                name,
                item_type,
                index,
                discretionary,
                ..
            } => {
                self.plan_items.push(PlanItemSummary {
                    id: plan_item_id.clone(),
                    definition_id: definition_id.clone(),
                    name: name.clone(),
                    item_type: *item_type,
                    stage_id: stage_id.clone(),
                    index: *index,
                    discretionary: *discretionary,
                    state: State::Null,
                    last_transition: Transition::None,
                    pending_timer: None,
                });
            }
            CaseEvent::PlanItemTransitioned {
                plan_item_id,
                transition,
                state,
                ..
            } => {
                if let Some(item) = self.item_mut(plan_item_id) {
                    item.state = *state;
                    item.last_transition = *transition;
                    if *transition == Transition::Occur {
                        item.pending_timer = None;
                    }
                }
            }
            CaseEvent::CaseFileItemTransitioned {
                path, state, value, ..
            } => {
                self.case_file.insert(
                    path.clone(),
                    CaseFileEntry {
                        state: *state,
                        value: value.clone(),
                    },
                );
            }
            CaseEvent::TimerSet {
                plan_item_id,
                moment,
            } => {
                if let Some(item) = self.item_mut(plan_item_id) {
                    item.pending_timer = Some(*moment);
                }
            }
            CaseEvent::TimerCanceled { plan_item_id } => {
                if let Some(item) = self.item_mut(plan_item_id) {
                    item.pending_timer = None;
                }
            }
            CaseEvent::PlanItemMigrated {
                plan_item_id,
                definition_id,
                name,
            } => {
                if let Some(item) = self.item_mut(plan_item_id) {
                    item.definition_id = definition_id.clone();
                    item.name = name.clone();
                }
            }
            CaseEvent::PlanItemDropped { plan_item_id } => {
                self.plan_items.retain(|item| &item.id != plan_item_id);
            }
            CaseEvent::CaseDefinitionMigrated { definition } => {
                self.definition_id = Some(definition.id.clone());
                self.migrations += 1;
            }
            CaseEvent::TeamMemberAdded { member } => {
                self.team.retain(|m| m.user_id != member.user_id);
                self.team.push(member.clone());
            }
            CaseEvent::TeamMemberRemoved { user_id } => {
                self.team.retain(|m| &m.user_id != user_id);
            }
            CaseEvent::RepetitionRuleEvaluated { .. }
            | CaseEvent::RequiredRuleEvaluated { .. }
            | CaseEvent::TaskInputFilled { .. }
            | CaseEvent::TaskOutputFilled { .. } => {}
        }
    }

    fn item_mut(&mut self, id: &PlanItemId) -> Option<&mut PlanItemSummary> {
        let found = self.plan_items.iter_mut().find(|item| &item.id == id);
        if found.is_none() {
            tracing::warn!("View has no plan item {}", id);
        }
        found
    }

    pub fn case_id(&self) -> Option<&CaseId> {
        self.case_id.as_ref()
    }

    pub fn case_name(&self) -> Option<&str> {
        self.case_name.as_deref()
    }

    pub fn definition_id(&self) -> Option<&str> {
        self.definition_id.as_deref()
    }

    pub fn parent_case_id(&self) -> Option<&CaseId> {
        self.parent_case_id.as_ref()
    }

    pub fn root_case_id(&self) -> Option<&CaseId> {
        self.root_case_id.as_ref()
    }

    pub fn created_at(&self) -> Option<TimestampUtc> {
        self.created_at
    }

    pub fn plan_items(&self) -> &[PlanItemSummary] {
        &self.plan_items
    }

    pub fn item(&self, id: &PlanItemId) -> Option<&PlanItemSummary> {
        self.plan_items.iter().find(|item| &item.id == id)
    }

    /// Most recently created item with this name.
    pub fn item_by_name(&self, name: &str) -> Option<&PlanItemSummary> {
        self.plan_items.iter().rev().find(|item| item.name == name)
    }

    /// Items whose parent is `stage_id`, in creation order.
    pub fn children(&self, stage_id: &PlanItemId) -> Vec<&PlanItemSummary> {
        self.plan_items
            .iter()
            .filter(|item| item.stage_id.as_ref() == Some(stage_id))
            .collect()
    }

    pub fn case_file(&self) -> &BTreeMap<String, CaseFileEntry> {
        &self.case_file
    }

    pub fn team(&self) -> &[TeamMember] {
        &self.team
    }

    pub fn migrations(&self) -> u32 {
        self.migrations
    }

    /// Returns the last event sequence number.
    pub fn last_event_sequence(&self) -> u64 {
        self.last_event_sequence
    }

    /// State of the case plan, `None` before the case started.
    pub fn case_state(&self) -> Option<State> {
        self.plan_items
            .iter()
            .find(|item| item.item_type == PlanItemType::CasePlan)
            .map(|item| item.state)
    }

    /// Returns true once the case plan reached a semi-terminal state.
    pub fn is_finished(&self) -> bool {
        self.case_state().is_some_and(State::is_semi_terminal)
    }

    pub fn pending_timers(&self) -> Vec<(PlanItemId, TimestampUtc)> {
        self.plan_items
            .iter()
            .filter_map(|item| item.pending_timer.map(|moment| (item.id.clone(), moment)))
            .collect()
    }
}

/// Serializable wrapper for event envelopes used in broadcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEventEnvelope {
    pub aggregate_id: String,
    pub sequence: u64,
    pub event: CaseEvent,
}

impl From<&cqrs_es::EventEnvelope<CaseAggregate>> for CaseEventEnvelope {
    fn from(source: &cqrs_es::EventEnvelope<CaseAggregate>) -> Self {
        Self {
            aggregate_id: source.aggregate_id.clone(),
            sequence: source.sequence as u64,
            event: source.payload.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
