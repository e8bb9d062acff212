//! Case state and the event applier.
//!
//! [`Case::apply_event`] is the only mutator of case state. The live command
//! cascade and recovery both go through it, which is what makes a replayed
//! case identical to the one that produced the events.

use crate::definition::{
    CaseDefinition, CriterionDefinition, CriterionPurpose, ItemDefinition, PlanItemType,
};
use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::domain::types::{CaseId, CriterionId, PlanItemId, TeamMember, TimestampUtc};
use crate::engine::case_file::CaseFile;
use crate::engine::plan_item::{PlanItem, PlanItemKind, PlanItemRegistry};
use crate::engine::sentry::SentryNetwork;
use crate::engine::state::{State, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub name: String,
    pub definition: Arc<CaseDefinition>,
    pub parent_case_id: Option<CaseId>,
    pub root_case_id: CaseId,
    pub team: Vec<TeamMember>,
    pub created_at: TimestampUtc,
    pub items: PlanItemRegistry,
    pub case_file: CaseFile,
    pub sentry: SentryNetwork,
}

impl Case {
    /// Builds the initial case from its first event.
    pub fn from_event(event: &CaseEvent) -> Result<Self, CaseError> {
        match event {
            CaseEvent::CaseDefinitionApplied {
                case_id,
                case_name,
                definition,
                parent_case_id,
                root_case_id,
                team,
                created_at,
            } => Ok(Self {
                id: case_id.clone(),
                name: case_name.clone(),
                definition: Arc::clone(definition),
                parent_case_id: parent_case_id.clone(),
                root_case_id: root_case_id.clone(),
                team: team.clone(),
                created_at: *created_at,
                items: PlanItemRegistry::default(),
                case_file: CaseFile::from_paths(&definition.case_file_paths()),
                sentry: SentryNetwork::default(),
            }),
            other => Err(CaseError::inconsistency(format!(
                "case history must start with CaseDefinitionApplied, found {:?}",
                other
            ))),
        }
    }

    /// Rebuilds a case from its full ordered history.
    pub fn replay(events: &[CaseEvent]) -> Result<Self, CaseError> {
        let (first, rest) = events.split_first().ok_or(CaseError::NotInitialized)?;
        let mut case = Self::from_event(first)?;
        for event in rest {
            case.apply_event(event)?;
        }
        Ok(case)
    }

    /// The case plan shares its id with the case.
    pub fn case_plan_id(&self) -> PlanItemId {
        PlanItemId::from(&self.id)
    }

    pub fn case_plan(&self) -> Option<&PlanItem> {
        self.items.get(&self.case_plan_id())
    }

    pub fn item(&self, id: &PlanItemId) -> Option<&PlanItem> {
        self.items.get(id)
    }

    /// Resolves a command reference: plan item id first, then the most
    /// recently created item with that name.
    pub fn resolve(&self, reference: &str) -> Option<&PlanItem> {
        self.items
            .get(&PlanItemId::from(reference))
            .or_else(|| self.items.find_by_name(reference))
    }

    pub fn item_definition(&self, item: &PlanItem) -> Option<&ItemDefinition> {
        self.definition.item(&item.definition_id)
    }

    fn require(&self, id: &PlanItemId) -> Result<&PlanItem, CaseError> {
        self.items
            .get(id)
            .ok_or_else(|| CaseError::inconsistency(format!("unknown plan item '{}'", id)))
    }

    fn require_mut(&mut self, id: &PlanItemId) -> Result<&mut PlanItem, CaseError> {
        self.items
            .get_mut(id)
            .ok_or_else(|| CaseError::inconsistency(format!("unknown plan item '{}'", id)))
    }

    pub fn apply_event(&mut self, event: &CaseEvent) -> Result<(), CaseError> {
        match event {
            CaseEvent::CaseDefinitionApplied { .. } => Err(CaseError::inconsistency(
                "case definition applied twice".to_string(),
            )),
            CaseEvent::PlanItemCreated {
                plan_item_id,
                stage_id,
                definition_id,
                name,
                item_type,
                index,
                discretionary,
                created_at,
            } => {
                let item = PlanItem::new(
                    plan_item_id.clone(),
                    definition_id,
                    name,
                    *item_type,
                    stage_id.clone(),
                    *index,
                    *discretionary,
                    created_at.0,
                );
                self.apply_created(item)
            }
            CaseEvent::PlanItemTransitioned {
                plan_item_id,
                transition,
                state,
                history_state,
            } => self.apply_transitioned(plan_item_id, *transition, *state, *history_state),
            CaseEvent::RepetitionRuleEvaluated {
                plan_item_id,
                value,
            } => {
                self.require_mut(plan_item_id)?.repetition_rule_outcome = *value;
                Ok(())
            }
            CaseEvent::RequiredRuleEvaluated {
                plan_item_id,
                value,
            } => {
                self.require_mut(plan_item_id)?.required_rule_outcome = *value;
                Ok(())
            }
            CaseEvent::CaseFileItemTransitioned {
                path,
                transition,
                state,
                value,
            } => {
                if !self
                    .case_file
                    .record(path, *transition, *state, value.clone())
                {
                    return Err(CaseError::inconsistency(format!(
                        "unknown case file item '{}'",
                        path
                    )));
                }
                self.sentry.inform_case_file(path, *transition);
                Ok(())
            }
            CaseEvent::TaskInputFilled {
                plan_item_id,
                input,
            } => match &mut self.require_mut(plan_item_id)?.kind {
                PlanItemKind::Task { input: slot, .. } => {
                    *slot = input.clone();
                    Ok(())
                }
                _ => Err(CaseError::inconsistency(format!(
                    "task input for non-task '{}'",
                    plan_item_id
                ))),
            },
            CaseEvent::TaskOutputFilled {
                plan_item_id,
                output,
            } => match &mut self.require_mut(plan_item_id)?.kind {
                PlanItemKind::Task { output: slot, .. } => {
                    *slot = output.clone();
                    Ok(())
                }
                _ => Err(CaseError::inconsistency(format!(
                    "task output for non-task '{}'",
                    plan_item_id
                ))),
            },
            CaseEvent::TimerSet {
                plan_item_id,
                moment,
            } => self.set_timer(plan_item_id, Some(moment.0)),
            CaseEvent::TimerCanceled { plan_item_id } => self.set_timer(plan_item_id, None),
            CaseEvent::PlanItemMigrated {
                plan_item_id,
                definition_id,
                name,
            } => {
                let item = self.require_mut(plan_item_id)?;
                item.definition_id = definition_id.clone();
                item.name = name.clone();
                Ok(())
            }
            CaseEvent::PlanItemDropped { plan_item_id } => self.apply_dropped(plan_item_id),
            CaseEvent::CaseDefinitionMigrated { definition } => {
                self.apply_definition_migrated(Arc::clone(definition))
            }
            CaseEvent::TeamMemberAdded { member } => {
                self.team.retain(|m| m.user_id != member.user_id);
                self.team.push(member.clone());
                Ok(())
            }
            CaseEvent::TeamMemberRemoved { user_id } => {
                self.team.retain(|m| &m.user_id != user_id);
                Ok(())
            }
        }
    }

    fn apply_created(&mut self, item: PlanItem) -> Result<(), CaseError> {
        let id = item.id.clone();
        let definition_id = item.definition_id.clone();
        let index = item.index;
        let definition = Arc::clone(&self.definition);
        let item_definition = definition.item(&definition_id).ok_or_else(|| {
            CaseError::inconsistency(format!("unknown item definition '{}'", definition_id))
        })?;
        if self.items.contains(&id) {
            return Err(CaseError::inconsistency(format!(
                "plan item '{}' created twice",
                id
            )));
        }

        let left_sibling = match &item.stage_id {
            Some(stage_id) => {
                let stage = self.items.get_mut(stage_id).ok_or_else(|| {
                    CaseError::inconsistency(format!("missing stage '{}' for '{}'", stage_id, id))
                })?;
                let children = stage.children_mut().ok_or_else(|| {
                    CaseError::inconsistency(format!("'{}' cannot hold children", stage_id))
                })?;
                children.push(id.clone());
                let siblings = children.clone();
                siblings.into_iter().find(|sibling| {
                    index > 0
                        && self.items.get(sibling).is_some_and(|s| {
                            s.definition_id == definition_id && s.index + 1 == index
                        })
                })
            }
            None if item.item_type == PlanItemType::CasePlan => None,
            None => {
                return Err(CaseError::inconsistency(format!(
                    "plan item '{}' has no stage",
                    id
                )))
            }
        };
        self.items.insert(item);

        if let Some(sibling) = left_sibling {
            self.release_criteria(&sibling, &[CriterionPurpose::Entry]);
        }
        self.sentry.connect_source(&self.items, &id);
        for purpose in CriterionPurpose::ALL {
            for criterion in item_definition.criteria(purpose) {
                self.add_criterion(&id, purpose, criterion);
            }
        }
        Ok(())
    }

    fn add_criterion(
        &mut self,
        target: &PlanItemId,
        purpose: CriterionPurpose,
        criterion: &CriterionDefinition,
    ) {
        let Some(criterion_id) =
            self.sentry
                .create_criterion(&self.items, &self.case_file, target, purpose, criterion)
        else {
            return;
        };
        if let Some(item) = self.items.get_mut(target) {
            criteria_list(item, purpose).push(criterion_id);
        }
    }

    fn apply_transitioned(
        &mut self,
        id: &PlanItemId,
        transition: Transition,
        state: State,
        history_state: State,
    ) -> Result<(), CaseError> {
        let item = self.require_mut(id)?;
        item.state = state;
        item.history_state = history_state;
        item.last_transition = transition;
        item.sequence += 1;
        if transition == Transition::Occur {
            if let PlanItemKind::TimerEvent { pending } = &mut item.kind {
                *pending = None;
            }
        }
        let children = item.children().to_vec();
        let definition_id = item.definition_id.clone();

        let repeats = self
            .definition
            .item(&definition_id)
            .is_some_and(|def| def.control.repetition_rule.is_some());
        if history_state == State::Available && transition.is_entry() && !repeats {
            self.release_criteria(id, &[CriterionPurpose::Entry]);
        }
        if matches!(state, State::Completed | State::Terminated) {
            for child in &children {
                self.release_criteria(child, &[CriterionPurpose::Entry, CriterionPurpose::Exit]);
            }
        }
        self.sentry.inform_plan_item(id, transition);
        Ok(())
    }

    fn set_timer(
        &mut self,
        id: &PlanItemId,
        moment: Option<DateTime<Utc>>,
    ) -> Result<(), CaseError> {
        match &mut self.require_mut(id)?.kind {
            PlanItemKind::TimerEvent { pending } => {
                *pending = moment;
                Ok(())
            }
            _ => Err(CaseError::inconsistency(format!(
                "timer event expected for '{}'",
                id
            ))),
        }
    }

    fn apply_dropped(&mut self, id: &PlanItemId) -> Result<(), CaseError> {
        let stage_id = self.require(id)?.stage_id.clone();
        self.release_criteria(id, &CriterionPurpose::ALL);
        self.sentry.disconnect_source(id);
        if let Some(children) = stage_id
            .as_ref()
            .and_then(|stage| self.items.get_mut(stage))
            .and_then(|stage| stage.children_mut())
        {
            children.retain(|child| child != id);
        }
        self.items.remove(id);
        Ok(())
    }

    /// Swaps the definition and brings every item's criteria in line with it.
    fn apply_definition_migrated(
        &mut self,
        definition: Arc<CaseDefinition>,
    ) -> Result<(), CaseError> {
        self.case_file.add_missing(&definition.case_file_paths());
        self.definition = Arc::clone(&definition);
        let ids: Vec<PlanItemId> = self.items.ids().to_vec();
        for id in ids {
            let Some((state, definition_id)) = self
                .items
                .get(&id)
                .map(|item| (item.state, item.definition_id.clone()))
            else {
                continue;
            };
            let Some(item_definition) = definition.item(&definition_id) else {
                continue;
            };
            for purpose in CriterionPurpose::ALL {
                let wanted = item_definition.criteria(purpose);
                let current = self
                    .items
                    .get(&id)
                    .map(|item| criteria_list_ref(item, purpose).to_vec())
                    .unwrap_or_default();
                let mut kept = Vec::new();
                for criterion_id in current {
                    let unchanged = self
                        .sentry
                        .criterion(criterion_id)
                        .is_some_and(|c| wanted.iter().any(|def| c.is_unchanged(def)));
                    if unchanged {
                        kept.push(criterion_id);
                    } else {
                        self.release_criterion(&id, purpose, criterion_id);
                    }
                }
                if !accepts_new_criterion(purpose, state) {
                    continue;
                }
                for criterion in wanted {
                    let exists = kept.iter().any(|cid| {
                        self.sentry
                            .criterion(*cid)
                            .is_some_and(|c| c.definition_id == criterion.id)
                    });
                    if !exists {
                        self.add_criterion(&id, purpose, criterion);
                    }
                }
            }
        }
        Ok(())
    }

    fn release_criterion(&mut self, id: &PlanItemId, purpose: CriterionPurpose, criterion: CriterionId) {
        self.sentry.release(criterion);
        if let Some(item) = self.items.get_mut(id) {
            criteria_list(item, purpose).retain(|c| *c != criterion);
        }
    }

    /// Releases an item's criteria of the given purposes.
    pub(crate) fn release_criteria(&mut self, id: &PlanItemId, purposes: &[CriterionPurpose]) {
        for purpose in purposes {
            let ids = match self.items.get_mut(id) {
                Some(item) => std::mem::take(criteria_list(item, *purpose)),
                None => continue,
            };
            for criterion in ids {
                self.sentry.release(criterion);
            }
        }
    }
}

/// Whether a migrated item still has a use for a criterion it did not have.
fn accepts_new_criterion(purpose: CriterionPurpose, state: State) -> bool {
    match purpose {
        CriterionPurpose::Entry => matches!(state, State::Null | State::Available),
        CriterionPurpose::Exit | CriterionPurpose::Reactivate => !state.is_semi_terminal(),
    }
}

fn criteria_list(item: &mut PlanItem, purpose: CriterionPurpose) -> &mut Vec<CriterionId> {
    match purpose {
        CriterionPurpose::Entry => &mut item.entry_criteria,
        CriterionPurpose::Exit => &mut item.exit_criteria,
        CriterionPurpose::Reactivate => &mut item.reactivate_criteria,
    }
}

fn criteria_list_ref(item: &PlanItem, purpose: CriterionPurpose) -> &[CriterionId] {
    match purpose {
        CriterionPurpose::Entry => &item.entry_criteria,
        CriterionPurpose::Exit => &item.exit_criteria,
        CriterionPurpose::Reactivate => &item.reactivate_criteria,
    }
}

#[cfg(test)]
#[path = "tests/case_tests.rs"]
mod tests;
