//! Runtime plan item nodes.
//!
//! Items never hold references to each other. The parent stage, children and
//! criteria are ids resolved through the owning [`Case`](super::case::Case).

use crate::definition::PlanItemType;
use crate::domain::types::{CriterionId, PlanItemId};
use crate::engine::state::{State, Transition};
use crate::engine::state_machine::StateMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Kind-specific runtime data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanItemKind {
    CasePlan {
        children: Vec<PlanItemId>,
    },
    Stage {
        children: Vec<PlanItemId>,
    },
    Task {
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default)]
        output: Map<String, Value>,
    },
    Milestone,
    UserEvent,
    TimerEvent {
        /// Moment of the outstanding timer, if one is set.
        pending: Option<DateTime<Utc>>,
    },
}

impl PlanItemKind {
    pub fn for_type(item_type: PlanItemType) -> Self {
        match item_type {
            PlanItemType::CasePlan => PlanItemKind::CasePlan {
                children: Vec::new(),
            },
            PlanItemType::Stage => PlanItemKind::Stage {
                children: Vec::new(),
            },
            PlanItemType::HumanTask | PlanItemType::ProcessTask | PlanItemType::CaseTask => {
                PlanItemKind::Task {
                    input: Map::new(),
                    output: Map::new(),
                }
            }
            PlanItemType::Milestone => PlanItemKind::Milestone,
            PlanItemType::UserEvent => PlanItemKind::UserEvent,
            PlanItemType::TimerEvent => PlanItemKind::TimerEvent { pending: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: PlanItemId,
    pub definition_id: String,
    pub name: String,
    pub item_type: PlanItemType,
    /// Owning stage; `None` only for the case plan.
    pub stage_id: Option<PlanItemId>,
    /// Repetition ordinal, 0 for the first instance.
    pub index: u32,
    pub discretionary: bool,
    pub state: State,
    pub history_state: State,
    pub last_transition: Transition,
    pub repetition_rule_outcome: bool,
    pub required_rule_outcome: bool,
    /// Number of transitions recorded for this item.
    pub sequence: u64,
    pub entry_criteria: Vec<CriterionId>,
    pub exit_criteria: Vec<CriterionId>,
    pub reactivate_criteria: Vec<CriterionId>,
    pub kind: PlanItemKind,
    pub created_at: DateTime<Utc>,
    /// Transition lock. Only lives inside one command cascade.
    #[serde(skip)]
    pub next_transition: Option<Transition>,
}

impl PlanItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PlanItemId,
        definition_id: &str,
        name: &str,
        item_type: PlanItemType,
        stage_id: Option<PlanItemId>,
        index: u32,
        discretionary: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            definition_id: definition_id.to_string(),
            name: name.to_string(),
            item_type,
            stage_id,
            index,
            discretionary,
            state: State::Null,
            history_state: State::Null,
            last_transition: Transition::None,
            repetition_rule_outcome: false,
            required_rule_outcome: false,
            sequence: 0,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            reactivate_criteria: Vec::new(),
            kind: PlanItemKind::for_type(item_type),
            created_at,
            next_transition: None,
        }
    }

    pub fn state_machine(&self) -> &'static StateMachine {
        StateMachine::for_kind(self.item_type.state_machine())
    }

    pub fn children(&self) -> &[PlanItemId] {
        match &self.kind {
            PlanItemKind::CasePlan { children } | PlanItemKind::Stage { children } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<PlanItemId>> {
        match &mut self.kind {
            PlanItemKind::CasePlan { children } | PlanItemKind::Stage { children } => {
                Some(children)
            }
            _ => None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.required_rule_outcome
    }

    /// Pending timer moment, for timer events only.
    pub fn pending_timer(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            PlanItemKind::TimerEvent { pending } => *pending,
            _ => None,
        }
    }

    /// Reserves the transition lock. Fails when a different transition holds it.
    pub fn prepare_transition(&mut self, transition: Transition) -> bool {
        match self.next_transition {
            Some(pending) if pending != transition => false,
            _ => {
                self.next_transition = Some(transition);
                true
            }
        }
    }

    /// Checks the lock for `transition`, releasing it when it matches.
    /// Returns false when another transition holds the lock.
    pub fn acquire_transition(&mut self, transition: Transition) -> bool {
        match self.next_transition {
            Some(pending) if pending != transition => false,
            Some(_) => {
                self.next_transition = None;
                true
            }
            None => true,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}[{}.{}] ({})",
            self.item_type, self.name, self.index, self.state
        )
    }
}

/// Flat id-keyed registry of every plan item in a case, remembering creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanItemRegistry {
    items: HashMap<PlanItemId, PlanItem>,
    order: Vec<PlanItemId>,
}

impl PlanItemRegistry {
    pub fn get(&self, id: &PlanItemId) -> Option<&PlanItem> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &PlanItemId) -> Option<&mut PlanItem> {
        self.items.get_mut(id)
    }

    pub fn contains(&self, id: &PlanItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn insert(&mut self, item: PlanItem) {
        self.order.push(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    pub(crate) fn remove(&mut self, id: &PlanItemId) -> Option<PlanItem> {
        self.order.retain(|candidate| candidate != id);
        self.items.remove(id)
    }

    /// Items in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &PlanItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn ids(&self) -> &[PlanItemId] {
        &self.order
    }

    /// Enclosing stages of `id`, innermost first.
    pub fn ancestors(&self, id: &PlanItemId) -> Vec<&PlanItem> {
        let mut out = Vec::new();
        let mut current = self.items.get(id).and_then(|item| item.stage_id.as_ref());
        while let Some(stage_id) = current {
            match self.items.get(stage_id) {
                Some(stage) => {
                    out.push(stage);
                    current = stage.stage_id.as_ref();
                }
                None => break,
            }
        }
        out
    }

    /// True when `outer` is a proper ancestor of `inner`.
    pub fn contains_strictly(&self, outer: &PlanItemId, inner: &PlanItemId) -> bool {
        self.ancestors(inner).iter().any(|stage| &stage.id == outer)
    }

    /// Most recently created item with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<&PlanItem> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.items.get(id))
            .find(|item| item.name == name)
    }

    /// Descendants of `id`, parents before children.
    pub fn descendants(&self, id: &PlanItemId) -> Vec<PlanItemId> {
        let mut out = Vec::new();
        if let Some(item) = self.items.get(id) {
            for child in item.children() {
                out.push(child.clone());
                out.extend(self.descendants(child));
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "tests/plan_item_tests.rs"]
mod tests;
