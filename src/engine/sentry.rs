//! Criteria, on-parts and the case-wide sentry network.
//!
//! All wiring happens while events are applied, so a replayed case ends up
//! with the same criteria, ids and listener order as the live one. Reacting to
//! a satisfied criterion is left to the command cascade.
//!
//! Listener lists are ordered by stage containment: a criterion scoped to an
//! inner stage is informed before one scoped to a stage that contains it.

use crate::definition::{CriterionDefinition, CriterionPurpose, OnPartDefinition};
use crate::domain::types::{CriterionId, PlanItemId};
use crate::engine::case_file::CaseFile;
use crate::engine::plan_item::PlanItemRegistry;
use crate::engine::state::{CaseFileItemTransition, Transition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnPart {
    pub definition: OnPartDefinition,
    /// True while the most recent transition of the source matches.
    pub active: bool,
    /// Plan items this on-part listens to.
    pub connected: Vec<PlanItemId>,
}

impl OnPart {
    fn new(definition: &OnPartDefinition) -> Self {
        Self {
            definition: definition.clone(),
            active: false,
            connected: Vec::new(),
        }
    }

    pub fn matches_plan_item(&self, transition: Transition) -> bool {
        matches!(&self.definition, OnPartDefinition::PlanItem { standard_event, .. } if *standard_event == transition)
    }

    pub fn matches_case_file(&self, transition: CaseFileItemTransition) -> bool {
        matches!(&self.definition, OnPartDefinition::CaseFileItem { standard_event, .. } if *standard_event == transition)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: CriterionId,
    pub definition_id: String,
    pub purpose: CriterionPurpose,
    /// Plan item that reacts when the criterion is satisfied.
    pub target: PlanItemId,
    /// Stage the criterion lives in.
    pub scope: PlanItemId,
    pub on_parts: Vec<OnPart>,
}

impl Criterion {
    /// Every on-part has fired. The if-part is checked by the caller.
    pub fn is_ready(&self) -> bool {
        self.on_parts.iter().all(|on_part| on_part.active)
    }

    /// Same definition id and on-parts as `definition`.
    pub fn is_unchanged(&self, definition: &CriterionDefinition) -> bool {
        self.definition_id == definition.id
            && self.on_parts.len() == definition.on_parts.len()
            && self
                .on_parts
                .iter()
                .zip(&definition.on_parts)
                .all(|(on_part, def)| &on_part.definition == def)
    }
}

/// Position of an on-part inside the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerRef {
    pub criterion: CriterionId,
    pub on_part: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentryNetwork {
    next_id: u64,
    criteria: BTreeMap<CriterionId, Criterion>,
    plan_item_listeners: BTreeMap<PlanItemId, Vec<ListenerRef>>,
    case_file_listeners: BTreeMap<String, Vec<ListenerRef>>,
}

impl SentryNetwork {
    pub fn criterion(&self, id: CriterionId) -> Option<&Criterion> {
        self.criteria.get(&id)
    }

    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.values()
    }

    pub fn plan_item_listeners(&self, source: &PlanItemId) -> Vec<ListenerRef> {
        self.plan_item_listeners
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    pub fn case_file_listeners(&self, path: &str) -> Vec<ListenerRef> {
        self.case_file_listeners
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Connects a freshly created plan item as a source of existing criteria.
    pub fn connect_source(&mut self, items: &PlanItemRegistry, source: &PlanItemId) {
        let Some(item) = items.get(source) else {
            return;
        };
        let mut wanted = Vec::new();
        for criterion in self.criteria.values() {
            for (index, on_part) in criterion.on_parts.iter().enumerate() {
                if let OnPartDefinition::PlanItem { source: def, .. } = &on_part.definition {
                    if *def == item.definition_id && may_connect(items, source, &criterion.scope)
                    {
                        wanted.push(ListenerRef {
                            criterion: criterion.id,
                            on_part: index,
                        });
                    }
                }
            }
        }
        for listener in wanted {
            if let Some(on_part) = self.on_part_mut(listener) {
                on_part.connected.push(source.clone());
            }
            self.add_plan_item_listener(items, source, listener);
        }
    }

    /// Instantiates a criterion for `target` and connects its on-parts to the
    /// sources that already exist. Only the first instance of a target picks up
    /// transitions that happened before it was created.
    pub fn create_criterion(
        &mut self,
        items: &PlanItemRegistry,
        case_file: &CaseFile,
        target: &PlanItemId,
        purpose: CriterionPurpose,
        definition: &CriterionDefinition,
    ) -> Option<CriterionId> {
        let target_item = items.get(target)?;
        let scope = match &target_item.stage_id {
            Some(stage) => stage.clone(),
            None => target.clone(),
        };
        let late_inform = target_item.index == 0;
        let id = CriterionId(self.next_id);
        self.next_id += 1;
        self.criteria.insert(
            id,
            Criterion {
                id,
                definition_id: definition.id.clone(),
                purpose,
                target: target.clone(),
                scope: scope.clone(),
                on_parts: definition.on_parts.iter().map(OnPart::new).collect(),
            },
        );

        for (index, on_part) in definition.on_parts.iter().enumerate() {
            let listener = ListenerRef {
                criterion: id,
                on_part: index,
            };
            match on_part {
                OnPartDefinition::PlanItem {
                    source,
                    standard_event,
                    ..
                } => {
                    let sources: Vec<(PlanItemId, Transition)> = items
                        .iter()
                        .filter(|item| item.definition_id == *source)
                        .filter(|item| may_connect(items, &item.id, &scope))
                        .map(|item| (item.id.clone(), item.last_transition))
                        .collect();
                    for (source_id, last_transition) in sources {
                        self.add_plan_item_listener(items, &source_id, listener);
                        if let Some(on_part) = self.on_part_mut(listener) {
                            on_part.connected.push(source_id);
                            if late_inform && last_transition != Transition::None {
                                on_part.active = last_transition == *standard_event;
                            }
                        }
                    }
                }
                OnPartDefinition::CaseFileItem {
                    source,
                    standard_event,
                    ..
                } => {
                    self.add_case_file_listener(items, source, listener);
                    let last = case_file.item(source).and_then(|item| item.last_transition);
                    if let (true, Some(last), Some(on_part)) =
                        (late_inform, last, self.on_part_mut(listener))
                    {
                        on_part.active = last == *standard_event;
                    }
                }
            }
        }
        Some(id)
    }

    /// Removes a criterion and every listener entry pointing at it.
    pub fn release(&mut self, id: CriterionId) -> Option<Criterion> {
        let criterion = self.criteria.remove(&id)?;
        for on_part in &criterion.on_parts {
            match &on_part.definition {
                OnPartDefinition::PlanItem { .. } => {
                    for source in &on_part.connected {
                        remove_refs(&mut self.plan_item_listeners, source, id);
                    }
                }
                OnPartDefinition::CaseFileItem { source, .. } => {
                    remove_refs(&mut self.case_file_listeners, source, id);
                }
            }
        }
        Some(criterion)
    }

    /// Forgets a plan item that is being dropped from the case.
    pub fn disconnect_source(&mut self, source: &PlanItemId) {
        self.plan_item_listeners.remove(source);
        for criterion in self.criteria.values_mut() {
            for on_part in &mut criterion.on_parts {
                on_part.connected.retain(|candidate| candidate != source);
            }
        }
    }

    /// Records the transition of a source on every on-part listening to it.
    pub fn inform_plan_item(&mut self, source: &PlanItemId, transition: Transition) {
        for listener in self.plan_item_listeners(source) {
            if let Some(on_part) = self.on_part_mut(listener) {
                on_part.active = on_part.matches_plan_item(transition);
            }
        }
    }

    pub fn inform_case_file(&mut self, path: &str, transition: CaseFileItemTransition) {
        for listener in self.case_file_listeners(path) {
            if let Some(on_part) = self.on_part_mut(listener) {
                on_part.active = on_part.matches_case_file(transition);
            }
        }
    }

    fn on_part_mut(&mut self, listener: ListenerRef) -> Option<&mut OnPart> {
        self.criteria
            .get_mut(&listener.criterion)?
            .on_parts
            .get_mut(listener.on_part)
    }

    fn insert_position(&self, items: &PlanItemRegistry, list: &[ListenerRef], scope: &PlanItemId) -> usize {
        list.iter()
            .position(|existing| {
                self.criteria
                    .get(&existing.criterion)
                    .is_some_and(|criterion| items.contains_strictly(&criterion.scope, scope))
            })
            .unwrap_or(list.len())
    }

    fn scope_of(&self, listener: ListenerRef) -> Option<PlanItemId> {
        self.criteria
            .get(&listener.criterion)
            .map(|criterion| criterion.scope.clone())
    }

    fn add_plan_item_listener(
        &mut self,
        items: &PlanItemRegistry,
        source: &PlanItemId,
        listener: ListenerRef,
    ) {
        let Some(scope) = self.scope_of(listener) else {
            return;
        };
        let list = self.plan_item_listeners(source);
        let position = self.insert_position(items, &list, &scope);
        self.plan_item_listeners
            .entry(source.clone())
            .or_default()
            .insert(position, listener);
    }

    fn add_case_file_listener(&mut self, items: &PlanItemRegistry, path: &str, listener: ListenerRef) {
        let Some(scope) = self.scope_of(listener) else {
            return;
        };
        let list = self.case_file_listeners(path);
        let position = self.insert_position(items, &list, &scope);
        self.case_file_listeners
            .entry(path.to_string())
            .or_default()
            .insert(position, listener);
    }
}

fn remove_refs<K: Ord>(map: &mut BTreeMap<K, Vec<ListenerRef>>, key: &K, id: CriterionId) {
    if let Some(list) = map.get_mut(key) {
        list.retain(|listener| listener.criterion != id);
        if list.is_empty() {
            map.remove(key);
        }
    }
}

/// A source inside one instance of a repeated stage must not feed a criterion
/// living in a sibling instance of that stage.
fn may_connect(items: &PlanItemRegistry, source: &PlanItemId, scope: &PlanItemId) -> bool {
    let mut scope_path: Vec<(&str, &PlanItemId)> = Vec::new();
    if let Some(scope_item) = items.get(scope) {
        scope_path.push((scope_item.definition_id.as_str(), &scope_item.id));
    }
    scope_path.extend(
        items
            .ancestors(scope)
            .into_iter()
            .map(|stage| (stage.definition_id.as_str(), &stage.id)),
    );
    items.ancestors(source).into_iter().all(|ancestor| {
        scope_path
            .iter()
            .find(|(definition_id, _)| *definition_id == ancestor.definition_id)
            .is_none_or(|(_, id)| **id == ancestor.id)
    })
}

#[cfg(test)]
#[path = "tests/sentry_tests.rs"]
mod tests;
