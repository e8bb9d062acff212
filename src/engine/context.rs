//! The live command cascade.
//!
//! A `CaseContext` works on a scratch copy of the case. Every event goes
//! through [`Case::apply_event`] first and is then followed by its behavior,
//! so the cascade always sees the state the events describe. The handler
//! returns the collected events; a failure anywhere discards all of them.
//!
//! Behavior of a transition runs in two phases. The immediate phase runs the
//! state machine's entry action and informs entry and reactivate criteria. The
//! delayed phase asks the parent stage to try completion and informs exit
//! criteria. Immediate phases nest; delayed phases are deferred until the
//! outermost frame finishes, then run frame by frame, the most recently added
//! first.

use crate::definition::{CriterionPurpose, PlanItemControl, PlanItemType, Rule};
use crate::domain::cqrs::CaseEvent;
use crate::domain::errors::CaseError;
use crate::domain::services::CaseServices;
use crate::domain::types::{CriterionId, PlanItemId, TimestampUtc};
use crate::engine::case::Case;
use crate::engine::lifecycle::hooks_for;
use crate::engine::stage;
use crate::engine::state::{CaseFileItemTransition, State, Transition};
use crate::engine::state_machine::EntryAction;
use crate::expression::EvaluationContext;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Behavior {
    PlanItem {
        id: PlanItemId,
        transition: Transition,
        action: EntryAction,
    },
    CaseFile {
        path: String,
        transition: CaseFileItemTransition,
    },
}

#[derive(Debug)]
struct Frame {
    behavior: Behavior,
    children: Vec<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Immediate,
    Delayed,
}

impl Phase {
    fn handles(self, purpose: CriterionPurpose) -> bool {
        match self {
            Phase::Immediate => purpose != CriterionPurpose::Exit,
            Phase::Delayed => purpose == CriterionPurpose::Exit,
        }
    }
}

pub struct CaseContext<'a> {
    case: Case,
    events: Vec<CaseEvent>,
    services: &'a CaseServices,
    stack: Vec<Frame>,
}

impl<'a> CaseContext<'a> {
    pub fn new(case: Case, services: &'a CaseServices) -> Self {
        Self {
            case,
            events: Vec::new(),
            services,
            stack: Vec::new(),
        }
    }

    /// Context for a case that does not exist yet; `first` must be
    /// `CaseDefinitionApplied`.
    pub fn start(first: CaseEvent, services: &'a CaseServices) -> Result<Self, CaseError> {
        let case = Case::from_event(&first)?;
        let mut context = Self::new(case, services);
        context.events.push(first);
        Ok(context)
    }

    pub fn case(&self) -> &Case {
        &self.case
    }

    pub fn services(&self) -> &CaseServices {
        self.services
    }

    pub fn now(&self) -> TimestampUtc {
        self.services.clock.now()
    }

    pub fn events(&self) -> &[CaseEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<CaseEvent> {
        self.events
    }

    pub fn into_parts(self) -> (Case, Vec<CaseEvent>) {
        (self.case, self.events)
    }

    /// Applies and records an event. Case-file transitions also run their
    /// behavior; plan item transitions go through [`Self::make_transition`].
    pub fn add_event(&mut self, event: CaseEvent) -> Result<(), CaseError> {
        self.case.apply_event(&event)?;
        let behavior = match &event {
            CaseEvent::CaseFileItemTransitioned {
                path, transition, ..
            } => Some(Behavior::CaseFile {
                path: path.clone(),
                transition: *transition,
            }),
            _ => None,
        };
        self.events.push(event);
        match behavior {
            Some(behavior) => self.handle_behavior(behavior),
            None => Ok(()),
        }
    }

    /// Reserves the transition lock of an item.
    pub fn prepare_transition(&mut self, id: &PlanItemId, transition: Transition) -> bool {
        match self.case.items.get_mut(id) {
            Some(item) => item.prepare_transition(transition),
            None => false,
        }
    }

    /// Runs `transition` on an item. Returns whether an event was produced.
    ///
    /// A transition the table does not know is a no-op, and so is one that
    /// arrives while a different transition holds the item's lock.
    pub fn make_transition(
        &mut self,
        id: &PlanItemId,
        transition: Transition,
    ) -> Result<bool, CaseError> {
        if transition == Transition::None {
            return Ok(false);
        }
        let Some(item) = self.case.items.get_mut(id) else {
            tracing::debug!("Ignoring {} on unknown plan item {}", transition, id);
            return Ok(false);
        };
        if !item.acquire_transition(transition) {
            tracing::debug!(
                "Ignoring {} on {}: another transition is in flight",
                transition,
                item.describe()
            );
            return Ok(false);
        }
        let Some(outcome) =
            item.state_machine()
                .transition(item.state, item.history_state, transition)
        else {
            return Ok(false);
        };
        let event = CaseEvent::PlanItemTransitioned {
            plan_item_id: id.clone(),
            transition,
            state: outcome.target,
            history_state: item.state,
        };
        self.case.apply_event(&event)?;
        self.events.push(event);
        self.handle_behavior(Behavior::PlanItem {
            id: id.clone(),
            transition,
            action: outcome.action,
        })?;
        Ok(true)
    }

    fn handle_behavior(&mut self, behavior: Behavior) -> Result<(), CaseError> {
        self.stack.push(Frame {
            behavior: behavior.clone(),
            children: Vec::new(),
        });
        let result = self.run_immediate(&behavior);
        let frame = self.stack.pop();
        result?;
        let Some(frame) = frame else {
            return Ok(());
        };
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.insert(0, frame);
                Ok(())
            }
            None => self.run_delayed(frame),
        }
    }

    fn run_delayed(&mut self, frame: Frame) -> Result<(), CaseError> {
        let behavior = frame.behavior.clone();
        self.stack.push(frame);
        let result = self.run_delayed_behavior(&behavior);
        let frame = self.stack.pop();
        result?;
        if let Some(frame) = frame {
            for child in frame.children {
                self.run_delayed(child)?;
            }
        }
        Ok(())
    }

    fn run_immediate(&mut self, behavior: &Behavior) -> Result<(), CaseError> {
        match behavior {
            Behavior::PlanItem {
                id,
                transition,
                action,
            } => {
                self.run_entry_action(id, *action)?;
                self.route_plan_item(id, *transition, Phase::Immediate)
            }
            Behavior::CaseFile { path, transition } => {
                self.route_case_file(path, *transition, Phase::Immediate)
            }
        }
    }

    fn run_delayed_behavior(&mut self, behavior: &Behavior) -> Result<(), CaseError> {
        match behavior {
            Behavior::PlanItem { id, transition, .. } => {
                self.check_parent_completion(id)?;
                self.route_plan_item(id, *transition, Phase::Delayed)
            }
            Behavior::CaseFile { path, transition } => {
                self.route_case_file(path, *transition, Phase::Delayed)
            }
        }
    }

    fn check_parent_completion(&mut self, id: &PlanItemId) -> Result<(), CaseError> {
        let Some(item) = self.case.item(id) else {
            return Ok(());
        };
        if !item.state.is_semi_terminal() {
            return Ok(());
        }
        let Some(stage_id) = item.stage_id.clone() else {
            return Ok(());
        };
        match self.case.item(&stage_id) {
            Some(stage) if stage.state.is_semi_terminal() => {
                tracing::debug!(
                    "Skipping completion check of {}: already {}",
                    stage.describe(),
                    stage.state
                );
                Ok(())
            }
            Some(_) => stage::try_completion(self, &stage_id),
            None => Ok(()),
        }
    }

    fn run_entry_action(&mut self, id: &PlanItemId, action: EntryAction) -> Result<(), CaseError> {
        let Some(item_type) = self.case.item(id).map(|item| item.item_type) else {
            return Ok(());
        };
        let hooks = hooks_for(item_type);
        match action {
            EntryAction::Create => self.create_instance(id),
            EntryAction::Start => hooks.start(self, id),
            EntryAction::Resume => hooks.resume(self, id),
            EntryAction::Reactivate => hooks.reactivate(self, id),
            EntryAction::Suspend => hooks.suspend(self, id),
            EntryAction::Complete { repeat } => {
                hooks.complete(self, id)?;
                if repeat {
                    self.repeat_without_entry_criteria(id)?;
                }
                Ok(())
            }
            EntryAction::Terminate { repeat } => {
                hooks.terminate(self, id)?;
                if repeat {
                    self.repeat_without_entry_criteria(id)?;
                }
                Ok(())
            }
            EntryAction::Fail => hooks.fail(self, id),
            EntryAction::Nothing => Ok(()),
        }
    }

    fn repeat_without_entry_criteria(&mut self, id: &PlanItemId) -> Result<(), CaseError> {
        let unguarded = self
            .case
            .item(id)
            .is_some_and(|item| item.entry_criteria.is_empty());
        if unguarded {
            self.repeat(id)?;
        }
        Ok(())
    }

    /// Rules are evaluated, the kind's create hook runs, then the lifecycle begins.
    fn create_instance(&mut self, id: &PlanItemId) -> Result<(), CaseError> {
        let repeats = self.evaluate_rule(id, |control| control.repetition_rule.as_ref())?;
        self.add_event(CaseEvent::RepetitionRuleEvaluated {
            plan_item_id: id.clone(),
            value: repeats,
        })?;
        let required = self.evaluate_rule(id, |control| control.required_rule.as_ref())?;
        self.add_event(CaseEvent::RequiredRuleEvaluated {
            plan_item_id: id.clone(),
            value: required,
        })?;
        if let Some(item_type) = self.case.item(id).map(|item| item.item_type) {
            hooks_for(item_type).create(self, id)?;
        }
        self.begin_lifecycle(id)
    }

    /// Without entry criteria the item enters at once. Otherwise a criterion
    /// that was satisfied before the item started listening counts now.
    fn begin_lifecycle(&mut self, id: &PlanItemId) -> Result<(), CaseError> {
        let Some(criteria) = self.case.item(id).map(|item| item.entry_criteria.clone()) else {
            return Ok(());
        };
        if criteria.is_empty() {
            let transition = self.entry_transition(id)?;
            self.make_transition(id, transition)?;
            return Ok(());
        }
        for criterion_id in criteria {
            if !self.criterion_ready(criterion_id)? {
                continue;
            }
            tracing::debug!("Entry criterion {} of {} was already satisfied", criterion_id, id);
            let transition = self.entry_transition(id)?;
            self.make_transition(id, transition)?;
            break;
        }
        Ok(())
    }

    /// All on-parts fired and the if-part holds.
    fn criterion_ready(&self, criterion_id: CriterionId) -> Result<bool, CaseError> {
        let Some(criterion) = self.case.sentry.criterion(criterion_id) else {
            return Ok(false);
        };
        if !criterion.is_ready() {
            return Ok(false);
        }
        self.if_part_holds(&criterion.target, &criterion.definition_id)
    }

    fn if_part_holds(&self, target: &PlanItemId, criterion: &str) -> Result<bool, CaseError> {
        let Some(item) = self.case.item(target) else {
            return Ok(false);
        };
        let condition = self
            .case
            .item_definition(item)
            .and_then(|definition| definition.criterion(criterion))
            .and_then(|criterion| criterion.if_part.as_ref());
        match condition {
            None => Ok(true),
            Some(expression) => self
                .services
                .evaluators
                .condition(expression, &EvaluationContext::new(&self.case, Some(item))),
        }
    }

    /// Evaluates one of the item's control rules. A missing item or definition
    /// counts as an absent rule.
    pub fn evaluate_rule(
        &self,
        id: &PlanItemId,
        pick: impl Fn(&PlanItemControl) -> Option<&Rule>,
    ) -> Result<bool, CaseError> {
        let Some(item) = self.case.item(id) else {
            return Ok(false);
        };
        let Some(definition) = self.case.item_definition(item) else {
            return Ok(false);
        };
        self.services.evaluators.rule(
            pick(&definition.control),
            &EvaluationContext::new(&self.case, Some(item)),
        )
    }

    /// Transition that starts an item's lifecycle once it is allowed to.
    pub fn entry_transition(&self, id: &PlanItemId) -> Result<Transition, CaseError> {
        let Some(item_type) = self.case.item(id).map(|item| item.item_type) else {
            return Ok(Transition::None);
        };
        Ok(match item_type {
            PlanItemType::Stage
            | PlanItemType::HumanTask
            | PlanItemType::ProcessTask
            | PlanItemType::CaseTask => {
                if self.evaluate_rule(id, |control| control.manual_activation_rule.as_ref())? {
                    Transition::Enable
                } else {
                    Transition::Start
                }
            }
            PlanItemType::Milestone => Transition::Occur,
            PlanItemType::CasePlan | PlanItemType::UserEvent | PlanItemType::TimerEvent => {
                Transition::None
            }
        })
    }

    fn route_plan_item(
        &mut self,
        source: &PlanItemId,
        transition: Transition,
        phase: Phase,
    ) -> Result<(), CaseError> {
        let listeners = self.case.sentry.plan_item_listeners(source);
        let mut fired = HashSet::new();
        for listener in listeners {
            let matched = self
                .case
                .sentry
                .criterion(listener.criterion)
                .filter(|criterion| phase.handles(criterion.purpose))
                .and_then(|criterion| criterion.on_parts.get(listener.on_part))
                .is_some_and(|on_part| on_part.matches_plan_item(transition));
            if matched && fired.insert(listener.criterion) {
                self.try_satisfy(listener.criterion)?;
            }
        }
        Ok(())
    }

    fn route_case_file(
        &mut self,
        path: &str,
        transition: CaseFileItemTransition,
        phase: Phase,
    ) -> Result<(), CaseError> {
        let listeners = self.case.sentry.case_file_listeners(path);
        let mut fired = HashSet::new();
        for listener in listeners {
            let matched = self
                .case
                .sentry
                .criterion(listener.criterion)
                .filter(|criterion| phase.handles(criterion.purpose))
                .and_then(|criterion| criterion.on_parts.get(listener.on_part))
                .is_some_and(|on_part| on_part.matches_case_file(transition));
            if matched && fired.insert(listener.criterion) {
                self.try_satisfy(listener.criterion)?;
            }
        }
        Ok(())
    }

    fn try_satisfy(&mut self, criterion_id: CriterionId) -> Result<(), CaseError> {
        if !self.criterion_ready(criterion_id)? {
            return Ok(());
        }
        let Some((purpose, target)) = self
            .case
            .sentry
            .criterion(criterion_id)
            .map(|criterion| (criterion.purpose, criterion.target.clone()))
        else {
            return Ok(());
        };
        tracing::debug!("{:?} criterion {} of {} satisfied", purpose, criterion_id, target);
        self.criterion_satisfied(purpose, &target)
    }

    fn criterion_satisfied(
        &mut self,
        purpose: CriterionPurpose,
        target: &PlanItemId,
    ) -> Result<(), CaseError> {
        let Some((state, index, exit_transition)) = self.case.item(target).map(|item| {
            (
                item.state,
                item.index,
                item.state_machine().exit_transition(),
            )
        }) else {
            return Ok(());
        };
        match purpose {
            CriterionPurpose::Entry => match (state, index) {
                (State::Null, _) => {
                    tracing::debug!("Entry of {} remembered until its lifecycle begins", target);
                    Ok(())
                }
                (State::Available, 0) => {
                    let transition = self.entry_transition(target)?;
                    self.make_transition(target, transition).map(|_| ())
                }
                _ => self.repeat(target),
            },
            CriterionPurpose::Exit => self.make_transition(target, exit_transition).map(|_| ()),
            CriterionPurpose::Reactivate => {
                if state == State::Failed {
                    self.make_transition(target, Transition::Reactivate)?;
                }
                Ok(())
            }
        }
    }

    /// Creates the next instance of an item when its stage is active and the
    /// repetition rule holds.
    pub fn repeat(&mut self, id: &PlanItemId) -> Result<(), CaseError> {
        let Some(item) = self.case.item(id) else {
            return Ok(());
        };
        let Some(stage_id) = item.stage_id.clone() else {
            return Ok(());
        };
        let previous = item.repetition_rule_outcome;
        let discretionary = item.discretionary;
        let (definition_id, name, item_type) =
            (item.definition_id.clone(), item.name.clone(), item.item_type);
        let stage_active = self
            .case
            .item(&stage_id)
            .is_some_and(|stage| stage.state == State::Active);
        if !stage_active {
            tracing::debug!("Not repeating {}: its stage is not active", id);
            return Ok(());
        }

        let repeats = self.evaluate_rule(id, |control| control.repetition_rule.as_ref())?;
        if repeats != previous {
            self.add_event(CaseEvent::RepetitionRuleEvaluated {
                plan_item_id: id.clone(),
                value: repeats,
            })?;
        }
        if !repeats || discretionary {
            return Ok(());
        }

        let index = self
            .case
            .item(&stage_id)
            .map(|stage| {
                stage
                    .children()
                    .iter()
                    .filter_map(|child| self.case.item(child))
                    .filter(|child| child.definition_id == definition_id)
                    .count()
            })
            .unwrap_or(0) as u32;
        let new_id = PlanItemId::generate();
        tracing::debug!("Repeating {} as {} with index {}", id, new_id, index);
        self.add_event(CaseEvent::PlanItemCreated {
            plan_item_id: new_id.clone(),
            stage_id: Some(stage_id),
            definition_id,
            name,
            item_type,
            index,
            discretionary: false,
            created_at: self.now(),
        })?;
        self.make_transition(&new_id, Transition::Create)?;
        let waiting = self
            .case
            .item(&new_id)
            .is_some_and(|item| item.state == State::Available);
        if waiting {
            let transition = self.entry_transition(&new_id)?;
            self.make_transition(&new_id, transition)?;
        }
        Ok(())
    }

    /// A transition requested from outside the case.
    ///
    /// The surrounding stage has to be active, and completing a stage by hand
    /// still requires its required children to be finished.
    pub fn request_transition(
        &mut self,
        reference: &str,
        transition: Transition,
    ) -> Result<bool, CaseError> {
        let item = self
            .case
            .resolve(reference)
            .ok_or_else(|| CaseError::not_found(format!("plan item '{}'", reference)))?;
        let id = item.id.clone();
        if let Some(stage_id) = &item.stage_id {
            let stage_active = self
                .case
                .item(stage_id)
                .is_some_and(|stage| stage.state == State::Active);
            if !stage_active {
                return Err(CaseError::denied(format!(
                    "Cannot perform action '{}' on '{}', since the surrounding stage is not active",
                    transition, item.name
                )));
            }
        }
        if transition == Transition::Complete
            && item.item_type.has_children()
            && !stage::is_completion_allowed(&self.case, &id, true)
        {
            return Err(CaseError::denied(
                "Cannot complete the stage as there are active items remaining",
            ));
        }
        self.make_transition(&id, transition)
    }

    /// Delivers a timer. Stale or unknown timers change nothing.
    pub fn fire_timer(
        &mut self,
        reference: &str,
        moment: TimestampUtc,
    ) -> Result<bool, CaseError> {
        let Some(item) = self.case.resolve(reference) else {
            tracing::debug!("Timer for unknown plan item {} ignored", reference);
            return Ok(false);
        };
        if item.pending_timer() != Some(moment.0) || item.state != State::Available {
            tracing::debug!("Stale timer for {} ignored", item.describe());
            return Ok(false);
        }
        let id = item.id.clone();
        self.make_transition(&id, Transition::Occur)
    }
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
