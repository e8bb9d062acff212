//! Table-driven plan-item state machines.
//!
//! Three variants share one evaluator: `TaskStage` for tasks and stages,
//! `EventMilestone` for milestones and event listeners, and `CasePlan` for the
//! root of the plan. A lookup that finds no table entry yields `None`; callers
//! treat that as a silent no-op.

use crate::engine::state::{State, Transition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Which of the three tables governs an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateMachineKind {
    TaskStage,
    EventMilestone,
    CasePlan,
}

/// Target of a table entry. `History` resolves to the item's own history state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    State(State),
    History,
}

/// Callback run once the transition is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    Create,
    Start,
    Resume,
    Reactivate,
    Suspend,
    Complete { repeat: bool },
    Terminate { repeat: bool },
    Fail,
    Nothing,
}

/// Result of a successful table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub target: State,
    pub action: EntryAction,
}

#[derive(Debug)]
pub struct StateMachine {
    kind: StateMachineKind,
    edges: BTreeMap<(State, Transition), Target>,
    exit_transition: Transition,
    termination_transition: Transition,
}

impl StateMachine {
    /// Returns the shared table for the given variant.
    pub fn for_kind(kind: StateMachineKind) -> &'static StateMachine {
        static TASK_STAGE: OnceLock<StateMachine> = OnceLock::new();
        static EVENT_MILESTONE: OnceLock<StateMachine> = OnceLock::new();
        static CASE_PLAN: OnceLock<StateMachine> = OnceLock::new();
        match kind {
            StateMachineKind::TaskStage => TASK_STAGE.get_or_init(build_task_stage),
            StateMachineKind::EventMilestone => EVENT_MILESTONE.get_or_init(build_event_milestone),
            StateMachineKind::CasePlan => CASE_PLAN.get_or_init(build_case_plan),
        }
    }

    pub fn kind(&self) -> StateMachineKind {
        self.kind
    }

    /// Transition fired when an exit criterion is satisfied.
    pub fn exit_transition(&self) -> Transition {
        self.exit_transition
    }

    /// Transition fired on children when their stage terminates.
    pub fn termination_transition(&self) -> Transition {
        self.termination_transition
    }

    /// Looks up `(current, transition)`; `history` resolves `Target::History`.
    pub fn transition(
        &self,
        current: State,
        history: State,
        transition: Transition,
    ) -> Option<TransitionOutcome> {
        let target = match self.edges.get(&(current, transition))? {
            Target::State(state) => *state,
            Target::History => history,
        };
        Some(TransitionOutcome {
            target,
            action: self.entry_action(target, transition),
        })
    }

    /// All table entries, for enumeration in tests and diagnostics.
    pub fn edges(&self) -> impl Iterator<Item = (State, Transition, Target)> + '_ {
        self.edges.iter().map(|((s, t), target)| (*s, *t, *target))
    }

    fn entry_action(&self, target: State, transition: Transition) -> EntryAction {
        match self.kind {
            StateMachineKind::TaskStage => match target {
                State::Available if transition == Transition::Create => EntryAction::Create,
                State::Active => match transition {
                    Transition::Start | Transition::ManualStart => EntryAction::Start,
                    Transition::Resume | Transition::ParentResume => EntryAction::Resume,
                    Transition::Reactivate => EntryAction::Reactivate,
                    _ => EntryAction::Nothing,
                },
                State::Suspended => EntryAction::Suspend,
                State::Completed => EntryAction::Complete { repeat: true },
                State::Terminated => EntryAction::Terminate { repeat: true },
                State::Failed => EntryAction::Fail,
                _ => EntryAction::Nothing,
            },
            StateMachineKind::EventMilestone => match target {
                State::Available if transition == Transition::Create => EntryAction::Create,
                State::Available => EntryAction::Resume,
                State::Suspended => EntryAction::Suspend,
                State::Completed => EntryAction::Complete { repeat: false },
                State::Terminated => EntryAction::Terminate { repeat: false },
                _ => EntryAction::Nothing,
            },
            StateMachineKind::CasePlan => match target {
                State::Active if transition == Transition::Create => EntryAction::Start,
                State::Active => EntryAction::Resume,
                State::Suspended => EntryAction::Suspend,
                State::Completed => EntryAction::Complete { repeat: false },
                State::Terminated => EntryAction::Terminate { repeat: false },
                State::Failed => EntryAction::Fail,
                _ => EntryAction::Nothing,
            },
        }
    }
}

struct TableBuilder {
    edges: BTreeMap<(State, Transition), Target>,
}

impl TableBuilder {
    fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    fn edge(mut self, from: &[State], transition: Transition, to: State) -> Self {
        for state in from {
            self.edges.insert((*state, transition), Target::State(to));
        }
        self
    }

    fn history(mut self, from: State, transition: Transition) -> Self {
        self.edges.insert((from, transition), Target::History);
        self
    }

    fn finish(
        self,
        kind: StateMachineKind,
        exit_transition: Transition,
        termination_transition: Transition,
    ) -> StateMachine {
        StateMachine {
            kind,
            edges: self.edges,
            exit_transition,
            termination_transition,
        }
    }
}

fn build_task_stage() -> StateMachine {
    use State::*;
    TableBuilder::new()
        .edge(&[Null], Transition::Create, Available)
        .edge(&[Available], Transition::Enable, Enabled)
        .edge(&[Available], Transition::Start, Active)
        .edge(&[Enabled], Transition::Disable, Disabled)
        .edge(&[Enabled], Transition::ManualStart, Active)
        .edge(&[Active], Transition::Suspend, Suspended)
        .edge(&[Active], Transition::Fault, Failed)
        .edge(&[Active], Transition::Complete, Completed)
        .edge(&[Active], Transition::Terminate, Terminated)
        .edge(
            &[Available, Active, Enabled, Disabled, Suspended, Failed],
            Transition::Exit,
            Terminated,
        )
        .edge(&[Suspended], Transition::Resume, Active)
        .edge(&[Failed], Transition::Reactivate, Active)
        .edge(&[Disabled], Transition::Reenable, Enabled)
        .edge(
            &[Available, Active, Enabled, Disabled],
            Transition::ParentSuspend,
            Suspended,
        )
        .history(Suspended, Transition::ParentResume)
        .finish(StateMachineKind::TaskStage, Transition::Exit, Transition::Exit)
}

fn build_event_milestone() -> StateMachine {
    use State::*;
    TableBuilder::new()
        .edge(&[Null], Transition::Create, Available)
        .edge(&[Available], Transition::Suspend, Suspended)
        .edge(&[Available], Transition::ParentSuspend, Suspended)
        .edge(&[Available], Transition::Terminate, Terminated)
        .edge(&[Available], Transition::Occur, Completed)
        .edge(&[Suspended], Transition::Resume, Available)
        .edge(&[Suspended], Transition::ParentResume, Available)
        .edge(
            &[Available, Suspended],
            Transition::ParentTerminate,
            Terminated,
        )
        .finish(
            StateMachineKind::EventMilestone,
            Transition::Exit,
            Transition::ParentTerminate,
        )
}

fn build_case_plan() -> StateMachine {
    use State::*;
    let finished = [Completed, Terminated, Failed, Suspended];
    TableBuilder::new()
        .edge(&[Null], Transition::Create, Active)
        .edge(&[Active], Transition::Suspend, Suspended)
        .edge(&[Active], Transition::Terminate, Terminated)
        .edge(&[Active], Transition::Complete, Completed)
        .edge(&[Active], Transition::Fault, Failed)
        .edge(&finished, Transition::Reactivate, Active)
        .edge(&finished, Transition::Close, Closed)
        .finish(
            StateMachineKind::CasePlan,
            Transition::Terminate,
            Transition::Exit,
        )
}

#[cfg(test)]
#[path = "tests/state_machine_tests.rs"]
mod tests;
