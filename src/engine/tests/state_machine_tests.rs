use super::*;
use proptest::prelude::*;
use State::*;

fn expected_task_stage() -> Vec<(State, Transition)> {
    let mut pairs = vec![
        (Null, Transition::Create),
        (Available, Transition::Enable),
        (Available, Transition::Start),
        (Enabled, Transition::Disable),
        (Enabled, Transition::ManualStart),
        (Active, Transition::Suspend),
        (Active, Transition::Fault),
        (Active, Transition::Complete),
        (Active, Transition::Terminate),
        (Suspended, Transition::Resume),
        (Failed, Transition::Reactivate),
        (Disabled, Transition::Reenable),
        (Suspended, Transition::ParentResume),
    ];
    for s in [Available, Active, Enabled, Disabled, Suspended, Failed] {
        pairs.push((s, Transition::Exit));
    }
    for s in [Available, Active, Enabled, Disabled] {
        pairs.push((s, Transition::ParentSuspend));
    }
    pairs
}

fn expected_event_milestone() -> Vec<(State, Transition)> {
    vec![
        (Null, Transition::Create),
        (Available, Transition::Suspend),
        (Available, Transition::ParentSuspend),
        (Available, Transition::Terminate),
        (Available, Transition::Occur),
        (Suspended, Transition::Resume),
        (Suspended, Transition::ParentResume),
        (Available, Transition::ParentTerminate),
        (Suspended, Transition::ParentTerminate),
    ]
}

fn expected_case_plan() -> Vec<(State, Transition)> {
    let mut pairs = vec![
        (Null, Transition::Create),
        (Active, Transition::Suspend),
        (Active, Transition::Terminate),
        (Active, Transition::Complete),
        (Active, Transition::Fault),
    ];
    for s in [Completed, Terminated, Failed, Suspended] {
        pairs.push((s, Transition::Reactivate));
        pairs.push((s, Transition::Close));
    }
    pairs
}

fn expected(kind: StateMachineKind) -> Vec<(State, Transition)> {
    match kind {
        StateMachineKind::TaskStage => expected_task_stage(),
        StateMachineKind::EventMilestone => expected_event_milestone(),
        StateMachineKind::CasePlan => expected_case_plan(),
    }
}

const KINDS: [StateMachineKind; 3] = [
    StateMachineKind::TaskStage,
    StateMachineKind::EventMilestone,
    StateMachineKind::CasePlan,
];

#[test]
fn test_tables_are_closed_over_all_pairs() {
    for kind in KINDS {
        let machine = StateMachine::for_kind(kind);
        let allowed = expected(kind);
        for state in State::ALL {
            for transition in Transition::ALL {
                let outcome = machine.transition(state, Active, transition);
                assert_eq!(
                    outcome.is_some(),
                    allowed.contains(&(state, transition)),
                    "{:?}: ({:?}, {:?})",
                    kind,
                    state,
                    transition
                );
            }
        }
        assert_eq!(machine.edges().count(), allowed.len(), "{:?}", kind);
    }
}

#[test]
fn test_parent_resume_targets_history_state() {
    let machine = StateMachine::for_kind(StateMachineKind::TaskStage);
    let outcome = machine
        .transition(Suspended, Enabled, Transition::ParentResume)
        .expect("edge");
    assert_eq!(outcome.target, Enabled);
    assert_eq!(outcome.action, EntryAction::Nothing);

    let outcome = machine
        .transition(Suspended, Active, Transition::ParentResume)
        .expect("edge");
    assert_eq!(outcome.target, Active);
    assert_eq!(outcome.action, EntryAction::Resume);
}

#[test]
fn test_entry_actions() {
    let task = StateMachine::for_kind(StateMachineKind::TaskStage);
    assert_eq!(
        task.transition(Null, Null, Transition::Create).map(|o| o.action),
        Some(EntryAction::Create)
    );
    assert_eq!(
        task.transition(Enabled, Available, Transition::ManualStart)
            .map(|o| o.action),
        Some(EntryAction::Start)
    );
    assert_eq!(
        task.transition(Active, Available, Transition::Complete)
            .map(|o| o.action),
        Some(EntryAction::Complete { repeat: true })
    );
    assert_eq!(
        task.transition(Failed, Active, Transition::Reactivate)
            .map(|o| o.action),
        Some(EntryAction::Reactivate)
    );

    let milestone = StateMachine::for_kind(StateMachineKind::EventMilestone);
    assert_eq!(
        milestone
            .transition(Available, Null, Transition::Occur)
            .map(|o| o.action),
        Some(EntryAction::Complete { repeat: false })
    );
    assert_eq!(
        milestone
            .transition(Suspended, Available, Transition::Resume)
            .map(|o| o.action),
        Some(EntryAction::Resume)
    );

    let plan = StateMachine::for_kind(StateMachineKind::CasePlan);
    assert_eq!(
        plan.transition(Null, Null, Transition::Create).map(|o| o.action),
        Some(EntryAction::Start)
    );
    assert_eq!(
        plan.transition(Suspended, Active, Transition::Reactivate)
            .map(|o| o.action),
        Some(EntryAction::Resume)
    );
}

#[test]
fn test_exit_and_termination_transitions() {
    let task = StateMachine::for_kind(StateMachineKind::TaskStage);
    assert_eq!(task.exit_transition(), Transition::Exit);
    assert_eq!(task.termination_transition(), Transition::Exit);

    let milestone = StateMachine::for_kind(StateMachineKind::EventMilestone);
    assert_eq!(milestone.exit_transition(), Transition::Exit);
    assert_eq!(milestone.termination_transition(), Transition::ParentTerminate);

    let plan = StateMachine::for_kind(StateMachineKind::CasePlan);
    assert_eq!(plan.exit_transition(), Transition::Terminate);
    assert_eq!(plan.termination_transition(), Transition::Exit);
}

proptest! {
    #[test]
    fn prop_lookup_matches_enumerated_edges(
        kind_index in 0usize..3,
        state_index in 0usize..State::ALL.len(),
        transition_index in 0usize..Transition::ALL.len(),
        history_index in 0usize..State::ALL.len(),
    ) {
        let machine = StateMachine::for_kind(KINDS[kind_index]);
        let state = State::ALL[state_index];
        let transition = Transition::ALL[transition_index];
        let history = State::ALL[history_index];
        let listed = machine.edges().any(|(s, t, _)| s == state && t == transition);
        let outcome = machine.transition(state, history, transition);
        prop_assert_eq!(outcome.is_some(), listed);
        if let Some(outcome) = outcome {
            if transition != Transition::ParentResume || machine.kind() != StateMachineKind::TaskStage {
                prop_assert_ne!(outcome.target, State::Null);
            }
        }
    }
}
