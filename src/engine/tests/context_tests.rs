use super::*;
use crate::definition::{CaseFileItemDefinition, CriterionDefinition, Expression, ItemDefinition};
use crate::test_support::*;

fn two_tasks() -> crate::definition::CaseDefinition {
    case_with(vec![
        ItemDefinition::new_human_task("t", "T"),
        ItemDefinition::new_human_task("u", "U"),
    ])
}

#[tokio::test]
async fn test_transition_lock_refuses_other_transitions() {
    let harness = CaseHarness::start(two_tasks()).await;
    let id = harness.item("T").id.clone();
    let mut ctx = CaseContext::new(harness.case().clone(), &harness.services);

    assert!(ctx.prepare_transition(&id, Transition::Complete));
    assert!(!ctx.prepare_transition(&id, Transition::Fault));
    assert!(!ctx.make_transition(&id, Transition::Fault).expect("no error"));
    assert!(ctx.make_transition(&id, Transition::Complete).expect("completes"));
    assert!(!ctx.make_transition(&id, Transition::Complete).expect("no-op"));

    let (case, events) = ctx.into_parts();
    let item = case.item(&id).expect("task");
    assert_eq!(item.state, State::Completed);
    assert_eq!(transitions_of(&events, item), vec![Transition::Complete]);
}

#[tokio::test]
async fn test_unknown_table_entry_is_silent() {
    let harness = CaseHarness::start(two_tasks()).await;
    let id = harness.item("T").id.clone();
    let mut ctx = CaseContext::new(harness.case().clone(), &harness.services);

    assert!(!ctx.make_transition(&id, Transition::Resume).expect("no error"));
    assert!(!ctx.make_transition(&id, Transition::None).expect("no error"));
    assert!(!ctx
        .make_transition(&PlanItemId::from("ghost"), Transition::Complete)
        .expect("no error"));
    assert!(ctx.events().is_empty());
}

#[tokio::test]
async fn test_start_creates_children_in_definition_order() {
    let harness = CaseHarness::start(two_tasks()).await;
    let case = harness.case();
    let plan = case.case_plan().expect("case plan");

    assert_eq!(plan.state, State::Active);
    let names: Vec<&str> = plan
        .children()
        .iter()
        .filter_map(|id| case.item(id))
        .map(|item| item.name.as_str())
        .collect();
    assert_eq!(names, vec!["T", "U"]);
    assert_eq!(harness.state("T"), State::Active);
    assert_eq!(harness.state("U"), State::Active);
}

#[tokio::test]
async fn test_request_transition_requires_active_stage() {
    let definition = case_with(vec![ItemDefinition::new_stage(
        "s",
        "S",
        vec![ItemDefinition::new_human_task("t", "T")],
    )]);
    let mut harness = CaseHarness::start(definition).await;
    harness
        .transition("S", Transition::Suspend)
        .await
        .expect("stage suspends");
    assert_eq!(harness.state("T"), State::Suspended);

    let err = harness
        .transition("T", Transition::Complete)
        .await
        .expect_err("stage is suspended");
    assert!(matches!(err, CaseError::TransitionDenied { .. }));
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let mut harness = CaseHarness::start(two_tasks()).await;
    let err = harness
        .transition("nope", Transition::Complete)
        .await
        .expect_err("unknown item");
    assert!(matches!(err, CaseError::NotFound { .. }));
}

#[tokio::test]
async fn test_early_bird_entry_is_remembered() {
    // X sits before S in the plan, so it completes while S's child Y does
    // not exist yet. Y still starts once its stage starts.
    let y = ItemDefinition::new_human_task("y", "Y")
        .with_entry(CriterionDefinition::new("c_y").on_plan_item("x", Transition::Complete));
    let s = ItemDefinition::new_stage("s", "S", vec![y]).with_entry(
        CriterionDefinition::new("c_s").on_plan_item("u", Transition::Occur),
    );
    let definition = case_with(vec![
        ItemDefinition::new_human_task("x", "X"),
        ItemDefinition::new_user_event("u", "U"),
        s,
    ]);
    let mut harness = CaseHarness::start(definition).await;
    harness
        .transition("X", Transition::Complete)
        .await
        .expect("x completes");
    assert_eq!(harness.state("S"), State::Available);

    harness
        .transition("U", Transition::Occur)
        .await
        .expect("user event occurs");

    assert_eq!(harness.state("S"), State::Active);
    assert_eq!(harness.state("Y"), State::Active);
}

#[tokio::test]
async fn test_exit_criterion_terminates_target() {
    let t = ItemDefinition::new_human_task("t", "T")
        .with_exit(CriterionDefinition::new("c_exit").on_plan_item("u", Transition::Occur));
    let definition = case_with(vec![t, ItemDefinition::new_user_event("u", "U")]);
    let mut harness = CaseHarness::start(definition).await;

    harness
        .transition("U", Transition::Occur)
        .await
        .expect("occurs");

    assert_eq!(harness.state("T"), State::Terminated);
    assert_eq!(
        transitions_of(&harness.events, harness.item("T")),
        vec![Transition::Create, Transition::Start, Transition::Exit]
    );
}

#[tokio::test]
async fn test_if_part_blocks_entry() {
    let gated = ItemDefinition::new_human_task("g", "Gated").with_entry(
        CriterionDefinition::new("c_g")
            .on_plan_item("u", Transition::Occur)
            .with_if(Expression::new("constant", "false")),
    );
    let definition = case_with(vec![gated, ItemDefinition::new_user_event("u", "U")]);
    let mut harness = CaseHarness::start(definition).await;

    harness
        .transition("U", Transition::Occur)
        .await
        .expect("occurs");

    assert_eq!(harness.state("Gated"), State::Available);
}

#[tokio::test]
async fn test_entry_criterion_firing_again_repeats() {
    let counted = ItemDefinition::new_human_task("c", "Counted")
        .repeating_when(Expression::new("constant", "true"))
        .with_entry(
            CriterionDefinition::new("c_c").on_case_file("signal", CaseFileItemTransition::Replace),
        );
    let definition = case_with(vec![counted])
        .with_case_file(vec![CaseFileItemDefinition::new("signal")]);
    let mut input = serde_json::Map::new();
    input.insert("signal".to_string(), serde_json::json!(0));
    let mut harness = CaseHarness::start_with(definition, input).await;
    assert_eq!(harness.state("Counted"), State::Available);

    for round in 1..=3 {
        harness
            .execute(crate::domain::cqrs::CaseCommand::ReplaceCaseFileItem {
                path: "signal".to_string(),
                value: serde_json::json!(round),
            })
            .await
            .expect("replace");
    }

    let instances = harness.instances("Counted");
    let indexes: Vec<u32> = instances.iter().map(|item| item.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert!(instances.iter().all(|item| item.state == State::Active));
    // Only the newest instance still listens.
    assert!(instances[0].entry_criteria.is_empty());
    assert!(instances[1].entry_criteria.is_empty());
    assert_eq!(instances[2].entry_criteria.len(), 1);
}

#[tokio::test]
async fn test_false_repetition_rule_never_repeats() {
    let once = ItemDefinition::new_human_task("o", "Once")
        .repeating_when(Expression::new("constant", "false"));
    let mut harness = CaseHarness::start(case_with(vec![
        once,
        ItemDefinition::new_human_task("keep", "Keep"),
    ]))
    .await;

    for _ in 0..5 {
        let id = harness.item("Once").id.clone();
        let mut ctx = CaseContext::new(harness.case().clone(), &harness.services);
        ctx.repeat(&id).expect("repeat runs");
        assert!(ctx.events().is_empty());
    }
    harness
        .transition("Once", Transition::Complete)
        .await
        .expect("completes");

    assert_eq!(harness.instances("Once").len(), 1);
}

/// Counts rule evaluations; every condition is false.
struct CountingEvaluator(std::sync::Arc<std::sync::atomic::AtomicUsize>);

impl crate::expression::ExpressionEvaluator for CountingEvaluator {
    fn language(&self) -> &'static str {
        "counting"
    }

    fn evaluate_condition(
        &self,
        _body: &str,
        _context: &EvaluationContext<'_>,
    ) -> Result<bool, CaseError> {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(false)
    }

    fn evaluate_duration(
        &self,
        body: &str,
        _context: &EvaluationContext<'_>,
    ) -> Result<chrono::Duration, CaseError> {
        Err(CaseError::expression(format!("'{}' is not a duration", body)))
    }
}

#[tokio::test]
async fn test_repeated_instance_evaluates_manual_activation_once() {
    let evaluations = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut registry = crate::expression::EvaluatorRegistry::default();
    registry.register(Box::new(CountingEvaluator(std::sync::Arc::clone(&evaluations))));
    let mut task = ItemDefinition::new_human_task("r", "Again")
        .repeating_when(Expression::new("constant", "true"));
    task.control.manual_activation_rule = Some(Rule {
        condition: Some(Expression::new("counting", "manual")),
    });
    let mut harness = CaseHarness {
        aggregate: crate::domain::cqrs::CaseAggregate::default(),
        services: CaseServices::new(registry)
            .with_clock(crate::domain::services::CaseClock::fixed(fixed_now())),
        events: Vec::new(),
    };
    harness
        .execute(start_command(case_with(vec![task]), Default::default()))
        .await
        .expect("case starts");
    assert_eq!(evaluations.load(std::sync::atomic::Ordering::SeqCst), 1);

    for _ in 0..2 {
        let latest = harness
            .instances("Again")
            .into_iter()
            .max_by_key(|item| item.index)
            .map(|item| item.id.to_string())
            .expect("instance");
        harness
            .transition(&latest, Transition::Complete)
            .await
            .expect("completes");
    }

    let instances = harness.instances("Again");
    assert_eq!(instances.len(), 3);
    assert_eq!(
        evaluations.load(std::sync::atomic::Ordering::SeqCst),
        instances.len()
    );
    for item in instances {
        let starts = transitions_of(&harness.events, item)
            .into_iter()
            .filter(|transition| *transition == Transition::Start)
            .count();
        assert_eq!(starts, 1, "{}", item.describe());
    }
}

#[tokio::test]
async fn test_timer_fires_only_for_pending_moment() {
    let timer = ItemDefinition::new_timer_event("tm", "Timer", Expression::new("constant", "PT1H"));
    let after = ItemDefinition::new_human_task("a", "After")
        .with_entry(CriterionDefinition::new("c_a").on_plan_item("tm", Transition::Occur));
    let mut harness = CaseHarness::start(case_with(vec![timer, after])).await;
    let moment = fixed_now() + chrono::Duration::hours(1);
    assert_eq!(harness.item("Timer").pending_timer(), Some(moment));

    let id = harness.item("Timer").id.clone();
    let stale = harness
        .execute(crate::domain::cqrs::CaseCommand::FireTimer {
            plan_item: id.clone(),
            moment: TimestampUtc(fixed_now()),
        })
        .await
        .expect("stale timer is not an error");
    assert!(stale.is_empty());

    harness
        .execute(crate::domain::cqrs::CaseCommand::FireTimer {
            plan_item: id,
            moment: TimestampUtc(moment),
        })
        .await
        .expect("timer fires");
    assert_eq!(harness.state("Timer"), State::Completed);
    assert_eq!(harness.item("Timer").pending_timer(), None);
    assert_eq!(harness.state("After"), State::Active);
    assert!(!harness
        .events
        .iter()
        .any(|event| matches!(event, CaseEvent::TimerCanceled { .. })));
}

#[tokio::test]
async fn test_timer_beyond_calendar_is_rejected() {
    use cqrs_es::Aggregate;
    let timer = ItemDefinition::new_timer_event(
        "tm",
        "Timer",
        Expression::new("constant", "P100000000D"),
    );
    let aggregate = crate::domain::cqrs::CaseAggregate::default();

    let result = aggregate
        .handle(start_command(case_with(vec![timer]), Default::default()), &test_services())
        .await;

    assert!(matches!(result, Err(CaseError::Expression { .. })));
    assert!(aggregate.case().is_none());
}

#[tokio::test]
async fn test_live_state_matches_replay() {
    let mut harness = CaseHarness::start(review_stage_definition()).await;
    harness
        .transition("T", Transition::Complete)
        .await
        .expect("completes");

    let replayed = harness.replayed();
    for item in harness.case().items.iter() {
        let other = replayed.item(&item.id).expect("replayed item");
        assert_eq!(fingerprint(item), fingerprint(other), "{}", item.describe());
    }
    assert_eq!(replayed.sentry, harness.case().sentry);
}
