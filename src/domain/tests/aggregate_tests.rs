use super::*;
use crate::definition::{CriterionDefinition, ItemDefinition};
use crate::domain::types::TimestampUtc;
use crate::engine::state::State;
use crate::test_support::*;
use cqrs_es::DomainEvent;

#[tokio::test]
async fn test_commands_before_start_are_rejected() {
    let aggregate = CaseAggregate::default();
    let services = test_services();

    let result = aggregate
        .handle(
            CaseCommand::MakePlanItemTransition {
                plan_item: "T".to_string(),
                transition: Transition::Complete,
            },
            &services,
        )
        .await;

    assert_eq!(result, Err(CaseError::NotInitialized));
    assert!(aggregate.case().is_none());
}

#[tokio::test]
async fn test_start_case_emits_definition_first() {
    let aggregate = CaseAggregate::default();
    let services = test_services();

    let events = aggregate
        .handle(start_command(review_stage_definition(), Map::new()), &services)
        .await
        .expect("case starts");

    match &events[0] {
        CaseEvent::CaseDefinitionApplied {
            case_id,
            root_case_id,
            parent_case_id,
            created_at,
            ..
        } => {
            assert_eq!(case_id.as_str(), CASE_ID);
            assert_eq!(root_case_id, case_id);
            assert_eq!(*parent_case_id, None);
            assert_eq!(*created_at, TimestampUtc(fixed_now()));
        }
        other => panic!("unexpected first event {:?}", other),
    }
    match &events[1] {
        CaseEvent::PlanItemCreated {
            plan_item_id,
            item_type,
            stage_id,
            ..
        } => {
            assert_eq!(plan_item_id.as_str(), CASE_ID);
            assert_eq!(*item_type, PlanItemType::CasePlan);
            assert_eq!(*stage_id, None);
        }
        other => panic!("unexpected second event {:?}", other),
    }
}

#[tokio::test]
async fn test_sub_case_keeps_its_root() {
    let aggregate = CaseAggregate::default();
    let command = CaseCommand::StartCase {
        case_id: CaseId::from("child"),
        definition: Arc::new(review_stage_definition()),
        input: Map::new(),
        team: vec![TeamMember::new("ada", &["owner"])],
        parent_case_id: Some(CaseId::from("parent")),
        root_case_id: Some(CaseId::from("root")),
    };

    let events = aggregate
        .handle(command, &test_services())
        .await
        .expect("case starts");

    assert!(matches!(
        &events[0],
        CaseEvent::CaseDefinitionApplied { parent_case_id: Some(parent), root_case_id, team, .. }
            if parent.as_str() == "parent" && root_case_id.as_str() == "root" && team.len() == 1
    ));
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let mut harness = CaseHarness::start(review_stage_definition()).await;

    let err = harness
        .execute(start_command(review_stage_definition(), Map::new()))
        .await
        .expect_err("already running");

    assert_eq!(err, CaseError::AlreadyStarted);
}

#[tokio::test]
async fn test_invalid_definition_is_rejected_on_start() {
    let broken = case_with(vec![ItemDefinition::new_human_task("t", "T")
        .with_entry(CriterionDefinition::new("c").on_plan_item("ghost", Transition::Complete))]);

    let result = CaseAggregate::default()
        .handle(start_command(broken, Map::new()), &test_services())
        .await;

    assert!(matches!(result, Err(CaseError::InvalidDefinition { .. })));
}

#[tokio::test]
async fn test_rejected_command_leaves_case_untouched() {
    let mut harness = CaseHarness::start(review_stage_definition()).await;
    let before = harness.case().clone();
    let recorded = harness.events.len();

    let err = harness
        .transition("nothing", Transition::Complete)
        .await
        .expect_err("unknown item");

    assert!(matches!(err, CaseError::NotFound { .. }));
    assert_eq!(harness.case(), &before);
    assert_eq!(harness.events.len(), recorded);
}

#[tokio::test]
async fn test_bad_event_breaks_case() {
    let mut harness = CaseHarness::start(review_stage_definition()).await;

    harness.aggregate.apply(CaseEvent::PlanItemTransitioned {
        plan_item_id: PlanItemId::from("ghost"),
        transition: Transition::Complete,
        state: State::Completed,
        history_state: State::Active,
    });

    assert!(matches!(harness.aggregate.state, CaseState::Broken { .. }));
    assert!(harness.aggregate.case().is_none());
    let err = harness
        .transition("T", Transition::Complete)
        .await
        .expect_err("broken case refuses commands");
    assert!(matches!(err, CaseError::RecoveryInconsistency { .. }));
    assert!(err.to_string().contains("PlanItemTransitioned"));

    // Later events leave the failure in place.
    harness.aggregate.apply(CaseEvent::TeamMemberRemoved {
        user_id: "ada".to_string(),
    });
    assert!(matches!(harness.aggregate.state, CaseState::Broken { .. }));
}

#[tokio::test]
async fn test_stream_without_start_breaks_case() {
    let mut aggregate = CaseAggregate::default();

    aggregate.apply(CaseEvent::TeamMemberRemoved {
        user_id: "ada".to_string(),
    });

    assert!(matches!(aggregate.state, CaseState::Broken { .. }));
    let result = aggregate
        .handle(start_command(review_stage_definition(), Default::default()), &test_services())
        .await;
    assert!(matches!(result, Err(CaseError::RecoveryInconsistency { .. })));
}

#[tokio::test]
async fn test_snapshot_state_survives_serialization() {
    let mut harness = CaseHarness::start(review_stage_definition()).await;
    harness
        .transition("T", Transition::Complete)
        .await
        .expect("task completes");

    let json = serde_json::to_string(&harness.aggregate).expect("serialize");
    let restored: CaseAggregate = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(restored.case(), Some(harness.case()));
    assert_eq!(CaseAggregate::aggregate_type(), "case");
}

#[tokio::test]
async fn test_event_metadata() {
    let harness = CaseHarness::start(review_stage_definition()).await;

    for event in &harness.events {
        assert_eq!(event.event_version(), "1");
        assert!(!event.event_type().is_empty());
    }
    assert_eq!(harness.events[0].event_type(), "CaseDefinitionApplied");
    assert_eq!(harness.events[0].plan_item_id(), None);
    let created = harness
        .events
        .iter()
        .find(|event| event.event_type() == "PlanItemCreated")
        .expect("plan items created");
    assert!(created.plan_item_id().is_some());
}
