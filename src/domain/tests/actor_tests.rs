//! Tests for the case actor.

use super::*;
use crate::definition::{Expression, ItemDefinition};
use crate::domain::types::PlanItemId;
use crate::engine::state::{State, Transition};
use crate::test_support::*;
use serde_json::Map;
use tempfile::{tempdir, TempDir};

fn actor_args(dir: &TempDir) -> CaseActorArgs {
    let log_path = dir.path().join("events.jsonl");
    let initial = bootstrap_view_from_events(&log_path, CASE_ID);
    let (snapshot_tx, _) = watch::channel(initial.clone());
    let (event_tx, _) = broadcast::channel(64);
    CaseActorArgs {
        case_id: CaseId::from(CASE_ID),
        log_path,
        snapshot_path: dir.path().join("snapshot.json"),
        snapshot_every: 5,
        view: Arc::new(RwLock::new(initial)),
        snapshot_tx,
        event_tx,
        services: test_services(),
        timers: None,
        debug_log_path: Some(dir.path().join("debug.jsonl")),
    }
}

async fn get_view(actor: &ActorRef<CaseMessage>) -> CaseView {
    let (tx, rx) = oneshot::channel();
    actor
        .send_message(CaseMessage::GetView(tx))
        .expect("send failed");
    rx.await.expect("receive failed")
}

#[tokio::test]
async fn test_actor_handles_command() {
    let dir = tempdir().expect("temp dir");
    let args = actor_args(&dir);
    let mut snapshot_rx = args.snapshot_tx.subscribe();

    let (actor, _handle) = CaseActor::spawn(None, CaseActor, args)
        .await
        .expect("actor spawn failed");

    let view = send_command(&actor, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");
    assert_eq!(view.case_state(), Some(State::Active));

    snapshot_rx.changed().await.expect("snapshot changed");
    assert_eq!(snapshot_rx.borrow().case_name(), Some("Test"));

    let view = send_command(
        &actor,
        CaseCommand::MakePlanItemTransition {
            plan_item: "T".to_string(),
            transition: Transition::Complete,
        },
    )
    .await
    .expect("task completes");
    assert!(view.is_finished());

    actor.stop(None);
}

#[tokio::test]
async fn test_actor_reports_rejections() {
    let dir = tempdir().expect("temp dir");
    let (actor, _handle) = CaseActor::spawn(None, CaseActor, actor_args(&dir))
        .await
        .expect("actor spawn failed");

    let (tx, rx) = oneshot::channel();
    actor
        .send_message(CaseMessage::Command(
            Box::new(CaseCommand::RemoveTeamMember {
                user_id: "ada".to_string(),
            }),
            tx,
        ))
        .expect("send failed");
    let result = rx.await.expect("receive failed");
    assert!(matches!(result, Err(CaseError::NotInitialized)));

    let view = get_view(&actor).await;
    assert!(view.case_id().is_none());

    actor.stop(None);
}

#[tokio::test]
async fn test_get_case_loads_from_store() {
    let dir = tempdir().expect("temp dir");
    let (actor, _handle) = CaseActor::spawn(None, CaseActor, actor_args(&dir))
        .await
        .expect("actor spawn failed");

    let (tx, rx) = oneshot::channel();
    actor
        .send_message(CaseMessage::GetCase(tx))
        .expect("send failed");
    assert_eq!(rx.await.expect("receive failed"), Ok(None));

    send_command(&actor, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");

    let (tx, rx) = oneshot::channel();
    actor
        .send_message(CaseMessage::GetCase(tx))
        .expect("send failed");
    let case = rx
        .await
        .expect("receive failed")
        .expect("load")
        .expect("case exists");
    assert_eq!(case.id.as_str(), CASE_ID);
    assert!(case.items.find_by_name("T").is_some());

    actor.stop(None);
}

#[tokio::test]
async fn test_bootstrap_view_from_events() {
    let dir = tempdir().expect("temp dir");
    let (actor, handle) = CaseActor::spawn(None, CaseActor, actor_args(&dir))
        .await
        .expect("actor spawn failed");
    let live = send_command(&actor, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");
    actor.stop(None);
    handle.await.expect("actor stopped");

    let view = bootstrap_view_from_events(&dir.path().join("events.jsonl"), CASE_ID);

    assert_eq!(view.plan_items(), live.plan_items());
    assert_eq!(view.last_event_sequence(), live.last_event_sequence());
    assert!(bootstrap_view_from_events(&dir.path().join("missing.jsonl"), CASE_ID)
        .case_id()
        .is_none());
}

#[tokio::test]
async fn test_timer_fires_through_mailbox() {
    let dir = tempdir().expect("temp dir");
    // The fixed test clock lies in the past, so the timer is due right away.
    let (actor, _handle) = CaseActor::spawn(None, CaseActor, actor_args(&dir))
        .await
        .expect("actor spawn failed");

    let definition = case_with(vec![
        ItemDefinition::new_timer_event("tm", "Timer", Expression::new("constant", "PT1S")),
        ItemDefinition::new_human_task("t", "T"),
    ]);
    send_command(&actor, start_command(definition, Map::new()))
        .await
        .expect("case starts");

    let mut occurred = false;
    for _ in 0..50 {
        let view = get_view(&actor).await;
        if view.item_by_name("Timer").map(|item| item.state) == Some(State::Completed) {
            occurred = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(occurred, "timer never fired");

    actor.stop(None);
}

#[tokio::test]
async fn test_timer_for_other_case_is_ignored() {
    let dir = tempdir().expect("temp dir");
    let (actor, _handle) = CaseActor::spawn(None, CaseActor, actor_args(&dir))
        .await
        .expect("actor spawn failed");
    send_command(&actor, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");
    let before = get_view(&actor).await.last_event_sequence();

    actor
        .send_message(CaseMessage::TimerFired(TimerFired {
            case_id: CaseId::from("other"),
            plan_item: PlanItemId::from("timer"),
            moment: crate::domain::types::TimestampUtc(fixed_now()),
        }))
        .expect("send failed");

    assert_eq!(get_view(&actor).await.last_event_sequence(), before);
    actor.stop(None);
}

#[test]
fn test_map_aggregate_error() {
    let user = map_aggregate_error(AggregateError::UserError(CaseError::AlreadyStarted));
    assert_eq!(user, CaseError::AlreadyStarted);

    let conflict = map_aggregate_error(AggregateError::AggregateConflict);
    assert!(matches!(conflict, CaseError::ConcurrencyConflict { .. }));
}
