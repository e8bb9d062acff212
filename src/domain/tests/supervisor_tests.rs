//! Tests for the case supervisor.

use super::*;
use crate::domain::actor::{send_command, CaseActorArgs};
use crate::domain::view::CaseView;
use crate::test_support::*;
use serde_json::Map;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::sync::{broadcast, watch, RwLock};

fn actor_args(dir: &TempDir, case_id: &str) -> CaseActorArgs {
    let (snapshot_tx, _) = watch::channel(CaseView::default());
    let (event_tx, _) = broadcast::channel(16);
    CaseActorArgs {
        case_id: CaseId::from(case_id),
        log_path: dir.path().join(case_id).join("events.jsonl"),
        snapshot_path: dir.path().join(case_id).join("snapshot.json"),
        snapshot_every: 0,
        view: Arc::new(RwLock::new(CaseView::default())),
        snapshot_tx,
        event_tx,
        services: test_services(),
        timers: None,
        debug_log_path: None,
    }
}

async fn wait_for_actor(
    supervisor: &ActorRef<SupervisorMsg>,
    case_id: &CaseId,
    not: Option<&ActorRef<CaseMessage>>,
) -> ActorRef<CaseMessage> {
    for _ in 0..50 {
        if let Some(actor) = lookup(supervisor, case_id).await.expect("lookup") {
            if not.is_none_or(|previous| previous.get_id() != actor.get_id()) {
                return actor;
            }
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
    panic!("no actor for case {}", case_id);
}

#[tokio::test]
async fn test_supervisor_spawns_and_finds_actors() {
    let dir = tempdir().expect("temp dir");
    let (supervisor, _handle) = CaseSupervisor::spawn(None, CaseSupervisor, ())
        .await
        .expect("supervisor spawn failed");
    let case_id = CaseId::from(CASE_ID);

    assert!(lookup(&supervisor, &case_id).await.expect("lookup").is_none());

    supervisor
        .send_message(SupervisorMsg::Spawn(actor_args(&dir, CASE_ID)))
        .expect("send failed");
    let actor = wait_for_actor(&supervisor, &case_id, None).await;

    let view = send_command(&actor, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");
    assert!(view.case_id().is_some());

    supervisor.stop(None);
}

#[tokio::test]
async fn test_supervisor_restarts_failed_actor() {
    let dir = tempdir().expect("temp dir");
    let (supervisor, _handle) = CaseSupervisor::spawn(None, CaseSupervisor, ())
        .await
        .expect("supervisor spawn failed");
    let case_id = CaseId::from(CASE_ID);
    supervisor
        .send_message(SupervisorMsg::Spawn(actor_args(&dir, CASE_ID)))
        .expect("send failed");
    let first = wait_for_actor(&supervisor, &case_id, None).await;
    send_command(&first, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");

    first.kill();
    let restarted = wait_for_actor(&supervisor, &case_id, Some(&first)).await;

    // The restarted actor recovers the case from its event log.
    let err = send_command(&restarted, start_command(review_stage_definition(), Map::new()))
        .await
        .expect_err("case already exists");
    assert!(err.to_string().contains("already started"));

    supervisor.stop(None);
}

#[tokio::test]
async fn test_stopped_actor_is_not_restarted() {
    let dir = tempdir().expect("temp dir");
    let (supervisor, _handle) = CaseSupervisor::spawn(None, CaseSupervisor, ())
        .await
        .expect("supervisor spawn failed");
    let case_id = CaseId::from(CASE_ID);
    supervisor
        .send_message(SupervisorMsg::Spawn(actor_args(&dir, CASE_ID)))
        .expect("send failed");
    wait_for_actor(&supervisor, &case_id, None).await;

    supervisor
        .send_message(SupervisorMsg::Stop(case_id.clone()))
        .expect("send failed");
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    assert!(lookup(&supervisor, &case_id).await.expect("lookup").is_none());
    supervisor.stop(None);
}
