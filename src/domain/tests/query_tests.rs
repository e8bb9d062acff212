use super::*;
use crate::definition::{Expression, ItemDefinition};
use crate::domain::types::{PlanItemId, TimestampUtc};
use crate::test_support::*;
use std::collections::HashMap;
use std::sync::Mutex;
use tempfile::tempdir;

fn envelopes(events: &[CaseEvent]) -> Vec<EventEnvelope<CaseAggregate>> {
    events
        .iter()
        .enumerate()
        .map(|(index, event)| EventEnvelope {
            aggregate_id: CASE_ID.to_string(),
            sequence: index + 1,
            payload: event.clone(),
            metadata: HashMap::new(),
        })
        .collect()
}

#[derive(Default)]
struct RecordingTimers {
    calls: Mutex<Vec<String>>,
}

impl TimerSubstrate for RecordingTimers {
    fn schedule(&self, case_id: &CaseId, plan_item: &PlanItemId, moment: TimestampUtc) {
        self.calls.lock().expect("lock").push(format!(
            "schedule {} {} {}",
            case_id,
            plan_item,
            moment.to_rfc3339()
        ));
    }

    fn cancel(&self, case_id: &CaseId, plan_item: &PlanItemId) {
        self.calls
            .lock()
            .expect("lock")
            .push(format!("cancel {} {}", case_id, plan_item));
    }
}

#[tokio::test]
async fn test_case_query_updates_projection_and_subscribers() {
    let harness = CaseHarness::start(review_stage_definition()).await;
    let projection = Arc::new(RwLock::new(CaseView::default()));
    let (snapshot_tx, snapshot_rx) = watch::channel(CaseView::default());
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let query = CaseQuery::new(projection.clone(), snapshot_tx, event_tx);

    query.dispatch(CASE_ID, &envelopes(&harness.events)).await;

    let view = projection.read().await;
    assert_eq!(view.case_state(), Some(crate::engine::state::State::Active));
    assert_eq!(view.last_event_sequence(), harness.events.len() as u64);
    assert_eq!(snapshot_rx.borrow().plan_items(), view.plan_items());

    let first = event_rx.recv().await.expect("broadcast");
    assert_eq!(first.aggregate_id, CASE_ID);
    assert_eq!(first.sequence, 1);
    assert_eq!(first.event, harness.events[0]);
}

#[tokio::test]
async fn test_case_query_without_subscribers() {
    let harness = CaseHarness::start(review_stage_definition()).await;
    let projection = Arc::new(RwLock::new(CaseView::default()));
    let (snapshot_tx, _snapshot_rx) = watch::channel(CaseView::default());
    let (event_tx, event_rx) = broadcast::channel(4);
    drop(event_rx);
    let query = CaseQuery::new(projection.clone(), snapshot_tx, event_tx);

    query.dispatch(CASE_ID, &envelopes(&harness.events)).await;

    assert!(projection.read().await.case_id().is_some());
}

#[tokio::test]
async fn test_timer_query_forwards_intents() {
    let definition = crate::test_support::case_with(vec![
        ItemDefinition::new_timer_event("tm", "Timer", Expression::new("constant", "PT1M")),
        ItemDefinition::new_human_task("t", "T"),
    ]);
    let harness = CaseHarness::start(definition).await;
    let timer = harness.item("Timer").id.clone();
    let timers = Arc::new(RecordingTimers::default());
    let query = TimerQuery::new(timers.clone());

    let mut events = harness.events.clone();
    events.push(CaseEvent::TimerCanceled {
        plan_item_id: timer.clone(),
    });
    query.dispatch(CASE_ID, &envelopes(&events)).await;

    let moment = TimestampUtc(fixed_now() + chrono::Duration::minutes(1));
    assert_eq!(
        *timers.calls.lock().expect("lock"),
        vec![
            format!("schedule {} {} {}", CASE_ID, timer, moment.to_rfc3339()),
            format!("cancel {} {}", CASE_ID, timer),
        ]
    );
}

#[tokio::test]
async fn test_debug_log_query_copies_events() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("debug.jsonl");
    let harness = CaseHarness::start(review_stage_definition()).await;
    let logger = Arc::new(StructuredLogger::new(CASE_ID, &path).expect("logger"));
    let query = DebugLogQuery::new(logger);

    query.dispatch(CASE_ID, &envelopes(&harness.events)).await;

    let content = std::fs::read_to_string(&path).expect("read log");
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), harness.events.len());
    assert_eq!(lines[0]["event"]["type"], "CaseEvent");
    assert_eq!(lines[0]["event"]["sequence"], 1);
}
