use super::*;
use crate::definition::CaseFileItemDefinition;
use crate::domain::{CaseAggregate, CaseEvent};
use crate::engine::state::Transition;
use crate::event_store::FileEventStore;
use crate::test_support::*;
use cqrs_es::CqrsFramework;
use serde_json::Map;
use tempfile::tempdir;

fn lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

fn project(events: &[CaseEvent]) -> CaseView {
    let mut view = CaseView::default();
    for (index, event) in events.iter().enumerate() {
        view.apply_event(CASE_ID, event, index as u64 + 1);
    }
    view
}

#[test]
fn test_definition_tree() {
    let definition = case_with(vec![ItemDefinition::new_stage(
        "a",
        "A",
        vec![ItemDefinition::new_human_task("t", "T")],
    )
    .with_planning_table(vec![ItemDefinition::new_human_task("d", "D")])])
    .with_case_file(vec![
        CaseFileItemDefinition::new("order").with_children(vec![CaseFileItemDefinition::new("amount")])
    ]);

    let tree = definition_tree(&definition);
    let lines = lines(&tree);

    assert_eq!(
        lines[0],
        format!("Test (def) fingerprint {}", definition.fingerprint())
    );
    assert_eq!(lines[1], "  file order");
    assert_eq!(lines[2], "  file order/amount");
    assert!(lines.contains(&"    Stage A (a)"));
    assert!(lines.contains(&"      HumanTask T (t)"));
    assert!(lines.contains(&"      HumanTask D (d) [discretionary]"));
}

#[tokio::test]
async fn test_case_tree_nests_children() {
    let mut harness = CaseHarness::start(review_stage_definition()).await;

    let tree = case_tree(harness.case());
    assert_eq!(
        lines(&tree),
        vec![
            "case case-1 (def)",
            "  CasePlan[Test.0] (Active)",
            "    Stage[A.0] (Active)",
            "      HumanTask[T.0] (Active)",
            "      Milestone[M.0] (Available)",
        ]
    );

    harness
        .transition("T", Transition::Complete)
        .await
        .expect("task completes");
    let tree = case_tree(harness.case());
    assert!(tree.contains("  CasePlan[Test.0] (Completed)"));
    assert!(tree.contains("      Milestone[M.0] (Completed)"));
}

#[tokio::test]
async fn test_view_tree_matches_case_tree() {
    let harness = CaseHarness::start(review_stage_definition()).await;
    let view = project(&harness.events);

    assert_eq!(view_tree(&view), case_tree(harness.case()));
    assert_eq!(view_tree(&CaseView::default()), "");
}

#[tokio::test]
async fn test_replay_cases_from_log() {
    let dir = tempdir().expect("temp dir");
    let log = dir.path().join("events.jsonl");
    let store = FileEventStore::new(log.clone(), dir.path().join("snapshot.json"), 0);
    let queries: Vec<Box<dyn cqrs_es::Query<CaseAggregate>>> = Vec::new();
    let cqrs = CqrsFramework::new(store, queries, test_services());
    cqrs.execute(CASE_ID, start_command(review_stage_definition(), Map::new()))
        .await
        .expect("case starts");

    let cases = replay_cases(&log, None).expect("replay");
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].id.as_str(), CASE_ID);
    assert!(replay_cases(&log, Some("other")).expect("replay").is_empty());
    assert!(replay_cases(&dir.path().join("missing.jsonl"), None)
        .expect("replay")
        .is_empty());
}
