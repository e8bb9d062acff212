use super::*;
use crate::test_support::fixed_now;

fn item(id: &str, name: &str, item_type: PlanItemType, stage: Option<&str>) -> PlanItem {
    PlanItem::new(
        PlanItemId::from(id),
        id,
        name,
        item_type,
        stage.map(PlanItemId::from),
        0,
        false,
        fixed_now(),
    )
}

fn registry() -> PlanItemRegistry {
    let mut registry = PlanItemRegistry::default();
    registry.insert(item("cp", "Case", PlanItemType::CasePlan, None));
    registry.insert(item("outer", "Outer", PlanItemType::Stage, Some("cp")));
    registry.insert(item("inner", "Inner", PlanItemType::Stage, Some("outer")));
    registry.insert(item("task", "Task", PlanItemType::HumanTask, Some("inner")));
    for (stage, child) in [("cp", "outer"), ("outer", "inner"), ("inner", "task")] {
        if let Some(children) = registry
            .get_mut(&PlanItemId::from(stage))
            .and_then(PlanItem::children_mut)
        {
            children.push(PlanItemId::from(child));
        }
    }
    registry
}

#[test]
fn test_lock_accepts_same_transition_only() {
    let mut task = item("t", "T", PlanItemType::HumanTask, Some("cp"));

    assert!(task.acquire_transition(Transition::Exit));
    assert!(task.prepare_transition(Transition::Complete));
    assert!(task.prepare_transition(Transition::Complete));
    assert!(!task.prepare_transition(Transition::Fault));
    assert!(!task.acquire_transition(Transition::Exit));
    assert_eq!(task.next_transition, Some(Transition::Complete));

    assert!(task.acquire_transition(Transition::Complete));
    assert_eq!(task.next_transition, None);
    assert!(task.acquire_transition(Transition::Exit));
}

#[test]
fn test_kind_follows_type() {
    let timer = item("tm", "Timer", PlanItemType::TimerEvent, Some("cp"));
    assert_eq!(timer.pending_timer(), None);
    assert!(timer.children().is_empty());

    let mut stage = item("s", "S", PlanItemType::Stage, Some("cp"));
    assert!(stage.children_mut().is_some());
    let mut milestone = item("m", "M", PlanItemType::Milestone, Some("cp"));
    assert!(milestone.children_mut().is_none());
    assert_eq!(milestone.describe(), "Milestone[M.0] (Null)");
}

#[test]
fn test_registry_ancestry() {
    let registry = registry();
    let task = PlanItemId::from("task");

    let ancestors: Vec<&str> = registry
        .ancestors(&task)
        .iter()
        .map(|stage| stage.id.as_str())
        .collect();
    assert_eq!(ancestors, vec!["inner", "outer", "cp"]);
    assert!(registry.contains_strictly(&PlanItemId::from("outer"), &task));
    assert!(!registry.contains_strictly(&task, &task));
    assert!(!registry.contains_strictly(&PlanItemId::from("inner"), &PlanItemId::from("outer")));

    assert_eq!(
        registry.descendants(&PlanItemId::from("outer")),
        vec![PlanItemId::from("inner"), task]
    );
}

#[test]
fn test_registry_keeps_creation_order() {
    let mut registry = registry();
    registry.insert(item("task2", "Task", PlanItemType::HumanTask, Some("inner")));

    assert_eq!(registry.len(), 5);
    assert_eq!(
        registry.find_by_name("Task").map(|found| found.id.as_str()),
        Some("task2")
    );

    registry.remove(&PlanItemId::from("task2"));
    assert_eq!(
        registry.find_by_name("Task").map(|found| found.id.as_str()),
        Some("task")
    );
    let ids: Vec<&str> = registry.iter().map(|found| found.id.as_str()).collect();
    assert_eq!(ids, vec!["cp", "outer", "inner", "task"]);
}
