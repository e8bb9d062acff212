//! Shared fixtures for engine and domain tests.

use crate::definition::{CaseDefinition, CriterionDefinition, ItemDefinition};
use crate::domain::cqrs::{CaseAggregate, CaseCommand, CaseEvent};
use crate::domain::errors::CaseError;
use crate::domain::services::{CaseClock, CaseServices};
use crate::domain::types::CaseId;
use crate::engine::case::Case;
use crate::engine::plan_item::PlanItem;
use crate::engine::state::{State, Transition};
use crate::expression::EvaluatorRegistry;
use chrono::{DateTime, TimeZone, Utc};
use cqrs_es::Aggregate;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const CASE_ID: &str = "case-1";

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn test_services() -> CaseServices {
    CaseServices::new(EvaluatorRegistry::default()).with_clock(CaseClock::fixed(fixed_now()))
}

/// Case plan holding `children` directly.
pub fn case_with(children: Vec<ItemDefinition>) -> CaseDefinition {
    CaseDefinition::new("def", "Test", ItemDefinition::new_stage("cp", "Test", children))
}

/// Stage A (no auto-complete) with required task T and milestone M that
/// enters when T completes.
pub fn review_stage_definition() -> CaseDefinition {
    let task = ItemDefinition::new_human_task("t", "T").required();
    let milestone = ItemDefinition::new_milestone("m", "M")
        .with_entry(CriterionDefinition::new("c_m").on_plan_item("t", Transition::Complete));
    case_with(vec![ItemDefinition::new_stage("a", "A", vec![task, milestone])])
}

pub fn start_command(definition: CaseDefinition, input: Map<String, Value>) -> CaseCommand {
    CaseCommand::StartCase {
        case_id: CaseId::from(CASE_ID),
        definition: Arc::new(definition),
        input,
        team: Vec::new(),
        parent_case_id: None,
        root_case_id: None,
    }
}

/// Drives a `CaseAggregate` the way the framework does: handle, then apply.
pub struct CaseHarness {
    pub aggregate: CaseAggregate,
    pub services: CaseServices,
    pub events: Vec<CaseEvent>,
}

impl CaseHarness {
    pub async fn start(definition: CaseDefinition) -> Self {
        Self::start_with(definition, Map::new()).await
    }

    pub async fn start_with(definition: CaseDefinition, input: Map<String, Value>) -> Self {
        let mut harness = Self {
            aggregate: CaseAggregate::default(),
            services: test_services(),
            events: Vec::new(),
        };
        harness
            .execute(start_command(definition, input))
            .await
            .expect("case starts");
        harness
    }

    pub async fn execute(&mut self, command: CaseCommand) -> Result<Vec<CaseEvent>, CaseError> {
        let events = self.aggregate.handle(command, &self.services).await?;
        for event in &events {
            self.aggregate.apply(event.clone());
        }
        self.events.extend(events.iter().cloned());
        Ok(events)
    }

    pub async fn transition(
        &mut self,
        plan_item: &str,
        transition: Transition,
    ) -> Result<Vec<CaseEvent>, CaseError> {
        self.execute(CaseCommand::MakePlanItemTransition {
            plan_item: plan_item.to_string(),
            transition,
        })
        .await
    }

    pub fn case(&self) -> &Case {
        self.aggregate.case().expect("case started")
    }

    /// Most recent item with this name.
    pub fn item(&self, name: &str) -> &PlanItem {
        self.case()
            .items
            .find_by_name(name)
            .unwrap_or_else(|| panic!("no plan item named {}", name))
    }

    pub fn state(&self, name: &str) -> State {
        self.item(name).state
    }

    /// Every instance with this name, in creation order.
    pub fn instances(&self, name: &str) -> Vec<&PlanItem> {
        self.case()
            .items
            .iter()
            .filter(|item| item.name == name)
            .collect()
    }

    pub fn replayed(&self) -> Case {
        Case::replay(&self.events).expect("history replays")
    }
}

/// Transition events recorded for one plan item, in order.
pub fn transitions_of(events: &[CaseEvent], item: &PlanItem) -> Vec<Transition> {
    events
        .iter()
        .filter_map(|event| match event {
            CaseEvent::PlanItemTransitioned {
                plan_item_id,
                transition,
                ..
            } if *plan_item_id == item.id => Some(*transition),
            _ => None,
        })
        .collect()
}

/// The state every property of an item that replay has to reproduce.
pub fn fingerprint(item: &PlanItem) -> (State, State, Transition, bool, bool) {
    (
        item.state,
        item.history_state,
        item.last_transition,
        item.repetition_rule_outcome,
        item.required_rule_outcome,
    )
}
