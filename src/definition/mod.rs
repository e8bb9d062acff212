//! Immutable case definition tree.
//!
//! A `CaseDefinition` is produced once (deserialized from JSON or YAML) and
//! shared read-only by every case instance through an `Arc`. Runtime plan items
//! refer to their definition by id and resolve it through [`CaseDefinition::item`].

mod builder;
mod load;

pub use load::{load_definition, parse_definition, DefinitionFormat};

use crate::engine::state::{CaseFileItemTransition, Transition};
use crate::engine::state_machine::StateMachineKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub case_file: Vec<CaseFileItemDefinition>,
    /// Root of the plan. Must be a stage.
    pub case_plan: ItemDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFileItemDefinition {
    pub name: String,
    #[serde(default)]
    pub children: Vec<CaseFileItemDefinition>,
}

/// A plan item (or discretionary item) inside a stage or planning table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entry_criteria: Vec<CriterionDefinition>,
    #[serde(default)]
    pub exit_criteria: Vec<CriterionDefinition>,
    #[serde(default)]
    pub reactivate_criteria: Vec<CriterionDefinition>,
    #[serde(default)]
    pub control: PlanItemControl,
    /// Only meaningful for discretionary items; every rule must hold.
    #[serde(default)]
    pub applicability_rules: Vec<Expression>,
    pub kind: ItemKindDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKindDefinition {
    Stage(StageDefinition),
    HumanTask(TaskDefinition),
    ProcessTask(TaskDefinition),
    CaseTask(TaskDefinition),
    Milestone,
    UserEvent,
    TimerEvent { trigger: Expression },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageDefinition {
    #[serde(default)]
    pub auto_complete: bool,
    #[serde(default)]
    pub plan_items: Vec<ItemDefinition>,
    #[serde(default)]
    pub planning_table: Option<PlanningTable>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanningTable {
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
    #[serde(default)]
    pub tables: Vec<PlanningTable>,
}

impl PlanningTable {
    pub fn has_items(&self) -> bool {
        !self.items.is_empty() || self.tables.iter().any(PlanningTable::has_items)
    }

    /// Discretionary items of this table and all nested tables.
    pub fn all_items(&self) -> Vec<&ItemDefinition> {
        let mut items: Vec<&ItemDefinition> = self.items.iter().collect();
        for table in &self.tables {
            items.extend(table.all_items());
        }
        items
    }
}

fn default_blocking() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default = "default_blocking")]
    pub is_blocking: bool,
    #[serde(default)]
    pub inputs: Vec<ParameterDefinition>,
    #[serde(default)]
    pub outputs: Vec<ParameterDefinition>,
    /// Human tasks only.
    #[serde(default)]
    pub planning_table: Option<PlanningTable>,
}

impl Default for TaskDefinition {
    fn default() -> Self {
        Self {
            is_blocking: true,
            inputs: Vec::new(),
            outputs: Vec::new(),
            planning_table: None,
        }
    }
}

/// Task parameter, optionally bound to a case-file item path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub binding: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub on_parts: Vec<OnPartDefinition>,
    #[serde(default)]
    pub if_part: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnPartDefinition {
    PlanItem {
        id: String,
        /// Id of the source item definition.
        source: String,
        standard_event: Transition,
    },
    CaseFileItem {
        id: String,
        /// Slash-separated case-file path.
        source: String,
        standard_event: CaseFileItemTransition,
    },
}

impl OnPartDefinition {
    pub fn id(&self) -> &str {
        match self {
            OnPartDefinition::PlanItem { id, .. } | OnPartDefinition::CaseFileItem { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanItemControl {
    #[serde(default)]
    pub required_rule: Option<Rule>,
    #[serde(default)]
    pub repetition_rule: Option<Rule>,
    #[serde(default)]
    pub manual_activation_rule: Option<Rule>,
}

/// A rule without condition always holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    #[serde(default)]
    pub language: Option<String>,
    pub body: String,
}

impl Expression {
    pub fn new(language: &str, body: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            body: body.to_string(),
        }
    }
}

/// Flat classification of plan item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemType {
    CasePlan,
    Stage,
    HumanTask,
    ProcessTask,
    CaseTask,
    Milestone,
    UserEvent,
    TimerEvent,
}

impl PlanItemType {
    pub fn state_machine(self) -> StateMachineKind {
        match self {
            PlanItemType::CasePlan => StateMachineKind::CasePlan,
            PlanItemType::Stage
            | PlanItemType::HumanTask
            | PlanItemType::ProcessTask
            | PlanItemType::CaseTask => StateMachineKind::TaskStage,
            PlanItemType::Milestone | PlanItemType::UserEvent | PlanItemType::TimerEvent => {
                StateMachineKind::EventMilestone
            }
        }
    }

    pub fn is_task(self) -> bool {
        matches!(
            self,
            PlanItemType::HumanTask | PlanItemType::ProcessTask | PlanItemType::CaseTask
        )
    }

    pub fn has_children(self) -> bool {
        matches!(self, PlanItemType::CasePlan | PlanItemType::Stage)
    }
}

impl std::fmt::Display for PlanItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlanItemType::CasePlan => "CasePlan",
            PlanItemType::Stage => "Stage",
            PlanItemType::HumanTask => "HumanTask",
            PlanItemType::ProcessTask => "ProcessTask",
            PlanItemType::CaseTask => "CaseTask",
            PlanItemType::Milestone => "Milestone",
            PlanItemType::UserEvent => "UserEvent",
            PlanItemType::TimerEvent => "TimerEvent",
        };
        write!(f, "{}", label)
    }
}

/// Which criteria list of an item definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CriterionPurpose {
    Entry,
    Exit,
    Reactivate,
}

impl CriterionPurpose {
    pub const ALL: [CriterionPurpose; 3] = [
        CriterionPurpose::Entry,
        CriterionPurpose::Exit,
        CriterionPurpose::Reactivate,
    ];
}

impl ItemDefinition {
    /// Type of the runtime item. The case plan root is classified by position,
    /// not here, so a stage definition always reports `Stage`.
    pub fn item_type(&self) -> PlanItemType {
        match &self.kind {
            ItemKindDefinition::Stage(_) => PlanItemType::Stage,
            ItemKindDefinition::HumanTask(_) => PlanItemType::HumanTask,
            ItemKindDefinition::ProcessTask(_) => PlanItemType::ProcessTask,
            ItemKindDefinition::CaseTask(_) => PlanItemType::CaseTask,
            ItemKindDefinition::Milestone => PlanItemType::Milestone,
            ItemKindDefinition::UserEvent => PlanItemType::UserEvent,
            ItemKindDefinition::TimerEvent { .. } => PlanItemType::TimerEvent,
        }
    }

    pub fn stage(&self) -> Option<&StageDefinition> {
        match &self.kind {
            ItemKindDefinition::Stage(stage) => Some(stage),
            _ => None,
        }
    }

    pub fn task(&self) -> Option<&TaskDefinition> {
        match &self.kind {
            ItemKindDefinition::HumanTask(task)
            | ItemKindDefinition::ProcessTask(task)
            | ItemKindDefinition::CaseTask(task) => Some(task),
            _ => None,
        }
    }

    /// Planning table of a stage or human task.
    pub fn planning_table(&self) -> Option<&PlanningTable> {
        match &self.kind {
            ItemKindDefinition::Stage(stage) => stage.planning_table.as_ref(),
            ItemKindDefinition::HumanTask(task) => task.planning_table.as_ref(),
            _ => None,
        }
    }

    /// Default (non-discretionary) children of a stage.
    pub fn children(&self) -> &[ItemDefinition] {
        match &self.kind {
            ItemKindDefinition::Stage(stage) => &stage.plan_items,
            _ => &[],
        }
    }

    pub fn criteria(&self, purpose: CriterionPurpose) -> &[CriterionDefinition] {
        match purpose {
            CriterionPurpose::Entry => &self.entry_criteria,
            CriterionPurpose::Exit => &self.exit_criteria,
            CriterionPurpose::Reactivate => &self.reactivate_criteria,
        }
    }

    pub fn criterion(&self, id: &str) -> Option<&CriterionDefinition> {
        CriterionPurpose::ALL
            .iter()
            .flat_map(|purpose| self.criteria(*purpose))
            .find(|criterion| criterion.id == id)
    }

    /// Children and discretionary items a migrated stage may match against.
    pub fn migration_candidates(&self) -> Vec<&ItemDefinition> {
        let mut candidates: Vec<&ItemDefinition> = self.children().iter().collect();
        if let Some(table) = self.planning_table() {
            candidates.extend(table.all_items());
        }
        candidates
    }

    fn find(&self, id: &str) -> Option<&ItemDefinition> {
        if self.id == id {
            return Some(self);
        }
        let nested = self
            .children()
            .iter()
            .find_map(|child| child.find(id));
        if nested.is_some() {
            return nested;
        }
        self.planning_table()
            .and_then(|table| table.all_items().into_iter().find_map(|item| item.find(id)))
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a ItemDefinition>) {
        out.push(self);
        for child in self.children() {
            child.visit(out);
        }
        if let Some(table) = self.planning_table() {
            for item in table.all_items() {
                item.visit(out);
            }
        }
    }
}

impl CaseDefinition {
    /// Resolves an item definition (plan item or discretionary item) by id.
    pub fn item(&self, id: &str) -> Option<&ItemDefinition> {
        self.case_plan.find(id)
    }

    /// Every item definition in depth-first order, the case plan first.
    pub fn items(&self) -> Vec<&ItemDefinition> {
        let mut out = Vec::new();
        self.case_plan.visit(&mut out);
        out
    }

    /// Slash-separated paths of every case-file item, parents before children.
    pub fn case_file_paths(&self) -> Vec<String> {
        fn walk(prefix: Option<&str>, items: &[CaseFileItemDefinition], out: &mut Vec<String>) {
            for item in items {
                let path = match prefix {
                    Some(prefix) => format!("{}/{}", prefix, item.name),
                    None => item.name.clone(),
                };
                out.push(path.clone());
                walk(Some(&path), &item.children, out);
            }
        }
        let mut out = Vec::new();
        walk(None, &self.case_file, &mut out);
        out
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
#[path = "tests/definition_tests.rs"]
mod tests;
