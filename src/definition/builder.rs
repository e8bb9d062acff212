//! Programmatic construction of definitions.

use super::{
    CaseDefinition, CaseFileItemDefinition, CriterionDefinition, Expression, ItemDefinition,
    ItemKindDefinition, OnPartDefinition, ParameterDefinition, PlanItemControl, PlanningTable,
    Rule, StageDefinition, TaskDefinition,
};
use crate::engine::state::{CaseFileItemTransition, Transition};

impl CaseDefinition {
    pub fn new(id: &str, name: &str, case_plan: ItemDefinition) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            case_file: Vec::new(),
            case_plan,
        }
    }

    pub fn with_case_file(mut self, items: Vec<CaseFileItemDefinition>) -> Self {
        self.case_file = items;
        self
    }
}

impl CaseFileItemDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<CaseFileItemDefinition>) -> Self {
        self.children = children;
        self
    }
}

impl ItemDefinition {
    pub fn new(id: &str, name: &str, kind: ItemKindDefinition) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            reactivate_criteria: Vec::new(),
            control: PlanItemControl::default(),
            applicability_rules: Vec::new(),
            kind,
        }
    }

    pub fn new_stage(id: &str, name: &str, children: Vec<ItemDefinition>) -> Self {
        Self::new(
            id,
            name,
            ItemKindDefinition::Stage(StageDefinition {
                auto_complete: false,
                plan_items: children,
                planning_table: None,
            }),
        )
    }

    pub fn new_human_task(id: &str, name: &str) -> Self {
        Self::new(id, name, ItemKindDefinition::HumanTask(TaskDefinition::default()))
    }

    pub fn new_process_task(id: &str, name: &str) -> Self {
        Self::new(
            id,
            name,
            ItemKindDefinition::ProcessTask(TaskDefinition::default()),
        )
    }

    pub fn new_milestone(id: &str, name: &str) -> Self {
        Self::new(id, name, ItemKindDefinition::Milestone)
    }

    pub fn new_user_event(id: &str, name: &str) -> Self {
        Self::new(id, name, ItemKindDefinition::UserEvent)
    }

    pub fn new_timer_event(id: &str, name: &str, trigger: Expression) -> Self {
        Self::new(id, name, ItemKindDefinition::TimerEvent { trigger })
    }

    /// Stages only.
    pub fn auto_complete(mut self) -> Self {
        if let ItemKindDefinition::Stage(stage) = &mut self.kind {
            stage.auto_complete = true;
        }
        self
    }

    /// Stages and human tasks.
    pub fn with_planning_table(mut self, items: Vec<ItemDefinition>) -> Self {
        let table = Some(PlanningTable {
            items,
            tables: Vec::new(),
        });
        match &mut self.kind {
            ItemKindDefinition::Stage(stage) => stage.planning_table = table,
            ItemKindDefinition::HumanTask(task) => task.planning_table = table,
            _ => {}
        }
        self
    }

    /// Tasks only.
    pub fn with_parameters(
        mut self,
        inputs: Vec<ParameterDefinition>,
        outputs: Vec<ParameterDefinition>,
    ) -> Self {
        if let Some(task) = self.task_mut() {
            task.inputs = inputs;
            task.outputs = outputs;
        }
        self
    }

    pub fn non_blocking(mut self) -> Self {
        if let Some(task) = self.task_mut() {
            task.is_blocking = false;
        }
        self
    }

    pub fn with_entry(mut self, criterion: CriterionDefinition) -> Self {
        self.entry_criteria.push(criterion);
        self
    }

    pub fn with_exit(mut self, criterion: CriterionDefinition) -> Self {
        self.exit_criteria.push(criterion);
        self
    }

    pub fn with_reactivate(mut self, criterion: CriterionDefinition) -> Self {
        self.reactivate_criteria.push(criterion);
        self
    }

    pub fn required(mut self) -> Self {
        self.control.required_rule = Some(Rule::default());
        self
    }

    pub fn repeating_when(mut self, condition: Expression) -> Self {
        self.control.repetition_rule = Some(Rule {
            condition: Some(condition),
        });
        self
    }

    pub fn manual_activation(mut self) -> Self {
        self.control.manual_activation_rule = Some(Rule::default());
        self
    }

    pub fn applicable_when(mut self, rule: Expression) -> Self {
        self.applicability_rules.push(rule);
        self
    }

    fn task_mut(&mut self) -> Option<&mut TaskDefinition> {
        match &mut self.kind {
            ItemKindDefinition::HumanTask(task)
            | ItemKindDefinition::ProcessTask(task)
            | ItemKindDefinition::CaseTask(task) => Some(task),
            _ => None,
        }
    }
}

impl CriterionDefinition {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            on_parts: Vec::new(),
            if_part: None,
        }
    }

    pub fn on_plan_item(mut self, source: &str, standard_event: Transition) -> Self {
        let id = format!("{}_on{}", self.id, self.on_parts.len());
        self.on_parts.push(OnPartDefinition::PlanItem {
            id,
            source: source.to_string(),
            standard_event,
        });
        self
    }

    pub fn on_case_file(mut self, path: &str, standard_event: CaseFileItemTransition) -> Self {
        let id = format!("{}_on{}", self.id, self.on_parts.len());
        self.on_parts.push(OnPartDefinition::CaseFileItem {
            id,
            source: path.to_string(),
            standard_event,
        });
        self
    }

    pub fn with_if(mut self, condition: Expression) -> Self {
        self.if_part = Some(condition);
        self
    }
}

impl ParameterDefinition {
    pub fn bound(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            binding: Some(path.to_string()),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}
