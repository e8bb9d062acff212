use super::{CaseDefinition, ItemKindDefinition, OnPartDefinition};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
}

impl DefinitionFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => DefinitionFormat::Yaml,
            _ => DefinitionFormat::Json,
        }
    }
}

/// Reads and validates a definition file; the format follows the extension.
pub fn load_definition(path: &Path) -> Result<CaseDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read case definition: {}", path.display()))?;
    parse_definition(&content, DefinitionFormat::from_path(path))
        .with_context(|| format!("Invalid case definition: {}", path.display()))
}

pub fn parse_definition(content: &str, format: DefinitionFormat) -> Result<CaseDefinition> {
    let definition: CaseDefinition = match format {
        DefinitionFormat::Json => {
            serde_json::from_str(content).context("Failed to parse definition as JSON")?
        }
        DefinitionFormat::Yaml => {
            serde_yaml::from_str(content).context("Failed to parse definition as YAML")?
        }
    };
    definition.validate()?;
    Ok(definition)
}

impl CaseDefinition {
    /// Structural checks the runtime relies on.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.case_plan.kind, ItemKindDefinition::Stage(_)) {
            bail!("Case plan '{}' must be a stage", self.case_plan.id);
        }

        let items = self.items();
        let mut ids = HashSet::new();
        for item in &items {
            if !ids.insert(item.id.as_str()) {
                bail!("Duplicate plan item definition id '{}'", item.id);
            }
        }

        let paths: HashSet<String> = self.case_file_paths().into_iter().collect();
        for item in &items {
            for criterion in item
                .entry_criteria
                .iter()
                .chain(&item.exit_criteria)
                .chain(&item.reactivate_criteria)
            {
                for on_part in &criterion.on_parts {
                    match on_part {
                        OnPartDefinition::PlanItem { source, .. } => {
                            if !ids.contains(source.as_str()) {
                                bail!(
                                    "Criterion '{}' of '{}' listens to unknown plan item '{}'",
                                    criterion.id,
                                    item.name,
                                    source
                                );
                            }
                        }
                        OnPartDefinition::CaseFileItem { source, .. } => {
                            if !paths.contains(source) {
                                bail!(
                                    "Criterion '{}' of '{}' listens to unknown case file item '{}'",
                                    criterion.id,
                                    item.name,
                                    source
                                );
                            }
                        }
                    }
                }
            }
            if let Some(task) = item.task() {
                for binding in task
                    .inputs
                    .iter()
                    .chain(&task.outputs)
                    .filter_map(|p| p.binding.as_ref())
                {
                    if !paths.contains(binding) {
                        bail!(
                            "Task '{}' binds a parameter to unknown case file item '{}'",
                            item.name,
                            binding
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
