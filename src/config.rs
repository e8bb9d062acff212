use crate::expression::{EvaluatorRegistry, BUILTIN_LANGUAGES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_ENGINE_YAML: &str = include_str!("../engine.yaml");

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub expressions: ExpressionConfig,
    /// Per-case JSONL debug log of commands and events.
    #[serde(default)]
    pub debug_log: DebugLogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Overrides `CMMN_ENGINE_HOME` and `~/.cmmn-engine`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Snapshot after every N events. 0 disables snapshots.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_every: default_snapshot_every(),
        }
    }
}

fn default_snapshot_every() -> u64 {
    50
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExpressionConfig {
    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
        }
    }
}

fn default_language() -> String {
    crate::expression::CONSTANT_LANGUAGE.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct DebugLogConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration shipped in `engine.yaml`.
    pub fn default_config() -> Result<Self> {
        let config: Self = serde_yaml::from_str(DEFAULT_ENGINE_YAML)
            .context("Failed to parse embedded engine.yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, else the embedded defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::default_config(),
        }
    }

    fn validate(&self) -> Result<()> {
        let language = self.expressions.default_language.as_str();
        if !BUILTIN_LANGUAGES.contains(&language) {
            anyhow::bail!(
                "Unknown default expression language '{}' (available: {})",
                language,
                BUILTIN_LANGUAGES.join(", ")
            );
        }

        if let Some(dir) = &self.storage.data_dir {
            if dir.as_os_str().is_empty() {
                anyhow::bail!("storage.data_dir must not be empty when set");
            }
        }

        Ok(())
    }

    /// Builds the evaluator registry for the configured default language.
    pub fn evaluators(&self) -> Result<EvaluatorRegistry> {
        EvaluatorRegistry::builtin(&self.expressions.default_language)
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
