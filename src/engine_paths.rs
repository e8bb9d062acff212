//! Home-based storage paths for case persistence.
//!
//! Layout under the data directory (`~/.cmmn-engine/` unless overridden):
//! - `cases/<case-id>/events.jsonl` - Event log
//! - `cases/<case-id>/snapshot.json` - Aggregate snapshot
//! - `cases/<case-id>/debug.jsonl` - Structured debug log
//!
//! `CMMN_ENGINE_HOME` replaces the home-based default, which keeps tests and
//! parallel installations apart.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const ENGINE_DIR: &str = ".cmmn-engine";

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "CMMN_ENGINE_HOME";

/// Returns the engine data directory, creating it if needed.
///
/// An explicit `configured` directory wins over `CMMN_ENGINE_HOME`, which wins
/// over `~/.cmmn-engine/`.
pub fn data_dir(configured: Option<&Path>) -> Result<PathBuf> {
    let dir = match configured {
        Some(dir) => dir.to_path_buf(),
        None => match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .context("Could not determine home directory for case storage")?
                .join(ENGINE_DIR),
        },
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    Ok(dir)
}

/// Case ids become directory names, so they must be a single plain component.
pub fn validate_case_id(case_id: &str) -> Result<()> {
    if case_id.is_empty() || case_id == "." || case_id == ".." {
        bail!("Invalid case id '{}'", case_id);
    }
    if case_id.contains(['/', '\\']) || case_id.chars().any(char::is_control) {
        bail!("Case id '{}' must not contain path separators", case_id);
    }
    Ok(())
}

/// Returns `<data>/cases/<case-id>/`, creating it if needed.
pub fn case_dir(data_dir: &Path, case_id: &str) -> Result<PathBuf> {
    validate_case_id(case_id)?;
    let dir = data_dir.join("cases").join(case_id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create case directory: {}", dir.display()))?;
    Ok(dir)
}

pub fn case_event_log_path(data_dir: &Path, case_id: &str) -> Result<PathBuf> {
    Ok(case_dir(data_dir, case_id)?.join("events.jsonl"))
}

pub fn case_snapshot_path(data_dir: &Path, case_id: &str) -> Result<PathBuf> {
    Ok(case_dir(data_dir, case_id)?.join("snapshot.json"))
}

pub fn case_debug_log_path(data_dir: &Path, case_id: &str) -> Result<PathBuf> {
    Ok(case_dir(data_dir, case_id)?.join("debug.jsonl"))
}

/// Ids of every case that has a directory, sorted.
pub fn list_cases(data_dir: &Path) -> Result<Vec<String>> {
    let cases = data_dir.join("cases");
    let entries = match fs::read_dir(&cases) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to list case directory: {}", cases.display()))
        }
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", cases.display()))?;
        if entry.path().is_dir() {
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
#[path = "tests/engine_paths_tests.rs"]
mod tests;
