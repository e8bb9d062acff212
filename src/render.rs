//! Plain-text trees for the `cmmn` binary.

use crate::definition::{CaseDefinition, ItemDefinition};
use crate::domain::types::PlanItemId;
use crate::domain::view::CaseView;
use crate::engine::case::Case;
use crate::event_store::read_log;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

const INDENT: &str = "  ";

/// Definition tree: one line per item definition, discretionary items marked.
pub fn definition_tree(definition: &CaseDefinition) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}) fingerprint {}",
        definition.name,
        definition.id,
        definition.fingerprint()
    );
    for path in definition.case_file_paths() {
        let _ = writeln!(out, "{}file {}", INDENT, path);
    }
    write_definition(&mut out, &definition.case_plan, 1, false);
    out
}

fn write_definition(out: &mut String, item: &ItemDefinition, depth: usize, discretionary: bool) {
    let marker = if discretionary { " [discretionary]" } else { "" };
    let _ = writeln!(
        out,
        "{}{} {} ({}){}",
        INDENT.repeat(depth),
        item.item_type(),
        item.name,
        item.id,
        marker
    );
    for child in item.children() {
        write_definition(out, child, depth + 1, false);
    }
    if let Some(table) = item.planning_table() {
        for planned in table.all_items() {
            write_definition(out, planned, depth + 1, true);
        }
    }
}

/// Runtime plan item tree of a case, plus case-file states.
pub fn case_tree(case: &Case) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "case {} ({})", case.id, case.definition.id);
    write_item(&mut out, case, &case.case_plan_id(), 1);
    for item in case.case_file.items() {
        let _ = writeln!(out, "{}file {} ({})", INDENT, item.path, item.state);
    }
    out
}

fn write_item(out: &mut String, case: &Case, id: &PlanItemId, depth: usize) {
    let Some(item) = case.item(id) else {
        return;
    };
    let mut line = format!("{}{}", INDENT.repeat(depth), item.describe());
    if let Some(moment) = item.pending_timer() {
        let _ = write!(line, " timer {}", moment.to_rfc3339());
    }
    let _ = writeln!(out, "{}", line);
    for child in item.children() {
        write_item(out, case, child, depth + 1);
    }
}

/// Same tree built from the projection, for callers that only hold a view.
pub fn view_tree(view: &CaseView) -> String {
    let mut out = String::new();
    let Some(case_id) = view.case_id() else {
        return out;
    };
    let _ = writeln!(
        out,
        "case {} ({})",
        case_id,
        view.definition_id().unwrap_or("?")
    );
    let plan_id = PlanItemId::from(case_id);
    write_view_item(&mut out, view, &plan_id, 1);
    for (path, entry) in view.case_file() {
        let _ = writeln!(out, "{}file {} ({})", INDENT, path, entry.state);
    }
    out
}

fn write_view_item(out: &mut String, view: &CaseView, id: &PlanItemId, depth: usize) {
    let Some(item) = view.item(id) else {
        return;
    };
    let _ = writeln!(
        out,
        "{}{}[{}.{}] ({})",
        INDENT.repeat(depth),
        item.item_type,
        item.name,
        item.index,
        item.state
    );
    for child in view.children(id) {
        write_view_item(out, view, &child.id, depth + 1);
    }
}

/// Replays every case found in an event log, or only `case_id`.
pub fn replay_cases(log_path: &Path, case_id: Option<&str>) -> Result<Vec<Case>> {
    let records = read_log(log_path, case_id)?;
    let mut by_case: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for stored in records {
        by_case
            .entry(stored.aggregate_id)
            .or_default()
            .push(stored.event);
    }
    by_case
        .into_iter()
        .map(|(id, events)| {
            Case::replay(&events).with_context(|| format!("Failed to replay case {}", id))
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
