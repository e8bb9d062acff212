//! Runtime case file: one entry per definition node, keyed by slash path.

use crate::engine::state::{CaseFileItemState, CaseFileItemTransition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFileItem {
    pub path: String,
    pub state: CaseFileItemState,
    pub value: Option<Value>,
    pub last_transition: Option<CaseFileItemTransition>,
}

impl CaseFileItem {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            state: CaseFileItemState::Null,
            value: None,
            last_transition: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseFile {
    items: BTreeMap<String, CaseFileItem>,
}

impl CaseFile {
    /// Instantiates every path in state `Null`.
    pub fn from_paths(paths: &[String]) -> Self {
        Self {
            items: paths
                .iter()
                .map(|path| (path.clone(), CaseFileItem::new(path)))
                .collect(),
        }
    }

    pub fn item(&self, path: &str) -> Option<&CaseFileItem> {
        self.items.get(path)
    }

    pub fn items(&self) -> impl Iterator<Item = &CaseFileItem> {
        self.items.values()
    }

    pub fn value(&self, path: &str) -> Option<&Value> {
        self.items.get(path).and_then(|item| item.value.as_ref())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.items.contains_key(path)
    }

    /// Adds paths introduced by a migrated definition, keeping existing items.
    pub fn add_missing(&mut self, paths: &[String]) {
        for path in paths {
            self.items
                .entry(path.clone())
                .or_insert_with(|| CaseFileItem::new(path));
        }
    }

    /// Direct children of `path`, in path order.
    pub fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        self.items
            .keys()
            .filter(|candidate| {
                candidate
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .cloned()
            .collect()
    }

    /// Parent path, `None` for root items.
    pub fn parent(path: &str) -> Option<&str> {
        path.rsplit_once('/').map(|(parent, _)| parent)
    }

    pub(crate) fn record(
        &mut self,
        path: &str,
        transition: CaseFileItemTransition,
        state: CaseFileItemState,
        value: Option<Value>,
    ) -> bool {
        match self.items.get_mut(path) {
            Some(item) => {
                item.state = state;
                item.value = value;
                item.last_transition = Some(transition);
                true
            }
            None => false,
        }
    }
}
