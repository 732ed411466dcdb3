use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One entry of the catalog, as served by `GET /v1/catalog`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub risk_tier: Option<String>,
}

/// Named group of test ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tests: BTreeSet<String>,
}

/// Wire form of a selected test: `{"id": ..., "params": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionEntry {
    #[serde(rename = "id")]
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamsEdit {
    Set,
    Cleared,
    /// The text did not parse; the previously valid params are untouched.
    Invalid { reason: String },
}

/// Chosen tests plus per-test parameter overrides.
///
/// Params are keyed by test id independently of membership, so deselecting
/// and reselecting a test keeps whatever was configured for it.
#[derive(Debug, Clone, Default)]
pub struct SelectionModel {
    selected: BTreeSet<String>,
    params: BTreeMap<String, Value>,
    invalid_params: BTreeMap<String, String>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, test_id: &str) -> bool {
        if self.selected.remove(test_id) {
            false
        } else {
            self.selected.insert(test_id.to_string());
            true
        }
    }

    /// Adds every id, returning how many were not already selected.
    pub fn select_many<'a>(&mut self, test_ids: impl IntoIterator<Item = &'a str>) -> usize {
        test_ids
            .into_iter()
            .filter(|id| self.selected.insert((*id).to_string()))
            .count()
    }

    pub fn apply_pack(&mut self, pack: &Pack) -> usize {
        self.select_many(pack.tests.iter().map(String::as_str))
    }

    /// Removes every member of `pack`, including members that were also
    /// selected on their own.
    pub fn remove_pack(&mut self, pack: &Pack) -> usize {
        pack.tests
            .iter()
            .filter(|id| self.selected.remove(id.as_str()))
            .count()
    }

    pub fn set_params(&mut self, test_id: &str, raw: &str) -> ParamsEdit {
        if raw.trim().is_empty() {
            self.params.remove(test_id);
            self.invalid_params.remove(test_id);
            return ParamsEdit::Cleared;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                self.params.insert(test_id.to_string(), value);
                self.invalid_params.remove(test_id);
                ParamsEdit::Set
            }
            Err(err) => {
                let reason = err.to_string();
                self.invalid_params
                    .insert(test_id.to_string(), reason.clone());
                ParamsEdit::Invalid { reason }
            }
        }
    }

    pub fn is_selected(&self, test_id: &str) -> bool {
        self.selected.contains(test_id)
    }

    pub fn params_for(&self, test_id: &str) -> Option<&Value> {
        self.params.get(test_id)
    }

    pub fn params_error(&self, test_id: &str) -> Option<&str> {
        self.invalid_params.get(test_id).map(String::as_str)
    }

    pub fn is_params_invalid(&self, test_id: &str) -> bool {
        self.invalid_params.contains_key(test_id)
    }

    pub fn selected_ids(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Selected tests in ascending id order with their params, if any.
    pub fn to_plan_request(&self) -> Vec<SelectionEntry> {
        self.selected
            .iter()
            .map(|id| SelectionEntry {
                test_id: id.clone(),
                params: self.params.get(id).cloned(),
            })
            .collect()
    }
}
