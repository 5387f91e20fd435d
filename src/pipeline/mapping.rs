//! Row mapping: the placeholder values a template is rendered against

use super::dataset::DatasetRow;
use crate::prompt::contains_placeholder;
use indexmap::IndexMap;

/// Keys present in every freshly built mapping
pub const MAPPING_KEYS: &[&str] = &[
    "vulnerability",
    "question",
    "code",
    "rejected",
    "cwe_ids",
    "chosen",
    "vulnerable_code",
    "patched_code",
    "lang",
    "description",
    "input",
    "text",
];

/// Placeholders the user template is scanned for, in priority order
pub const PLACEHOLDER_CANDIDATES: &[&str] =
    &["vulnerable_code", "description", "question", "code", "input", "text"];

const DEFAULT_PLACEHOLDER: &str = "description";

const FIX_INSTRUCTION: &str = "Provide a secure fix for the following code while preserving behavior.";

/// Field name to value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMapping {
    values: IndexMap<String, String>,
}

impl RowMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key`, "" when absent
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn first_non_empty<'a>(row: &'a DatasetRow, columns: &[&str]) -> &'a str {
    columns
        .iter()
        .map(|col| row.field(col))
        .find(|v| !v.is_empty())
        .unwrap_or("")
}

/// Build the mapping for one row, resolving synonym columns
pub fn build_mapping(row: &DatasetRow) -> RowMapping {
    let vulnerability = first_non_empty(row, &["vulnerability", "vulnerability_type"]);
    let question = row.field("question");
    let rejected = first_non_empty(row, &["rejected", "vulnerable_code"]);
    let chosen = first_non_empty(row, &["chosen", "fixed_code"]);
    let lang = first_non_empty(row, &["lang", "language"]);
    let vulnerable_code = first_non_empty(row, &["vulnerable_code", "rejected"]);
    let patched_code = first_non_empty(row, &["patched_code", "fixed_code", "chosen"]);
    let cwe_ids = row.field("cwe_ids");

    let mut parts = Vec::new();
    if !vulnerability.is_empty() {
        parts.push(format!("Vulnerability: {}", vulnerability));
    }
    if !question.is_empty() {
        parts.push(question.to_string());
    } else if !vulnerable_code.is_empty() {
        parts.push(FIX_INSTRUCTION.to_string());
    }
    if !vulnerable_code.is_empty() {
        parts.push(format!("\nVulnerable Code:\n{}", vulnerable_code));
    }
    let description = parts.join("\n\n");

    let summary = [description.as_str(), question, vulnerable_code]
        .into_iter()
        .find(|v| !v.is_empty())
        .unwrap_or("");
    let code = if vulnerable_code.is_empty() { chosen } else { vulnerable_code };

    [
        ("vulnerability", vulnerability),
        ("question", question),
        ("code", code),
        ("rejected", rejected),
        ("cwe_ids", cwe_ids),
        ("chosen", chosen),
        ("vulnerable_code", vulnerable_code),
        ("patched_code", patched_code),
        ("lang", lang),
        ("description", summary),
        ("input", summary),
        ("text", summary),
    ]
    .into_iter()
    .collect()
}

/// First candidate placeholder present in the user template, else `description`
pub fn detect_preferred_placeholder(user_template: &str) -> &'static str {
    PLACEHOLDER_CANDIDATES
        .iter()
        .copied()
        .find(|key| contains_placeholder(user_template, key))
        .unwrap_or(DEFAULT_PLACEHOLDER)
}

/// Field that receives the truncated text for this row
pub fn injection_key<'a>(mapping: &RowMapping, preferred: &'a str) -> &'a str {
    [preferred, "question", "code"]
        .into_iter()
        .find(|key| !mapping.value(key).is_empty())
        .unwrap_or(DEFAULT_PLACEHOLDER)
}
