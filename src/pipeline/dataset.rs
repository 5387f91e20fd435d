//! CSV dataset loading
//!
//! Every cell is read as a string; nothing is coerced. A column missing from
//! a short record is simply absent from that row.

use crate::error::PipelineError;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const ID_COLUMNS: &[&str] = &["id", "ID", "Id", "uid", "unique_id"];

/// One dataset record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetRow {
    index: usize,
    fields: IndexMap<String, String>,
}

impl DatasetRow {
    pub fn new(index: usize, fields: IndexMap<String, String>) -> Self {
        Self { index, fields }
    }

    /// Zero-based position in the dataset
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Cell value, or "" when the column is missing
    pub fn field(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    /// First non-blank id-like column, else `row-NNNNNN`
    pub fn row_id(&self) -> String {
        ID_COLUMNS
            .iter()
            .filter_map(|col| self.get(col))
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row-{:06}", self.index))
    }

    /// Code as it appears in the dataset, before any truncation
    pub fn raw_vulnerable_code(&self) -> &str {
        if self.has_column("vulnerable_code") {
            self.field("vulnerable_code")
        } else {
            self.field("rejected")
        }
    }
}

/// A loaded CSV file
#[derive(Debug, Clone)]
pub struct Dataset {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<DatasetRow>,
}

impl Dataset {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let wrap = |source: csv::Error| PipelineError::Dataset {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(wrap)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(wrap)?
            .iter()
            .enumerate()
            .map(|(i, h)| if i == 0 { h.trim_start_matches('\u{feff}') } else { h })
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(wrap)?;
            let fields = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect();
            rows.push(DatasetRow::new(index, fields));
        }

        debug!("Loaded {} rows with columns {:?} from {}", rows.len(), headers, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
