//! Crate-level errors
//!
//! `PipelineError` covers everything that must stop a run before the first row
//! is processed. Row-level failures live in `pipeline::RowError` and never
//! leave the row driver.

use crate::methods::MethodError;
use crate::model::ModelError;
use crate::prompt::PromptError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Dataset path not set. Provide --dataset or PIPELINE_DATASET_PATH")]
    MissingDatasetPath,

    #[error("Dataset file not found: {}", .0.display())]
    DatasetNotFound(PathBuf),

    #[error("Failed to read dataset {}: {source}", .path.display())]
    Dataset {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to load configuration file: {0}")]
    ConfigFile(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Method(#[from] MethodError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
