//! Dataset-driven generation pipeline
//!
//! Loads the dataset and the method's prompt templates, then drives every row
//! through the selected method and writes the per-row artifacts.

pub mod dataset;
pub mod driver;
pub mod mapping;
pub mod output;
pub mod progress;

pub use dataset::{Dataset, DatasetRow};
pub use driver::{PreparedRow, RowDriver, RowError, RunOptions, RunSummary};
pub use mapping::{build_mapping, detect_preferred_placeholder, injection_key, RowMapping, MAPPING_KEYS};
pub use output::{format_messages, resolve_output_root, sanitize_for_path};
pub use progress::{format_duration, ProgressTracker};

use crate::config::PipelineConfig;
use crate::context::TruncationPolicy;
use crate::error::Result;
use crate::methods::{MethodContext, MethodRegistry};
use crate::model::ChatModel;
use crate::prompt::PromptStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run the configured method over every dataset row.
///
/// Everything that can fail before the first row (templates, dataset, method
/// setup) is returned as an error; row failures only show up in the summary.
pub async fn run_pipeline(
    config: &PipelineConfig,
    registry: &MethodRegistry,
    model: Arc<dyn ChatModel>,
    dataset_path: &Path,
    output_root: &Path,
) -> Result<RunSummary> {
    let method = config.method.trim();
    let store = PromptStore::new(&config.prompts_dir);
    let prompts = store.load_pair(method)?;
    let dataset = Dataset::load(dataset_path)?;
    info!("Loaded {} rows from {}", dataset.len(), dataset.path().display());

    let mut runner = registry.create(method)?;
    runner.setup(&MethodContext {
        dataset_path: dataset_path.to_path_buf(),
        output_root: output_root.to_path_buf(),
        model_name: model.name().to_string(),
        method: method.to_string(),
        prompts: store,
    })?;

    let options = RunOptions {
        gen_ratio: config.effective_gen_ratio(),
        progress_every: config.progress_every(),
        truncation: TruncationPolicy::default(),
    };
    let driver = RowDriver::new(model, runner, prompts, output_root.to_path_buf(), options);
    let summary = driver.run(&dataset).await;

    driver.into_runner().cleanup();
    Ok(summary)
}
