//! Row driver
//!
//! Rows are processed strictly in order. A failing row is logged, leaves an
//! error marker in its directory, and never stops the run.

use super::dataset::{Dataset, DatasetRow};
use super::mapping::{build_mapping, detect_preferred_placeholder, injection_key, RowMapping};
use super::output::{sanitize_for_path, write_error, write_sample};
use super::progress::{format_duration, ProgressTracker};
use crate::context::{truncate_text_for_prompt, TruncationPolicy};
use crate::methods::{MethodError, MethodRunner, SampleResult, StageResult};
use crate::metrics::METRICS;
use crate::model::ChatModel;
use crate::prompt::{safe_format, PromptPair};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors confined to a single row
#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Method(#[from] MethodError),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Driver settings
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Fraction of the model's output tokens to request, already validated
    pub gen_ratio: Option<f64>,
    pub progress_every: usize,
    pub truncation: TruncationPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            gen_ratio: None,
            progress_every: 10,
            truncation: TruncationPolicy::default(),
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub output_root: PathBuf,
    pub elapsed: Duration,
}

/// A row's mapping after the injection field has been fitted to the window
#[derive(Debug, Clone)]
pub struct PreparedRow {
    pub mapping: RowMapping,
    pub injection_key: &'static str,
    pub truncated: bool,
}

pub struct RowDriver {
    model: Arc<dyn ChatModel>,
    runner: Box<dyn MethodRunner>,
    prompts: PromptPair,
    preferred_placeholder: &'static str,
    output_root: PathBuf,
    options: RunOptions,
}

impl RowDriver {
    pub fn new(
        model: Arc<dyn ChatModel>,
        runner: Box<dyn MethodRunner>,
        prompts: PromptPair,
        output_root: PathBuf,
        options: RunOptions,
    ) -> Self {
        let preferred_placeholder = detect_preferred_placeholder(&prompts.user);
        debug!("Preferred placeholder: {}", preferred_placeholder);
        Self {
            model,
            runner,
            prompts,
            preferred_placeholder,
            output_root,
            options,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Per-call generation budget
    pub fn gen_max_new_tokens(&self) -> usize {
        let output_tokens = self.model.token_limits().output_tokens;
        match self.options.gen_ratio {
            Some(ratio) => ((output_tokens as f64 * ratio).floor() as usize).max(1),
            None => output_tokens,
        }
    }

    /// Build the mapping and truncate the injection field
    pub fn prepare(&self, row: &DatasetRow) -> PreparedRow {
        let mut mapping = build_mapping(row);
        let key = injection_key(&mapping, self.preferred_placeholder);

        let replacement = match truncate_text_for_prompt(
            self.model.tokenizer(),
            self.model.token_limits().input_tokens,
            &self.prompts.system,
            &self.prompts.user,
            key,
            mapping.value(key),
            &self.options.truncation,
        ) {
            Cow::Borrowed(_) => None,
            Cow::Owned(text) => Some(text),
        };
        let truncated = replacement.is_some();
        if let Some(text) = replacement {
            mapping.insert(key, text);
        }

        PreparedRow {
            mapping,
            injection_key: key,
            truncated,
        }
    }

    /// Run the method for a prepared row and persist its artifacts
    pub async fn execute(
        &self,
        row: &DatasetRow,
        prepared: &PreparedRow,
        dir: &Path,
    ) -> Result<SampleResult, RowError> {
        let result = self
            .runner
            .run_sample(
                &prepared.mapping,
                self.model.as_ref(),
                &self.prompts.system,
                &self.prompts.user,
                Some(self.gen_max_new_tokens()),
            )
            .await?;

        write_sample(dir, row.raw_vulnerable_code(), &result)?;
        Ok(result)
    }

    fn row_dir(&self, row: &DatasetRow) -> PathBuf {
        let name = sanitize_for_path(&row.row_id());
        // "." and ".." would resolve outside the row's own directory
        let name = if name.chars().all(|c| c == '.') {
            format!("row-{:06}", row.index())
        } else {
            name
        };
        self.output_root.join(name)
    }

    /// Process every row in order
    pub async fn run(&self, dataset: &Dataset) -> RunSummary {
        let total = dataset.len();
        let progress = ProgressTracker::new(total, self.options.progress_every);
        let mut succeeded = 0;
        let mut failed = 0;

        for row in dataset.rows() {
            let idx = row.index();
            let dir = self.row_dir(row);
            let prepared = self.prepare(row);
            if prepared.truncated {
                METRICS.record_truncation();
                debug!("Row {}: truncated '{}'", idx, prepared.injection_key);
            }

            match self.execute(row, &prepared, &dir).await {
                Ok(_) => {
                    succeeded += 1;
                    METRICS.record_row(true);
                }
                Err(e) => {
                    failed += 1;
                    METRICS.record_row(false);
                    error!("Row {} failed: {}", idx, e);
                    self.write_failure(row, &prepared, &dir, &e);
                }
            }

            if let Some(line) = progress.report(idx + 1) {
                info!("{}", line);
            }
        }

        let elapsed = progress.elapsed();
        info!("Completed {} rows in {}", total, format_duration(elapsed));
        info!("Saved per-instance files under: {}", self.output_root.display());

        RunSummary {
            total,
            succeeded,
            failed,
            output_root: self.output_root.clone(),
            elapsed,
        }
    }

    fn write_failure(&self, row: &DatasetRow, prepared: &PreparedRow, dir: &Path, err: &RowError) {
        let user_prompt = safe_format(&self.prompts.user, |k| prepared.mapping.get(k)).unwrap_or_default();
        let partial: &[StageResult] = match err {
            RowError::Method(e) => e.partial_stages(),
            RowError::Write { .. } => &[],
        };

        if let Err(write_err) = write_error(
            dir,
            row.raw_vulnerable_code(),
            &self.prompts.system,
            &user_prompt,
            partial,
            &err.to_string(),
        ) {
            error!("Row {}: could not record failure: {}", row.index(), write_err);
        }
    }

    /// Hand the runner back for cleanup
    pub fn into_runner(self) -> Box<dyn MethodRunner> {
        self.runner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::testing::ScriptedModel;
    use crate::methods::{PlanningRunner, SingleShotRunner, StageTwoFallback};
    use indexmap::IndexMap;
    use std::fs;

    fn row(index: usize, pairs: &[(&str, &str)]) -> DatasetRow {
        let fields: IndexMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        DatasetRow::new(index, fields)
    }

    fn prompts(user: &str) -> PromptPair {
        PromptPair {
            system: "You fix code.".to_string(),
            user: user.to_string(),
        }
    }

    fn driver(model: ScriptedModel, user: &str, root: &Path, options: RunOptions) -> RowDriver {
        RowDriver::new(
            Arc::new(model),
            Box::new(SingleShotRunner::new("1_single_shot")),
            prompts(user),
            root.to_path_buf(),
            options,
        )
    }

    #[test]
    fn test_gen_budget_from_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            gen_ratio: Some(0.25),
            ..RunOptions::default()
        };
        let d = driver(ScriptedModel::new(vec![]), "{code}", dir.path(), options);
        assert_eq!(d.gen_max_new_tokens(), 128);

        let tiny = RunOptions {
            gen_ratio: Some(0.0001),
            ..RunOptions::default()
        };
        let d = driver(ScriptedModel::new(vec![]), "{code}", dir.path(), tiny);
        assert_eq!(d.gen_max_new_tokens(), 1);

        let d = driver(ScriptedModel::new(vec![]), "{code}", dir.path(), RunOptions::default());
        assert_eq!(d.gen_max_new_tokens(), 512);
    }

    #[test]
    fn test_prepare_truncates_only_the_injection_field() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedModel::new(vec![]), "Fix:\n{vulnerable_code}", dir.path(), RunOptions::default());
        let long = "x".repeat(10_000);
        let prepared = d.prepare(&row(0, &[("vulnerable_code", long.as_str()), ("chosen", long.as_str())]));

        assert_eq!(prepared.injection_key, "vulnerable_code");
        assert!(prepared.truncated);
        assert!(prepared.mapping.value("vulnerable_code").len() < long.len());
        assert_eq!(prepared.mapping.value("chosen").len(), long.len());
    }

    #[test]
    fn test_prepare_leaves_short_text_alone() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedModel::new(vec![]), "{question}", dir.path(), RunOptions::default());
        let prepared = d.prepare(&row(0, &[("question", "Why?")]));
        assert!(!prepared.truncated);
        assert_eq!(prepared.mapping.value("question"), "Why?");
    }

    #[tokio::test]
    async fn test_run_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![Ok("fixed a"), Err("model crashed"), Ok("fixed c")]);
        let d = driver(model, "Fix {vulnerable_code}", dir.path(), RunOptions::default());

        let dataset_file = dir.path().join("data.csv");
        fs::write(&dataset_file, "id,vulnerable_code\na,code a\nb,code b\n,code c\n").unwrap();
        let dataset = Dataset::load(&dataset_file).unwrap();

        let summary = d.run(&dataset).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);

        assert_eq!(fs::read_to_string(dir.path().join("a/output.txt")).unwrap(), "fixed a");
        let failed = fs::read_to_string(dir.path().join("b/output.txt")).unwrap();
        assert!(failed.starts_with("ERROR:"));
        assert!(failed.contains("model crashed"));
        assert_eq!(
            fs::read_to_string(dir.path().join("b/input.txt")).unwrap(),
            "[SYSTEM]\nYou fix code.\n\n[USER]\nFix code b"
        );
        assert_eq!(fs::read_to_string(dir.path().join("row-000002/output.txt")).unwrap(), "fixed c");
    }

    #[tokio::test]
    async fn test_planning_failure_keeps_partial_trace() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::new(vec![Ok("plan"), Err("timeout")]);
        let d = RowDriver::new(
            Arc::new(model),
            Box::new(PlanningRunner::new("3_planning", StageTwoFallback::AppendPreviousOutput)),
            prompts("{code}"),
            dir.path().to_path_buf(),
            RunOptions::default(),
        );

        let r = row(4, &[("id", "x/1"), ("vulnerable_code", "c")]);
        let prepared = d.prepare(&r);
        let target = dir.path().join("x-1");
        let err = d.execute(&r, &prepared, &target).await.unwrap_err();
        d.write_failure(&r, &prepared, &target, &err);

        assert_eq!(fs::read_to_string(target.join("output1.txt")).unwrap(), "plan");
        assert!(fs::read_to_string(target.join("output.txt")).unwrap().starts_with("ERROR: Stage 2"));
    }

    #[tokio::test]
    async fn test_dot_ids_stay_inside_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("results");
        let model = ScriptedModel::new(vec![Ok("one"), Ok("two"), Ok("three")]);
        let d = driver(model, "Fix {vulnerable_code}", &root, RunOptions::default());

        let dataset_file = dir.path().join("data.csv");
        fs::write(&dataset_file, "id,vulnerable_code
..,code a
.,code b
...,code c
").unwrap();
        let dataset = Dataset::load(&dataset_file).unwrap();

        let summary = d.run(&dataset).await;
        assert_eq!(summary.succeeded, 3);
        assert!(!dir.path().join("output.txt").exists());
        assert!(!root.join("output.txt").exists());
        assert_eq!(fs::read_to_string(root.join("row-000000/output.txt")).unwrap(), "one");
        assert_eq!(fs::read_to_string(root.join("row-000001/output.txt")).unwrap(), "two");
        assert_eq!(fs::read_to_string(root.join("row-000002/output.txt")).unwrap(), "three");
    }
}
