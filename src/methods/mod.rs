//! Prompting methods
//!
//! A method turns one row mapping into one or more model exchanges. Methods
//! are registered by key in a [`MethodRegistry`] that the caller builds and
//! passes around; there is no global registry.

pub mod planning;
pub mod single_shot;

pub use planning::{PlanningRunner, StageTwoFallback};
pub use single_shot::SingleShotRunner;

use crate::metrics::METRICS;
use crate::model::{ChatModel, GenerationParams, Message, ModelError};
use crate::pipeline::RowMapping;
use crate::prompt::{PromptError, PromptStore, TemplateError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Run-level information handed to a method before the first row
#[derive(Debug, Clone)]
pub struct MethodContext {
    pub dataset_path: PathBuf,
    pub output_root: PathBuf,
    pub model_name: String,
    pub method: String,
    pub prompts: PromptStore,
}

/// One system/user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// 1-based
    pub stage: usize,
    pub messages: Vec<Message>,
    pub completion: String,
}

/// Everything a method produced for one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResult {
    /// Full trace; the final assistant reply is only in `completion`
    pub messages: Vec<Message>,
    pub completion: String,
    pub stages: Vec<StageResult>,
}

/// Method errors
#[derive(Debug, Error)]
pub enum MethodError {
    #[error("Unknown method: {name}. Available: [{}]", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("Method name cannot be empty")]
    EmptyName,

    #[error("Stage {stage} template error: {source}")]
    Template {
        stage: usize,
        partial: Vec<StageResult>,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("Stage {stage} generation failed: {source}")]
    Generation {
        stage: usize,
        partial: Vec<StageResult>,
        #[source]
        source: ModelError,
    },
}

impl MethodError {
    /// Stages that completed before the failure
    pub fn partial_stages(&self) -> &[StageResult] {
        match self {
            MethodError::Template { partial, .. } | MethodError::Generation { partial, .. } => partial,
            _ => &[],
        }
    }
}

/// A prompting strategy
#[async_trait]
pub trait MethodRunner: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// Resolve everything the method needs for the run
    fn setup(&mut self, context: &MethodContext) -> Result<(), MethodError>;

    /// Produce the model exchanges for one row
    async fn run_sample(
        &self,
        mapping: &RowMapping,
        model: &dyn ChatModel,
        system_template: &str,
        user_template: &str,
        gen_max_new_tokens: Option<usize>,
    ) -> Result<SampleResult, MethodError>;

    /// Release per-run state
    fn cleanup(&mut self);
}

/// Constructor stored in the registry
pub type MethodFactory = fn() -> Box<dyn MethodRunner>;

/// Method key to constructor
#[derive(Clone, Default)]
pub struct MethodRegistry {
    factories: BTreeMap<String, MethodFactory>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in method
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, MethodFactory); 4] = [
            ("1_single_shot", single_shot),
            ("2_xai", xai),
            ("3_planning", planning),
            ("4_planning_explanation", planning_explanation),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: MethodFactory) -> Result<(), MethodError> {
        let key = name.trim();
        if key.is_empty() {
            return Err(MethodError::EmptyName);
        }
        self.factories.insert(key.to_string(), factory);
        Ok(())
    }

    /// Sorted method keys
    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn ensure_known(&self, name: &str) -> Result<(), MethodError> {
        self.factory(name).map(|_| ())
    }

    /// Build a fresh runner for `name`
    pub fn create(&self, name: &str) -> Result<Box<dyn MethodRunner>, MethodError> {
        Ok((self.factory(name)?)())
    }

    fn factory(&self, name: &str) -> Result<MethodFactory, MethodError> {
        let key = name.trim();
        if key.is_empty() {
            return Err(MethodError::EmptyName);
        }
        self.factories
            .get(key)
            .copied()
            .ok_or_else(|| MethodError::NotFound {
                name: name.to_string(),
                available: self.available(),
            })
    }
}

fn single_shot() -> Box<dyn MethodRunner> {
    Box::new(SingleShotRunner::new("1_single_shot"))
}

fn xai() -> Box<dyn MethodRunner> {
    Box::new(SingleShotRunner::new("2_xai"))
}

fn planning() -> Box<dyn MethodRunner> {
    Box::new(PlanningRunner::new("3_planning", StageTwoFallback::AppendPreviousOutput))
}

fn planning_explanation() -> Box<dyn MethodRunner> {
    Box::new(PlanningRunner::new("4_planning_explanation", StageTwoFallback::StageOneTemplates))
}

/// Send one conversation, recording its latency under `method`
pub(crate) async fn generate_stage(
    model: &dyn ChatModel,
    method: &str,
    messages: &[Message],
    gen_max_new_tokens: Option<usize>,
) -> Result<String, ModelError> {
    let params = gen_max_new_tokens.map(GenerationParams::new);
    let started = Instant::now();
    let result = model.generate(messages, params.as_ref()).await;
    METRICS.record_stage(method, started.elapsed().as_secs_f64());
    result
}
