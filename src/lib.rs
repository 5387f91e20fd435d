//! Patch generation pipeline
//!
//! Drives chat models over a dataset of vulnerable code samples, fitting one
//! field of each row into the model's context window, and records every
//! prompt and completion on disk.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod methods;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod telemetry;

pub use config::{CliOverrides, LlmConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use methods::{MethodRegistry, MethodRunner, SampleResult, StageResult};
pub use model::{create_model, ChatModel, GenerationParams, Message, Role};
pub use pipeline::{run_pipeline, RunSummary};
