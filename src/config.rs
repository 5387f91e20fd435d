//! Pipeline configuration
//!
//! Layering, lowest to highest: serde defaults, an optional TOML file,
//! environment variables (with `.env` loaded by the binary), CLI flags.

use crate::error::{PipelineError, Result};
use crate::methods::MethodRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Input CSV
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,

    /// Output root directory (or file-like path whose stem names the directory)
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Prompting method key
    #[serde(default = "default_method")]
    pub method: String,

    /// Fraction of the model's output tokens to request, in (0, 1)
    #[serde(default)]
    pub gen_ratio: Option<f64>,

    /// Exact log file path
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Directory for dated log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_gpu_monitor")]
    pub gpu_monitor: bool,

    #[serde(default = "default_gpu_monitor_interval")]
    pub gpu_monitor_interval_secs: f64,

    /// Log progress every N rows
    #[serde(default = "default_progress_every")]
    pub progress_log_every: usize,

    /// Root of the `<method>/{system,user}.txt` prompt tree
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Applied to CUDA_VISIBLE_DEVICES before the run starts
    #[serde(default)]
    pub visible_devices: Option<String>,

    #[serde(default)]
    pub llm: LlmConfig,
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_openai_api_url")]
    pub openai_api_url: String,

    /// Read from OPENAI_API_KEY or OPENAI_KEY when not set
    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible server hosting local checkpoints
    #[serde(default = "default_local_endpoint")]
    pub local_endpoint: String,

    #[serde(default)]
    pub local_api_key: Option<String>,

    /// Request timeout; unset means generation may block indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_retries: usize,
}

fn default_model() -> String { "google/gemma-3-27b-it".to_string() }
fn default_method() -> String { "1_single_shot".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_gpu_monitor() -> bool { true }
fn default_gpu_monitor_interval() -> f64 { 30.0 }
fn default_progress_every() -> usize { 10 }
fn default_prompts_dir() -> PathBuf { PathBuf::from("prompts") }
fn default_openai_api_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_local_endpoint() -> String { "http://localhost:8000/v1/chat/completions".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_url: default_openai_api_url(),
            openai_api_key: None,
            local_endpoint: default_local_endpoint(),
            local_api_key: None,
            timeout_secs: None,
            max_retries: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_path: None,
            output_path: None,
            model: default_model(),
            method: default_method(),
            gen_ratio: None,
            log_file: None,
            log_dir: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
            gpu_monitor: default_gpu_monitor(),
            gpu_monitor_interval_secs: default_gpu_monitor_interval(),
            progress_log_every: default_progress_every(),
            prompts_dir: default_prompts_dir(),
            visible_devices: None,
            llm: LlmConfig::default(),
        }
    }
}

/// Flags that override every other layer
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CliOverrides {
    /// Path to the input dataset CSV
    #[arg(long, short = 'd')]
    pub dataset: Option<PathBuf>,

    /// Model identifier (OpenAI model name or locally served checkpoint)
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Prompting method to use
    #[arg(long, short = 'p')]
    pub method: Option<String>,

    /// Output directory (or file path whose stem names the directory)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Fraction of output tokens to reserve for generation (0.0-1.0)
    #[arg(long)]
    pub gen_ratio: Option<f64>,

    /// Prompt templates root
    #[arg(long)]
    pub prompts_dir: Option<PathBuf>,

    /// Write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Write dated logs under this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Disable periodic GPU monitoring
    #[arg(long)]
    pub no_gpu_monitor: bool,
}

impl PipelineConfig {
    /// Load a TOML (or any format the `config` crate infers) file over the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Override with process environment variables
    pub fn from_env(self) -> Self {
        self.from_env_with(|key| std::env::var(key).ok())
    }

    /// Override with variables from `lookup`
    pub fn from_env_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(val) = get("PIPELINE_DATASET_PATH") {
            self.dataset_path = Some(PathBuf::from(val));
        }

        if let Some(val) = get("PIPELINE_OUTPUT_PATH") {
            self.output_path = Some(PathBuf::from(val));
        }

        if let Some(val) = get("LOCAL_LLM_MODEL") {
            self.model = val;
        }

        if let Some(val) = get("PROMPT_METHOD") {
            self.method = val;
        }

        if let Some(val) = get("PIPELINE_GEN_RATIO") {
            match val.parse() {
                Ok(ratio) => self.gen_ratio = Some(ratio),
                Err(_) => warn!("PIPELINE_GEN_RATIO is not a number: {}. Ignoring.", val),
            }
        }

        if let Some(val) = get("PIPELINE_LOG_FILE") {
            self.log_file = Some(PathBuf::from(val));
        }

        if let Some(val) = get("PIPELINE_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = get("LOG_LEVEL") {
            self.log_level = val;
        }

        if let Some(val) = get("LOG_FORMAT") {
            self.log_format = val;
        }

        if let Some(val) = get("GPU_MONITOR") {
            self.gpu_monitor = !matches!(val.as_str(), "0" | "false" | "False");
        }

        if let Some(val) = get("GPU_MONITOR_INTERVAL_SEC") {
            if let Ok(secs) = val.parse() {
                self.gpu_monitor_interval_secs = secs;
            }
        }

        if let Some(val) = get("PROGRESS_LOG_EVERY") {
            if let Ok(every) = val.parse() {
                self.progress_log_every = every;
            }
        }

        if let Some(val) = get("PIPELINE_PROMPTS_DIR") {
            self.prompts_dir = PathBuf::from(val);
        }

        if let Some(val) = get("PIPELINE_VISIBLE_DEVICES").or_else(|| get("PIPELINE_GPU_ID")) {
            self.visible_devices = Some(val);
        }

        if let Some(val) = get("OPENAI_API_URL") {
            self.llm.openai_api_url = val;
        }

        if let Some(val) = get("OPENAI_API_KEY").or_else(|| get("OPENAI_KEY")) {
            self.llm.openai_api_key = Some(val);
        }

        if let Some(val) = get("LOCAL_LLM_ENDPOINT") {
            self.llm.local_endpoint = val;
        }

        if let Some(val) = get("LOCAL_LLM_API_KEY") {
            self.llm.local_api_key = Some(val);
        }

        if let Some(val) = get("LLM_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.llm.timeout_secs = Some(secs);
            }
        }

        if let Some(val) = get("LLM_MAX_RETRIES") {
            if let Ok(retries) = val.parse() {
                self.llm.max_retries = retries;
            }
        }

        self
    }

    /// Apply command-line flags
    pub fn apply_cli(mut self, cli: &CliOverrides) -> Self {
        if let Some(ref dataset) = cli.dataset {
            self.dataset_path = Some(dataset.clone());
        }
        if let Some(ref model) = cli.model {
            self.model = model.clone();
        }
        if let Some(ref method) = cli.method {
            self.method = method.clone();
        }
        if let Some(ref output) = cli.output {
            self.output_path = Some(output.clone());
        }
        if let Some(ratio) = cli.gen_ratio {
            self.gen_ratio = Some(ratio);
        }
        if let Some(ref dir) = cli.prompts_dir {
            self.prompts_dir = dir.clone();
        }
        if let Some(ref file) = cli.log_file {
            self.log_file = Some(file.clone());
        }
        if let Some(ref dir) = cli.log_dir {
            self.log_dir = Some(dir.clone());
        }
        if cli.no_gpu_monitor {
            self.gpu_monitor = false;
        }
        self
    }

    /// Generation ratio if it lies in (0, 1); anything else is ignored
    pub fn effective_gen_ratio(&self) -> Option<f64> {
        match self.gen_ratio {
            Some(ratio) if ratio > 0.0 && ratio < 1.0 => Some(ratio),
            Some(ratio) => {
                warn!("PIPELINE_GEN_RATIO out of range: {}. Ignoring.", ratio);
                None
            }
            None => None,
        }
    }

    /// Progress interval, never zero
    pub fn progress_every(&self) -> usize {
        self.progress_log_every.max(1)
    }

    pub fn gpu_monitor_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.gpu_monitor_interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_gpu_monitor_interval()))
    }

    /// Check everything that must hold before the first row is read.
    ///
    /// Returns the dataset path.
    pub fn validate(&self, registry: &MethodRegistry) -> Result<PathBuf> {
        let dataset = self
            .dataset_path
            .clone()
            .ok_or(PipelineError::MissingDatasetPath)?;
        if !dataset.is_file() {
            return Err(PipelineError::DatasetNotFound(dataset));
        }

        registry.ensure_known(&self.method)?;

        if self.model.trim().is_empty() {
            return Err(PipelineError::Invalid("model name is empty".to_string()));
        }

        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::MethodError;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.model, "google/gemma-3-27b-it");
        assert_eq!(config.method, "1_single_shot");
        assert!(config.gpu_monitor);
        assert_eq!(config.gpu_monitor_interval(), Duration::from_secs(30));
        assert_eq!(config.progress_log_every, 10);
        assert_eq!(config.llm.max_retries, 0);
        assert!(config.llm.timeout_secs.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::default().from_env_with(env(&[
            ("PIPELINE_DATASET_PATH", "data/train.csv"),
            ("LOCAL_LLM_MODEL", "Qwen/Qwen3-32B"),
            ("PROMPT_METHOD", " 3_planning "),
            ("PIPELINE_GEN_RATIO", "0.5"),
            ("GPU_MONITOR_INTERVAL_SEC", "5"),
            ("PROGRESS_LOG_EVERY", "25"),
            ("OPENAI_KEY", "sk-fallback"),
        ]));

        assert_eq!(config.dataset_path, Some(PathBuf::from("data/train.csv")));
        assert_eq!(config.model, "Qwen/Qwen3-32B");
        assert_eq!(config.method, "3_planning");
        assert_eq!(config.effective_gen_ratio(), Some(0.5));
        assert_eq!(config.gpu_monitor_interval(), Duration::from_secs(5));
        assert_eq!(config.progress_log_every, 25);
        assert_eq!(config.llm.openai_api_key.as_deref(), Some("sk-fallback"));
    }

    #[test]
    fn test_primary_api_key_wins() {
        let config = PipelineConfig::default().from_env_with(env(&[
            ("OPENAI_API_KEY", "sk-primary"),
            ("OPENAI_KEY", "sk-fallback"),
        ]));
        assert_eq!(config.llm.openai_api_key.as_deref(), Some("sk-primary"));
    }

    #[test]
    fn test_gpu_monitor_switch() {
        for off in ["0", "false", "False"] {
            let config = PipelineConfig::default().from_env_with(env(&[("GPU_MONITOR", off)]));
            assert!(!config.gpu_monitor, "{} should disable", off);
        }
        let config = PipelineConfig::default().from_env_with(env(&[("GPU_MONITOR", "yes")]));
        assert!(config.gpu_monitor);
    }

    #[test]
    fn test_gen_ratio_out_of_range_is_ignored() {
        for raw in ["0", "1", "1.5", "-0.2"] {
            let config = PipelineConfig::default().from_env_with(env(&[("PIPELINE_GEN_RATIO", raw)]));
            assert_eq!(config.effective_gen_ratio(), None);
        }
        let config = PipelineConfig::default().from_env_with(env(&[("PIPELINE_GEN_RATIO", "half")]));
        assert_eq!(config.gen_ratio, None);
    }

    #[test]
    fn test_cli_overrides_env() {
        let cli = CliOverrides {
            model: Some("gpt-4o".to_string()),
            gen_ratio: Some(0.25),
            no_gpu_monitor: true,
            ..CliOverrides::default()
        };
        let config = PipelineConfig::default()
            .from_env_with(env(&[("LOCAL_LLM_MODEL", "Qwen/Qwen3-32B")]))
            .apply_cli(&cli);

        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.gen_ratio, Some(0.25));
        assert!(!config.gpu_monitor);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "method = \"4_planning_explanation\"\nprogress_log_every = 3\n\n[llm]\nmax_retries = 2\n"
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.method, "4_planning_explanation");
        assert_eq!(config.progress_log_every, 3);
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.model, "google/gemma-3-27b-it");
    }

    #[test]
    fn test_validate_requires_dataset() {
        let registry = MethodRegistry::with_defaults();
        let err = PipelineConfig::default().validate(&registry).unwrap_err();
        assert!(matches!(err, PipelineError::MissingDatasetPath));

        let config = PipelineConfig {
            dataset_path: Some(PathBuf::from("/nonexistent/data.csv")),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(&registry).unwrap_err(),
            PipelineError::DatasetNotFound(_)
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_method() {
        let dataset = tempfile::NamedTempFile::new().unwrap();
        let config = PipelineConfig {
            dataset_path: Some(dataset.path().to_path_buf()),
            method: "9_magic".to_string(),
            ..PipelineConfig::default()
        };
        let err = config.validate(&MethodRegistry::with_defaults()).unwrap_err();
        assert!(matches!(err, PipelineError::Method(MethodError::NotFound { .. })));
    }
}
