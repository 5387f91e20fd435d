//! Logging setup
//!
//! Console output goes to stderr (plain text or JSON). When a log file can be
//! opened, a second non-ANSI layer appends to it through a non-blocking
//! writer; the returned guard flushes it on drop.

use crate::config::PipelineConfig;
use crate::pipeline::sanitize_for_path;
use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Logging settings
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: String,
    pub json: bool,
    pub log_file: Option<PathBuf>,
}

impl LoggingOptions {
    pub fn from_config(config: &PipelineConfig, log_file: Option<PathBuf>) -> Self {
        Self {
            level: config.log_level.to_lowercase(),
            json: config.log_format.eq_ignore_ascii_case("json"),
            log_file,
        }
    }
}

/// Keeps the file writer alive; drop it last
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Where the run's log file goes.
///
/// An explicit file wins; otherwise `<date>_<method>` under the configured log
/// directory, or under `logs/<output root name>/`.
pub fn resolve_log_file(config: &PipelineConfig, output_root: &Path, today: NaiveDate) -> PathBuf {
    if let Some(ref file) = config.log_file {
        return file.clone();
    }

    let basename = format!(
        "{}_{}",
        today.format("%Y-%m-%d"),
        sanitize_for_path(config.method.trim())
    );
    match config.log_dir {
        Some(ref dir) => dir.join(basename),
        None => {
            let run_name = output_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Path::new("logs").join(run_name).join(basename)
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init_logging(options: &LoggingOptions) -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if options.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    });

    let mut file_guard = None;
    let mut file_error = None;
    if let Some(ref path) = options.log_file {
        match open_log_file(path) {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
                file_guard = Some(guard);
            }
            Err(e) => file_error = Some((path.clone(), e)),
        }
    }

    let _ = tracing_subscriber::registry().with(layers).with(filter).try_init();

    if let Some((path, e)) = file_error {
        warn!("File logging disabled, cannot open {}: {}", path.display(), e);
    }

    LogGuard { _file: file_guard }
}
