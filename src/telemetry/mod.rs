//! Diagnostic telemetry
//!
//! Runs beside the pipeline and never touches row state.

pub mod gpu;

pub use gpu::{log_gpu_overview, parse_snapshot, query_gpu_snapshot, GpuSnapshot, PeriodicGpuMonitor};
