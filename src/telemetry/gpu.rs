//! GPU telemetry through `nvidia-smi`
//!
//! Everything here is best effort: a missing binary, a timeout or unparsable
//! output produces no snapshot and at most a debug line.

use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const QUERY_FIELDS: &str =
    "--query-gpu=index,name,memory.total,memory.used,utilization.gpu,power.draw,temperature.gpu";

/// Metrics for one GPU
#[derive(Debug, Clone, PartialEq)]
pub struct GpuSnapshot {
    pub index: u32,
    pub name: String,
    pub memory_total_mb: f64,
    pub memory_used_mb: f64,
    pub utilization_pct: f64,
    pub power_w: f64,
    pub temp_c: f64,
}

impl fmt::Display for GpuSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPU {} | {} | mem {:.1}/{:.1} MB | util {:.1}% | power {:.1} W | temp {:.1} C",
            self.index,
            self.name,
            self.memory_used_mb,
            self.memory_total_mb,
            self.utilization_pct,
            self.power_w,
            self.temp_c
        )
    }
}

/// Parse `--format=csv,noheader,nounits` output; malformed lines are skipped
pub fn parse_snapshot(output: &str) -> Vec<GpuSnapshot> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<GpuSnapshot> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 7 {
        return None;
    }
    Some(GpuSnapshot {
        index: parts[0].parse().ok()?,
        name: parts[1].to_string(),
        memory_total_mb: parts[2].parse().ok()?,
        memory_used_mb: parts[3].parse().ok()?,
        utilization_pct: parts[4].parse().ok()?,
        power_w: parts[5].parse().ok()?,
        temp_c: parts[6].parse().ok()?,
    })
}

/// CUDA version from the `nvidia-smi` banner
pub fn parse_cuda_version(banner: &str) -> Option<String> {
    banner
        .lines()
        .find_map(|line| line.split("CUDA Version:").nth(1))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

/// Run `nvidia-smi` with a timeout; `None` on any failure
async fn nvidia_smi(args: &[&str]) -> Option<String> {
    let mut command = Command::new("nvidia-smi");
    command.args(args).kill_on_drop(true);

    let output = match tokio::time::timeout(COMMAND_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("nvidia-smi unavailable: {}", e);
            return None;
        }
        Err(_) => {
            debug!("nvidia-smi timed out after {:?}", COMMAND_TIMEOUT);
            return None;
        }
    };

    if !output.status.success() {
        debug!("nvidia-smi exited with {}", output.status);
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!stdout.is_empty()).then_some(stdout)
}

/// Current metrics for every visible GPU
pub async fn query_gpu_snapshot() -> Vec<GpuSnapshot> {
    nvidia_smi(&[QUERY_FIELDS, "--format=csv,noheader,nounits"])
        .await
        .map(|out| parse_snapshot(&out))
        .unwrap_or_default()
}

/// Log driver/CUDA versions and one line per GPU
pub async fn log_gpu_overview() {
    let Some(driver_out) = nvidia_smi(&["--query-gpu=driver_version", "--format=csv,noheader"]).await else {
        debug!("Skipping GPU overview: nvidia-smi not available");
        return;
    };
    let driver = driver_out.lines().next().unwrap_or("?").to_string();
    let cuda = nvidia_smi(&[])
        .await
        .and_then(|banner| parse_cuda_version(&banner))
        .unwrap_or_else(|| "?".to_string());

    info!("nvidia-smi available | driver: {} | cuda: {}", driver, cuda);
    for gpu in query_gpu_snapshot().await {
        info!("{}", gpu);
    }
}

/// Background task that logs GPU metrics at a fixed interval
pub struct PeriodicGpuMonitor {
    interval: Duration,
    enabled: bool,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicGpuMonitor {
    pub fn new(interval: Duration, enabled: bool) -> Self {
        Self {
            interval,
            enabled,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the polling task; no-op when disabled or already running
    pub fn start(&mut self) {
        if !self.enabled || self.handle.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                let snapshot = query_gpu_snapshot().await;
                if !snapshot.is_empty() {
                    let line = snapshot
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" | ");
                    info!("{}", line);
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut stop_rx => break,
                }
            }
        });

        debug!("GPU monitor started ({:?} interval)", self.interval);
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
    }

    /// Signal the task and wait for it to finish
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            let wait = self.interval.max(Duration::from_secs(1));
            if tokio::time::timeout(wait, &mut handle).await.is_err() {
                debug!("GPU monitor did not stop within {:?}, aborting", wait);
                handle.abort();
            }
        }
    }
}
