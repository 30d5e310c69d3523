//! GPU temperature via `nvidia-smi`

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

/// Hottest GPU reported by `nvidia-smi`, or `None` if the query fails or
/// does not finish within `limit`. The child is killed on timeout.
pub async fn query_nvidia_smi(limit: Duration) -> Option<f32> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=temperature.gpu", "--format=csv,noheader,nounits"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(limit, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            trace!(error = %e, "nvidia-smi unavailable");
            return None;
        }
        Err(_) => {
            debug!(timeout_ms = limit.as_millis() as u64, "nvidia-smi timed out");
            return None;
        }
    };

    if !output.status.success() {
        trace!(status = %output.status, "nvidia-smi failed");
        return None;
    }

    parse_gpu_temperatures(&String::from_utf8_lossy(&output.stdout))
}

/// Maximum of the per-GPU readings, one per line
pub fn parse_gpu_temperatures(stdout: &str) -> Option<f32> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "N/A" && *line != "[N/A]")
        .filter_map(|line| line.parse::<f32>().ok())
        .filter(|t| t.is_finite())
        .reduce(f32::max)
}
