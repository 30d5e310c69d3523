//! Temperature sources
//!
//! Both sources are best-effort: any failure reads as "no sample".

mod gpu;
mod hwmon;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::temperature::{GPU_QUERY_TIMEOUT, HWMON_BASE};

pub use gpu::{parse_gpu_temperatures, query_nvidia_smi};
pub use hwmon::read_cpu_temperature;

/// Source of the CPU and GPU temperatures sampled each tick
pub trait TemperatureSource: Send + Sync {
    fn cpu_celsius(&self) -> impl Future<Output = Option<f32>> + Send;
    fn gpu_celsius(&self) -> impl Future<Output = Option<f32>> + Send;
}

/// hwmon for the CPU, `nvidia-smi` for the GPU
#[derive(Debug, Clone)]
pub struct SystemTemperatures {
    hwmon_base: PathBuf,
    gpu_timeout: Duration,
}

impl SystemTemperatures {
    pub fn new(hwmon_base: impl Into<PathBuf>, gpu_timeout: Duration) -> Self {
        Self {
            hwmon_base: hwmon_base.into(),
            gpu_timeout,
        }
    }
}

impl Default for SystemTemperatures {
    fn default() -> Self {
        Self::new(HWMON_BASE, GPU_QUERY_TIMEOUT)
    }
}

impl TemperatureSource for SystemTemperatures {
    async fn cpu_celsius(&self) -> Option<f32> {
        read_cpu_temperature(&self.hwmon_base).await
    }

    async fn gpu_celsius(&self) -> Option<f32> {
        query_nvidia_smi(self.gpu_timeout).await
    }
}
