//! CPU temperature from hwmon
//!
//! Reads every `tempN_input` under the hwmon base. The sensor labelled
//! `Tctl` wins when present; otherwise the hottest reading is used.

use std::path::Path;

use tokio::fs;
use tracing::trace;

use crate::constants::temperature::{CPU_PREFERRED_LABEL, MILLIDEGREES};

pub async fn read_cpu_temperature(hwmon_base: &Path) -> Option<f32> {
    let mut chips = match fs::read_dir(hwmon_base).await {
        Ok(entries) => entries,
        Err(e) => {
            trace!(path = %hwmon_base.display(), error = %e, "hwmon base unreadable");
            return None;
        }
    };

    let mut preferred = None;
    let mut hottest: Option<f32> = None;

    while let Ok(Some(chip)) = chips.next_entry().await {
        let chip_path = chip.path();
        let Ok(mut files) = fs::read_dir(&chip_path).await else {
            continue;
        };

        while let Ok(Some(file)) = files.next_entry().await {
            let name = file.file_name();
            let name = name.to_string_lossy();
            let Some(sensor) = name.strip_suffix("_input").filter(|s| s.starts_with("temp")) else {
                continue;
            };
            let Some(celsius) = read_millidegrees(&file.path()).await else {
                continue;
            };

            let label = fs::read_to_string(chip_path.join(format!("{}_label", sensor)))
                .await
                .ok();
            if label.as_deref().map(str::trim) == Some(CPU_PREFERRED_LABEL) {
                preferred = Some(celsius);
            }
            hottest = Some(hottest.map_or(celsius, |t| t.max(celsius)));
        }
    }

    preferred.or(hottest)
}

async fn read_millidegrees(path: &Path) -> Option<f32> {
    let raw = fs::read_to_string(path).await.ok()?;
    let value: i64 = raw.trim().parse().ok()?;
    Some(value as f32 / MILLIDEGREES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sensor(dir: &Path, chip: &str, index: u32, millidegrees: &str, label: Option<&str>) {
        let chip_dir = dir.join(chip);
        fs::create_dir_all(&chip_dir).expect("chip dir");
        fs::write(chip_dir.join(format!("temp{}_input", index)), millidegrees).expect("input");
        if let Some(label) = label {
            fs::write(chip_dir.join(format!("temp{}_label", index)), format!("{}\n", label))
                .expect("label");
        }
    }

    #[tokio::test]
    async fn test_prefers_tctl() {
        let dir = TempDir::new().expect("tempdir");
        sensor(dir.path(), "hwmon0", 1, "48500\n", Some("Tctl"));
        sensor(dir.path(), "hwmon1", 1, "71000\n", Some("Composite"));

        assert_eq!(read_cpu_temperature(dir.path()).await, Some(48.5));
    }

    #[tokio::test]
    async fn test_falls_back_to_hottest() {
        let dir = TempDir::new().expect("tempdir");
        sensor(dir.path(), "hwmon0", 1, "42000", Some("Package id 0"));
        sensor(dir.path(), "hwmon0", 2, "55000", Some("Core 0"));
        sensor(dir.path(), "hwmon1", 1, "garbage", None);

        assert_eq!(read_cpu_temperature(dir.path()).await, Some(55.0));
    }

    #[tokio::test]
    async fn test_missing_or_empty_base() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(read_cpu_temperature(dir.path()).await, None);
        assert_eq!(read_cpu_temperature(&dir.path().join("absent")).await, None);
    }
}
