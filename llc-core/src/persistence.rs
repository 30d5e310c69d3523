//! Settings persistence
//!
//! Each field of the settings file is decoded on its own. A field that is
//! missing or fails validation keeps its default, so one bad value never
//! takes the rest of the file down with it. The file is written back when it
//! is missing or unparseable, or when a field in it was rejected.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use llc_error::{LlcError, Result};
use llc_protocol::MacAddr;

use crate::constants::paths;
use crate::settings::{canonicalize_macs, parse_mac_list, CurveMode, FanMode, LinearMode, Settings};

/// Where settings come from and go to
pub trait SettingsStore: Send + Sync {
    /// Load settings, falling back to defaults field by field
    fn load(&self) -> Settings;

    fn save(&self, settings: &Settings) -> Result<()>;
}

/// Settings kept in a JSON file
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$XDG_CONFIG_HOME/ll-connect-wireless/config.json`
    pub fn default_location() -> Result<Self> {
        paths::default_settings_path()
            .map(Self::new)
            .ok_or_else(|| LlcError::config("Could not determine config directory"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Settings {
        let (settings, normalized) = match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(raw)) => decode_settings(&raw),
                Ok(_) => {
                    warn!(path = %self.path.display(), "Settings file is not a JSON object, using defaults");
                    (Settings::default(), true)
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Settings file unparseable, using defaults");
                    (Settings::default(), true)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No settings file, writing defaults");
                (Settings::default(), true)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Settings file unreadable, using defaults");
                (Settings::default(), true)
            }
        };

        if normalized {
            if let Err(e) = self.save(&settings) {
                warn!(error = %e, "Failed to write normalized settings");
            }
        }

        settings
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string_pretty(&SettingsFile::from(settings))?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| LlcError::FileWrite {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        // Write to a temp file and rename over the target
        let temp_path = self.path.with_extension("json.tmp");
        let write = |path: &Path| -> io::Result<()> {
            let mut file = fs::File::create(path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()
        };
        write(&temp_path).map_err(|source| LlcError::FileWrite {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| LlcError::FileWrite {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), "Saved settings");
        Ok(())
    }
}

/// On-disk layout
#[derive(Serialize)]
struct SettingsFile<'a> {
    mode: FanMode,
    linear: &'a LinearMode,
    #[serde(rename = "CPU_LINEAR")]
    cpu_linear: &'a LinearMode,
    #[serde(rename = "GPU_LINEAR")]
    gpu_linear: &'a LinearMode,
    #[serde(rename = "CPU_FAN_CURVE")]
    cpu_curve: String,
    #[serde(rename = "GPU_FAN_CURVE")]
    gpu_curve: String,
    #[serde(rename = "GPU_TEMP_MACS")]
    gpu_temp_macs: &'a BTreeSet<MacAddr>,
}

impl<'a> From<&'a Settings> for SettingsFile<'a> {
    fn from(settings: &'a Settings) -> Self {
        Self {
            mode: settings.mode,
            linear: &settings.linear,
            cpu_linear: &settings.linear,
            gpu_linear: &settings.gpu_linear,
            cpu_curve: settings.cpu_curve.to_string(),
            gpu_curve: settings.gpu_curve.to_string(),
            gpu_temp_macs: &settings.gpu_temp_macs,
        }
    }
}

// ============================================================================
// Field decoding
// ============================================================================

/// Result of decoding one settings field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldOutcome {
    Absent,
    Accepted,
    Rejected,
}

/// Decode a settings object; the flag is set when a present field was rejected
pub fn decode_settings(raw: &Map<String, Value>) -> (Settings, bool) {
    let mut settings = Settings::default();

    // CPU_LINEAR is decoded after the legacy key so it wins when both decode
    let outcomes = [
        decode_field(raw, &["mode"], decode_mode, &mut settings.mode),
        decode_field(raw, &["linear"], decode_linear, &mut settings.linear),
        decode_field(raw, &["CPU_LINEAR"], decode_linear, &mut settings.linear),
        decode_field(raw, &["GPU_LINEAR", "gpu_linear"], decode_linear, &mut settings.gpu_linear),
        decode_field(raw, &["CPU_FAN_CURVE", "cpu_curve"], decode_curve, &mut settings.cpu_curve),
        decode_field(raw, &["GPU_FAN_CURVE", "gpu_curve"], decode_curve, &mut settings.gpu_curve),
        decode_field(raw, &["GPU_TEMP_MACS", "gpu_temp_macs"], decode_macs, &mut settings.gpu_temp_macs),
    ];

    let normalized = outcomes.contains(&FieldOutcome::Rejected);
    (settings, normalized)
}

/// Decode the first present key into `slot`; `slot` is untouched unless accepted
fn decode_field<T>(
    raw: &Map<String, Value>,
    keys: &[&'static str],
    decode: impl Fn(&Value) -> Result<T>,
    slot: &mut T,
) -> FieldOutcome {
    let Some((key, value)) = keys
        .iter()
        .find_map(|key| raw.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
    else {
        debug!(field = keys[0], "Settings field missing, using default");
        return FieldOutcome::Absent;
    };

    match decode(value) {
        Ok(decoded) => {
            *slot = decoded;
            FieldOutcome::Accepted
        }
        Err(e) => {
            warn!(field = key, error = %e, "Rejected settings field, keeping default");
            FieldOutcome::Rejected
        }
    }
}

fn decode_mode(value: &Value) -> Result<FanMode> {
    Ok(serde_json::from_value(value.clone())?)
}

fn decode_linear(value: &Value) -> Result<LinearMode> {
    match value {
        Value::String(s) => s.parse(),
        Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
        other => Err(LlcError::invalid("linear", format!("unexpected value {}", other))),
    }
}

fn decode_curve(value: &Value) -> Result<CurveMode> {
    match value {
        Value::String(s) => s.parse(),
        Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
        other => Err(LlcError::invalid("curve", format!("unexpected value {}", other))),
    }
}

fn decode_macs(value: &Value) -> Result<BTreeSet<MacAddr>> {
    match value {
        Value::String(s) => parse_mac_list(s),
        Value::Array(items) => {
            let entries = items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| LlcError::invalid("gpu_temp_macs", format!("not a string: {}", item)))
                })
                .collect::<Result<Vec<&str>>>()?;
            canonicalize_macs(entries)
        }
        other => Err(LlcError::invalid("gpu_temp_macs", format!("unexpected value {}", other))),
    }
}
