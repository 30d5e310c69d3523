//! LL-Connect-Wireless Core Library
//!
//! Everything the fan control daemon needs short of its process shell.
//!
//! # Module Structure
//!
//! - `hub/` - Frame codec and USB transport for the wireless fan hub
//! - `engine/` - Control laws and CPU/GPU routing
//! - `hw/` - CPU and GPU temperature sources
//! - `settings` - Validated control settings
//! - `persistence` - Settings file load/save with per-field fallback
//!
//! # Example
//!
//! ```
//! use llc_core::{CurveMode, curve_to_pwm};
//!
//! let curve: CurveMode = "30:20,50:40,70:80,90:100".parse().unwrap();
//! assert_eq!(curve_to_pwm(90.0, &curve), 255);
//! ```

// Grouped modules
pub mod engine;
pub mod hub;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod persistence;
pub mod settings;

pub use llc_error::{LlcError, Result};

pub use engine::{
    curve_to_pwm, linear_to_pwm, percent_to_pwm, plan_targets, pwm_to_percent, ControlLaw,
    GpuRoute, RouteTracker, RouteTransition, TargetPlan, TemperatureSample,
};
pub use hub::{decode_page, encode_command, CommandFrame, HubTransport, UsbHub};
pub use hw::{SystemTemperatures, TemperatureSource};
pub use persistence::{JsonSettingsStore, SettingsStore};
pub use settings::{CurveMode, CurvePoint, FanMode, LinearMode, Settings};
