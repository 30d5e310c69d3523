//! Fan control engine
//!
//! Pure control laws plus the per-tick routing of fans to the CPU or GPU law.

mod law;
mod routing;

pub use law::{curve_to_pwm, linear_to_pwm, percent_to_pwm, pwm_to_percent, ControlLaw};
pub use routing::{plan_targets, GpuRoute, RouteTracker, RouteTransition, TargetPlan, TemperatureSample};
