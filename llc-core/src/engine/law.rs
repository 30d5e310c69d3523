//! Temperature to duty-cycle laws
//!
//! All functions here are pure and total: any finite temperature maps to a
//! wire duty cycle in 0-255. Percentages are scaled to the wire range with
//! round-half-to-even so the same input always produces the same byte.

use crate::constants::limits;
use crate::settings::{CurveMode, LinearMode};

/// Scale a percentage to the wire duty cycle, clamping to 0-100 first
pub fn percent_to_pwm(percent: f64) -> u8 {
    let clamped = percent.clamp(0.0, f64::from(limits::MAX_PERCENT));
    (clamped / 100.0 * f64::from(limits::MAX_PWM)).round_ties_even() as u8
}

/// Wire duty cycle as a whole percentage (truncated)
pub fn pwm_to_percent(pwm: u8) -> u8 {
    (u32::from(pwm) * 100 / u32::from(limits::MAX_PWM)) as u8
}

/// Evaluate a two-point linear law
pub fn linear_to_pwm(temp: f32, mode: &LinearMode) -> u8 {
    let min_temp = f64::from(mode.min_temp());
    let max_temp = f64::from(mode.max_temp());
    let min_pwm = f64::from(mode.min_pwm());
    let max_pwm = f64::from(mode.max_pwm());

    let delta = max_temp - min_temp;
    if delta <= 0.0 {
        return percent_to_pwm(min_pwm);
    }

    let clamped = f64::from(temp).clamp(min_temp, max_temp);
    let ratio = (clamped - min_temp) / delta;
    percent_to_pwm(min_pwm + ratio * (max_pwm - min_pwm))
}

/// Evaluate a four-point curve by linear interpolation between knots
pub fn curve_to_pwm(temp: f32, curve: &CurveMode) -> u8 {
    let points = curve.points();
    let temp = f64::from(temp);

    let first = points[0];
    let last = points[points.len() - 1];
    if temp <= f64::from(first.temp_c) {
        return percent_to_pwm(f64::from(first.percent));
    }
    if temp >= f64::from(last.temp_c) {
        return percent_to_pwm(f64::from(last.percent));
    }

    for pair in points.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if f64::from(right.temp_c) >= temp {
            let span = f64::from(right.temp_c) - f64::from(left.temp_c);
            let ratio = (temp - f64::from(left.temp_c)) / span;
            let percent = f64::from(left.percent)
                + ratio * (f64::from(right.percent) - f64::from(left.percent));
            return percent_to_pwm(percent);
        }
    }

    percent_to_pwm(f64::from(last.percent))
}

/// A borrowed control law, selected from settings by mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlLaw<'a> {
    Linear(&'a LinearMode),
    Curve(&'a CurveMode),
}

impl ControlLaw<'_> {
    pub fn evaluate(&self, temp: f32) -> u8 {
        match self {
            ControlLaw::Linear(mode) => linear_to_pwm(temp, mode),
            ControlLaw::Curve(curve) => curve_to_pwm(temp, curve),
        }
    }
}
