//! Fan control settings
//!
//! Every control law is validated when it is constructed, so a `Settings`
//! value is always usable as a whole. Invalid input is rejected with
//! `LlcError::InvalidConfig` and never clamped into range.
//!
//! Linear laws and curves also have a compact text form used by the settings
//! file and the CLI:
//!
//! - linear: `minTemp:minPwm,maxTemp:maxPwm`, or a single percentage `N`
//!   for a flat duty cycle
//! - curve: `temp:percent,temp:percent,temp:percent,temp:percent`

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use llc_error::{LlcError, Result};
use llc_protocol::MacAddr;

use crate::constants::limits;
use crate::engine::ControlLaw;

/// Which control law family drives the fans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    #[default]
    Linear,
    Curve,
}

// ============================================================================
// Linear mode
// ============================================================================

/// Two-point temperature to duty-cycle mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLinearMode")]
pub struct LinearMode {
    min_temp: u8,
    max_temp: u8,
    min_pwm: u8,
    max_pwm: u8,
}

#[derive(Deserialize)]
struct RawLinearMode {
    min_temp: u8,
    max_temp: u8,
    min_pwm: u8,
    max_pwm: u8,
}

impl TryFrom<RawLinearMode> for LinearMode {
    type Error = LlcError;

    fn try_from(raw: RawLinearMode) -> Result<Self> {
        LinearMode::new(raw.min_temp, raw.max_temp, raw.min_pwm, raw.max_pwm)
    }
}

impl LinearMode {
    /// Build a validated linear law. Temperatures are °C, duty cycles are percent.
    pub fn new(min_temp: u8, max_temp: u8, min_pwm: u8, max_pwm: u8) -> Result<Self> {
        validate_temp("min_temp", min_temp)?;
        validate_temp("max_temp", max_temp)?;
        validate_percent("min_pwm", min_pwm)?;
        validate_percent("max_pwm", max_pwm)?;

        if min_temp >= max_temp {
            return Err(LlcError::invalid(
                "linear",
                format!("min_temp ({}) must be less than max_temp ({})", min_temp, max_temp),
            ));
        }
        if min_pwm > max_pwm {
            return Err(LlcError::invalid(
                "linear",
                format!("min_pwm ({}) must not exceed max_pwm ({})", min_pwm, max_pwm),
            ));
        }

        Ok(Self { min_temp, max_temp, min_pwm, max_pwm })
    }

    /// A law that holds one duty cycle regardless of temperature
    pub fn flat(percent: u8) -> Result<Self> {
        let (low, high) = limits::FLAT_LINEAR_TEMPS;
        Self::new(low, high, percent, percent)
    }

    pub fn min_temp(&self) -> u8 { self.min_temp }
    pub fn max_temp(&self) -> u8 { self.max_temp }
    pub fn min_pwm(&self) -> u8 { self.min_pwm }
    pub fn max_pwm(&self) -> u8 { self.max_pwm }

    pub fn default_gpu() -> Self {
        Self { min_temp: 40, max_temp: 85, min_pwm: 20, max_pwm: 80 }
    }
}

impl Default for LinearMode {
    fn default() -> Self {
        Self { min_temp: 35, max_temp: 80, min_pwm: 10, max_pwm: 70 }
    }
}

impl FromStr for LinearMode {
    type Err = LlcError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
            let percent = s
                .parse::<u8>()
                .map_err(|_| LlcError::invalid("linear", format!("percentage '{}' out of range", s)))?;
            return Self::flat(percent);
        }

        let bad_format = || {
            LlcError::invalid(
                "linear",
                "invalid format, use minTemp:minPwm,maxTemp:maxPwm or a single integer",
            )
        };

        let (low, high) = s.split_once(',').ok_or_else(bad_format)?;
        let (min_temp, min_pwm) = parse_pair(low).ok_or_else(bad_format)?;
        let (max_temp, max_pwm) = parse_pair(high).ok_or_else(bad_format)?;
        Self::new(min_temp, max_temp, min_pwm, max_pwm)
    }
}

impl fmt::Display for LinearMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}:{}", self.min_temp, self.min_pwm, self.max_temp, self.max_pwm)
    }
}

// ============================================================================
// Curve mode
// ============================================================================

/// One knot of a fan curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temp_c: u8,
    pub percent: u8,
}

impl CurvePoint {
    pub const fn new(temp_c: u8, percent: u8) -> Self {
        Self { temp_c, percent }
    }
}

/// Four-point piecewise-linear mapping.
///
/// Temperatures strictly increase and percentages never decrease from one
/// point to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCurveMode")]
pub struct CurveMode {
    points: [CurvePoint; limits::CURVE_POINTS],
}

#[derive(Deserialize)]
struct RawCurveMode {
    points: Vec<CurvePoint>,
}

impl TryFrom<RawCurveMode> for CurveMode {
    type Error = LlcError;

    fn try_from(raw: RawCurveMode) -> Result<Self> {
        let count = raw.points.len();
        let points: [CurvePoint; limits::CURVE_POINTS] = raw.points.try_into().map_err(|_| {
            LlcError::invalid(
                "curve",
                format!("expected {} points, got {}", limits::CURVE_POINTS, count),
            )
        })?;
        CurveMode::new(points)
    }
}

impl CurveMode {
    pub fn new(points: [CurvePoint; limits::CURVE_POINTS]) -> Result<Self> {
        for point in &points {
            validate_temp("temp_c", point.temp_c)?;
            validate_percent("percent", point.percent)?;
        }

        for pair in points.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            if right.temp_c <= left.temp_c {
                return Err(LlcError::invalid(
                    "curve",
                    format!(
                        "temperatures must strictly increase ({} then {})",
                        left.temp_c, right.temp_c
                    ),
                ));
            }
            if right.percent < left.percent {
                return Err(LlcError::invalid(
                    "curve",
                    format!(
                        "percentages must not decrease ({} then {})",
                        left.percent, right.percent
                    ),
                ));
            }
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[CurvePoint; limits::CURVE_POINTS] {
        &self.points
    }

    pub fn default_cpu() -> Self {
        Self {
            points: [
                CurvePoint::new(35, 20),
                CurvePoint::new(50, 35),
                CurvePoint::new(65, 60),
                CurvePoint::new(80, 100),
            ],
        }
    }

    pub fn default_gpu() -> Self {
        Self {
            points: [
                CurvePoint::new(40, 25),
                CurvePoint::new(55, 40),
                CurvePoint::new(70, 65),
                CurvePoint::new(85, 100),
            ],
        }
    }
}

impl FromStr for CurveMode {
    type Err = LlcError;

    fn from_str(s: &str) -> Result<Self> {
        let bad_format = || {
            LlcError::invalid(
                "curve",
                "invalid format, use temp:percent,temp:percent,temp:percent,temp:percent",
            )
        };

        let parts: Vec<&str> = s.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
        if parts.len() != limits::CURVE_POINTS {
            return Err(bad_format());
        }

        let mut points = [CurvePoint::new(0, 0); limits::CURVE_POINTS];
        for (slot, part) in points.iter_mut().zip(parts) {
            let (temp_c, percent) = parse_pair(part).ok_or_else(bad_format)?;
            *slot = CurvePoint { temp_c, percent };
        }
        Self::new(points)
    }
}

impl fmt::Display for CurveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, point) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", point.temp_c, point.percent)?;
        }
        Ok(())
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Complete, validated daemon settings.
///
/// Replaced wholesale on reload; never edited field by field while the
/// control loop holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub mode: FanMode,
    pub linear: LinearMode,
    pub gpu_linear: LinearMode,
    pub cpu_curve: CurveMode,
    pub gpu_curve: CurveMode,
    /// Fan groups that follow the GPU law
    pub gpu_temp_macs: BTreeSet<MacAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: FanMode::Linear,
            linear: LinearMode::default(),
            gpu_linear: LinearMode::default_gpu(),
            cpu_curve: CurveMode::default_cpu(),
            gpu_curve: CurveMode::default_gpu(),
            gpu_temp_macs: BTreeSet::new(),
        }
    }
}

impl Settings {
    /// Law applied to fans driven by the CPU temperature
    pub fn cpu_law(&self) -> ControlLaw<'_> {
        match self.mode {
            FanMode::Linear => ControlLaw::Linear(&self.linear),
            FanMode::Curve => ControlLaw::Curve(&self.cpu_curve),
        }
    }

    /// Law applied to fans routed to the GPU
    pub fn gpu_law(&self) -> ControlLaw<'_> {
        match self.mode {
            FanMode::Linear => ControlLaw::Linear(&self.gpu_linear),
            FanMode::Curve => ControlLaw::Curve(&self.gpu_curve),
        }
    }

    /// GPU temperature is only worth sampling when some fan is routed to it
    pub fn wants_gpu_temperature(&self) -> bool {
        !self.gpu_temp_macs.is_empty()
    }
}

/// Parse a comma separated MAC list into canonical, de-duplicated form.
///
/// Any invalid entry rejects the whole list.
pub fn parse_mac_list(input: &str) -> Result<BTreeSet<MacAddr>> {
    canonicalize_macs(input.split(',').map(str::trim).filter(|m| !m.is_empty()))
}

/// Canonicalize MAC strings, collapsing duplicates
pub fn canonicalize_macs<'a>(entries: impl IntoIterator<Item = &'a str>) -> Result<BTreeSet<MacAddr>> {
    entries
        .into_iter()
        .map(|entry| entry.parse::<MacAddr>().map_err(|e| LlcError::invalid("gpu_temp_macs", e)))
        .collect()
}

fn parse_pair(s: &str) -> Option<(u8, u8)> {
    let (a, b) = s.trim().split_once(':')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

fn validate_temp(field: &str, value: u8) -> Result<()> {
    if !(limits::MIN_TEMP_C..=limits::MAX_TEMP_C).contains(&value) {
        return Err(LlcError::invalid(
            field,
            format!(
                "{}°C outside {}-{}°C",
                value,
                limits::MIN_TEMP_C,
                limits::MAX_TEMP_C
            ),
        ));
    }
    Ok(())
}

fn validate_percent(field: &str, value: u8) -> Result<()> {
    if value > limits::MAX_PERCENT {
        return Err(LlcError::invalid(field, format!("{}% exceeds 100%", value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_rejects_inverted_temperatures() {
        let result = LinearMode::new(80, 35, 10, 70);
        assert!(matches!(
            result,
            Err(LlcError::InvalidConfig { ref field, .. }) if field == "linear"
        ));
    }

    #[test]
    fn test_linear_rejects_equal_temperatures_and_inverted_pwm() {
        assert!(LinearMode::new(50, 50, 10, 70).is_err());
        assert!(LinearMode::new(35, 80, 71, 70).is_err());
        assert!(LinearMode::new(35, 80, 70, 70).is_ok());
    }

    #[test]
    fn test_linear_bounds() {
        assert!(LinearMode::new(19, 80, 10, 70).is_err());
        assert!(LinearMode::new(35, 101, 10, 70).is_err());
        assert!(LinearMode::new(35, 80, 10, 101).is_err());
        assert!(LinearMode::new(20, 100, 0, 100).is_ok());
    }

    #[test]
    fn test_linear_compact_forms() {
        let mode: LinearMode = "40:15,75:90".parse().expect("valid linear");
        assert_eq!((mode.min_temp(), mode.min_pwm()), (40, 15));
        assert_eq!((mode.max_temp(), mode.max_pwm()), (75, 90));
        assert_eq!(mode.to_string(), "40:15,75:90");

        let flat: LinearMode = "55".parse().expect("flat linear");
        assert_eq!((flat.min_temp(), flat.max_temp()), (60, 61));
        assert_eq!((flat.min_pwm(), flat.max_pwm()), (55, 55));

        assert!("40:15".parse::<LinearMode>().is_err());
        assert!("abc".parse::<LinearMode>().is_err());
        assert!("300".parse::<LinearMode>().is_err());
    }

    #[test]
    fn test_linear_json_validation() {
        let ok: LinearMode =
            serde_json::from_str(r#"{"min_temp":30,"max_temp":70,"min_pwm":0,"max_pwm":100}"#)
                .expect("valid json");
        assert_eq!(ok.max_pwm(), 100);

        let bad = serde_json::from_str::<LinearMode>(
            r#"{"min_temp":80,"max_temp":35,"min_pwm":10,"max_pwm":70}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_curve_validation() {
        let ok = CurveMode::new([
            CurvePoint::new(30, 20),
            CurvePoint::new(50, 20),
            CurvePoint::new(70, 80),
            CurvePoint::new(90, 100),
        ]);
        assert!(ok.is_ok(), "repeated percentages are allowed");

        let repeated_temp = CurveMode::new([
            CurvePoint::new(30, 20),
            CurvePoint::new(30, 40),
            CurvePoint::new(70, 80),
            CurvePoint::new(90, 100),
        ]);
        assert!(repeated_temp.is_err());

        let falling = CurveMode::new([
            CurvePoint::new(30, 50),
            CurvePoint::new(50, 40),
            CurvePoint::new(70, 80),
            CurvePoint::new(90, 100),
        ]);
        assert!(falling.is_err());
    }

    #[test]
    fn test_curve_compact_form() {
        let curve: CurveMode = "30:20, 50:40,70:80,90:100".parse().expect("valid curve");
        assert_eq!(curve.points()[1], CurvePoint::new(50, 40));
        assert_eq!(curve.to_string(), "30:20,50:40,70:80,90:100");

        assert!("30:20,50:40,70:80".parse::<CurveMode>().is_err());
        assert!("30:20,50:40,70:80,90".parse::<CurveMode>().is_err());
    }

    #[test]
    fn test_curve_json_requires_four_points() {
        let json = r#"{"points":[{"temp_c":30,"percent":20},{"temp_c":50,"percent":40}]}"#;
        assert!(serde_json::from_str::<CurveMode>(json).is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        let linear = settings.linear;
        assert!(LinearMode::new(linear.min_temp(), linear.max_temp(), linear.min_pwm(), linear.max_pwm()).is_ok());
        let gpu = settings.gpu_linear;
        assert!(LinearMode::new(gpu.min_temp(), gpu.max_temp(), gpu.min_pwm(), gpu.max_pwm()).is_ok());
        assert!(CurveMode::new(*settings.cpu_curve.points()).is_ok());
        assert!(CurveMode::new(*settings.gpu_curve.points()).is_ok());
        assert!(!settings.wants_gpu_temperature());
    }

    #[test]
    fn test_mac_list_canonicalization() {
        let macs = parse_mac_list("AA:BB:CC:DD:EE:FF, aa-bb-cc-dd-ee-ff,,11:22:33:44:55:66")
            .expect("valid list");
        let rendered: Vec<String> = macs.iter().map(|m| m.to_string()).collect();
        assert_eq!(rendered, vec!["11:22:33:44:55:66", "aa:bb:cc:dd:ee:ff"]);

        assert!(parse_mac_list("aa:bb:cc:dd:ee:ff,not-a-mac").is_err());
        assert!(parse_mac_list("").expect("empty list").is_empty());
    }
}
