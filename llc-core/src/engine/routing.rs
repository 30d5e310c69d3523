//! Per-fan routing between the CPU and GPU control laws

use std::collections::BTreeSet;

use llc_protocol::{FanRecord, MacAddr};

use crate::settings::Settings;

/// Temperatures sampled at the start of a tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureSample {
    pub cpu: Option<f32>,
    pub gpu: Option<f32>,
}

impl TemperatureSample {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.gpu.is_none()
    }
}

/// How GPU-routed fans were served this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuRoute {
    /// No fan is routed to the GPU
    Unused,
    /// GPU law against the GPU temperature
    Gpu,
    /// GPU law against the CPU temperature
    CpuFallback,
    /// Neither temperature available for routed fans
    Unavailable,
}

/// Targets resolved for one tick
#[derive(Debug, Clone)]
pub struct TargetPlan<'a> {
    pub cpu_target: Option<u8>,
    pub gpu_target: Option<u8>,
    pub route: GpuRoute,
    gpu_macs: &'a BTreeSet<MacAddr>,
}

/// Resolve the CPU and GPU targets for one tick
pub fn plan_targets(settings: &Settings, sample: TemperatureSample) -> TargetPlan<'_> {
    let cpu_target = sample.cpu.map(|t| settings.cpu_law().evaluate(t));
    let gpu_law = settings.gpu_law();

    let (gpu_target, route) = if settings.gpu_temp_macs.is_empty() {
        (None, GpuRoute::Unused)
    } else if let Some(t) = sample.gpu {
        (Some(gpu_law.evaluate(t)), GpuRoute::Gpu)
    } else if let Some(t) = sample.cpu {
        (Some(gpu_law.evaluate(t)), GpuRoute::CpuFallback)
    } else {
        (None, GpuRoute::Unavailable)
    };

    TargetPlan {
        cpu_target,
        gpu_target,
        route,
        gpu_macs: &settings.gpu_temp_macs,
    }
}

impl TargetPlan<'_> {
    /// No target could be computed for any fan
    pub fn is_idle(&self) -> bool {
        self.cpu_target.is_none() && self.gpu_target.is_none()
    }

    /// Target for one fan; keeps the current duty cycle when its source is missing
    pub fn target_for(&self, fan: &FanRecord) -> u8 {
        if self.gpu_macs.contains(&fan.mac) {
            if let Some(target) = self.gpu_target {
                return target;
            }
        }
        self.cpu_target.unwrap_or(fan.pwm)
    }

    /// Write targets into the records, which then reflect the commanded state
    pub fn apply(&self, fans: &mut [FanRecord]) {
        for fan in fans {
            let target = self.target_for(fan);
            fan.target_pwm = target;
            fan.pwm = target;
        }
    }
}

/// A change in GPU routing worth logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTransition {
    /// Routed fans moved onto the CPU temperature
    EnteredFallback,
    /// Routed fans have no temperature at all
    LostTemperature,
    Recovered,
}

/// Remembers which degraded route GPU-routed fans are on, if any
#[derive(Debug, Default)]
pub struct RouteTracker {
    degraded: Option<GpuRoute>,
}

impl RouteTracker {
    /// Report a transition only when the route changes kind
    pub fn observe(&mut self, route: GpuRoute) -> Option<RouteTransition> {
        match route {
            GpuRoute::CpuFallback | GpuRoute::Unavailable => {
                if self.degraded == Some(route) {
                    return None;
                }
                self.degraded = Some(route);
                Some(if route == GpuRoute::CpuFallback {
                    RouteTransition::EnteredFallback
                } else {
                    RouteTransition::LostTemperature
                })
            }
            GpuRoute::Gpu | GpuRoute::Unused => {
                self.degraded.take().map(|_| RouteTransition::Recovered)
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{curve_to_pwm, linear_to_pwm};
    use crate::settings::FanMode;

    const ROUTED: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    const OTHER: MacAddr = MacAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    fn fan(mac: MacAddr, pwm: u8) -> FanRecord {
        FanRecord {
            mac,
            master_mac: MacAddr::ZERO,
            channel: 1,
            rx_type: 1,
            fan_count: 3,
            pwm,
            rpm: [900, 900, 900, 0],
            target_pwm: 0,
            is_bound: true,
        }
    }

    fn routed_settings(mode: FanMode) -> Settings {
        let mut settings = Settings { mode, ..Settings::default() };
        settings.gpu_temp_macs.insert(ROUTED);
        settings
    }

    #[test]
    fn test_routed_fan_uses_gpu_curve() {
        let settings = routed_settings(FanMode::Curve);
        let sample = TemperatureSample { cpu: Some(50.0), gpu: Some(75.0) };
        let plan = plan_targets(&settings, sample);

        assert_eq!(plan.route, GpuRoute::Gpu);
        assert_eq!(plan.target_for(&fan(ROUTED, 0)), curve_to_pwm(75.0, &settings.gpu_curve));
        assert_eq!(plan.target_for(&fan(OTHER, 0)), curve_to_pwm(50.0, &settings.cpu_curve));
    }

    #[test]
    fn test_fallback_uses_gpu_law_on_cpu_temperature() {
        for mode in [FanMode::Linear, FanMode::Curve] {
            let settings = routed_settings(mode);
            let sample = TemperatureSample { cpu: Some(70.0), gpu: None };
            let plan = plan_targets(&settings, sample);

            assert_eq!(plan.route, GpuRoute::CpuFallback);
            let expected = settings.gpu_law().evaluate(70.0);
            assert_eq!(plan.target_for(&fan(ROUTED, 0)), expected);
            assert_ne!(expected, settings.cpu_law().evaluate(70.0));
        }
    }

    #[test]
    fn test_unrouted_linear() {
        let settings = Settings::default();
        let plan = plan_targets(&settings, TemperatureSample { cpu: Some(57.5), gpu: None });
        assert_eq!(plan.route, GpuRoute::Unused);
        assert_eq!(plan.target_for(&fan(OTHER, 0)), linear_to_pwm(57.5, &settings.linear));
    }

    #[test]
    fn test_missing_cpu_keeps_unrouted_pwm() {
        let settings = routed_settings(FanMode::Linear);
        let plan = plan_targets(&settings, TemperatureSample { cpu: None, gpu: Some(60.0) });
        assert!(!plan.is_idle());
        assert_eq!(plan.target_for(&fan(OTHER, 77)), 77);
        assert_eq!(plan.target_for(&fan(ROUTED, 77)), settings.gpu_law().evaluate(60.0));
    }

    #[test]
    fn test_no_samples_is_idle() {
        let settings = routed_settings(FanMode::Curve);
        let plan = plan_targets(&settings, TemperatureSample::default());
        assert!(plan.is_idle());
        assert_eq!(plan.route, GpuRoute::Unavailable);
    }

    #[test]
    fn test_apply_sets_pwm_and_target() {
        let settings = Settings::default();
        let plan = plan_targets(&settings, TemperatureSample { cpu: Some(80.0), gpu: None });
        let mut fans = vec![fan(OTHER, 3)];
        plan.apply(&mut fans);
        assert_eq!(fans[0].pwm, 178);
        assert_eq!(fans[0].target_pwm, 178);
    }

    #[test]
    fn test_tracker_reports_each_transition_once() {
        let mut tracker = RouteTracker::default();
        assert_eq!(tracker.observe(GpuRoute::Gpu), None);
        assert_eq!(tracker.observe(GpuRoute::CpuFallback), Some(RouteTransition::EnteredFallback));
        assert_eq!(tracker.observe(GpuRoute::CpuFallback), None);
        assert!(tracker.is_degraded());
        assert_eq!(tracker.observe(GpuRoute::Gpu), Some(RouteTransition::Recovered));
        assert_eq!(tracker.observe(GpuRoute::Gpu), None);
        assert!(!tracker.is_degraded());
    }

    #[test]
    fn test_tracker_tells_fallback_from_lost_temperature() {
        let mut tracker = RouteTracker::default();
        assert_eq!(tracker.observe(GpuRoute::Unavailable), Some(RouteTransition::LostTemperature));
        assert_eq!(tracker.observe(GpuRoute::Unavailable), None);
        assert_eq!(tracker.observe(GpuRoute::CpuFallback), Some(RouteTransition::EnteredFallback));
        assert_eq!(tracker.observe(GpuRoute::Unavailable), Some(RouteTransition::LostTemperature));
        assert_eq!(tracker.observe(GpuRoute::Unused), Some(RouteTransition::Recovered));
        assert_eq!(tracker.observe(GpuRoute::Unused), None);
    }
}
