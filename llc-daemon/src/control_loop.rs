//! Fan Control Loop
//!
//! One tick: sample temperatures, resolve targets, query the hub, command
//! every fan, publish the snapshot. Ticks are strictly sequential and each
//! is followed by a fixed pause.
//!
//! # Failure policy
//! - Transport and decode failures end the tick early and are counted
//! - Any other error ends the loop at once
//! - A completed tick resets the count
//! - Exceeding the threshold ends the loop with `SustainedFailure`
//! - Ticks skipped for lack of temperature or a zero-fan glitch neither
//!   count nor reset

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use llc_core::constants::{codec::PAGES_PER_QUERY, control};
use llc_core::{
    decode_page, encode_command, plan_targets, pwm_to_percent, HubTransport, LlcError, Result,
    RouteTracker, RouteTransition, TemperatureSample, TemperatureSource,
};
use llc_protocol::{FanRecord, SystemStatus};

use crate::state::SharedState;

/// Pauses taken by the loop
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    /// After every tick
    pub interval: Duration,
    /// Between fans during the frame fan-out
    pub inter_fan_delay: Duration,
    /// Extra wait when no temperature is available
    pub no_temperature_backoff: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            interval: control::LOOP_INTERVAL,
            inter_fan_delay: control::INTER_FAN_DELAY,
            no_temperature_backoff: control::NO_TEMPERATURE_BACKOFF,
        }
    }
}

/// Consecutive failure counter with a fatal threshold
#[derive(Debug)]
pub struct FailureCounter {
    consecutive: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self { consecutive: 0, threshold }
    }

    /// Count a failure; errors once the count exceeds the threshold
    pub fn record_failure(&mut self) -> Result<u32> {
        self.consecutive += 1;
        if self.consecutive > self.threshold {
            return Err(LlcError::SustainedFailure { consecutive: self.consecutive });
        }
        Ok(self.consecutive)
    }

    /// Reset after a completed tick, returning the previous count
    pub fn record_success(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive)
    }
}

/// How a tick ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frames sent and snapshot published
    Published { fans: usize },
    /// No temperature sample; nothing touched
    NoTemperature,
    /// Hub briefly reported no fans after reporting some
    Glitch,
}

pub struct ControlLoop<H, T> {
    hub: H,
    temps: T,
    state: Arc<SharedState>,
    timing: LoopTiming,
    failures: FailureCounter,
    routes: RouteTracker,
    last_fan_count: usize,
}

impl<H: HubTransport, T: TemperatureSource> ControlLoop<H, T> {
    pub fn new(hub: H, temps: T, state: Arc<SharedState>) -> Self {
        Self {
            hub,
            temps,
            state,
            timing: LoopTiming::default(),
            failures: FailureCounter::new(control::FATAL_THRESHOLD),
            routes: RouteTracker::default(),
            last_fan_count: 0,
        }
    }

    /// Run until the failure threshold is exceeded
    pub async fn run(mut self) -> Result<()> {
        info!(
            interval_ms = self.timing.interval.as_millis() as u64,
            threshold = control::FATAL_THRESHOLD,
            "Fan control loop starting"
        );

        loop {
            self.step().await?;
        }
    }

    /// One tick plus the pause after it.
    ///
    /// `Ok(None)` means the tick failed but the loop should go on.
    pub async fn step(&mut self) -> Result<Option<TickOutcome>> {
        let result = self.tick().await;

        let outcome = match result {
            Ok(outcome) => {
                if let TickOutcome::Published { fans } = outcome {
                    trace!(fans, "Tick complete");
                    let previous = self.failures.record_success();
                    if previous > 0 {
                        info!(after_failures = previous, "Control loop recovered");
                    }
                }
                if outcome == TickOutcome::NoTemperature {
                    tokio::time::sleep(self.timing.no_temperature_backoff).await;
                }
                Some(outcome)
            }
            Err(e) if !e.is_transient() => {
                error!(error = %e, "Control loop hit an unrecoverable error");
                return Err(e);
            }
            Err(e) => match self.failures.record_failure() {
                Ok(consecutive) => {
                    warn!(error = %e, consecutive, "Control tick failed");
                    None
                }
                Err(fatal) => {
                    error!(error = %e, "Control loop giving up: {}", fatal);
                    return Err(fatal);
                }
            },
        };

        tokio::time::sleep(self.timing.interval).await;
        Ok(outcome)
    }

    async fn tick(&mut self) -> Result<TickOutcome> {
        let settings = self.state.settings();

        let cpu = self.temps.cpu_celsius().await;
        let gpu = if settings.wants_gpu_temperature() {
            self.temps.gpu_celsius().await
        } else {
            None
        };
        let sample = TemperatureSample { cpu, gpu };

        let plan = plan_targets(&settings, sample);
        match self.routes.observe(plan.route) {
            Some(RouteTransition::EnteredFallback) => warn!(
                "GPU temperature unavailable, GPU-routed fans follow the GPU law on CPU temperature"
            ),
            Some(RouteTransition::LostTemperature) => warn!(
                "No CPU or GPU temperature for GPU-routed fans, control paused"
            ),
            Some(RouteTransition::Recovered) => info!(route = ?plan.route, "GPU routing restored"),
            None => {}
        }

        if plan.is_idle() {
            debug!("No temperature sample, skipping tick");
            return Ok(TickOutcome::NoTemperature);
        }

        let page = self.hub.fetch_page(PAGES_PER_QUERY).await?;
        let mut fans = decode_page(&page)?;

        if fans.is_empty() && self.last_fan_count != 0 {
            debug!(previous = self.last_fan_count, "Hub reported no fans, skipping tick");
            return Ok(TickOutcome::Glitch);
        }
        if fans.len() != self.last_fan_count {
            info!(previous = self.last_fan_count, current = fans.len(), "Fan count changed");
        }
        self.last_fan_count = fans.len();

        plan.apply(&mut fans);
        self.transmit(&fans).await?;
        log_fans(&fans);

        let count = fans.len();
        self.state.publish(SystemStatus::now(sample.cpu, sample.gpu, fans));
        Ok(TickOutcome::Published { fans: count })
    }

    /// Every fan gets one frame per batch position
    async fn transmit(&mut self, fans: &[FanRecord]) -> Result<()> {
        for fan in fans {
            for seq in (0..=u8::MAX).take(fans.len()) {
                self.hub.send_frame(encode_command(fan, seq)).await?;
            }
            tokio::time::sleep(self.timing.inter_fan_delay).await;
        }
        Ok(())
    }
}

fn log_fans(fans: &[FanRecord]) {
    for fan in fans {
        let rpm: Vec<u16> = fan.active_rpm().collect();
        debug!(
            mac = %fan.mac,
            fans = fan.fan_count,
            current_pct = pwm_to_percent(fan.pwm),
            target_pct = pwm_to_percent(fan.target_pwm),
            rpm = ?rpm,
            bound = fan.is_bound,
            "Fan"
        );
    }
}
