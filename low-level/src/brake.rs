//! Brake resistor channel.
//!
//! The resistor sits on a half bridge driven by two compare channels: the low
//! side switches off at `low_off` and the high side switches on at `high_on`.
//! `(0, period + 1)` keeps both sides off for the whole period.

use crate::arming::ArmedState;
use crate::config::BrakeResistorConfig;
use crate::error::{ArmError, Fault};
use crate::hal::BrakeTimer;

/// Compare pair `(low_off, high_on)`.
pub type BrakeTiming = (u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrakeStatus {
    pub state: ArmedState,
    pub fault: Option<Fault>,
    pub timing: BrakeTiming,
    pub saturated: bool,
    pub rejected_timings: u32,
}

pub struct BrakeResistor<B> {
    timer: B,
    state: ArmedState,
    timing: BrakeTiming,
    saturated: bool,
    fault: Option<Fault>,
    fault_reported: bool,
    rejected_timings: u32,
    absorbed_current: f32,
}

impl<B: BrakeTimer> BrakeResistor<B> {
    pub fn new(timer: B) -> Self {
        let floating = floating_timing(timer.period());
        Self {
            timer,
            state: ArmedState::Disarmed,
            timing: floating,
            saturated: false,
            fault: None,
            fault_reported: false,
            rejected_timings: 0,
            absorbed_current: 0.0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state == ArmedState::Armed
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Current the resistor takes off the bus at the applied duty, amps.
    pub fn absorbed_current(&self) -> f32 {
        self.absorbed_current
    }

    pub fn status(&self) -> BrakeStatus {
        BrakeStatus {
            state: self.state,
            fault: self.fault,
            timing: self.timing,
            saturated: self.saturated,
            rejected_timings: self.rejected_timings,
        }
    }

    pub fn timer_mut(&mut self) -> &mut B {
        &mut self.timer
    }

    pub fn into_timer(self) -> B {
        self.timer
    }

    /// Floats the bridge and starts accepting timings.
    pub fn arm(&mut self) -> Result<(), ArmError> {
        if let Some(fault) = self.fault {
            return Err(ArmError::FaultLatched(fault));
        }
        self.write_floating();
        self.state = ArmedState::Armed;
        Ok(())
    }

    /// Returns whether the channel was armed. Motors must be disarmed along
    /// with it, which is up to the caller.
    pub fn disarm(&mut self) -> bool {
        let was_armed = self.is_armed();
        self.state = ArmedState::Disarmed;
        self.write_floating();
        was_armed
    }

    /// Applies `(low_off, high_on)` if armed. `high_on` is pulled up to the
    /// duty limit. A pair closer than the deadtime trips the channel and the
    /// fault is returned; the caller disarms the motors.
    pub fn apply_timing(
        &mut self,
        low_off: u32,
        high_on: u32,
        config: &BrakeResistorConfig,
    ) -> Result<(), Fault> {
        if !self.is_armed() {
            self.rejected_timings = self.rejected_timings.wrapping_add(1);
            return Ok(());
        }

        let min_high_on = min_high_on(self.timer.period(), config.duty_limit);
        let saturated = high_on < min_high_on;
        let high_on = high_on.max(min_high_on);

        if high_on.saturating_sub(low_off) < config.deadtime || high_on < low_off {
            self.trip(Fault::BrakeDeadtimeViolation);
            return Err(Fault::BrakeDeadtimeViolation);
        }

        // Compare registers update one at a time; pass through the safe
        // pair so no intermediate combination shorts the bridge.
        self.write_floating();
        self.timing = (low_off, high_on);
        self.saturated = saturated;
        self.timer.set_compare(low_off, high_on);
        Ok(())
    }

    /// Puts the resistor at `duty` of the period. A duty above the limit is
    /// applied at the limit and flags saturation.
    pub fn apply_duty(&mut self, duty: f32, config: &BrakeResistorConfig) -> Result<(), Fault> {
        // NaN counts as saturated
        let saturated = !(duty <= config.duty_limit);
        let duty = if saturated { config.duty_limit } else { duty };
        let (low_off, high_on) = duty_to_timing(duty, self.timer.period(), config.deadtime);
        self.apply_timing(low_off, high_on, config)?;
        if self.is_armed() {
            self.saturated = saturated;
        }
        Ok(())
    }

    pub fn set_absorbed_current(&mut self, current: f32) {
        self.absorbed_current = current;
    }

    pub fn trip(&mut self, fault: Fault) {
        self.state = ArmedState::Disarmed;
        self.write_floating();
        if self.fault.is_none() {
            self.fault = Some(fault);
            self.fault_reported = false;
        }
    }

    pub fn clear_fault(&mut self) {
        self.fault = None;
        self.fault_reported = false;
    }

    pub fn take_unreported_fault(&mut self) -> Option<Fault> {
        match self.fault {
            Some(fault) if !self.fault_reported => {
                self.fault_reported = true;
                Some(fault)
            }
            _ => None,
        }
    }

    fn write_floating(&mut self) {
        let (low_off, high_on) = floating_timing(self.timer.period());
        self.timing = (low_off, high_on);
        self.saturated = false;
        self.absorbed_current = 0.0;
        self.timer.set_compare(low_off, high_on);
    }
}

pub const fn floating_timing(period: u32) -> BrakeTiming {
    (0, period + 1)
}

/// Earliest high-side turn-on the duty limit allows.
pub fn min_high_on(period: u32, duty_limit: f32) -> u32 {
    libm::ceilf(period as f32 * (1.0 - duty_limit)) as u32
}

/// Compare pair putting the resistor at `duty` of the period, `duty` in `[0, 1]`.
/// `high_on` rounds up like [`min_high_on`], so the duty limit maps onto it.
pub fn duty_to_timing(duty: f32, period: u32, deadtime: u32) -> BrakeTiming {
    let duty = duty.clamp(0.0, 1.0);
    let high_on = libm::ceilf(period as f32 * (1.0 - duty)) as u32;
    let low_off = high_on.saturating_sub(deadtime);
    (low_off, high_on)
}

pub fn timing_to_duty(timing: BrakeTiming, period: u32) -> f32 {
    let (_, high_on) = timing;
    if high_on > period {
        return 0.0;
    }
    (period - high_on) as f32 / period as f32
}
