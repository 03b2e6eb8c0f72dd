//! Board configuration.
//!
//! [`Config::DEFAULT`] holds the values for the dual-axis ODrive v3 board; a
//! firmware for another board copies it and overrides fields before handing it
//! to [`LowLevel::new`](crate::LowLevel::new).

use crate::adc::{AdcCalibration, AdcChannel, AdcId, ConversionGroup, route_for_channel};
use crate::brake::min_high_on;
use crate::error::ConfigError;
use crate::hal::InternalTrigger;

pub const PWM_INPUT_COUNT: usize = 4;

/// Shunt channels of one axis. Phase A is reconstructed from B and C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseSense {
    pub phase_b: AdcChannel,
    pub phase_c: AdcChannel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSenseConfig {
    /// Siemens, the inverse of the shunt resistance.
    pub shunt_conductance: f32,
    /// Current-sense amplifier gain in V/V.
    pub amplifier_gain: f32,
    /// Seconds.
    pub dc_offset_time_constant: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmConfig {
    /// Auto-reload value of the motor timers, center aligned.
    pub period: u16,
    /// Seconds between two service ticks of an axis.
    pub control_period: f32,
    pub sync_trigger: InternalTrigger,
    /// Counts by which axis 1 lags axis 0.
    pub sync_offset: u16,
    /// Service ticks an armed axis may go without a fresh timing.
    pub watchdog_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Limits {
    pub undervoltage: f32,
    pub overvoltage: f32,
    /// Largest current drawn from the supply, amps.
    pub max_bus_current: f32,
    /// Largest current pushed back into the supply, amps.
    pub max_regen_current: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrakeResistorConfig {
    pub enabled: bool,
    /// Ohms.
    pub resistance: f32,
    pub period: u32,
    /// Minimum counts between low side off and high side on.
    pub deadtime: u32,
    /// Largest duty the resistor may be driven at.
    pub duty_limit: f32,
}

/// Maps the full-scale pulse onto `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmMapping {
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmInputConfig {
    pub timer_clock_hz: u32,
    pub min_high_us: u32,
    pub max_high_us: u32,
    /// Pulses outside `[legal_min_us, legal_max_us]` are dropped.
    pub legal_min_us: u32,
    pub legal_max_us: u32,
    pub timeout_ms: u32,
    pub mappings: [Option<PwmMapping>; PWM_INPUT_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThermistorConfig {
    pub channel: AdcChannel,
    /// Polynomial in the normalized sense voltage, highest order first.
    pub coefficients: [f32; 4],
    /// Current limit starts ramping down here, °C.
    pub derating_start: f32,
    /// Current limit reaches zero and the axis faults here, °C.
    pub derating_end: f32,
    pub filter_time_constant: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config<const AXES: usize> {
    pub adc: AdcCalibration,
    pub vbus_channel: AdcChannel,
    /// Bus volts per sensed volt.
    pub vbus_divider: f32,
    pub current_sense: CurrentSenseConfig,
    pub phases: [PhaseSense; AXES],
    pub pwm: PwmConfig,
    pub limits: Limits,
    pub brake_resistor: BrakeResistorConfig,
    pub pwm_input: PwmInputConfig,
    pub thermistors: [Option<ThermistorConfig>; AXES],
    pub analog_poll_ms: u32,
}

const FET_THERMISTOR_COEFFICIENTS: [f32; 4] =
    [363.939_1, -462.153_7, 307.551_3, -82.725_73];

const fn fet_thermistor(channel: u8) -> ThermistorConfig {
    ThermistorConfig {
        channel: AdcChannel::at(channel),
        coefficients: FET_THERMISTOR_COEFFICIENTS,
        derating_start: 100.0,
        derating_end: 120.0,
        filter_time_constant: 0.1,
    }
}

const MOTOR_PERIOD: u16 = 3500;

impl Config<2> {
    pub const DEFAULT: Self = Self {
        adc: AdcCalibration::DEFAULT,
        vbus_channel: AdcChannel::at(6),
        vbus_divider: 19.0,
        current_sense: CurrentSenseConfig {
            shunt_conductance: 1.0 / 0.0005,
            amplifier_gain: 40.0,
            dc_offset_time_constant: 0.2,
        },
        phases: [
            PhaseSense {
                phase_b: AdcChannel::at(10),
                phase_c: AdcChannel::at(11),
            },
            PhaseSense {
                phase_b: AdcChannel::at(13),
                phase_c: AdcChannel::at(12),
            },
        ],
        pwm: PwmConfig {
            period: MOTOR_PERIOD,
            control_period: 125e-6,
            sync_trigger: InternalTrigger::Itr0,
            sync_offset: MOTOR_PERIOD / 2 - 128,
            watchdog_ticks: 1,
        },
        limits: Limits {
            undervoltage: 8.0,
            overvoltage: 56.0,
            max_bus_current: 60.0,
            max_regen_current: 10.0,
        },
        brake_resistor: BrakeResistorConfig {
            enabled: true,
            resistance: 2.0,
            period: 4096,
            deadtime: 20,
            duty_limit: 0.95,
        },
        pwm_input: PwmInputConfig {
            timer_clock_hz: 84_000_000,
            min_high_us: 1000,
            max_high_us: 2000,
            legal_min_us: 500,
            legal_max_us: 2500,
            timeout_ms: 100,
            mappings: [None; PWM_INPUT_COUNT],
        },
        thermistors: [Some(fet_thermistor(15)), Some(fet_thermistor(4))],
        analog_poll_ms: 10,
    };
}

impl Default for Config<2> {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl<const AXES: usize> Config<AXES> {
    /// Whether channel `index` is sampled by the current sense or bus voltage
    /// paths rather than the general-purpose scan.
    pub fn owns_channel(&self, index: usize) -> bool {
        index == self.vbus_channel.index()
            || self
                .phases
                .iter()
                .any(|p| p.phase_b.index() == index || p.phase_c.index() == index)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason| Err(ConfigError::InvalidConfig(reason));

        if AXES == 0 {
            return invalid("no axes");
        }
        if self.adc.full_scale <= 0.0 || self.adc.reference_voltage <= 0.0 {
            return invalid("adc calibration");
        }
        if self.vbus_divider <= 0.0 {
            return invalid("vbus divider");
        }
        if self.current_sense.shunt_conductance <= 0.0
            || self.current_sense.amplifier_gain <= 0.0
        {
            return invalid("current sense gain");
        }

        let pwm = &self.pwm;
        if pwm.period == 0 || pwm.control_period <= 0.0 {
            return invalid("pwm period");
        }
        if pwm.sync_offset > pwm.period {
            return invalid("sync offset beyond period");
        }
        if pwm.watchdog_ticks == 0 {
            return invalid("watchdog window");
        }

        if self.limits.undervoltage >= self.limits.overvoltage {
            return invalid("voltage window");
        }
        if self.limits.max_bus_current <= 0.0 || self.limits.max_regen_current < 0.0 {
            return invalid("current limits");
        }

        let brake = &self.brake_resistor;
        if brake.enabled {
            if brake.resistance <= 0.0 {
                return invalid("brake resistance");
            }
            if brake.period == 0 || brake.deadtime >= brake.period {
                return invalid("brake period");
            }
            if !(brake.duty_limit > 0.0 && brake.duty_limit <= 1.0) {
                return invalid("brake duty limit");
            }
            // A saturated timing still has to leave the deadtime before high_on.
            if min_high_on(brake.period, brake.duty_limit) < brake.deadtime {
                return invalid("brake duty limit leaves no deadtime");
            }
        }

        let input = &self.pwm_input;
        if input.timer_clock_hz < 1_000_000
            || input.min_high_us >= input.max_high_us
            || input.legal_min_us > input.min_high_us
            || input.legal_max_us < input.max_high_us
        {
            return invalid("pwm input window");
        }

        for (axis, sense) in self.phases.iter().enumerate() {
            if sense.phase_b == sense.phase_c {
                return invalid("phase channels overlap");
            }
            for channel in [sense.phase_b, sense.phase_c] {
                if channel == self.vbus_channel {
                    return invalid("phase channel is the vbus channel");
                }
                let shared = self.phases[..axis]
                    .iter()
                    .any(|other| other.phase_b == channel || other.phase_c == channel);
                if shared {
                    return invalid("phase channel used twice");
                }
            }
            let b = route_for_channel(sense.phase_b);
            let c = route_for_channel(sense.phase_c);
            if b.adc == c.adc || b.group != c.group {
                return invalid("phase channels must sample together");
            }
        }

        for thermistor in self.thermistors.iter().flatten() {
            if thermistor.derating_start >= thermistor.derating_end {
                return invalid("thermistor derating window");
            }
            let route = route_for_channel(thermistor.channel);
            if route.adc != AdcId::Adc1 || route.group != ConversionGroup::Regular {
                return invalid("thermistor channel not on the scan adc");
            }
        }

        Ok(())
    }
}
