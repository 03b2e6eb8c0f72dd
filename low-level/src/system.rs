//! The process-wide state container and its control-loop surface.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU8, AtomicU32};

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::adc::{AdcChannel, Gpio, channel_from_gpio};
use crate::arming::{ArmedState, MotorHandle, MotorStatus};
use crate::bootstrap::Stage;
use crate::brake::{BrakeResistor, BrakeStatus};
use crate::config::{BrakeResistorConfig, Config};
use crate::current::{DcOffset, ShuntConversion};
use crate::error::{ArmError, Fault};
use crate::hal::{BrakeTimer, MotorTimer};
use crate::measurements::{MeasurementCell, Measurements};
use crate::pwm_in::PwmInputs;
use crate::sampling::{AxisSense, CurrentSample};
use crate::units::Second;

pub(crate) const UNKNOWN_TEMPERATURE: u32 = f32::NAN.to_bits();

/// Everything that touches the power stage, owned between `init` and
/// `teardown`.
pub(crate) struct Hardware<T, B, const N: usize> {
    pub motors: [MotorHandle<T>; N],
    pub sense: [AxisSense; N],
    pub brake: BrakeResistor<B>,
    pub shunt: ShuntConversion,
}

impl<T: MotorTimer, B: BrakeTimer, const N: usize> Hardware<T, B, N> {
    pub fn new(config: &Config<N>, timers: [T; N], brake: B) -> Self {
        let dc_offset = DcOffset::new(Second(config.current_sense.dc_offset_time_constant));
        Self {
            motors: timers.map(MotorHandle::new),
            sense: [AxisSense::new(dc_offset); N],
            brake: BrakeResistor::new(brake),
            shunt: ShuntConversion::new(&config.adc, &config.current_sense),
        }
    }

    pub fn disarm_motors(&mut self) {
        for motor in self.motors.iter_mut() {
            motor.disarm();
        }
    }

    /// Trips every axis that is arming or armed.
    pub fn trip_active(&mut self, fault: Fault) {
        for motor in self.motors.iter_mut() {
            if motor.state().is_active() {
                motor.trip(fault);
            }
        }
    }

    pub fn trip_all(&mut self, fault: Fault) {
        for motor in self.motors.iter_mut() {
            motor.trip(fault);
        }
    }

    pub fn disarm_brake(&mut self) -> bool {
        let was_armed = self.brake.disarm();
        self.disarm_motors();
        was_armed
    }

    pub fn apply_brake_timing(&mut self, low_off: u32, high_on: u32, config: &BrakeResistorConfig) {
        if self.brake.apply_timing(low_off, high_on, config).is_err() {
            self.disarm_motors();
        }
    }

    pub fn apply_brake_duty(&mut self, duty: f32, config: &BrakeResistorConfig) {
        if self.brake.apply_duty(duty, config).is_err() {
            self.disarm_motors();
        }
    }

    /// Bus current of the armed axes.
    pub fn armed_bus_current(&self) -> f32 {
        self.motors
            .iter()
            .zip(self.sense.iter())
            .filter(|(motor, _)| motor.state() == ArmedState::Armed)
            .map(|(_, sense)| sense.ibus)
            .sum()
    }
}

/// Safety and sampling core of an `N`-axis drive.
///
/// Lives in a `static`: the firmware builds it with [`LowLevel::new`], hands
/// over the timers with [`init`](LowLevel::init), calls the interrupt entry
/// points from its vectors and the control surface from its tasks.
pub struct LowLevel<T, B, const N: usize> {
    pub(crate) config: Config<N>,
    pub(crate) hardware: Mutex<RefCell<Option<Hardware<T, B, N>>>>,
    pub(crate) measurements: MeasurementCell,
    pub(crate) stages: AtomicU8,
    pub(crate) samples: [Signal<CriticalSectionRawMutex, CurrentSample>; N],
    pub(crate) pwm_inputs: PwmInputs,
    pub(crate) temperatures: [AtomicU32; N],
}

impl<T, B, const N: usize> LowLevel<T, B, N> {
    pub const fn new(config: Config<N>) -> Self {
        Self {
            config,
            hardware: Mutex::new(RefCell::new(None)),
            measurements: MeasurementCell::new(),
            stages: AtomicU8::new(0),
            samples: [const { Signal::new() }; N],
            pwm_inputs: PwmInputs::new(),
            temperatures: [const { AtomicU32::new(UNKNOWN_TEMPERATURE) }; N],
        }
    }

    pub fn config(&self) -> &Config<N> {
        &self.config
    }

    pub fn measurements(&self) -> Measurements {
        self.measurements.read()
    }

    /// Voltage at `channel` from the latest published code. Never blocks.
    pub fn get_adc_voltage_channel(&self, channel: AdcChannel) -> f32 {
        let code = self.measurements.read().raw[channel.index()];
        self.config.adc.voltage(code)
    }

    pub fn get_adc_voltage(&self, gpio: Gpio) -> Option<f32> {
        channel_from_gpio(gpio).map(|channel| self.get_adc_voltage_channel(channel))
    }

    /// Signalled once per PWM period with the offset-corrected phase currents
    /// of `axis`.
    pub fn current_sample(&self, axis: usize) -> Option<&Signal<CriticalSectionRawMutex, CurrentSample>> {
        self.samples.get(axis)
    }

    /// Latest command of PWM input `input`, `None` once it timed out. `now`
    /// is the capture timer's counter.
    pub fn pwm_command(&self, input: usize, now: u32) -> Option<f32> {
        self.pwm_inputs.command(input, now, &self.config.pwm_input)
    }
}

impl<T: MotorTimer, B: BrakeTimer, const N: usize> LowLevel<T, B, N> {
    pub(crate) fn with_hardware<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Hardware<T, B, N>) -> R,
    {
        critical_section::with(|cs| {
            self.hardware
                .borrow(cs)
                .borrow_mut()
                .as_mut()
                .map(f)
        })
    }

    /// Starts arming `axis`: zero timing now, output enabled at the next
    /// service tick.
    pub fn arm(&self, axis: usize) -> Result<(), ArmError> {
        if axis >= N {
            return Err(ArmError::UnknownAxis);
        }
        if !self.is_started(Stage::AdcPwm) {
            return Err(ArmError::NotStarted);
        }
        let limits = &self.config.limits;
        let brake_required = self.config.brake_resistor.enabled;
        self.with_hardware(|hw| {
            let motor = &mut hw.motors[axis];
            if let Some(fault) = motor.fault() {
                return Err(ArmError::FaultLatched(fault));
            }
            if motor.state().is_active() {
                return Ok(());
            }
            if !self
                .measurements
                .read()
                .vbus_within(limits.undervoltage, limits.overvoltage)
            {
                return Err(ArmError::MeasurementsInvalid);
            }
            if brake_required && !hw.brake.is_armed() {
                return Err(ArmError::BrakeResistorDisarmed);
            }
            hw.motors[axis].arm()
        })
        .unwrap_or(Err(ArmError::NotStarted))
    }

    /// Returns whether `axis` was arming or armed. The output is disabled by
    /// the time this returns.
    pub fn disarm(&self, axis: usize) -> bool {
        self.with_hardware(|hw| hw.motors.get_mut(axis).is_some_and(MotorHandle::disarm))
            .unwrap_or(false)
    }

    /// Writes `timing` if `axis` is armed, counts a rejection otherwise.
    pub fn apply_timing(&self, axis: usize, timing: [u16; 3]) {
        self.with_hardware(|hw| {
            if let Some(motor) = hw.motors.get_mut(axis) {
                motor.apply_timing(timing);
            }
        });
    }

    /// Forces `axis` safe and latches `fault`.
    pub fn report_fault(&self, axis: usize, fault: Fault) {
        self.with_hardware(|hw| {
            if let Some(motor) = hw.motors.get_mut(axis) {
                motor.trip(fault);
            }
        });
    }

    pub fn clear_fault(&self, axis: usize) {
        self.with_hardware(|hw| {
            if let Some(motor) = hw.motors.get_mut(axis) {
                motor.clear_fault();
            }
        });
    }

    pub fn status(&self, axis: usize) -> Option<MotorStatus> {
        self.with_hardware(|hw| hw.motors.get(axis).map(MotorHandle::status))
            .flatten()
    }

    pub fn arm_brake_resistor(&self) -> Result<(), ArmError> {
        if !self.is_started(Stage::AdcPwm) {
            return Err(ArmError::NotStarted);
        }
        self.with_hardware(|hw| hw.brake.arm())
            .unwrap_or(Err(ArmError::NotStarted))
    }

    /// Floats the brake resistor and disarms every motor with it.
    pub fn disarm_brake_resistor(&self) -> bool {
        self.with_hardware(|hw| hw.disarm_brake()).unwrap_or(false)
    }

    pub fn apply_brake_resistor_timing(&self, low_off: u32, high_on: u32) {
        let config = &self.config.brake_resistor;
        self.with_hardware(|hw| hw.apply_brake_timing(low_off, high_on, config));
    }

    pub fn clear_brake_fault(&self) {
        self.with_hardware(|hw| hw.brake.clear_fault());
    }

    pub fn brake_status(&self) -> Option<BrakeStatus> {
        self.with_hardware(|hw| hw.brake.status())
    }

    pub fn brake_resistor_saturated(&self) -> bool {
        self.with_hardware(|hw| hw.brake.is_saturated())
            .unwrap_or(false)
    }
}
