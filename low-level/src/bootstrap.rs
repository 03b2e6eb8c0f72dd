//! Startup sequencing.
//!
//! `init` hands the timers over, `start_adc_pwm` brings the bridges up
//! synchronized and disarmed, the general-purpose ADC feeds the analog
//! monitor. Each step checks that the one it depends on has completed.

use core::sync::atomic::Ordering;

use crate::ADC_CHANNEL_COUNT;
use crate::adc::{AdcChannel, AdcId, ConversionGroup, route_for_channel};
use crate::analog::AnalogMonitor;
use crate::error::ConfigError;
use crate::hal::{BrakeTimer, CaptureTimer, MasterMode, MotorTimer, SampleAdc, ScanAdc, Timebase};
use crate::system::{Hardware, LowLevel, UNKNOWN_TEMPERATURE};
use crate::timer_sync::sync_timers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    Init,
    AdcPwm,
    GeneralPurposeAdc,
    PwmInput,
    AnalogThread,
}

impl Stage {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Brings one motor timer to its idle running state: compare at half load,
/// outputs gated off, update event on TRGO.
///
/// The update event fires at both ends of the center-aligned count and
/// triggers the current-sense ADCs, so every conversion completes in the
/// half period it samples and the handler sees that half's count direction.
pub fn start_pwm<M: MotorTimer + ?Sized>(timer: &mut M) {
    let period = timer.period();
    timer.set_main_output(false);
    timer.set_compare([period / 2; 3]);
    timer.set_master_mode(MasterMode::Update);
    timer.enable_channels();
    timer.enable_counter(true);
}

impl<T, B, const N: usize> LowLevel<T, B, N> {
    pub fn is_started(&self, stage: Stage) -> bool {
        self.stages.load(Ordering::Acquire) & stage.bit() != 0
    }

    fn require(&self, stage: Stage) -> Result<(), ConfigError> {
        if self.is_started(stage) {
            Ok(())
        } else {
            Err(ConfigError::OutOfOrder(stage))
        }
    }

    /// Marks `stage` complete, failing if it already was.
    fn complete(&self, stage: Stage) -> Result<(), ConfigError> {
        let previous = self.stages.fetch_or(stage.bit(), Ordering::AcqRel);
        if previous & stage.bit() != 0 {
            return Err(ConfigError::AlreadyInitialized);
        }
        Ok(())
    }

    fn ensure_pending(&self, stage: Stage) -> Result<(), ConfigError> {
        if self.is_started(stage) {
            return Err(ConfigError::AlreadyInitialized);
        }
        Ok(())
    }
}

impl<T: MotorTimer, B: BrakeTimer, const N: usize> LowLevel<T, B, N> {
    /// Validates the configuration and takes ownership of the timers. Motor
    /// timer `k` drives axis `k`.
    pub fn init(&self, timers: [T; N], brake: B) -> Result<(), ConfigError> {
        self.config.validate()?;
        if timers.iter().any(|t| t.period() != self.config.pwm.period) {
            return Err(ConfigError::InvalidConfig("motor timer period"));
        }
        if brake.period() != self.config.brake_resistor.period {
            return Err(ConfigError::InvalidConfig("brake timer period"));
        }

        critical_section::with(|cs| {
            let mut hardware = self.hardware.borrow(cs).borrow_mut();
            if hardware.is_some() {
                return Err(ConfigError::AlreadyInitialized);
            }
            *hardware = Some(Hardware::new(&self.config, timers, brake));
            Ok(())
        })?;
        self.complete(Stage::Init)?;
        debug!("low level initialized, {} axes", N);
        Ok(())
    }

    /// Starts the sampling ADCs and every bridge, phase-locks axis 1 to axis
    /// 0, leaves all motors disarmed and arms the brake resistor when it is
    /// enabled. `reference`, when given, is started in phase with axis 0.
    pub fn start_adc_pwm(
        &self,
        adcs: &mut [&mut dyn SampleAdc],
        reference: Option<&mut dyn Timebase>,
    ) -> Result<(), ConfigError> {
        self.require(Stage::Init)?;
        self.ensure_pending(Stage::AdcPwm)?;

        for adc in adcs.iter_mut() {
            adc.start();
        }

        let pwm = &self.config.pwm;
        let brake_enabled = self.config.brake_resistor.enabled;
        self.with_hardware(|hw| {
            for motor in hw.motors.iter_mut() {
                start_pwm(motor.timer_mut());
            }
            if let [first, second, ..] = &mut hw.motors[..] {
                sync_timers(
                    first.timer_mut(),
                    second.timer_mut(),
                    pwm.sync_trigger,
                    pwm.sync_offset,
                    reference,
                )?;
            }
            hw.disarm_motors();

            hw.brake.timer_mut().enable_outputs();
            hw.brake.disarm();
            if brake_enabled {
                hw.brake
                    .arm()
                    .map_err(|_| ConfigError::InvalidConfig("brake resistor fault latched"))?;
            }
            Ok::<_, ConfigError>(())
        })
        .ok_or(ConfigError::NotInitialized)??;

        self.complete(Stage::AdcPwm)?;
        info!("pwm started, sync offset {}", pwm.sync_offset);
        Ok(())
    }

    /// Starts the regular scan of every channel not owned by the PWM-synced
    /// paths.
    pub fn start_general_purpose_adc<A: ScanAdc + ?Sized>(&self, adc: &mut A) -> Result<(), ConfigError> {
        self.require(Stage::Init)?;
        self.ensure_pending(Stage::GeneralPurposeAdc)?;

        let mut channels = [AdcChannel::at(0); ADC_CHANNEL_COUNT];
        let mut count = 0;
        for index in 0..ADC_CHANNEL_COUNT {
            let Some(channel) = AdcChannel::new(index as u8) else {
                continue;
            };
            let route = route_for_channel(channel);
            if route.adc != AdcId::Adc1
                || route.group != ConversionGroup::Regular
                || self.config.owns_channel(index)
            {
                continue;
            }
            channels[count] = channel;
            count += 1;
        }
        adc.start_scan(&channels[..count]);

        self.complete(Stage::GeneralPurposeAdc)?;
        debug!("general purpose adc scanning {} channels", count);
        Ok(())
    }

    /// Enables capture on every PWM input that has a mapping.
    pub fn pwm_in_init<C: CaptureTimer + ?Sized>(&self, timer: &mut C) -> Result<(), ConfigError> {
        self.require(Stage::Init)?;
        self.ensure_pending(Stage::PwmInput)?;

        for (input, mapping) in self.config.pwm_input.mappings.iter().enumerate() {
            if mapping.is_some() {
                timer.enable_capture(input);
            }
        }
        self.complete(Stage::PwmInput)
    }

    /// Returns the housekeeping task; the caller spawns its `run` future.
    pub fn start_analog_thread(&self) -> Result<AnalogMonitor<'_, T, B, N>, ConfigError> {
        self.require(Stage::GeneralPurposeAdc)?;
        self.complete(Stage::AnalogThread)?;
        Ok(AnalogMonitor::new(self))
    }

    /// Disarms everything and gives the timers back. Every stage has to be
    /// run again afterwards.
    pub fn teardown(&self) -> Result<([T; N], B), ConfigError> {
        let hardware = critical_section::with(|cs| {
            let mut hardware = self.hardware.borrow(cs).borrow_mut();
            if let Some(hw) = hardware.as_mut() {
                hw.disarm_brake();
            }
            hardware.take()
        })
        .ok_or(ConfigError::NotInitialized)?;

        self.stages.store(0, Ordering::Release);
        self.measurements.reset();
        self.pwm_inputs.reset();
        for temperature in self.temperatures.iter() {
            temperature.store(UNKNOWN_TEMPERATURE, Ordering::Relaxed);
        }
        for sample in self.samples.iter() {
            sample.reset();
        }
        debug!("low level torn down");

        let Hardware { motors, brake, .. } = hardware;
        Ok((motors.map(|m| m.into_timer()), brake.into_timer()))
    }
}
