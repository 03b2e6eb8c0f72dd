//! Interrupt entry points of the sampling pipeline.
//!
//! The motor timers run center aligned and trigger the current-sense ADCs on
//! both the up and the down count. While counting down the bridge applies the
//! zero vector, so those samples feed the DC offset filters and drive the
//! per-axis service tick. While counting up the samples are real phase
//! currents: phase B is held until phase C arrives, then both codes and the
//! bus current go out in one publish and the sample is handed to the control
//! loop.
//!
//! Handlers only set state and never log.

use crate::ADC_CHANNEL_COUNT;
use crate::adc::{AdcRoute, ConversionGroup, route_for_channel};
use crate::brake::timing_to_duty;
use crate::current::{DcOffset, PhaseCurrent};
use crate::error::Fault;
use crate::hal::{BrakeTimer, CaptureTimer, MotorTimer, SampleAdc};
use crate::system::{Hardware, LowLevel};
use crate::units::Second;

/// One set of phase currents, delivered once per PWM period per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSample {
    /// Offset-corrected phase currents, amps.
    pub phases: PhaseCurrent,
    /// Bus current of this axis, amps.
    pub ibus: f32,
    pub vbus_voltage: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    B,
    C,
}

/// Phase B conversion of the current measurement, waiting for phase C.
#[derive(Debug, Clone, Copy)]
struct HeldSample {
    code: u16,
    current: f32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AxisSense {
    held_b: Option<HeldSample>,
    dc_offset: DcOffset,
    pub ibus: f32,
}

impl AxisSense {
    pub fn new(dc_offset: DcOffset) -> Self {
        Self {
            held_b: None,
            dc_offset,
            ibus: 0.0,
        }
    }
}

fn read_code<A: SampleAdc + ?Sized>(adc: &A, injected: bool) -> u16 {
    if injected {
        adc.injected_value(1)
    } else {
        adc.regular_value()
    }
}

impl<T: MotorTimer, B: BrakeTimer, const N: usize> LowLevel<T, B, N> {
    fn locate(&self, route: AdcRoute) -> Option<(usize, Phase)> {
        self.config
            .phases
            .iter()
            .enumerate()
            .find_map(|(axis, sense)| {
                if route_for_channel(sense.phase_b) == route {
                    Some((axis, Phase::B))
                } else if route_for_channel(sense.phase_c) == route {
                    Some((axis, Phase::C))
                } else {
                    None
                }
            })
    }

    /// PWM-triggered current-sense conversion complete.
    pub fn pwm_trig_adc_cb<A: SampleAdc + ?Sized>(&self, adc: &A, injected: bool) {
        let route = AdcRoute {
            adc: adc.id(),
            group: ConversionGroup::from_injected(injected),
        };
        let code = read_code(adc, injected);
        let dt = Second(self.config.pwm.control_period);

        self.with_hardware(|hw| {
            let Some((axis, phase)) = self.locate(route) else {
                hw.trip_all(Fault::AdcFailed);
                return;
            };
            let sense = &self.config.phases[axis];
            let channel = match phase {
                Phase::B => sense.phase_b,
                Phase::C => sense.phase_c,
            };

            let current = hw.shunt.phase_current(code);
            if hw.motors[axis].timer().counting_down() {
                self.measurements
                    .publish(|m| m.raw[channel.index()] = code);
                let axis_sense = &mut hw.sense[axis];
                match phase {
                    Phase::B => axis_sense.dc_offset.update_b(current, dt),
                    Phase::C => axis_sense.dc_offset.update_c(current, dt),
                }
                if phase == Phase::B {
                    hw.motors[axis].service_tick(self.config.pwm.watchdog_ticks);
                    self.balance_brake(hw);
                }
                return;
            }

            match phase {
                Phase::B => hw.sense[axis].held_b = Some(HeldSample { code, current }),
                Phase::C => match hw.sense[axis].held_b.take() {
                    Some(b) => self.complete_sample(hw, axis, b, HeldSample { code, current }),
                    None => self
                        .measurements
                        .publish(|m| m.raw[channel.index()] = code),
                },
            }
        });
    }

    fn complete_sample(&self, hw: &mut Hardware<T, B, N>, axis: usize, b: HeldSample, c: HeldSample) {
        let phases = hw.sense[axis].dc_offset.correct(b.current, c.current);
        let ibus = phases.bus_current(hw.motors[axis].duty());
        hw.sense[axis].ibus = ibus;

        let total: f32 = hw.sense.iter().map(|s| s.ibus).sum();
        let sense = &self.config.phases[axis];
        let vbus_voltage = self.measurements.publish(|m| {
            m.raw[sense.phase_b.index()] = b.code;
            m.raw[sense.phase_c.index()] = c.code;
            m.ibus = total;
            m.vbus_voltage
        });

        let limits = &self.config.limits;
        let regen = total + hw.brake.absorbed_current();
        if total > limits.max_bus_current || regen < -limits.max_regen_current {
            hw.trip_active(Fault::OverCurrent);
        }

        if let Some(signal) = self.samples.get(axis) {
            signal.signal(CurrentSample {
                phases,
                ibus,
                vbus_voltage,
            });
        }
    }

    /// Bus voltage sense conversion complete.
    pub fn vbus_sense_adc_cb<A: SampleAdc + ?Sized>(&self, adc: &A, injected: bool) {
        let channel = self.config.vbus_channel;
        let route = AdcRoute {
            adc: adc.id(),
            group: ConversionGroup::from_injected(injected),
        };
        if route != route_for_channel(channel) {
            return;
        }
        let code = read_code(adc, injected);
        let vbus_voltage = self.config.adc.voltage(code) * self.config.vbus_divider;
        self.measurements.publish(|m| {
            m.raw[channel.index()] = code;
            m.vbus_voltage = vbus_voltage;
            m.vbus_valid = true;
        });

        let limits = &self.config.limits;
        let fault = if vbus_voltage > limits.overvoltage {
            Fault::OverVoltage
        } else if vbus_voltage < limits.undervoltage {
            Fault::UnderVoltage
        } else {
            return;
        };
        self.with_hardware(|hw| hw.trip_active(fault));
    }

    /// Regular scan of the general-purpose ADC complete. Channels owned by
    /// the current and bus voltage paths are left alone.
    pub fn general_purpose_adc_cb(&self, codes: &[u16; ADC_CHANNEL_COUNT]) {
        let config = &self.config;
        self.measurements.publish(|m| {
            for (index, (slot, &code)) in m.raw.iter_mut().zip(codes.iter()).enumerate() {
                if config.owns_channel(index) {
                    continue;
                }
                *slot = code;
            }
        });
    }

    /// Input capture interrupt of the PWM input timer.
    pub fn pwm_in_cb<C: CaptureTimer + ?Sized>(&self, timer: &mut C) {
        self.pwm_inputs.on_capture(timer, &self.config.pwm_input);
    }

    /// Re-balances the brake resistor against the regenerated current.
    pub fn update_brake_current(&self) {
        self.with_hardware(|hw| self.balance_brake(hw));
    }

    fn balance_brake(&self, hw: &mut Hardware<T, B, N>) {
        let config = &self.config.brake_resistor;
        if !config.enabled || !hw.brake.is_armed() {
            return;
        }
        let measurements = self.measurements.read();
        if !measurements.vbus_valid {
            return;
        }

        let brake_current = (-hw.armed_bus_current()).max(0.0);
        let vbus = measurements.vbus_voltage;
        let mut duty = brake_current * config.resistance / vbus;
        if !duty.is_finite() {
            duty = 1.0;
        }
        hw.apply_brake_duty(duty, config);

        let applied = timing_to_duty(hw.brake.status().timing, config.period);
        hw.brake
            .set_absorbed_current(applied * vbus / config.resistance);
    }
}
