//! Slow analog housekeeping: FET temperatures, thermal derating and deferred
//! fault logging. Runs as a task, never in interrupt context.

use core::future::Future;
use core::sync::atomic::Ordering;

use crate::config::ThermistorConfig;
use crate::error::Fault;
use crate::hal::{BrakeTimer, MotorTimer};
use crate::lowpass_filter::LowPassFilter;
use crate::system::LowLevel;
use crate::units::{Celsius, Second};

/// Evaluates `coefficients` (highest order first) at `x`.
fn horner(coefficients: &[f32], x: f32) -> f32 {
    coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
}

fn thermistor_temperature(config: &ThermistorConfig, normalized: f32) -> Celsius {
    Celsius(horner(&config.coefficients, normalized))
}

/// Current limit scale for `temperature`: 1 below the derating window, 0 at
/// its end, linear in between.
pub fn derating_factor(config: &ThermistorConfig, temperature: Celsius) -> f32 {
    let start = Celsius(config.derating_start);
    let end = Celsius(config.derating_end);
    if temperature <= start {
        1.0
    } else if temperature >= end {
        0.0
    } else {
        (end - temperature) / (end - start)
    }
}

pub struct AnalogMonitor<'a, T, B, const N: usize> {
    low_level: &'a LowLevel<T, B, N>,
    filters: [LowPassFilter; N],
}

impl<'a, T: MotorTimer, B: BrakeTimer, const N: usize> AnalogMonitor<'a, T, B, N> {
    pub(crate) fn new(low_level: &'a LowLevel<T, B, N>) -> Self {
        let filters = core::array::from_fn(|axis| {
            let time_constant = low_level.config.thermistors[axis]
                .map(|t| t.filter_time_constant)
                .unwrap_or(0.0);
            LowPassFilter::new(Second(time_constant))
        });
        Self { low_level, filters }
    }

    /// One housekeeping pass, `dt` after the previous one.
    pub fn poll(&mut self, dt: Second) {
        let low_level = self.low_level;
        let measurements = low_level.measurements();
        let adc = &low_level.config.adc;

        for (axis, filter) in self.filters.iter_mut().enumerate() {
            let Some(thermistor) = low_level.config.thermistors[axis] else {
                continue;
            };
            let voltage = adc.voltage(measurements.raw[thermistor.channel.index()]);
            let Celsius(raw) =
                thermistor_temperature(&thermistor, voltage / adc.reference_voltage);
            if !raw.is_finite() {
                continue;
            }
            let temperature = filter.apply(raw, dt);
            low_level.temperatures[axis].store(temperature.to_bits(), Ordering::Relaxed);

            if temperature >= thermistor.derating_end {
                low_level.report_fault(axis, Fault::OverTemperature);
            }
        }

        self.log_faults();
    }

    fn log_faults(&self) {
        let Some((motors, brake)) = self.low_level.with_hardware(|hw| {
            let mut motors = [None; N];
            for (fault, motor) in motors.iter_mut().zip(hw.motors.iter_mut()) {
                *fault = motor.take_unreported_fault();
            }
            (motors, hw.brake.take_unreported_fault())
        }) else {
            return;
        };

        for (axis, fault) in motors.iter().enumerate() {
            if let Some(fault) = fault {
                warn!("axis {} faulted: {}", axis, fault);
            }
        }
        if let Some(fault) = brake {
            error!("brake resistor faulted: {}", fault);
        }
    }

    /// Polls forever at the configured period.
    pub async fn run<FWait, FutUnit>(mut self, wait_function: FWait)
    where
        FWait: Fn(Second) -> FutUnit,
        FutUnit: Future<Output = ()>,
    {
        let period = Second::from_millis(self.low_level.config.analog_poll_ms);
        info!("analog monitor running every {} ms", period.as_millis());
        loop {
            self.poll(period);
            wait_function(period).await;
        }
    }
}

impl<T, B, const N: usize> LowLevel<T, B, N> {
    /// Filtered FET temperature of `axis`, `None` without a thermistor or
    /// before the first reading.
    pub fn fet_temperature(&self, axis: usize) -> Option<Celsius> {
        let bits = self.temperatures.get(axis)?.load(Ordering::Relaxed);
        let temperature = f32::from_bits(bits);
        temperature.is_finite().then_some(Celsius(temperature))
    }

    /// Scale for the axis' current limit from its FET temperature.
    pub fn current_limit_factor(&self, axis: usize) -> f32 {
        let Some(Some(thermistor)) = self.config.thermistors.get(axis) else {
            return 1.0;
        };
        match self.fet_temperature(axis) {
            Some(temperature) => derating_factor(thermistor, temperature),
            None => 1.0,
        }
    }
}
