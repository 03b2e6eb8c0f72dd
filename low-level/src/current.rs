//! Phase current conversion from shunt amplifier codes.

use core::ops::Sub;

use crate::adc::AdcCalibration;
use crate::config::CurrentSenseConfig;
use crate::lowpass_filter::LowPassFilter;
use crate::units::Second;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrent {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseCurrent {
    pub fn new(a: f32, b: f32, c: f32) -> Self {
        Self { a, b, c }
    }

    /// Phase A follows from Kirchhoff's current law.
    pub fn from_bc(b: f32, c: f32) -> Self {
        Self::new(-(b + c), b, c)
    }

    /// Current drawn from the bus for the given per-phase duty cycles.
    pub fn bus_current(&self, duty: [f32; 3]) -> f32 {
        duty[0] * self.a + duty[1] * self.b + duty[2] * self.c
    }
}

impl Sub<PhaseCurrent> for PhaseCurrent {
    type Output = Self;
    fn sub(self, c: PhaseCurrent) -> Self::Output {
        PhaseCurrent::new(self.a - c.a, self.b - c.b, self.c - c.c)
    }
}

/// Linear code-to-amps conversion of one shunt channel. The amplifier output
/// is biased to mid-scale at zero current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShuntConversion {
    midpoint: f32,
    amps_per_code: f32,
}

impl ShuntConversion {
    pub fn new(adc: &AdcCalibration, sense: &CurrentSenseConfig) -> Self {
        let volts_per_code = adc.reference_voltage / adc.full_scale;
        Self {
            midpoint: adc.full_scale / 2.0,
            amps_per_code: volts_per_code / sense.amplifier_gain * sense.shunt_conductance,
        }
    }

    #[inline(always)]
    pub fn phase_current(&self, code: u16) -> f32 {
        (code as f32 - self.midpoint) * self.amps_per_code
    }
}

/// Zero-current offset of the B and C channels, learned from samples taken
/// while the bridge applies the zero vector.
#[derive(Debug, Clone, Copy)]
pub struct DcOffset {
    b: LowPassFilter,
    c: LowPassFilter,
}

impl DcOffset {
    pub const fn new(time_constant: Second) -> Self {
        Self {
            b: LowPassFilter::new(time_constant),
            c: LowPassFilter::new(time_constant),
        }
    }

    pub fn update_b(&mut self, current: f32, dt: Second) {
        self.b.apply(current, dt);
    }

    pub fn update_c(&mut self, current: f32, dt: Second) {
        self.c.apply(current, dt);
    }

    pub fn offset(&self) -> PhaseCurrent {
        PhaseCurrent::from_bc(self.b.value().unwrap_or(0.0), self.c.value().unwrap_or(0.0))
    }

    /// Offset-corrected phase currents from raw B and C readings.
    pub fn correct(&self, b: f32, c: f32) -> PhaseCurrent {
        PhaseCurrent::from_bc(b, c) - self.offset()
    }
}
