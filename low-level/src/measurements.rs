//! Measurement snapshot shared between the sampling interrupts and thread context.
//!
//! Publication is sequence-locked: writers (interrupt handlers, possibly at
//! different priorities) serialize on a critical section and bump the sequence
//! around their stores, readers copy the fields without any lock and retry when
//! the sequence moved underneath them. A reader therefore always sees all fields
//! from the same publish.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering, fence};

use crate::ADC_CHANNEL_COUNT;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurements {
    /// Bus voltage in volts.
    pub vbus_voltage: f32,
    /// Bus current in amps, positive when drawing from the supply.
    pub ibus: f32,
    /// Latest raw code per ADC channel.
    pub raw: [u16; ADC_CHANNEL_COUNT],
    /// At least one bus voltage sample has been published.
    pub vbus_valid: bool,
    /// Number of completed publishes.
    pub generation: u32,
}

impl Measurements {
    pub fn vbus_within(&self, min: f32, max: f32) -> bool {
        self.vbus_valid && self.vbus_voltage >= min && self.vbus_voltage <= max
    }
}

pub struct MeasurementCell {
    sequence: AtomicU32,
    vbus_voltage: AtomicU32,
    ibus: AtomicU32,
    vbus_valid: AtomicBool,
    raw: [AtomicU16; ADC_CHANNEL_COUNT],
}

impl Default for MeasurementCell {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementCell {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            vbus_voltage: AtomicU32::new(0),
            ibus: AtomicU32::new(0),
            vbus_valid: AtomicBool::new(false),
            raw: [const { AtomicU16::new(0) }; ADC_CHANNEL_COUNT],
        }
    }

    fn load_fields(&self, generation: u32) -> Measurements {
        let mut raw = [0u16; ADC_CHANNEL_COUNT];
        for (slot, cell) in raw.iter_mut().zip(self.raw.iter()) {
            *slot = cell.load(Ordering::Relaxed);
        }
        Measurements {
            vbus_voltage: f32::from_bits(self.vbus_voltage.load(Ordering::Relaxed)),
            ibus: f32::from_bits(self.ibus.load(Ordering::Relaxed)),
            raw,
            vbus_valid: self.vbus_valid.load(Ordering::Relaxed),
            generation,
        }
    }

    /// Lock-free consistent copy of the latest snapshot.
    pub fn read(&self) -> Measurements {
        loop {
            let start = self.sequence.load(Ordering::Acquire);
            if start & 1 == 1 {
                core::hint::spin_loop();
                continue;
            }
            let snapshot = self.load_fields(start / 2);
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == start {
                return snapshot;
            }
        }
    }

    /// Applies `update` to a copy of the current snapshot and publishes it.
    ///
    /// Bounded and allocation-free, callable from interrupt context.
    pub fn publish<R>(&self, update: impl FnOnce(&mut Measurements) -> R) -> R {
        critical_section::with(|_| {
            let sequence = self.sequence.load(Ordering::Relaxed);
            let mut snapshot = self.load_fields(sequence / 2);
            let result = update(&mut snapshot);

            self.sequence
                .store(sequence.wrapping_add(1), Ordering::Relaxed);
            fence(Ordering::Release);

            self.vbus_voltage
                .store(snapshot.vbus_voltage.to_bits(), Ordering::Relaxed);
            self.ibus.store(snapshot.ibus.to_bits(), Ordering::Relaxed);
            self.vbus_valid
                .store(snapshot.vbus_valid, Ordering::Relaxed);
            for (cell, code) in self.raw.iter().zip(snapshot.raw.iter()) {
                cell.store(*code, Ordering::Relaxed);
            }

            self.sequence
                .store(sequence.wrapping_add(2), Ordering::Release);
            result
        })
    }

    /// Back to the power-on state.
    pub fn reset(&self) {
        self.publish(|m| {
            m.vbus_voltage = 0.0;
            m.ibus = 0.0;
            m.raw = [0; ADC_CHANNEL_COUNT];
            m.vbus_valid = false;
        });
    }
}
