//! Hardware collaborator interfaces.
//!
//! The firmware implements these on the MCU's timer and ADC peripherals; the
//! tests implement them on simulated registers. Every method is expected to be
//! a handful of register accesses, callable from interrupt context.

use crate::adc::{AdcChannel, AdcId};

/// Internal trigger input selecting which timer's TRGO drives a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InternalTrigger {
    Itr0,
    Itr1,
    Itr2,
    Itr3,
}

/// What the timer emits on its TRGO output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterMode {
    Reset,
    /// TRGO pulses when the counter gets enabled.
    Enable,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveMode {
    Disabled,
    /// The counter starts on a rising edge of the selected trigger.
    Trigger(InternalTrigger),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alignment {
    Edge,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CountDirection {
    Up,
    Down,
}

/// A counter that can be loaded and started.
pub trait Timebase {
    fn counter(&self) -> u16;
    fn set_counter(&mut self, value: u16);
    fn enable_counter(&mut self, enabled: bool);
}

/// Register-level operations needed to phase-lock two timers.
pub trait SyncTimer: Timebase {
    /// Auto-reload value.
    fn period(&self) -> u16;
    fn main_output_enabled(&self) -> bool;
    fn set_main_output(&mut self, enabled: bool);
    fn master_mode(&self) -> MasterMode;
    fn set_master_mode(&mut self, mode: MasterMode);
    fn slave_mode(&self) -> SlaveMode;
    fn set_slave_mode(&mut self, mode: SlaveMode);
    fn alignment(&self) -> Alignment;
    fn set_alignment(&mut self, alignment: Alignment);
    /// Read-only in center-aligned mode.
    fn direction(&self) -> CountDirection;
    fn set_direction(&mut self, direction: CountDirection);
}

/// Advanced timer driving one three-phase bridge.
pub trait MotorTimer: SyncTimer {
    /// Writes the preload compare registers of the three phases. They take effect
    /// at the next update event.
    fn set_compare(&mut self, timings: [u16; 3]);
    /// Enables the three complementary channel pairs. Nothing reaches the pins
    /// while the main output is disabled.
    fn enable_channels(&mut self);

    fn counting_down(&self) -> bool {
        self.direction() == CountDirection::Down
    }
}

/// Timer driving the brake resistor half bridge: one channel turns the low side
/// off, the other turns the high side on.
pub trait BrakeTimer {
    fn period(&self) -> u32;
    fn set_compare(&mut self, low_off: u32, high_on: u32);
    fn enable_outputs(&mut self);
}

/// An ADC whose conversions are triggered by the PWM timers.
pub trait SampleAdc {
    fn id(&self) -> AdcId;
    /// Result of injected rank `rank` (1-based).
    fn injected_value(&self, rank: u8) -> u16;
    fn regular_value(&self) -> u16;
    /// Powers the converter and enables its end-of-conversion interrupts.
    fn start(&mut self);
}

/// An ADC continuously scanning a regular sequence.
pub trait ScanAdc {
    fn start_scan(&mut self, channels: &[AdcChannel]);
}

/// Input-capture timer for external PWM commands. Channels are captured on
/// both edges.
pub trait CaptureTimer {
    fn enable_capture(&mut self, channel: usize);
    /// Bit `n` set when channel `n` captured an edge since the last call.
    fn take_pending(&mut self) -> u8;
    fn capture(&self, channel: usize) -> u32;
    /// Pin level right after the captured edge.
    fn input_high(&self, channel: usize) -> bool;
    /// Free-running counter, same time base as the captures.
    fn now(&self) -> u32;
}
