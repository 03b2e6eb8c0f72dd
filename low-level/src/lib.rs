#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This must go first so the logging macros are visible to the other modules.
mod fmt;

pub mod adc;
pub mod analog;
pub mod arming;
pub mod bootstrap;
pub mod brake;
pub mod config;
pub mod current;
pub mod error;
pub mod hal;
pub mod lowpass_filter;
pub mod measurements;
pub mod pwm_in;
pub mod sampling;
mod system;
pub mod timer_sync;
pub mod units;

/// Physical ADC channels per converter.
pub const ADC_CHANNEL_COUNT: usize = 16;

pub use adc::{AdcChannel, Gpio, Port, channel_from_gpio, route_for_channel};
pub use analog::AnalogMonitor;
pub use arming::{ArmedState, MotorStatus};
pub use bootstrap::{Stage, start_pwm};
pub use brake::BrakeStatus;
pub use config::Config;
pub use error::{ArmError, ConfigError, Fault, SyncError};
pub use measurements::Measurements;
pub use sampling::CurrentSample;
pub use system::LowLevel;
pub use timer_sync::sync_timers;
