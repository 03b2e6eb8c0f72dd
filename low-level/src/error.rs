use crate::bootstrap::Stage;

/// Safety faults. Raising one forces the affected output safe and latches
/// until [`clear_fault`](crate::LowLevel::clear_fault).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// No timing refresh within the freshness window.
    ControlDeadlineMissed,
    OverVoltage,
    UnderVoltage,
    OverCurrent,
    OverTemperature,
    /// A PWM-triggered conversion arrived from an ADC with no current-sense route.
    AdcFailed,
    BrakeDeadtimeViolation,
    /// Raised by the control loop.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmError {
    /// `start_adc_pwm` has not completed yet.
    NotStarted,
    UnknownAxis,
    FaultLatched(Fault),
    /// No bus voltage published yet, or it is outside the allowed window.
    MeasurementsInvalid,
    BrakeResistorDisarmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError {
    /// The count offset does not fit in the timer period.
    OffsetOutOfRange,
    /// One of the timers still has its main output enabled.
    TimerRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A bootstrap step ran before the step it depends on.
    OutOfOrder(Stage),
    AlreadyInitialized,
    NotInitialized,
    InvalidConfig(&'static str),
    Sync(SyncError),
}

impl From<SyncError> for ConfigError {
    fn from(value: SyncError) -> Self {
        ConfigError::Sync(value)
    }
}
