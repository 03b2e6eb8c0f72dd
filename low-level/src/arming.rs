//! Per-axis arm/disarm state machine.
//!
//! A [`MotorHandle`] owns the timer of one bridge. Compare values only reach
//! the timer while the handle is armed, and the output stage is only enabled
//! once a zero timing has been latched by the timer. Callers serialize access
//! (the container keeps the handles inside a critical section).

use crate::error::{ArmError, Fault};
use crate::hal::MotorTimer;

const ZERO_TIMING: [u16; 3] = [0; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmedState {
    /// Output disabled. A latched fault keeps the handle here until cleared.
    Disarmed,
    /// Zero timing written, waiting for the next service tick to enable the
    /// output stage.
    Arming,
    Armed,
}

impl ArmedState {
    pub fn is_active(self) -> bool {
        matches!(self, ArmedState::Arming | ArmedState::Armed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorStatus {
    pub state: ArmedState,
    pub fault: Option<Fault>,
    pub timing: [u16; 3],
    pub rejected_timings: u32,
}

pub struct MotorHandle<T> {
    timer: T,
    state: ArmedState,
    timing: [u16; 3],
    ticks_since_update: u32,
    fault: Option<Fault>,
    fault_reported: bool,
    rejected_timings: u32,
}

impl<T: MotorTimer> MotorHandle<T> {
    pub fn new(timer: T) -> Self {
        Self {
            timer,
            state: ArmedState::Disarmed,
            timing: ZERO_TIMING,
            ticks_since_update: 0,
            fault: None,
            fault_reported: false,
            rejected_timings: 0,
        }
    }

    pub fn state(&self) -> ArmedState {
        self.state
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    pub fn status(&self) -> MotorStatus {
        MotorStatus {
            state: self.state,
            fault: self.fault,
            timing: self.timing,
            rejected_timings: self.rejected_timings,
        }
    }

    /// Per-phase duty of the applied timing, zero unless armed.
    pub fn duty(&self) -> [f32; 3] {
        if self.state != ArmedState::Armed {
            return [0.0; 3];
        }
        let period = self.timer.period() as f32;
        self.timing.map(|t| t as f32 / period)
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn into_timer(self) -> T {
        self.timer
    }

    /// Writes the zero timing and starts waiting for the service tick.
    /// Environment checks (bus voltage, brake) belong to the caller.
    pub fn arm(&mut self) -> Result<(), ArmError> {
        if let Some(fault) = self.fault {
            return Err(ArmError::FaultLatched(fault));
        }
        if self.state.is_active() {
            return Ok(());
        }
        self.ticks_since_update = 0;
        self.write_timing(ZERO_TIMING);
        self.state = ArmedState::Arming;
        Ok(())
    }

    /// Returns whether the bridge was arming or armed.
    pub fn disarm(&mut self) -> bool {
        let was_active = self.state.is_active();
        self.force_safe();
        self.state = ArmedState::Disarmed;
        was_active
    }

    /// Returns whether the timing reached the timer.
    pub fn apply_timing(&mut self, timing: [u16; 3]) -> bool {
        if self.state != ArmedState::Armed {
            self.rejected_timings = self.rejected_timings.wrapping_add(1);
            return false;
        }
        let period = self.timer.period();
        self.write_timing(timing.map(|t| t.min(period)));
        self.ticks_since_update = 0;
        true
    }

    /// Runs once per PWM period after the update event. Promotes an arming
    /// handle and checks timing freshness of an armed one.
    pub fn service_tick(&mut self, watchdog_ticks: u32) {
        match self.state {
            ArmedState::Arming => {
                self.timer.set_main_output(true);
                self.ticks_since_update = 0;
                self.state = ArmedState::Armed;
            }
            ArmedState::Armed => {
                self.ticks_since_update += 1;
                if self.ticks_since_update > watchdog_ticks {
                    self.trip(Fault::ControlDeadlineMissed);
                }
            }
            ArmedState::Disarmed => {}
        }
    }

    /// Forces the bridge safe and disarms it, latching `fault` unless one is
    /// latched already.
    pub fn trip(&mut self, fault: Fault) {
        self.force_safe();
        self.state = ArmedState::Disarmed;
        if self.fault.is_none() {
            self.fault = Some(fault);
            self.fault_reported = false;
        }
    }

    pub fn clear_fault(&mut self) {
        self.fault = None;
        self.fault_reported = false;
    }

    /// The latched fault, once.
    pub fn take_unreported_fault(&mut self) -> Option<Fault> {
        match self.fault {
            Some(fault) if !self.fault_reported => {
                self.fault_reported = true;
                Some(fault)
            }
            _ => None,
        }
    }

    /// Zero compare first, then output off.
    fn force_safe(&mut self) {
        self.write_timing(ZERO_TIMING);
        self.timer.set_main_output(false);
    }

    fn write_timing(&mut self, timing: [u16; 3]) {
        self.timing = timing;
        self.timer.set_compare(timing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{
        Alignment, CountDirection, MasterMode, SlaveMode, SyncTimer, Timebase,
    };

    #[derive(Default)]
    struct Bridge {
        compare: [u16; 3],
        moe: bool,
        events: Vec<&'static str>,
    }

    impl Timebase for Bridge {
        fn counter(&self) -> u16 {
            0
        }
        fn set_counter(&mut self, _value: u16) {}
        fn enable_counter(&mut self, _enabled: bool) {}
    }

    impl SyncTimer for Bridge {
        fn period(&self) -> u16 {
            3500
        }
        fn main_output_enabled(&self) -> bool {
            self.moe
        }
        fn set_main_output(&mut self, enabled: bool) {
            self.moe = enabled;
            self.events.push(if enabled { "moe on" } else { "moe off" });
        }
        fn master_mode(&self) -> MasterMode {
            MasterMode::Reset
        }
        fn set_master_mode(&mut self, _mode: MasterMode) {}
        fn slave_mode(&self) -> SlaveMode {
            SlaveMode::Disabled
        }
        fn set_slave_mode(&mut self, _mode: SlaveMode) {}
        fn alignment(&self) -> Alignment {
            Alignment::Center
        }
        fn set_alignment(&mut self, _alignment: Alignment) {}
        fn direction(&self) -> CountDirection {
            CountDirection::Up
        }
        fn set_direction(&mut self, _direction: CountDirection) {}
    }

    impl MotorTimer for Bridge {
        fn set_compare(&mut self, timings: [u16; 3]) {
            self.compare = timings;
            self.events.push("compare");
        }
        fn enable_channels(&mut self) {}
    }

    fn armed() -> MotorHandle<Bridge> {
        let mut handle = MotorHandle::new(Bridge::default());
        handle.arm().unwrap();
        handle.service_tick(1);
        handle
    }

    #[test]
    fn test_arm_waits_for_tick() {
        let mut handle = MotorHandle::new(Bridge {
            compare: [100, 200, 300],
            ..Default::default()
        });
        handle.arm().unwrap();
        assert_eq!(handle.state(), ArmedState::Arming);
        assert_eq!(handle.timer().compare, [0; 3]);
        assert!(!handle.timer().moe, "output enabled before zero timing latched");

        handle.service_tick(1);
        assert_eq!(handle.state(), ArmedState::Armed);
        assert!(handle.timer().moe);
        assert_eq!(handle.timer().events, ["compare", "moe on"]);
    }

    #[test]
    fn test_apply_only_when_armed() {
        let mut handle = MotorHandle::new(Bridge::default());
        assert!(!handle.apply_timing([1, 2, 3]));
        handle.arm().unwrap();
        assert!(!handle.apply_timing([1, 2, 3]), "accepted while arming");
        assert_eq!(handle.timer().compare, [0; 3]);
        assert_eq!(handle.status().rejected_timings, 2);

        handle.service_tick(1);
        assert!(handle.apply_timing([1, 2, 3]));
        assert_eq!(handle.timer().compare, [1, 2, 3]);
    }

    #[test]
    fn test_apply_clamps_to_period() {
        let mut handle = armed();
        handle.apply_timing([0, 3499, 9000]);
        assert_eq!(handle.timer().compare, [0, 3499, 3500]);
    }

    #[test]
    fn test_disarm_order_and_idempotence() {
        let mut handle = armed();
        handle.apply_timing([10, 20, 30]);
        handle.timer_mut().events.clear();

        assert!(handle.disarm());
        assert_eq!(handle.timer().events, ["compare", "moe off"]);
        assert_eq!(handle.timer().compare, [0; 3]);

        assert!(!handle.disarm());
        assert!(!handle.disarm());
        assert_eq!(handle.state(), ArmedState::Disarmed);
        assert!(!handle.timer().moe);
    }

    #[test]
    fn test_disarm_while_arming() {
        let mut handle = MotorHandle::new(Bridge::default());
        handle.arm().unwrap();
        assert!(handle.disarm());
        handle.service_tick(1);
        assert!(!handle.timer().moe, "disarmed handle got promoted");
    }

    #[test]
    fn test_watchdog_trips_stale_timing() {
        let mut handle = armed();
        handle.apply_timing([5, 5, 5]);
        handle.service_tick(1);
        assert_eq!(handle.state(), ArmedState::Armed);
        handle.service_tick(1);
        assert_eq!(handle.state(), ArmedState::Disarmed);
        assert_eq!(handle.fault(), Some(Fault::ControlDeadlineMissed));
        assert!(!handle.timer().moe);
        assert_eq!(handle.timer().compare, [0; 3]);
    }

    #[test]
    fn test_refresh_keeps_armed() {
        let mut handle = armed();
        for i in 0..100 {
            handle.apply_timing([i, i, i]);
            handle.service_tick(1);
        }
        assert_eq!(handle.state(), ArmedState::Armed);
    }

    #[test]
    fn test_fault_latch() {
        let mut handle = armed();
        handle.trip(Fault::OverCurrent);
        handle.trip(Fault::UnderVoltage);
        assert_eq!(handle.fault(), Some(Fault::OverCurrent), "first fault wins");
        assert_eq!(
            handle.arm(),
            Err(ArmError::FaultLatched(Fault::OverCurrent))
        );

        assert!(!handle.disarm());
        assert_eq!(handle.fault(), Some(Fault::OverCurrent), "disarm cleared latch");

        handle.clear_fault();
        assert_eq!(handle.arm(), Ok(()));
    }

    #[test]
    fn test_trip_disarms_with_fault_latched() {
        let mut handle = armed();
        handle.trip(Fault::External);
        assert_eq!(handle.state(), ArmedState::Disarmed);
        assert_eq!(handle.fault(), Some(Fault::External));
        handle.service_tick(1);
        assert!(!handle.timer().moe, "tripped handle got promoted");

        handle.clear_fault();
        assert_eq!(handle.state(), ArmedState::Disarmed);
        assert_eq!(handle.fault(), None);
    }

    #[test]
    fn test_fault_reported_once() {
        let mut handle = armed();
        assert_eq!(handle.take_unreported_fault(), None);
        handle.trip(Fault::OverVoltage);
        assert_eq!(handle.take_unreported_fault(), Some(Fault::OverVoltage));
        assert_eq!(handle.take_unreported_fault(), None);
    }

    #[test]
    fn test_duty() {
        let mut handle = MotorHandle::new(Bridge::default());
        assert_eq!(handle.duty(), [0.0; 3]);
        handle.arm().unwrap();
        handle.service_tick(1);
        handle.apply_timing([1750, 0, 3500]);
        assert_eq!(handle.duty(), [0.5, 0.0, 1.0]);
    }
}
