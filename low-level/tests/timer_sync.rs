mod common;

use common::SimTimer;
use low_level::hal::{InternalTrigger, MasterMode, SlaveMode, Timebase};
use low_level::{SyncError, start_pwm, sync_timers};

const PERIOD: u16 = 3500;
const CYCLE: i64 = 2 * PERIOD as i64;

fn started_pair() -> (SimTimer, SimTimer) {
    let a = SimTimer::new(PERIOD);
    let b = SimTimer::new(PERIOD);
    a.connect(InternalTrigger::Itr0, &b);
    start_pwm(&mut a.clone());
    start_pwm(&mut b.clone());
    (a, b)
}

/// Counts until both timers have fired their measurement trigger, returns the
/// tick of each first trigger.
fn first_triggers(a: &SimTimer, b: &SimTimer) -> (i64, i64) {
    let mut first_a = None;
    let mut first_b = None;
    for tick in 0..2 * CYCLE {
        if first_a.is_none() && a.regs().measurement_trigger() {
            first_a = Some(tick);
        }
        if first_b.is_none() && b.regs().measurement_trigger() {
            first_b = Some(tick);
        }
        a.regs_mut().step();
        b.regs_mut().step();
    }
    (
        first_a.expect("timer A never triggered"),
        first_b.expect("timer B never triggered"),
    )
}

#[test]
fn test_trigger_lags_by_offset() {
    let offsets = (0..=PERIOD).step_by(250).chain([1, 127, 1622, PERIOD - 1]);
    for offset in offsets {
        let (a, b) = started_pair();
        sync_timers(
            &mut a.clone(),
            &mut b.clone(),
            InternalTrigger::Itr0,
            offset,
            None,
        )
        .unwrap();
        assert!(b.regs().enabled, "B not started by the trigger");

        let (trigger_a, trigger_b) = first_triggers(&a, &b);
        let lag = (trigger_b - trigger_a).rem_euclid(CYCLE);
        assert_eq!(lag, offset as i64, "offset {offset}");
    }
}

#[test]
fn test_wrong_trigger_leaves_slave_stopped() {
    let (a, b) = started_pair();
    sync_timers(&mut a.clone(), &mut b.clone(), InternalTrigger::Itr2, 100, None).unwrap();
    assert!(a.regs().enabled);
    assert!(!b.regs().enabled);
}

#[test]
fn test_modes_restored() {
    let (a, b) = started_pair();
    sync_timers(&mut a.clone(), &mut b.clone(), InternalTrigger::Itr0, 100, None).unwrap();
    assert_eq!(a.regs().master, Some(MasterMode::Update));
    assert_eq!(b.regs().slave, Some(SlaveMode::Disabled));
    assert!(a.regs().center && b.regs().center);
}

#[test]
fn test_reference_in_phase_with_a() {
    let (a, b) = started_pair();
    let mut reference = SimTimer::new(u16::MAX);
    sync_timers(
        &mut a.clone(),
        &mut b.clone(),
        InternalTrigger::Itr0,
        900,
        Some(&mut reference as &mut dyn Timebase),
    )
    .unwrap();
    assert_eq!(reference.counter(), a.counter());
    assert!(reference.regs().enabled);
}

#[test]
fn test_rejects_running_outputs() {
    let (a, b) = started_pair();
    a.regs_mut().moe = true;
    let result = sync_timers(&mut a.clone(), &mut b.clone(), InternalTrigger::Itr0, 100, None);
    assert_eq!(result, Err(SyncError::TimerRunning));
}

#[test]
fn test_rejects_offset_beyond_period() {
    let (a, b) = started_pair();
    let result = sync_timers(
        &mut a.clone(),
        &mut b.clone(),
        InternalTrigger::Itr0,
        PERIOD + 1,
        None,
    );
    assert_eq!(result, Err(SyncError::OffsetOutOfRange));
}
