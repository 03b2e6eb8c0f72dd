//! Phase-locking of two PWM timers.

use crate::error::SyncError;
use crate::hal::{Alignment, CountDirection, InternalTrigger, MasterMode, SlaveMode, SyncTimer, Timebase};

/// Starts `timer_a` and `timer_b` so that every event of B happens exactly
/// `count_offset` counts after the matching event of A.
///
/// B must be wired to A's TRGO through `trigger`. When `reference` is given it
/// is loaded with the same offset and started just before A, so it counts in
/// phase with A.
///
/// One-shot startup configuration: both timers must be stopped from driving
/// (main output disabled) and no periodic interrupt may touch them meanwhile.
pub fn sync_timers<A, B>(
    timer_a: &mut A,
    timer_b: &mut B,
    trigger: InternalTrigger,
    count_offset: u16,
    reference: Option<&mut dyn Timebase>,
) -> Result<(), SyncError>
where
    A: SyncTimer + ?Sized,
    B: SyncTimer + ?Sized,
{
    if count_offset > timer_a.period() {
        return Err(SyncError::OffsetOutOfRange);
    }
    if timer_a.main_output_enabled() || timer_b.main_output_enabled() {
        return Err(SyncError::TimerRunning);
    }

    let saved_master = timer_a.master_mode();
    let saved_slave = timer_b.slave_mode();

    timer_a.enable_counter(false);
    timer_b.enable_counter(false);

    timer_a.set_master_mode(MasterMode::Enable);
    timer_b.set_slave_mode(SlaveMode::Trigger(trigger));

    // Direction is read-only while center aligned.
    force_up_counting(timer_a);
    force_up_counting(timer_b);

    timer_a.set_counter(count_offset);
    timer_b.set_counter(0);

    if let Some(reference) = reference {
        reference.set_counter(count_offset);
        reference.enable_counter(true);
    }

    timer_a.enable_counter(true);

    timer_a.set_master_mode(saved_master);
    timer_b.set_slave_mode(saved_slave);

    Ok(())
}

fn force_up_counting<T: SyncTimer + ?Sized>(timer: &mut T) {
    let alignment = timer.alignment();
    timer.set_alignment(Alignment::Edge);
    timer.set_direction(CountDirection::Up);
    timer.set_alignment(alignment);
}
