//! Simulated timers and ADCs for driving `LowLevel` on the host.
#![allow(dead_code)]

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use low_level::adc::AdcId;
use low_level::config::Config;
use low_level::hal::{
    Alignment, BrakeTimer, CaptureTimer, CountDirection, InternalTrigger, MasterMode, MotorTimer,
    SampleAdc, ScanAdc, SlaveMode, SyncTimer, Timebase,
};
use low_level::{AdcChannel, LowLevel};

#[derive(Debug, Default)]
pub struct TimerRegs {
    pub period: u16,
    pub counter: u16,
    pub enabled: bool,
    pub moe: bool,
    pub master: Option<MasterMode>,
    pub slave: Option<SlaveMode>,
    pub center: bool,
    pub down: bool,
    pub compare: [u16; 3],
    pub channels_enabled: bool,
    pub slaves: Vec<(InternalTrigger, SimTimer)>,
}

impl TimerRegs {
    /// One count of a center-aligned counter.
    pub fn step(&mut self) {
        if !self.enabled {
            return;
        }
        if self.down {
            if self.counter == 0 {
                self.down = false;
                self.counter += 1;
            } else {
                self.counter -= 1;
            }
        } else if self.counter >= self.period {
            self.down = true;
            self.counter = self.period - 1;
        } else {
            self.counter += 1;
        }
    }

    /// TRGO pulse of the update event at the bottom of the count, the one
    /// the phase currents are measured after.
    pub fn measurement_trigger(&self) -> bool {
        self.enabled && self.master == Some(MasterMode::Update) && self.counter == 0
    }

    /// TRGO pulse of the update event at the top of the count.
    pub fn offset_trigger(&self) -> bool {
        self.enabled && self.master == Some(MasterMode::Update) && self.counter == self.period
    }
}

#[derive(Debug, Clone)]
pub struct SimTimer(Rc<RefCell<TimerRegs>>);

impl SimTimer {
    pub fn new(period: u16) -> Self {
        SimTimer(Rc::new(RefCell::new(TimerRegs {
            period,
            center: true,
            ..Default::default()
        })))
    }

    pub fn regs(&self) -> Ref<'_, TimerRegs> {
        self.0.borrow()
    }

    pub fn regs_mut(&self) -> RefMut<'_, TimerRegs> {
        self.0.borrow_mut()
    }

    /// Routes this timer's TRGO to `slave` through `trigger`.
    pub fn connect(&self, trigger: InternalTrigger, slave: &SimTimer) {
        self.regs_mut().slaves.push((trigger, slave.clone()));
    }

    pub fn set_counting_down(&self, down: bool) {
        self.regs_mut().down = down;
    }
}

impl Timebase for SimTimer {
    fn counter(&self) -> u16 {
        self.regs().counter
    }

    fn set_counter(&mut self, value: u16) {
        self.regs_mut().counter = value;
    }

    fn enable_counter(&mut self, enabled: bool) {
        let slaves = {
            let mut regs = self.regs_mut();
            let rising = enabled && !regs.enabled;
            regs.enabled = enabled;
            if rising && regs.master == Some(MasterMode::Enable) {
                regs.slaves.clone()
            } else {
                Vec::new()
            }
        };
        for (trigger, slave) in slaves {
            let mut slave = slave.regs_mut();
            if slave.slave == Some(SlaveMode::Trigger(trigger)) {
                slave.enabled = true;
            }
        }
    }
}

impl SyncTimer for SimTimer {
    fn period(&self) -> u16 {
        self.regs().period
    }

    fn main_output_enabled(&self) -> bool {
        self.regs().moe
    }

    fn set_main_output(&mut self, enabled: bool) {
        self.regs_mut().moe = enabled;
    }

    fn master_mode(&self) -> MasterMode {
        self.regs().master.unwrap_or(MasterMode::Reset)
    }

    fn set_master_mode(&mut self, mode: MasterMode) {
        self.regs_mut().master = Some(mode);
    }

    fn slave_mode(&self) -> SlaveMode {
        self.regs().slave.unwrap_or(SlaveMode::Disabled)
    }

    fn set_slave_mode(&mut self, mode: SlaveMode) {
        self.regs_mut().slave = Some(mode);
    }

    fn alignment(&self) -> Alignment {
        if self.regs().center {
            Alignment::Center
        } else {
            Alignment::Edge
        }
    }

    fn set_alignment(&mut self, alignment: Alignment) {
        self.regs_mut().center = alignment == Alignment::Center;
    }

    fn direction(&self) -> CountDirection {
        if self.regs().down {
            CountDirection::Down
        } else {
            CountDirection::Up
        }
    }

    fn set_direction(&mut self, direction: CountDirection) {
        let mut regs = self.regs_mut();
        // Read-only while center aligned, like the hardware.
        if !regs.center {
            regs.down = direction == CountDirection::Down;
        }
    }
}

impl MotorTimer for SimTimer {
    fn set_compare(&mut self, timings: [u16; 3]) {
        self.regs_mut().compare = timings;
    }

    fn enable_channels(&mut self) {
        self.regs_mut().channels_enabled = true;
    }
}

#[derive(Debug, Default)]
pub struct BrakeRegs {
    pub period: u32,
    pub low_off: u32,
    pub high_on: u32,
    pub outputs: bool,
    pub writes: Vec<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub struct SimBrake(Rc<RefCell<BrakeRegs>>);

impl SimBrake {
    pub fn new(period: u32) -> Self {
        SimBrake(Rc::new(RefCell::new(BrakeRegs {
            period,
            ..Default::default()
        })))
    }

    pub fn regs(&self) -> Ref<'_, BrakeRegs> {
        self.0.borrow()
    }
}

impl BrakeTimer for SimBrake {
    fn period(&self) -> u32 {
        self.0.borrow().period
    }

    fn set_compare(&mut self, low_off: u32, high_on: u32) {
        let mut regs = self.0.borrow_mut();
        regs.low_off = low_off;
        regs.high_on = high_on;
        regs.writes.push((low_off, high_on));
    }

    fn enable_outputs(&mut self) {
        self.0.borrow_mut().outputs = true;
    }
}

#[derive(Debug)]
pub struct SimAdc {
    pub id: AdcId,
    pub injected: u16,
    pub regular: u16,
    pub started: bool,
}

impl SimAdc {
    pub fn new(id: AdcId) -> Self {
        Self {
            id,
            injected: 0,
            regular: 0,
            started: false,
        }
    }
}

impl SampleAdc for SimAdc {
    fn id(&self) -> AdcId {
        self.id
    }

    fn injected_value(&self, rank: u8) -> u16 {
        assert_eq!(rank, 1);
        self.injected
    }

    fn regular_value(&self) -> u16 {
        self.regular
    }

    fn start(&mut self) {
        self.started = true;
    }
}

#[derive(Debug, Default)]
pub struct SimScan {
    pub channels: Vec<AdcChannel>,
}

impl ScanAdc for SimScan {
    fn start_scan(&mut self, channels: &[AdcChannel]) {
        self.channels = channels.to_vec();
    }
}

#[derive(Debug, Default)]
pub struct SimCapture {
    pub enabled: Vec<usize>,
    pub pending: u8,
    pub captures: [u32; 4],
    pub levels: [bool; 4],
    pub now: u32,
}

impl SimCapture {
    pub fn edge(&mut self, channel: usize, high: bool, at: u32) {
        self.pending |= 1 << channel;
        self.captures[channel] = at;
        self.levels[channel] = high;
        self.now = at;
    }
}

impl CaptureTimer for SimCapture {
    fn enable_capture(&mut self, channel: usize) {
        self.enabled.push(channel);
    }

    fn take_pending(&mut self) -> u8 {
        core::mem::take(&mut self.pending)
    }

    fn capture(&self, channel: usize) -> u32 {
        self.captures[channel]
    }

    fn input_high(&self, channel: usize) -> bool {
        self.levels[channel]
    }

    fn now(&self) -> u32 {
        self.now
    }
}

pub type Drive = LowLevel<SimTimer, SimBrake, 2>;

pub const MIDSCALE: u16 = 2048;

/// Timer counts between an update event and the end of the conversion it
/// triggered: 27 ADC clocks at 21 MHz against a 56 MHz counter.
pub const CONVERSION_COUNTS: usize = 72;

/// ADC code of the bus voltage sense channel for `volts`.
pub fn vbus_code(volts: f32) -> u16 {
    let config = Config::DEFAULT;
    (volts / config.vbus_divider / config.adc.reference_voltage * config.adc.full_scale).round()
        as u16
}

/// ADC code of a phase current sense channel for `amps`, default shunt and
/// amplifier.
pub fn current_code(amps: f32) -> u16 {
    let config = Config::DEFAULT;
    let amps_per_code = config.adc.reference_voltage / config.adc.full_scale
        / config.current_sense.amplifier_gain
        * config.current_sense.shunt_conductance;
    (MIDSCALE as f32 + amps / amps_per_code).round() as u16
}

/// A drive with simulated peripherals, initialized but not started.
pub struct Rig {
    pub drive: Drive,
    pub timers: [SimTimer; 2],
    pub brake: SimBrake,
    pub adc1: SimAdc,
    pub adc2: SimAdc,
    pub adc3: SimAdc,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(Config::DEFAULT)
    }

    pub fn with_config(config: Config<2>) -> Self {
        let timers = [
            SimTimer::new(config.pwm.period),
            SimTimer::new(config.pwm.period),
        ];
        timers[0].connect(config.pwm.sync_trigger, &timers[1]);
        let brake = SimBrake::new(config.brake_resistor.period);

        let drive = LowLevel::new(config);
        drive
            .init(timers.clone(), brake.clone())
            .expect("init failed");

        Self {
            drive,
            timers,
            brake,
            adc1: SimAdc::new(AdcId::Adc1),
            adc2: SimAdc::new(AdcId::Adc2),
            adc3: SimAdc::new(AdcId::Adc3),
        }
    }

    pub fn start(&mut self) {
        let mut refbase = SimTimer::new(u16::MAX);
        let refbase: &mut dyn Timebase = &mut refbase;
        let mut adcs: [&mut dyn SampleAdc; 3] = [&mut self.adc1, &mut self.adc2, &mut self.adc3];
        self.drive
            .start_adc_pwm(&mut adcs, Some(refbase))
            .expect("start_adc_pwm failed");
    }

    pub fn set_vbus(&mut self, volts: f32) {
        self.adc1.injected = vbus_code(volts);
        self.drive.vbus_sense_adc_cb(&self.adc1, true);
    }

    /// Started, with a healthy bus.
    pub fn running() -> Self {
        let mut rig = Self::new();
        rig.start();
        rig.set_vbus(24.0);
        rig
    }

    /// Delivers the B and C conversions of `axis` for one half period.
    pub fn half_period(&mut self, axis: usize, counting_down: bool, code_b: u16, code_c: u16) {
        self.timers[axis].set_counting_down(counting_down);
        self.convert(axis, code_b, code_c);
    }

    /// Steps the counter of `axis` `counts` times. Each update event starts a
    /// conversion that completes `CONVERSION_COUNTS` later: midscale codes
    /// after the top of the count, `code_b` and `code_c` after the bottom.
    pub fn run(&mut self, axis: usize, counts: usize, code_b: u16, code_c: u16) {
        let mut pending: Option<(usize, bool)> = None;
        for tick in 0..counts {
            let (measurement, offset) = {
                let regs = self.timers[axis].regs();
                (regs.measurement_trigger(), regs.offset_trigger())
            };
            if measurement || offset {
                pending = Some((tick + CONVERSION_COUNTS, measurement));
            }
            match pending {
                Some((due, true)) if due == tick => {
                    pending = None;
                    self.convert(axis, code_b, code_c);
                }
                Some((due, false)) if due == tick => {
                    pending = None;
                    self.convert(axis, MIDSCALE, MIDSCALE);
                }
                _ => {}
            }
            self.timers[axis].regs_mut().step();
        }
    }

    fn convert(&mut self, axis: usize, code_b: u16, code_c: u16) {
        let injected = axis == 0;
        if injected {
            self.adc2.injected = code_b;
            self.adc3.injected = code_c;
        } else {
            self.adc2.regular = code_b;
            self.adc3.regular = code_c;
        }
        self.drive.pwm_trig_adc_cb(&self.adc2, injected);
        self.drive.pwm_trig_adc_cb(&self.adc3, injected);
    }

    /// One full PWM period of `axis` with zero offset and the given measured
    /// phase codes.
    pub fn period(&mut self, axis: usize, code_b: u16, code_c: u16) {
        self.half_period(axis, true, MIDSCALE, MIDSCALE);
        self.half_period(axis, false, code_b, code_c);
    }

    /// One full PWM period of `axis` with no current flowing.
    pub fn tick(&mut self, axis: usize) {
        self.period(axis, MIDSCALE, MIDSCALE);
    }

    pub fn armed(axis: usize) -> Self {
        let mut rig = Self::running();
        rig.drive.arm(axis).expect("arm failed");
        rig.tick(axis);
        rig
    }
}
