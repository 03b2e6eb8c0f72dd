use embassy_stm32::Peri;
use embassy_stm32::gpio::OutputType;
use embassy_stm32::pac;
use embassy_stm32::pac::timer::vals;
use embassy_stm32::peripherals::TIM2;
use embassy_stm32::timer::complementary_pwm::ComplementaryPwmPin;
use embassy_stm32::timer::{
    AdvancedInstance4Channel, Channel, Channel1ComplementaryPin, Channel1Pin,
    Channel2ComplementaryPin, Channel2Pin, Channel3ComplementaryPin, Channel3Pin, Channel4Pin,
    low_level, simple_pwm::PwmPin,
};

use low_level::hal::{
    Alignment, BrakeTimer, CountDirection, InternalTrigger, MasterMode, MotorTimer, SlaveMode,
    SyncTimer, Timebase,
};

const PHASES: [Channel; 3] = [Channel::Ch1, Channel::Ch2, Channel::Ch3];

/// Three-phase bridge timer (TIM1 or TIM8), driven through its registers once
/// configured.
///
/// The phases run in PWM mode 2 so the high sides conduct around the top of
/// the count: the top half is the zero vector with no current through the
/// low-side shunts, the bottom half the one the currents are measured in.
/// A timing is the high-side on time in counts and is written as
/// `period - timing`.
pub struct MotorPwm {
    regs: pac::timer::TimAdv,
}

/// Configures an advanced timer for center-aligned complementary PWM with
/// `period` counts and a dead time of `dead_time` timer clocks.
#[allow(clippy::too_many_arguments)]
pub fn create_motor_timer<TIM, T1, T2, T3, N1, N2, N3>(
    p_timer: Peri<'static, TIM>,
    p1: Peri<'static, T1>,
    p2: Peri<'static, T2>,
    p3: Peri<'static, T3>,
    n1: Peri<'static, N1>,
    n2: Peri<'static, N2>,
    n3: Peri<'static, N3>,
    period: u16,
    prescaler: u16,
    dead_time: u8,
) -> MotorPwm
where
    TIM: AdvancedInstance4Channel,
    T1: Channel1Pin<TIM>,
    T2: Channel2Pin<TIM>,
    T3: Channel3Pin<TIM>,
    N1: Channel1ComplementaryPin<TIM>,
    N2: Channel2ComplementaryPin<TIM>,
    N3: Channel3ComplementaryPin<TIM>,
{
    let _pin1 = PwmPin::new_ch1(p1, OutputType::PushPull);
    let _pin2 = PwmPin::new_ch2(p2, OutputType::PushPull);
    let _pin3 = PwmPin::new_ch3(p3, OutputType::PushPull);
    let _npin1 = ComplementaryPwmPin::new_ch1(n1, OutputType::PushPull);
    let _npin2 = ComplementaryPwmPin::new_ch2(n2, OutputType::PushPull);
    let _npin3 = ComplementaryPwmPin::new_ch3(n3, OutputType::PushPull);

    let timer = low_level::Timer::new(p_timer);
    timer.set_counting_mode(low_level::CountingMode::CenterAlignedUpInterrupts);
    timer.set_dead_time_value(dead_time);

    PHASES.iter().for_each(|&ch| {
        timer.set_output_compare_mode(ch, low_level::OutputCompareMode::PwmMode2);
        timer.set_output_compare_preload(ch, true);
    });

    let regs = timer.regs_advanced();
    regs.psc().write(|w| w.set_psc(prescaler));
    regs.arr().write(|w| w.set_arr(period));
    regs.egr().write(|w| w.set_ug(true));

    // Runs for the life of the firmware; dropping it would gate its clock.
    core::mem::forget(timer);
    MotorPwm { regs }
}

fn to_ts(trigger: InternalTrigger) -> vals::Ts {
    match trigger {
        InternalTrigger::Itr0 => vals::Ts::ITR0,
        InternalTrigger::Itr1 => vals::Ts::ITR1,
        InternalTrigger::Itr2 => vals::Ts::ITR2,
        InternalTrigger::Itr3 => vals::Ts::ITR3,
    }
}

fn from_ts(ts: vals::Ts) -> Option<InternalTrigger> {
    match ts {
        vals::Ts::ITR0 => Some(InternalTrigger::Itr0),
        vals::Ts::ITR1 => Some(InternalTrigger::Itr1),
        vals::Ts::ITR2 => Some(InternalTrigger::Itr2),
        vals::Ts::ITR3 => Some(InternalTrigger::Itr3),
        _ => None,
    }
}

impl Timebase for MotorPwm {
    fn counter(&self) -> u16 {
        self.regs.cnt().read().cnt()
    }

    fn set_counter(&mut self, value: u16) {
        self.regs.cnt().write(|w| w.set_cnt(value));
    }

    fn enable_counter(&mut self, enabled: bool) {
        self.regs.cr1().modify(|w| w.set_cen(enabled));
    }
}

impl SyncTimer for MotorPwm {
    fn period(&self) -> u16 {
        self.regs.arr().read().arr()
    }

    fn main_output_enabled(&self) -> bool {
        self.regs.bdtr().read().moe()
    }

    fn set_main_output(&mut self, enabled: bool) {
        self.regs.bdtr().modify(|w| w.set_moe(enabled));
    }

    fn master_mode(&self) -> MasterMode {
        match self.regs.cr2().read().mms() {
            vals::Mms::ENABLE => MasterMode::Enable,
            vals::Mms::UPDATE => MasterMode::Update,
            _ => MasterMode::Reset,
        }
    }

    fn set_master_mode(&mut self, mode: MasterMode) {
        let mms = match mode {
            MasterMode::Reset => vals::Mms::RESET,
            MasterMode::Enable => vals::Mms::ENABLE,
            MasterMode::Update => vals::Mms::UPDATE,
        };
        self.regs.cr2().modify(|w| w.set_mms(mms));
    }

    fn slave_mode(&self) -> SlaveMode {
        let smcr = self.regs.smcr().read();
        match (smcr.sms(), from_ts(smcr.ts())) {
            (vals::Sms::TRIGGER_MODE, Some(trigger)) => SlaveMode::Trigger(trigger),
            _ => SlaveMode::Disabled,
        }
    }

    fn set_slave_mode(&mut self, mode: SlaveMode) {
        self.regs.smcr().modify(|w| match mode {
            SlaveMode::Disabled => w.set_sms(vals::Sms::DISABLED),
            SlaveMode::Trigger(trigger) => {
                w.set_ts(to_ts(trigger));
                w.set_sms(vals::Sms::TRIGGER_MODE);
            }
        });
    }

    fn alignment(&self) -> Alignment {
        match self.regs.cr1().read().cms() {
            vals::Cms::EDGE_ALIGNED => Alignment::Edge,
            _ => Alignment::Center,
        }
    }

    fn set_alignment(&mut self, alignment: Alignment) {
        let cms = match alignment {
            Alignment::Edge => vals::Cms::EDGE_ALIGNED,
            Alignment::Center => vals::Cms::CENTER_ALIGNED2,
        };
        self.regs.cr1().modify(|w| w.set_cms(cms));
    }

    fn direction(&self) -> CountDirection {
        match self.regs.cr1().read().dir() {
            vals::Dir::DOWN => CountDirection::Down,
            _ => CountDirection::Up,
        }
    }

    fn set_direction(&mut self, direction: CountDirection) {
        let dir = match direction {
            CountDirection::Up => vals::Dir::UP,
            CountDirection::Down => vals::Dir::DOWN,
        };
        self.regs.cr1().modify(|w| w.set_dir(dir));
    }
}

impl MotorTimer for MotorPwm {
    fn set_compare(&mut self, timings: [u16; 3]) {
        let period = self.period();
        for (n, timing) in timings.into_iter().enumerate() {
            self.regs
                .ccr(n)
                .write(|w| w.set_ccr(period.saturating_sub(timing)));
        }
    }

    fn enable_channels(&mut self) {
        self.regs.ccer().modify(|w| {
            for n in 0..3 {
                w.set_cce(n, true);
                w.set_ccne(n, true);
            }
        });
    }
}

/// Brake resistor half bridge on TIM2: CH3 drives the low side while the
/// counter is below `low_off`, CH4 the high side while it is above `high_on`.
pub struct BrakePwm {
    regs: pac::timer::TimGp32,
}

pub fn create_brake_timer<T3, T4>(
    p_timer: Peri<'static, TIM2>,
    low: Peri<'static, T3>,
    high: Peri<'static, T4>,
    period: u32,
) -> BrakePwm
where
    T3: Channel3Pin<TIM2>,
    T4: Channel4Pin<TIM2>,
{
    let _low = PwmPin::new_ch3(low, OutputType::PushPull);
    let _high = PwmPin::new_ch4(high, OutputType::PushPull);

    let timer = low_level::Timer::new(p_timer);
    timer.set_counting_mode(low_level::CountingMode::CenterAlignedUpInterrupts);
    timer.set_output_compare_mode(Channel::Ch3, low_level::OutputCompareMode::PwmMode1);
    timer.set_output_compare_mode(Channel::Ch4, low_level::OutputCompareMode::PwmMode2);
    timer.set_output_compare_preload(Channel::Ch3, true);
    timer.set_output_compare_preload(Channel::Ch4, true);

    let regs = pac::TIM2;
    regs.arr().write(|w| w.set_arr(period));
    regs.egr().write(|w| w.set_ug(true));

    core::mem::forget(timer);
    BrakePwm { regs }
}

impl BrakeTimer for BrakePwm {
    fn period(&self) -> u32 {
        self.regs.arr().read().arr()
    }

    fn set_compare(&mut self, low_off: u32, high_on: u32) {
        self.regs.ccr(2).write(|w| w.set_ccr(low_off));
        self.regs.ccr(3).write(|w| w.set_ccr(high_on));
    }

    fn enable_outputs(&mut self) {
        self.regs.ccer().modify(|w| {
            w.set_cce(2, true);
            w.set_cce(3, true);
        });
        self.regs.cr1().modify(|w| w.set_cen(true));
    }
}

/// Free-running timebase started in phase with axis 0 (TIM13).
pub struct ReferenceTimer {
    regs: pac::timer::Tim1ch,
}

impl ReferenceTimer {
    pub fn new(prescaler: u16) -> Self {
        let regs = pac::TIM13;
        pac::RCC.apb1enr().modify(|w| w.set_tim13en(true));
        regs.psc().write(|w| w.set_psc(prescaler));
        regs.arr().write(|w| w.set_arr(u16::MAX));
        regs.egr().write(|w| w.set_ug(true));
        Self { regs }
    }
}

impl Timebase for ReferenceTimer {
    fn counter(&self) -> u16 {
        self.regs.cnt().read().cnt()
    }

    fn set_counter(&mut self, value: u16) {
        self.regs.cnt().write(|w| w.set_cnt(value));
    }

    fn enable_counter(&mut self, enabled: bool) {
        self.regs.cr1().modify(|w| w.set_cen(enabled));
    }
}
