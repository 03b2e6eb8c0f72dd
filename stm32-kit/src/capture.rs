use embassy_stm32::Peri;
use embassy_stm32::gpio::Pull;
use embassy_stm32::pac;
use embassy_stm32::pac::timer::vals;
use embassy_stm32::peripherals::TIM5;
use embassy_stm32::timer::input_capture::CapturePin;
use embassy_stm32::timer::{Channel1Pin, Channel2Pin, Channel3Pin, Channel4Pin, low_level};

use low_level::config::PWM_INPUT_COUNT;
use low_level::hal::CaptureTimer;

/// RC PWM inputs on TIM5 CH1..CH4 (PA0..PA3), capturing both edges on the
/// free-running 32-bit counter.
pub struct PwmCapture {
    regs: pac::timer::TimGp32,
}

pub fn create_capture_timer<T1, T2, T3, T4>(
    p_timer: Peri<'static, TIM5>,
    p1: Peri<'static, T1>,
    p2: Peri<'static, T2>,
    p3: Peri<'static, T3>,
    p4: Peri<'static, T4>,
) -> PwmCapture
where
    T1: Channel1Pin<TIM5>,
    T2: Channel2Pin<TIM5>,
    T3: Channel3Pin<TIM5>,
    T4: Channel4Pin<TIM5>,
{
    let _pin1 = CapturePin::new_ch1(p1, Pull::Down);
    let _pin2 = CapturePin::new_ch2(p2, Pull::Down);
    let _pin3 = CapturePin::new_ch3(p3, Pull::Down);
    let _pin4 = CapturePin::new_ch4(p4, Pull::Down);

    let timer = low_level::Timer::new(p_timer);
    let regs = pac::TIM5;
    regs.psc().write(|w| w.set_psc(0));
    regs.arr().write(|w| w.set_arr(u32::MAX));
    regs.egr().write(|w| w.set_ug(true));
    regs.cr1().modify(|w| w.set_cen(true));

    core::mem::forget(timer);
    PwmCapture { regs }
}

impl CaptureTimer for PwmCapture {
    fn enable_capture(&mut self, channel: usize) {
        let regs = self.regs;
        regs.ccmr_input(channel / 2).modify(|w| {
            // normal mapping, ICx on TIx
            w.set_ccs(channel % 2, vals::CcmrInputCcs::TI4);
            w.set_icf(channel % 2, vals::FilterValue::FDTS_DIV32_N8);
        });
        regs.ccer().modify(|w| {
            w.set_ccp(channel, true);
            w.set_ccnp(channel, true);
            w.set_cce(channel, true);
        });
        regs.dier().modify(|w| w.set_ccie(channel, true));
    }

    fn take_pending(&mut self) -> u8 {
        let sr = self.regs.sr().read();
        let mut pending = 0;
        for channel in 0..PWM_INPUT_COUNT {
            if sr.ccif(channel) {
                pending |= 1 << channel;
            }
        }
        // rc_w0: writing ones leaves the other flags untouched
        self.regs.sr().write(|w| {
            w.0 = !0;
            for channel in 0..PWM_INPUT_COUNT {
                if pending & (1 << channel) != 0 {
                    w.set_ccif(channel, false);
                }
            }
        });
        pending
    }

    fn capture(&self, channel: usize) -> u32 {
        self.regs.ccr(channel).read().ccr()
    }

    fn input_high(&self, channel: usize) -> bool {
        pac::GPIOA.idr().read().idr(channel) == pac::gpio::vals::Idr::HIGH
    }

    fn now(&self) -> u32 {
        self.regs.cnt().read().cnt()
    }
}
