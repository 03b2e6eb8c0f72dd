use defmt::*;
use embassy_stm32::time::Hertz;
use embassy_stm32::{Config, rcc};

pub fn set_clock(config: &mut Config) {
    let mut rcc_config = rcc::Config::default();
    rcc_config.hse = Some(rcc::Hse {
        freq: Hertz(8_000_000),
        mode: rcc::HseMode::Oscillator,
    });
    rcc_config.pll_src = rcc::PllSource::HSE;
    rcc_config.pll = Some(rcc::Pll {
        prediv: rcc::PllPreDiv::DIV8,        // 1 MHz
        mul: rcc::PllMul::MUL336,            // 336 MHz for PLL
        divp: Some(rcc::PllPDiv::DIV2),      // 168 MHz for CPU
        divq: Some(rcc::PllQDiv::DIV7),      // 48 MHz for USB
        divr: None,
    });
    rcc_config.sys = rcc::Sysclk::PLL1_P;
    rcc_config.ahb_pre = rcc::AHBPrescaler::DIV1; // 168 MHz for AHB
    rcc_config.apb1_pre = rcc::APBPrescaler::DIV4; // 42 MHz, 84 MHz timer clock (TIM2/5/13)
    rcc_config.apb2_pre = rcc::APBPrescaler::DIV2; // 84 MHz, 168 MHz timer clock (TIM1/8)

    config.rcc = rcc_config;
}

pub fn print_clock_info(p_rcc: &embassy_stm32::Peri<'static, embassy_stm32::peripherals::RCC>) {
    let clocks = rcc::clocks(p_rcc);
    info!("Clocks: {:?}", clocks);
}
