#![no_std]
#![no_main]
mod adc;
mod capture;
mod clock;
mod pwm;

use core::cell::RefCell;

use critical_section::Mutex;
use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::Config;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::InterruptExt;
use embassy_time::{Duration, Instant, Ticker, Timer};
use {defmt_rtt as _, panic_probe as _};

use low_level::adc::AdcId;
use low_level::config::Config as DriveConfig;
use low_level::hal::{SampleAdc, Timebase};
use low_level::units::Second;
use low_level::{AnalogMonitor, LowLevel};

use crate::adc::{ScanSequence, SenseAdc};
use crate::capture::PwmCapture;
use crate::pwm::{BrakePwm, MotorPwm};

type Drive = LowLevel<MotorPwm, BrakePwm, 2>;

/// 168 MHz / (2 * 3500 * 3): one center-aligned period every 125 us.
const MOTOR_TIMER_PRESCALER: u16 = 2;
const DEAD_TIME: u8 = 20;

static LOW_LEVEL: Drive = LowLevel::new(DriveConfig::DEFAULT);

static SENSE_ADCS: [SenseAdc; 3] = [
    SenseAdc::new(AdcId::Adc1),
    SenseAdc::new(AdcId::Adc2),
    SenseAdc::new(AdcId::Adc3),
];

static PWM_CAPTURE: Mutex<RefCell<Option<PwmCapture>>> = Mutex::new(RefCell::new(None));

/// Shared by the three converters. Phase B (ADC2) is handed over before
/// phase C (ADC3).
#[interrupt]
fn ADC() {
    // The conversion finishes well inside the half period it was triggered
    // in, so the handlers see the count direction of that half.
    let [adc1, adc2, adc3] = &SENSE_ADCS;
    if adc1.take_injected() {
        LOW_LEVEL.vbus_sense_adc_cb(adc1, true);
    }
    for adc in [adc2, adc3] {
        if adc.take_injected() {
            LOW_LEVEL.pwm_trig_adc_cb(adc, true);
        }
    }
    for adc in [adc2, adc3] {
        if adc.regular_pending() {
            LOW_LEVEL.pwm_trig_adc_cb(adc, false);
        }
    }
}

#[interrupt]
fn TIM5() {
    critical_section::with(|cs| {
        if let Some(capture) = PWM_CAPTURE.borrow(cs).borrow_mut().as_mut() {
            LOW_LEVEL.pwm_in_cb(capture);
        }
    });
}

#[embassy_executor::task]
async fn analog_task(monitor: AnalogMonitor<'static, MotorPwm, BrakePwm, 2>) {
    let wait = |period: Second| Timer::after_millis(period.as_millis() as u64);
    monitor.run(wait).await;
}

#[embassy_executor::task]
async fn general_purpose_adc_task(mut scan: ScanSequence) {
    let period = Duration::from_millis(LOW_LEVEL.config().analog_poll_ms as u64);
    let mut ticker = Ticker::every(period);
    loop {
        match scan.next_sequence().await {
            Ok(codes) => LOW_LEVEL.general_purpose_adc_cb(&codes),
            Err(_) => {
                warn!("general purpose adc overrun");
                scan.recover();
            }
        }
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn sample_rate_task(axis: usize) {
    let Some(samples) = LOW_LEVEL.current_sample(axis) else {
        error!("no current samples for axis {}", axis);
        return;
    };
    let mut count: usize = 0;
    let mut last_logged_at = Instant::now();
    loop {
        let sample = samples.wait().await;
        count += 1;
        if count.is_multiple_of(8_000) {
            let now = Instant::now();
            if let Some(dt) = now.checked_duration_since(last_logged_at) {
                log_samples(axis, &sample, &dt, count);
                count = 0;
                last_logged_at = now;
            }
        }
    }
}

fn log_samples(axis: usize, sample: &low_level::CurrentSample, dt: &Duration, count: usize) {
    let dt_seconds = (dt.as_micros() as f32) / 1e6;
    let freq = (count as f32) / dt_seconds;
    let status = LOW_LEVEL.status(axis);
    info!(
        "axis {}: ibus={}, vbus={}, {} Hz, {}",
        axis, sample.ibus, sample.vbus_voltage, freq, status
    );
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = Config::default();
    clock::set_clock(&mut config);
    let p = embassy_stm32::init(config);
    clock::print_clock_info(&p.RCC);

    let drive = LOW_LEVEL.config();

    let m0 = pwm::create_motor_timer(
        p.TIM1,
        p.PA8,
        p.PA9,
        p.PA10,
        p.PB13,
        p.PB14,
        p.PB15,
        drive.pwm.period,
        MOTOR_TIMER_PRESCALER,
        DEAD_TIME,
    );
    let m1 = pwm::create_motor_timer(
        p.TIM8,
        p.PC6,
        p.PC7,
        p.PC8,
        p.PA7,
        p.PB0,
        p.PB1,
        drive.pwm.period,
        MOTOR_TIMER_PRESCALER,
        DEAD_TIME,
    );
    let brake = pwm::create_brake_timer(p.TIM2, p.PB10, p.PB11, drive.brake_resistor.period);
    unwrap!(LOW_LEVEL.init([m0, m1], brake));

    adc::enable_clocks();
    adc::set_analog(drive.vbus_channel);
    for sense in &drive.phases {
        adc::set_analog(sense.phase_b);
        adc::set_analog(sense.phase_c);
    }
    for thermistor in drive.thermistors.iter().flatten() {
        adc::set_analog(thermistor.channel);
    }
    // The conversion finishes well inside the half period it was triggered
    // in, so the handlers see the count direction of that half.
    let [adc1, adc2, adc3] = &SENSE_ADCS;
    let [axis0, axis1] = &drive.phases;
    adc1.inject_on_tim1(drive.vbus_channel.index() as u8);
    adc2.inject_on_tim1(axis0.phase_b.index() as u8);
    adc3.inject_on_tim1(axis0.phase_c.index() as u8);
    adc2.regular_on_tim8(axis1.phase_b.index() as u8);
    adc3.regular_on_tim8(axis1.phase_c.index() as u8);

    interrupt::ADC.set_priority(interrupt::Priority::P0);
    interrupt::TIM5.set_priority(interrupt::Priority::P2);
    unsafe {
        interrupt::ADC.enable();
        interrupt::TIM5.enable();
    }

    let [mut a1, mut a2, mut a3] = SENSE_ADCS;
    let mut adcs: [&mut dyn SampleAdc; 3] = [&mut a1, &mut a2, &mut a3];
    let mut reference = pwm::ReferenceTimer::new(0);
    unwrap!(LOW_LEVEL.start_adc_pwm(&mut adcs, Some(&mut reference as &mut dyn Timebase)));

    let mut scan = ScanSequence::new(p.DMA2_CH0);
    unwrap!(LOW_LEVEL.start_general_purpose_adc(&mut scan));

    let mut capture = capture::create_capture_timer(p.TIM5, p.PA0, p.PA1, p.PA2, p.PA3);
    unwrap!(LOW_LEVEL.pwm_in_init(&mut capture));
    critical_section::with(|cs| PWM_CAPTURE.borrow(cs).replace(Some(capture)));

    let monitor = unwrap!(LOW_LEVEL.start_analog_thread());
    unwrap!(spawner.spawn(analog_task(monitor)));
    unwrap!(spawner.spawn(general_purpose_adc_task(scan)));
    unwrap!(spawner.spawn(sample_rate_task(0)));
    info!("drive started, motors disarmed");
}
