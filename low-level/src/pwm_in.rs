//! RC-style PWM input decoding.
//!
//! Each input measures the high time between a rising and the following falling
//! edge. Pulses outside the legal window are dropped, legal ones are clamped to
//! the full-scale range and mapped linearly onto the input's `[min, max]`.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::{PWM_INPUT_COUNT, PwmInputConfig};
use crate::hal::CaptureTimer;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Command {
    value: f32,
    /// Capture ticks of the falling edge.
    timestamp: u32,
}

#[derive(Debug, Clone, Copy)]
struct InputState {
    rising_edge: Option<u32>,
    command: Option<Command>,
}

impl InputState {
    const IDLE: Self = Self {
        rising_edge: None,
        command: None,
    };
}

pub struct PwmInputs {
    inputs: Mutex<RefCell<[InputState; PWM_INPUT_COUNT]>>,
}

impl Default for PwmInputs {
    fn default() -> Self {
        Self::new()
    }
}

impl PwmInputs {
    pub const fn new() -> Self {
        Self {
            inputs: Mutex::new(RefCell::new([InputState::IDLE; PWM_INPUT_COUNT])),
        }
    }

    pub fn reset(&self) {
        critical_section::with(|cs| {
            *self.inputs.borrow(cs).borrow_mut() = [InputState::IDLE; PWM_INPUT_COUNT];
        });
    }

    /// Capture interrupt body: consumes every pending edge of `timer`.
    pub fn on_capture<C: CaptureTimer + ?Sized>(&self, timer: &mut C, config: &PwmInputConfig) {
        let pending = timer.take_pending();
        for channel in 0..PWM_INPUT_COUNT {
            if pending & (1 << channel) == 0 {
                continue;
            }
            self.on_edge(
                channel,
                timer.input_high(channel),
                timer.capture(channel),
                config,
            );
        }
    }

    /// Feeds one captured edge of `input`.
    pub fn on_edge(&self, input: usize, rising: bool, timestamp: u32, config: &PwmInputConfig) {
        let Some(mapping) = config.mappings.get(input).copied().flatten() else {
            return;
        };
        critical_section::with(|cs| {
            let mut inputs = self.inputs.borrow(cs).borrow_mut();
            let state = &mut inputs[input];
            if rising {
                state.rising_edge = Some(timestamp);
                return;
            }
            let Some(rising_edge) = state.rising_edge.take() else {
                return;
            };
            let ticks = timestamp.wrapping_sub(rising_edge);
            if let Some(fraction) = pulse_fraction(ticks, config) {
                state.command = Some(Command {
                    value: mapping.min + fraction * (mapping.max - mapping.min),
                    timestamp,
                });
            }
        });
    }

    /// Latest mapped command of `input`, or `None` when no legal pulse ended
    /// within the timeout before `now` (capture ticks).
    pub fn command(&self, input: usize, now: u32, config: &PwmInputConfig) -> Option<f32> {
        let timeout = timeout_ticks(config);
        critical_section::with(|cs| {
            let inputs = self.inputs.borrow(cs).borrow();
            let command = inputs.get(input)?.command?;
            (now.wrapping_sub(command.timestamp) <= timeout).then_some(command.value)
        })
    }
}

fn ticks_per_us(config: &PwmInputConfig) -> u32 {
    config.timer_clock_hz / 1_000_000
}

fn timeout_ticks(config: &PwmInputConfig) -> u32 {
    config
        .timeout_ms
        .saturating_mul(config.timer_clock_hz / 1000)
}

/// Position of a pulse inside the full-scale range, `None` for illegal widths.
fn pulse_fraction(ticks: u32, config: &PwmInputConfig) -> Option<f32> {
    let high_us = ticks / ticks_per_us(config);
    if high_us < config.legal_min_us || high_us > config.legal_max_us {
        return None;
    }
    let high_us = high_us.clamp(config.min_high_us, config.max_high_us);
    let span = (config.max_high_us - config.min_high_us) as f32;
    Some((high_us - config.min_high_us) as f32 / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PwmMapping};

    const TICKS_PER_US: u32 = 84;

    fn config() -> PwmInputConfig {
        let mut config = Config::DEFAULT.pwm_input;
        config.mappings[0] = Some(PwmMapping {
            min: -10.0,
            max: 10.0,
        });
        config.mappings[2] = Some(PwmMapping { min: 0.0, max: 1.0 });
        config
    }

    fn pulse(inputs: &PwmInputs, input: usize, start: u32, width_us: u32) -> u32 {
        let config = config();
        let end = start.wrapping_add(width_us * TICKS_PER_US);
        inputs.on_edge(input, true, start, &config);
        inputs.on_edge(input, false, end, &config);
        end
    }

    #[test]
    fn test_mapping() {
        let inputs = PwmInputs::new();
        let config = config();

        let end = pulse(&inputs, 0, 1000, 1500);
        assert_eq!(inputs.command(0, end, &config), Some(0.0));

        let end = pulse(&inputs, 0, end, 2000);
        assert_eq!(inputs.command(0, end, &config), Some(10.0));

        let end = pulse(&inputs, 2, 0, 1250);
        assert_eq!(inputs.command(2, end, &config), Some(0.25));
    }

    #[test]
    fn test_clamps_legal_pulses() {
        let inputs = PwmInputs::new();
        let config = config();
        let end = pulse(&inputs, 0, 0, 2400);
        assert_eq!(inputs.command(0, end, &config), Some(10.0));
        let end = pulse(&inputs, 0, end, 600);
        assert_eq!(inputs.command(0, end, &config), Some(-10.0));
    }

    #[test]
    fn test_ignores_illegal_pulses() {
        let inputs = PwmInputs::new();
        let config = config();
        let end = pulse(&inputs, 0, 0, 1500);
        let _ = pulse(&inputs, 0, end, 3000);
        let late = pulse(&inputs, 0, end, 100);
        assert_eq!(
            inputs.command(0, late, &config),
            Some(0.0),
            "illegal pulse replaced the command"
        );
    }

    #[test]
    fn test_falling_edge_without_rising() {
        let inputs = PwmInputs::new();
        let config = config();
        inputs.on_edge(0, false, 5000, &config);
        assert_eq!(inputs.command(0, 5000, &config), None);
    }

    #[test]
    fn test_unmapped_input() {
        let inputs = PwmInputs::new();
        let config = config();
        let end = pulse(&inputs, 1, 0, 1500);
        assert_eq!(inputs.command(1, end, &config), None);
        assert_eq!(inputs.command(7, end, &config), None);
    }

    #[test]
    fn test_timeout() {
        let inputs = PwmInputs::new();
        let config = config();
        let end = pulse(&inputs, 0, 0, 1500);
        let timeout = 100 * 84_000;
        assert!(inputs.command(0, end + timeout, &config).is_some());
        assert_eq!(inputs.command(0, end + timeout + 1, &config), None);
    }

    #[test]
    fn test_counter_wrap() {
        let inputs = PwmInputs::new();
        let config = config();
        let end = pulse(&inputs, 0, u32::MAX - 10_000, 2000);
        assert!(end < 1_000_000, "pulse did not wrap");
        assert_eq!(inputs.command(0, end, &config), Some(10.0));
    }
}
