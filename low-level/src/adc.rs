//! Calibrated ADC reader: pin-to-channel mapping, channel routes and code-to-volt
//! conversion.
//!
//! The mapping follows the STM32F4 analog pinout: PA0..PA7 are channels 0..7,
//! PB0/PB1 are 8/9 and PC0..PC5 are 10..15. Every channel is serviced by exactly
//! one ADC and conversion group, listed in [`ROUTES`].

use crate::ADC_CHANNEL_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A,
    B,
    C,
    D,
}

/// Physical pin identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gpio {
    pub port: Port,
    pub pin: u8,
}

impl Gpio {
    pub const fn new(port: Port, pin: u8) -> Self {
        Self { port, pin }
    }
}

/// ADC channel index, always below [`ADC_CHANNEL_COUNT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcChannel(u8);

impl AdcChannel {
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < ADC_CHANNEL_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Only for indices known to be in range at compile time.
    pub(crate) const fn at(index: u8) -> Self {
        assert!((index as usize) < ADC_CHANNEL_COUNT);
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcId {
    Adc1,
    Adc2,
    Adc3,
}

/// Regular conversions run in sequence; injected conversions pre-empt them and
/// are triggered by the PWM timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConversionGroup {
    Regular,
    Injected,
}

impl ConversionGroup {
    pub const fn from_injected(injected: bool) -> Self {
        if injected {
            ConversionGroup::Injected
        } else {
            ConversionGroup::Regular
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcRoute {
    pub adc: AdcId,
    pub group: ConversionGroup,
}

const fn route(adc: AdcId, group: ConversionGroup) -> AdcRoute {
    AdcRoute { adc, group }
}

/// Conversion path per channel. ADC1 scans everything not claimed by the
/// PWM-synchronized paths: bus voltage on channel 6 (ADC1 injected), axis 0
/// phase currents on 10/11 (ADC2/ADC3 injected) and axis 1 on 13/12 (ADC2/ADC3
/// regular, triggered by the second timer).
pub const ROUTES: [AdcRoute; ADC_CHANNEL_COUNT] = {
    use AdcId::*;
    use ConversionGroup::*;
    let mut table = [route(Adc1, Regular); ADC_CHANNEL_COUNT];
    table[6] = route(Adc1, Injected);
    table[10] = route(Adc2, Injected);
    table[11] = route(Adc3, Injected);
    table[12] = route(Adc3, Regular);
    table[13] = route(Adc2, Regular);
    table
};

/// `None` when the pin has no analog function.
pub const fn channel_from_gpio(gpio: Gpio) -> Option<AdcChannel> {
    let index = match (gpio.port, gpio.pin) {
        (Port::A, pin @ 0..=7) => pin,
        (Port::B, pin @ 0..=1) => pin + 8,
        (Port::C, pin @ 0..=5) => pin + 10,
        _ => return None,
    };
    AdcChannel::new(index)
}

pub const fn route_for_channel(channel: AdcChannel) -> AdcRoute {
    ROUTES[channel.index()]
}

/// Full-scale code and reference voltage shared by every conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcCalibration {
    pub full_scale: f32,
    pub reference_voltage: f32,
}

impl AdcCalibration {
    pub const DEFAULT: Self = Self {
        full_scale: (1 << 12) as f32,
        reference_voltage: 3.3,
    };

    #[inline(always)]
    pub fn voltage(&self, code: u16) -> f32 {
        code as f32 / self.full_scale * self.reference_voltage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_a_pins() {
        for pin in 0..8 {
            let channel = channel_from_gpio(Gpio::new(Port::A, pin));
            assert_eq!(channel.map(AdcChannel::index), Some(pin as usize));
        }
    }

    #[test]
    fn test_port_b_and_c_pins() {
        assert_eq!(
            channel_from_gpio(Gpio::new(Port::B, 1)),
            AdcChannel::new(9)
        );
        assert_eq!(
            channel_from_gpio(Gpio::new(Port::C, 0)),
            AdcChannel::new(10)
        );
        assert_eq!(
            channel_from_gpio(Gpio::new(Port::C, 5)),
            AdcChannel::new(15)
        );
    }

    #[test]
    fn test_non_analog_pins() {
        assert_eq!(channel_from_gpio(Gpio::new(Port::A, 8)), None);
        assert_eq!(channel_from_gpio(Gpio::new(Port::B, 2)), None);
        assert_eq!(channel_from_gpio(Gpio::new(Port::C, 6)), None);
        assert_eq!(channel_from_gpio(Gpio::new(Port::D, 0)), None);
    }

    #[test]
    fn test_channel_range() {
        assert!(AdcChannel::new(15).is_some());
        assert!(AdcChannel::new(16).is_none());
    }

    #[test]
    fn test_routes() {
        let vbus = route_for_channel(AdcChannel::at(6));
        assert_eq!(vbus.adc, AdcId::Adc1);
        assert_eq!(vbus.group, ConversionGroup::Injected);

        let m1_phase_b = route_for_channel(AdcChannel::at(13));
        assert_eq!(m1_phase_b.adc, AdcId::Adc2);
        assert_eq!(m1_phase_b.group, ConversionGroup::Regular);

        let aux = route_for_channel(AdcChannel::at(4));
        assert_eq!(aux.adc, AdcId::Adc1);
        assert_eq!(aux.group, ConversionGroup::Regular);
    }

    #[test]
    fn test_voltage_endpoints() {
        let cal = AdcCalibration::DEFAULT;
        assert_eq!(cal.voltage(0), 0.0);
        assert_eq!(cal.voltage(4096), cal.reference_voltage);
    }

    #[test]
    fn test_voltage_linear() {
        let cal = AdcCalibration::DEFAULT;
        let step = cal.voltage(1);
        for code in [1u16, 100, 1000, 2048, 4095] {
            let v = cal.voltage(code);
            let expected = step * code as f32;
            assert!(
                (v - expected).abs() < 1e-5,
                "code {code}: {v} != {expected}"
            );
        }
        assert!((cal.voltage(2048) - cal.reference_voltage / 2.0).abs() < 1e-6);
    }
}
