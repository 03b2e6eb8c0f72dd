use embassy_stm32::Peri;
use embassy_stm32::adc::RxDma;
use embassy_stm32::dma;
use embassy_stm32::pac;
use embassy_stm32::pac::adc::vals;
use embassy_stm32::peripherals::ADC1;

use low_level::adc::AdcId;
use low_level::{ADC_CHANNEL_COUNT, AdcChannel};
use low_level::hal::{SampleAdc, ScanAdc};

pub const DMA_BUFFER_SIZE: usize = 2 * ADC_CHANNEL_COUNT;

// RM0090 trigger selections. Both motor timers put their update event on
// TRGO, which pulses at the top and at the bottom of the center-aligned count.
const JEXTSEL_TIM1_TRGO: u8 = 0b0001;
const EXTSEL_TIM8_TRGO: u8 = 0b1110;

/// One converter of the PWM-synchronized sampling paths.
#[derive(Clone, Copy)]
pub struct SenseAdc {
    id: AdcId,
    regs: pac::adc::Adc,
}

impl SenseAdc {
    pub const fn new(id: AdcId) -> Self {
        let regs = match id {
            AdcId::Adc1 => pac::ADC1,
            AdcId::Adc2 => pac::ADC2,
            AdcId::Adc3 => pac::ADC3,
        };
        Self { id, regs }
    }

    /// Single-channel injected sequence converted on every TIM1 update.
    pub fn inject_on_tim1(&self, channel: u8) {
        let adc = self.regs;
        set_sample_time(adc, channel, vals::SampleTime::CYCLES15);
        adc.jsqr().modify(|w| {
            w.set_jl(0); // = 1 channel, converted from JSQ4
            w.set_jsq(3, channel);
        });
        adc.cr2().modify(|w| {
            w.set_jexten(vals::Jexten::RISING_EDGE);
            w.set_jextsel(JEXTSEL_TIM1_TRGO);
        });
        adc.cr1().modify(|w| w.set_jeocie(true));
    }

    /// Single-channel regular sequence converted on every TIM8 update.
    pub fn regular_on_tim8(&self, channel: u8) {
        let adc = self.regs;
        set_sample_time(adc, channel, vals::SampleTime::CYCLES15);
        adc.sqr1().modify(|w| w.set_l(0));
        adc.sqr3().modify(|w| w.set_sq(0, channel));
        adc.cr2().modify(|w| {
            w.set_exten(vals::Exten::RISING_EDGE);
            w.set_extsel(EXTSEL_TIM8_TRGO);
            w.set_eocs(vals::Eocs::EACH_CONVERSION);
        });
        adc.cr1().modify(|w| w.set_eocie(true));
    }

    /// Injected conversion finished, flag cleared.
    pub fn take_injected(&self) -> bool {
        let done = self.regs.sr().read().jeoc();
        if done {
            self.regs.sr().modify(|w| w.set_jeoc(false));
        }
        done
    }

    /// Regular conversion finished. Reading the data register clears it.
    pub fn regular_pending(&self) -> bool {
        self.regs.sr().read().eoc()
    }
}

impl SampleAdc for SenseAdc {
    fn id(&self) -> AdcId {
        self.id
    }

    fn injected_value(&self, rank: u8) -> u16 {
        self.regs.jdr(usize::from(rank.saturating_sub(1))).read().jdata()
    }

    fn regular_value(&self) -> u16 {
        self.regs.dr().read().data()
    }

    fn start(&mut self) {
        self.regs.cr2().modify(|w| w.set_adon(true));
    }
}

/// Puts the pin behind `channel` in analog mode.
pub fn set_analog(channel: AdcChannel) {
    let (port, pin) = match channel.index() {
        index @ 0..8 => (pac::GPIOA, index),
        index @ 8..10 => (pac::GPIOB, index - 8),
        index => (pac::GPIOC, index - 10),
    };
    port.moder().modify(|w| w.set_moder(pin, pac::gpio::vals::Moder::ANALOG));
}

// SMPR2 holds channels 0..9, SMPR1 channels 10..18
fn set_sample_time(adc: pac::adc::Adc, channel: u8, time: vals::SampleTime) {
    let channel = channel as usize;
    if channel < 10 {
        adc.smpr2().modify(|w| w.set_smp(channel, time));
    } else {
        adc.smpr1().modify(|w| w.set_smp(channel - 10, time));
    }
}

/// Powers the converters with the shared prescaler. ADC clock = 84 MHz / 4.
pub fn enable_clocks() {
    pac::RCC.apb2enr().modify(|w| {
        w.set_adc1en(true);
        w.set_adc2en(true);
        w.set_adc3en(true);
    });
    pac::ADC123_COMMON
        .ccr()
        .modify(|w| w.set_adcpre(vals::Adcpre::DIV4));
}

/// Software-started scan of the general-purpose channels on ADC1's regular
/// group, drained by DMA.
pub struct ScanSequence {
    regs: pac::adc::Adc,
    dma_buffer: dma::ReadableRingBuffer<'static, u16>,
    channels: [u8; ADC_CHANNEL_COUNT],
    len: usize,
}

impl ScanSequence {
    pub fn new<Tdma>(p_dma: Peri<'static, Tdma>) -> Self
    where
        Tdma: dma::Channel + RxDma<ADC1>,
    {
        let dma_buffer: &mut [u16; DMA_BUFFER_SIZE] =
            cortex_m::singleton!(: [u16; DMA_BUFFER_SIZE] = [0u16; DMA_BUFFER_SIZE]).unwrap();
        let request = p_dma.request();
        let mut dma_opts = dma::TransferOptions::default();
        dma_opts.half_transfer_ir = true;
        dma_opts.complete_transfer_ir = true;

        let regs = pac::ADC1;
        let peri_addr = regs.dr().as_ptr() as *mut u16;
        let dma_buffer = unsafe {
            dma::ReadableRingBuffer::new(p_dma, request, peri_addr, dma_buffer, dma_opts)
        };

        Self {
            regs,
            dma_buffer,
            channels: [0; ADC_CHANNEL_COUNT],
            len: 0,
        }
    }

    /// Converts every scanned channel once and returns the codes indexed by
    /// channel. Unscanned channels read 0.
    pub async fn next_sequence(&mut self) -> Result<[u16; ADC_CHANNEL_COUNT], dma::ringbuffer::Error> {
        let mut samples = [0u16; ADC_CHANNEL_COUNT];
        if self.len == 0 {
            return Ok(samples);
        }
        self.regs.cr2().modify(|w| w.set_swstart(true));
        self.dma_buffer.read_exact(&mut samples[..self.len]).await?;

        let mut codes = [0u16; ADC_CHANNEL_COUNT];
        for (&channel, &code) in self.channels[..self.len].iter().zip(samples.iter()) {
            codes[channel as usize] = code;
        }
        Ok(codes)
    }

    /// Drops whatever the ring holds and restarts the transfer after an overrun.
    pub fn recover(&mut self) {
        self.dma_buffer.clear();
        self.dma_buffer.start();
    }
}

impl ScanAdc for ScanSequence {
    fn start_scan(&mut self, channels: &[AdcChannel]) {
        let adc = self.regs;
        self.len = channels.len().min(ADC_CHANNEL_COUNT);
        for (slot, channel) in self.channels.iter_mut().zip(channels) {
            *slot = channel.index() as u8;
        }

        for &channel in &self.channels[..self.len] {
            set_sample_time(adc, channel, vals::SampleTime::CYCLES144);
        }

        // SQ1..SQ6 in SQR3, SQ7..SQ12 in SQR2, SQ13..SQ16 in SQR1
        for (rank, &channel) in self.channels[..self.len].iter().enumerate() {
            match rank {
                0..6 => adc.sqr3().modify(|w| w.set_sq(rank, channel)),
                6..12 => adc.sqr2().modify(|w| w.set_sq(rank - 6, channel)),
                _ => adc.sqr1().modify(|w| w.set_sq(rank - 12, channel)),
            }
        }
        adc.sqr1().modify(|w| w.set_l(self.len.saturating_sub(1) as u8));

        adc.cr1().modify(|w| w.set_scan(true));
        adc.cr2().modify(|w| {
            w.set_cont(false);
            w.set_dma(true);
            w.set_dds(vals::Dds::CONTINUOUS);
            w.set_eocs(vals::Eocs::EACH_SEQUENCE);
            w.set_exten(vals::Exten::DISABLED);
            w.set_adon(true);
        });
        self.dma_buffer.start();
    }
}
