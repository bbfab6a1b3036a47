//! Noise channel: LFSR-driven pseudo-random output

use crate::apu::components::{Envelope, LengthCounter};
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct NoiseChannel {
    enabled: bool,
    lfsr: u16,
    short_mode: bool,
    clock_shift: u8,
    divisor_code: u8,
    frequency_timer: u32,
    length: LengthCounter,
    envelope: Envelope,
}

impl NoiseChannel {
    pub fn new() -> Self {
        Self {
            enabled: false,
            lfsr: 0x7FFF,
            short_mode: false,
            clock_shift: 0,
            divisor_code: 0,
            frequency_timer: 0,
            length: LengthCounter::new(64),
            envelope: Envelope::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn period(&self) -> u32 {
        let divisor: u32 = match self.divisor_code {
            0 => 8,
            code => 16 * u32::from(code),
        };
        divisor << self.clock_shift
    }

    pub fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            if self.frequency_timer == 0 {
                self.frequency_timer = self.period();
                self.clock_lfsr();
            }
            self.frequency_timer -= 1;
        }
    }

    fn clock_lfsr(&mut self) {
        let feedback = (self.lfsr & 1) ^ ((self.lfsr >> 1) & 1);
        self.lfsr = (self.lfsr >> 1) | (feedback << 14);
        if self.short_mode {
            self.lfsr = (self.lfsr & !(1 << 6)) | (feedback << 6);
        }
    }

    pub fn sample(&self) -> Option<u8> {
        if !self.envelope.dac_enabled() {
            return None;
        }
        if !self.enabled {
            return Some(0);
        }

        // Bit 0 is inverted into the output
        Some(u8::from(!self.lfsr.bit(0)) * self.envelope.volume)
    }

    pub fn clock_length(&mut self) {
        if !self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn write_register_1(&mut self, value: u8) {
        self.length.load((value & 0x3F).into());
    }

    pub fn write_register_2(&mut self, value: u8) {
        self.envelope.write_register(value);
        if !self.envelope.dac_enabled() {
            self.enabled = false;
        }
    }

    pub fn read_register_2(&self) -> u8 {
        self.envelope.read_register()
    }

    pub fn write_register_3(&mut self, value: u8) {
        self.clock_shift = value >> 4;
        self.short_mode = value.bit(3);
        self.divisor_code = value & 0x07;
    }

    pub fn read_register_3(&self) -> u8 {
        (self.clock_shift << 4) | (u8::from(self.short_mode) << 3) | self.divisor_code
    }

    pub fn write_register_4(&mut self, value: u8) {
        self.length.enabled = value.bit(6);

        if value.bit(7) {
            self.enabled = self.envelope.dac_enabled();
            self.length.trigger();
            self.envelope.trigger();
            self.lfsr = 0x7FFF;
            self.frequency_timer = self.period();
        }
    }

    pub fn read_register_4(&self) -> u8 {
        0xBF | (u8::from(self.length.enabled) << 6)
    }
}
