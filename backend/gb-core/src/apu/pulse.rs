//! Pulse channels, including channel 1's frequency sweep

use crate::apu::components::{Envelope, LengthCounter};
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

const DUTY_PATTERNS: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

#[derive(Debug, Clone, Encode, Decode)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    counter: u8,
    shadow_frequency: u16,
    enabled: bool,
}

impl Sweep {
    fn new() -> Self {
        Self { period: 0, negate: false, shift: 0, counter: 8, shadow_frequency: 0, enabled: false }
    }

    fn write_register(&mut self, value: u8) {
        self.period = (value >> 4) & 0x07;
        self.negate = value.bit(3);
        self.shift = value & 0x07;
    }

    fn read_register(&self) -> u8 {
        0x80 | (self.period << 4) | (u8::from(self.negate) << 3) | self.shift
    }

    fn reload_counter(&mut self) {
        // A period of zero reloads the divider with 8
        self.counter = if self.period == 0 { 8 } else { self.period };
    }

    fn next_frequency(&self) -> u16 {
        let delta = self.shadow_frequency >> self.shift;
        if self.negate {
            self.shadow_frequency.wrapping_sub(delta)
        } else {
            self.shadow_frequency + delta
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PulseChannel {
    enabled: bool,
    duty: u8,
    duty_position: u8,
    frequency: u16,
    frequency_timer: u16,
    length: LengthCounter,
    envelope: Envelope,
    sweep: Option<Sweep>,
}

impl PulseChannel {
    pub fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            duty: 0,
            duty_position: 0,
            frequency: 0,
            frequency_timer: 0,
            length: LengthCounter::new(64),
            envelope: Envelope::new(),
            sweep: with_sweep.then(Sweep::new),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn period(&self) -> u16 {
        (2048 - self.frequency) * 4
    }

    pub fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            if self.frequency_timer == 0 {
                self.frequency_timer = self.period();
                self.duty_position = (self.duty_position + 1) % 8;
            }
            self.frequency_timer -= 1;
        }
    }

    /// Digital output 0-15, or None when the DAC is off.
    pub fn sample(&self) -> Option<u8> {
        if !self.envelope.dac_enabled() {
            return None;
        }
        if !self.enabled {
            return Some(0);
        }

        Some(DUTY_PATTERNS[usize::from(self.duty)][usize::from(self.duty_position)]
            * self.envelope.volume)
    }

    pub fn clock_length(&mut self) {
        if !self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_sweep(&mut self) {
        let Some(sweep) = &mut self.sweep else { return };

        if sweep.counter > 0 {
            sweep.counter -= 1;
        }
        if sweep.counter != 0 {
            return;
        }
        sweep.reload_counter();

        if !sweep.enabled || sweep.period == 0 {
            return;
        }

        let next = sweep.next_frequency();
        if next > 2047 {
            self.enabled = false;
            return;
        }

        if sweep.shift > 0 {
            sweep.shadow_frequency = next;
            self.frequency = next;
            // Second overflow check with the new shadow value
            if sweep.next_frequency() > 2047 {
                self.enabled = false;
            }
        }
    }

    pub fn write_register_0(&mut self, value: u8) {
        if let Some(sweep) = &mut self.sweep {
            sweep.write_register(value);
        }
    }

    pub fn read_register_0(&self) -> u8 {
        self.sweep.as_ref().map_or(0xFF, Sweep::read_register)
    }

    pub fn write_register_1(&mut self, value: u8) {
        self.duty = value >> 6;
        self.length.load((value & 0x3F).into());
    }

    pub fn read_register_1(&self) -> u8 {
        (self.duty << 6) | 0x3F
    }

    pub fn write_register_2(&mut self, value: u8) {
        self.envelope.write_register(value);
        if !self.envelope.dac_enabled() {
            // Disabling the DAC forces the channel off
            self.enabled = false;
        }
    }

    pub fn read_register_2(&self) -> u8 {
        self.envelope.read_register()
    }

    pub fn write_register_3(&mut self, value: u8) {
        self.frequency = (self.frequency & 0x0700) | u16::from(value);
    }

    pub fn write_register_4(&mut self, value: u8) {
        self.frequency = (self.frequency & 0x00FF) | (u16::from(value & 0x07) << 8);
        self.length.enabled = value.bit(6);

        if value.bit(7) {
            self.trigger();
        }
    }

    pub fn read_register_4(&self) -> u8 {
        0xBF | (u8::from(self.length.enabled) << 6)
    }

    fn trigger(&mut self) {
        self.enabled = self.envelope.dac_enabled();
        self.length.trigger();
        self.envelope.trigger();
        self.frequency_timer = self.period();

        if let Some(sweep) = &mut self.sweep {
            sweep.shadow_frequency = self.frequency;
            sweep.reload_counter();
            sweep.enabled = sweep.period != 0 || sweep.shift != 0;
            if sweep.shift != 0 && sweep.next_frequency() > 2047 {
                self.enabled = false;
            }
        }
    }
}
