//! APU: the four GB PSG channels plus the two Direct Sound FIFO channels
//!
//! The PSG channels are literally the Game Boy's, so their implementations
//! come from `gb_core`; this module supplies the GBA's register interface,
//! the FIFO machinery, and the final mix.

use bincode::{Decode, Encode};
use gb_core::apu::noise::NoiseChannel;
use gb_core::apu::pulse::PulseChannel;
use gb_core::apu::wavetable::WaveChannel;
use retrio_common::num::{GetBit, U16Ext};
use std::collections::VecDeque;

pub const SYSTEM_CLOCK_HZ: u32 = 16 * 1024 * 1024;
pub const OUTPUT_FREQUENCY: u32 = 48_000;

// The PSG channels tick at the GB CPU clock, a quarter of the system clock
const PSG_CLOCK_DIVIDER: u32 = 4;

// Frame sequencer at 512 Hz
const FRAME_SEQUENCER_PERIOD: u32 = SYSTEM_CLOCK_HZ / 512;

const FIFO_CAPACITY: usize = 32;
const FIFO_REFILL_THRESHOLD: usize = 16;

#[derive(Debug, Clone, Default, Encode, Decode)]
struct SoundFifo {
    samples: VecDeque<u8>,
    current_sample: i8,
}

impl SoundFifo {
    fn push_halfword(&mut self, value: u16) {
        self.push_byte(value.lsb());
        self.push_byte(value.msb());
    }

    fn push_byte(&mut self, value: u8) {
        if self.samples.len() < FIFO_CAPACITY {
            self.samples.push_back(value);
        }
    }

    // Returns true when a refill DMA should be requested
    fn pop_sample(&mut self) -> bool {
        if let Some(sample) = self.samples.pop_front() {
            self.current_sample = sample as i8;
        }
        self.samples.len() <= FIFO_REFILL_THRESHOLD
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.current_sample = 0;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Apu {
    pulse_1: PulseChannel,
    pulse_2: PulseChannel,
    wave: WaveChannel,
    noise: NoiseChannel,
    fifo_a: SoundFifo,
    fifo_b: SoundFifo,
    // SOUNDCNT_L / _H / _X and SOUNDBIAS
    psg_control: u16,
    mix_control: u16,
    master_enable: bool,
    bias: u16,
    psg_divider: u32,
    frame_sequencer_counter: u32,
    frame_sequencer_step: u8,
    sample_counter: u64,
    sample_queue: Vec<(f32, f32)>,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            pulse_1: PulseChannel::new(true),
            pulse_2: PulseChannel::new(false),
            wave: WaveChannel::new(true),
            noise: NoiseChannel::new(),
            fifo_a: SoundFifo::default(),
            fifo_b: SoundFifo::default(),
            psg_control: 0,
            mix_control: 0,
            master_enable: false,
            bias: 0x0200,
            psg_divider: 0,
            frame_sequencer_counter: 0,
            frame_sequencer_step: 0,
            sample_counter: 0,
            sample_queue: Vec::new(),
        }
    }

    pub fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.psg_divider += 1;
            if self.psg_divider == PSG_CLOCK_DIVIDER {
                self.psg_divider = 0;
                self.pulse_1.tick(1);
                self.pulse_2.tick(1);
                self.wave.tick(1);
                self.noise.tick(1);
            }

            self.frame_sequencer_counter += 1;
            if self.frame_sequencer_counter == FRAME_SEQUENCER_PERIOD {
                self.frame_sequencer_counter = 0;
                self.clock_frame_sequencer();
            }

            self.sample_counter += u64::from(OUTPUT_FREQUENCY);
            if self.sample_counter >= u64::from(SYSTEM_CLOCK_HZ) {
                self.sample_counter -= u64::from(SYSTEM_CLOCK_HZ);
                let sample = self.mix_sample();
                self.sample_queue.push(sample);
            }
        }
    }

    fn clock_frame_sequencer(&mut self) {
        let step = self.frame_sequencer_step;
        self.frame_sequencer_step = (step + 1) % 8;

        if step % 2 == 0 {
            self.pulse_1.clock_length();
            self.pulse_2.clock_length();
            self.wave.clock_length();
            self.noise.clock_length();
        }
        if step == 2 || step == 6 {
            self.pulse_1.clock_sweep();
        }
        if step == 7 {
            self.pulse_1.clock_envelope();
            self.pulse_2.clock_envelope();
            self.noise.clock_envelope();
        }
    }

    /// A sample timer overflowed; pop from the FIFOs it clocks. Returns
    /// which FIFOs want a refill DMA.
    pub fn timer_overflow(&mut self, timer: u8, overflows: u32) -> (bool, bool) {
        let mut refill_a = false;
        let mut refill_b = false;

        for _ in 0..overflows {
            if u8::from(self.mix_control.bit(10)) == timer {
                refill_a |= self.fifo_a.pop_sample();
            }
            if u8::from(self.mix_control.bit(14)) == timer {
                refill_b |= self.fifo_b.pop_sample();
            }
        }

        (refill_a, refill_b)
    }

    fn mix_sample(&self) -> (f32, f32) {
        if !self.master_enable {
            return (0.0, 0.0);
        }

        // PSG mix, scaled to roughly +-1
        let channels = [
            self.pulse_1.sample(),
            self.pulse_2.sample(),
            self.wave.sample(),
            self.noise.sample(),
        ];

        let mut psg_left = 0.0_f32;
        let mut psg_right = 0.0_f32;
        for (i, channel) in channels.into_iter().enumerate() {
            let Some(value) = channel else { continue };
            let analog = f32::from(value) / 7.5 - 1.0;

            if self.psg_control.bit(i as u8 + 12) {
                psg_left += analog;
            }
            if self.psg_control.bit(i as u8 + 8) {
                psg_right += analog;
            }
        }

        let psg_master_left = f32::from((self.psg_control >> 4) & 0x7) + 1.0;
        let psg_master_right = f32::from(self.psg_control & 0x7) + 1.0;
        psg_left *= psg_master_left / 8.0;
        psg_right *= psg_master_right / 8.0;

        // PSG volume ratio: 25/50/100%
        let psg_scale = match self.mix_control & 0x3 {
            0 => 0.25,
            1 => 0.5,
            _ => 1.0,
        };
        psg_left *= psg_scale / 4.0;
        psg_right *= psg_scale / 4.0;

        // Direct Sound channels
        let fifo_scale_a = if self.mix_control.bit(2) { 1.0 } else { 0.5 };
        let fifo_scale_b = if self.mix_control.bit(3) { 1.0 } else { 0.5 };
        let sample_a = f32::from(self.fifo_a.current_sample) / 128.0 * fifo_scale_a;
        let sample_b = f32::from(self.fifo_b.current_sample) / 128.0 * fifo_scale_b;

        let mut left = psg_left;
        let mut right = psg_right;
        if self.mix_control.bit(9) {
            left += sample_a;
        }
        if self.mix_control.bit(8) {
            right += sample_a;
        }
        if self.mix_control.bit(13) {
            left += sample_b;
        }
        if self.mix_control.bit(12) {
            right += sample_b;
        }

        (left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0))
    }

    pub fn drain_samples_into(&mut self, out: &mut Vec<(f32, f32)>) {
        out.append(&mut self.sample_queue);
    }

    pub fn read_register(&self, offset: u32) -> u16 {
        match offset {
            0x60 => (self.pulse_1.read_register_0() & 0x7F).into(),
            0x62 => u16::from_le_bytes([
                self.pulse_1.read_register_1() & 0xC0,
                self.pulse_1.read_register_2(),
            ]),
            0x64 => (self.pulse_1.read_register_4() & 0x40).into(),
            0x68 => u16::from_le_bytes([
                self.pulse_2.read_register_1() & 0xC0,
                self.pulse_2.read_register_2(),
            ]),
            0x6C => (self.pulse_2.read_register_4() & 0x40).into(),
            0x70 => (self.wave.read_register_0() & 0xE0).into(),
            0x72 => u16::from_le_bytes([0, self.wave.read_register_2() & 0xE0]),
            0x74 => (self.wave.read_register_4() & 0x40).into(),
            0x78 => u16::from_le_bytes([0, self.noise.read_register_2()]),
            0x7C => u16::from_le_bytes([
                self.noise.read_register_3(),
                self.noise.read_register_4() & 0x40,
            ]),
            0x80 => self.psg_control,
            0x82 => self.mix_control & 0x770F,
            0x84 => {
                (u16::from(self.master_enable) << 7)
                    | (u16::from(self.noise.enabled()) << 3)
                    | (u16::from(self.wave.enabled()) << 2)
                    | (u16::from(self.pulse_2.enabled()) << 1)
                    | u16::from(self.pulse_1.enabled())
            }
            0x88 => self.bias,
            0x90..=0x9F => {
                let base = (offset - 0x90) as u8;
                u16::from_le_bytes([
                    self.wave.read_wave_ram(base),
                    self.wave.read_wave_ram(base + 1),
                ])
            }
            _ => 0,
        }
    }

    pub fn write_register(&mut self, offset: u32, value: u16) {
        if !self.master_enable && offset < 0x84 {
            return;
        }

        match offset {
            0x60 => self.pulse_1.write_register_0(value as u8),
            0x62 => {
                self.pulse_1.write_register_1(value.lsb());
                self.pulse_1.write_register_2(value.msb());
            }
            0x64 => {
                self.pulse_1.write_register_3(value.lsb());
                self.pulse_1.write_register_4(value.msb());
            }
            0x68 => {
                self.pulse_2.write_register_1(value.lsb());
                self.pulse_2.write_register_2(value.msb());
            }
            0x6C => {
                self.pulse_2.write_register_3(value.lsb());
                self.pulse_2.write_register_4(value.msb());
            }
            0x70 => self.wave.write_register_0(value.lsb()),
            0x72 => {
                self.wave.write_register_1(value.lsb());
                self.wave.write_register_2(value.msb());
            }
            0x74 => {
                self.wave.write_register_3(value.lsb());
                self.wave.write_register_4(value.msb());
            }
            0x78 => {
                self.noise.write_register_1(value.lsb());
                self.noise.write_register_2(value.msb());
            }
            0x7C => {
                self.noise.write_register_3(value.lsb());
                self.noise.write_register_4(value.msb());
            }
            0x80 => self.psg_control = value,
            0x82 => {
                self.mix_control = value;
                if value.bit(11) {
                    self.fifo_a.reset();
                }
                if value.bit(15) {
                    self.fifo_b.reset();
                }
            }
            0x84 => {
                self.master_enable = value.bit(7);
            }
            0x88 => self.bias = value & 0xC3FE,
            0x90..=0x9F => {
                let base = (offset - 0x90) as u8;
                self.wave.write_wave_ram(base, value.lsb());
                self.wave.write_wave_ram(base + 1, value.msb());
            }
            0xA0 | 0xA2 => self.fifo_a.push_halfword(value),
            0xA4 | 0xA6 => self.fifo_b.push_halfword(value),
            _ => log::debug!("Unhandled APU register write: {offset:02X} {value:04X}"),
        }
    }

    pub fn write_fifo_a_word(&mut self, value: u32) {
        self.fifo_a.push_halfword(value as u16);
        self.fifo_a.push_halfword((value >> 16) as u16);
    }

    pub fn write_fifo_b_word(&mut self, value: u32) {
        self.fifo_b.push_halfword(value as u16);
        self.fifo_b.push_halfword((value >> 16) as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_requests_refill_at_half_empty() {
        let mut apu = Apu::new();
        apu.write_register(0x84, 0x80);
        // FIFO A clocked by timer 0, enabled on both sides
        apu.write_register(0x82, 0x0300);

        for i in 0..8 {
            apu.write_fifo_a_word(i as u32);
        }

        // Draining to 16 bytes triggers a refill request
        let mut requested = false;
        for _ in 0..16 {
            let (refill_a, _) = apu.timer_overflow(0, 1);
            requested |= refill_a;
        }
        assert!(requested);
    }

    #[test]
    fn emits_samples_at_the_output_rate() {
        let mut apu = Apu::new();
        apu.tick(SYSTEM_CLOCK_HZ / 64);

        let mut samples = Vec::new();
        apu.drain_samples_into(&mut samples);

        let expected = OUTPUT_FREQUENCY as usize / 64;
        assert!((samples.len() as i64 - expected as i64).abs() <= 1);
    }
}
