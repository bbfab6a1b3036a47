//! The S-DSP: eight BRR sample voices, ADSR/GAIN envelopes, Gaussian-style
//! interpolation, echo with an 8-tap FIR, and the noise generator

use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

use crate::apu::AUDIO_RAM_LEN;

const VOICES: usize = 8;
const REGISTER_COUNT: usize = 128;

// Envelope tick periods, in samples, indexed by the 5-bit rate
const RATE_TABLE: [u16; 32] = [
    0, 2048, 1536, 1280, 1024, 768, 640, 512, 384, 320, 256, 192, 160, 128, 96, 80, 64, 48, 40,
    32, 24, 20, 16, 12, 10, 8, 6, 5, 4, 3, 2, 1,
];

const ENVELOPE_MAX: i32 = 0x7FF;

// A key-on is applied five sample periods after the write
const KEY_ON_DELAY: u8 = 5;

// Decoded-sample ring size; interpolation needs 4 valid samples ahead
const RING_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum EnvelopeMode {
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Encode, Decode)]
struct Voice {
    // BRR playback cursor: current block plus the data offset within it
    // (1..=8; the header byte is offset 0)
    brr_address: u16,
    brr_offset: u8,
    // Decode ring and playback cursor into it
    sample_ring: [i16; RING_LEN],
    write_index: u8,
    read_index: u8,
    samples_available: i8,
    // Fixed-point playback phase, 12 fraction bits
    phase: u32,
    prev1: i32,
    prev2: i32,
    envelope_mode: EnvelopeMode,
    envelope_level: i32,
    envelope_counter: u16,
    key_on_delay: u8,
    keyed_on: bool,
    output: i16,
}

impl Voice {
    fn new() -> Self {
        Self {
            brr_address: 0,
            brr_offset: 1,
            sample_ring: [0; RING_LEN],
            write_index: 0,
            read_index: 0,
            samples_available: 0,
            phase: 0,
            prev1: 0,
            prev2: 0,
            envelope_mode: EnvelopeMode::Release,
            envelope_level: 0,
            envelope_counter: 0,
            key_on_delay: 0,
            keyed_on: false,
            output: 0,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct AudioDsp {
    registers: [u8; REGISTER_COUNT],
    register_address: u8,
    voices: [Voice; VOICES],
    noise_lfsr: u16,
    noise_counter: u16,
    echo_offset: u16,
    // FIR history per stereo side
    fir_history: [[i32; 8]; 2],
    interpolation_table: Vec<i32>,
}

// Cubic B-spline kernel scaled to 2048; the four taps always sum to 2048,
// matching the normalization of the hardware's Gaussian table
fn build_interpolation_table() -> Vec<i32> {
    (0..512)
        .map(|i| {
            let t = f64::from(i) / 256.0;
            let value = if t < 1.0 {
                2.0 / 3.0 - t * t + t * t * t / 2.0
            } else {
                (2.0 - t).powi(3) / 6.0
            };
            (value * 2048.0).round() as i32
        })
        .collect()
}

impl AudioDsp {
    pub fn new() -> Self {
        let mut dsp = Self {
            registers: [0; REGISTER_COUNT],
            register_address: 0,
            voices: std::array::from_fn(|_| Voice::new()),
            noise_lfsr: 0x4000,
            noise_counter: 0,
            echo_offset: 0,
            fir_history: [[0; 8]; 2],
            interpolation_table: build_interpolation_table(),
        };
        // FLG resets to mute + echo writes disabled
        dsp.registers[0x6C] = 0xE0;
        dsp
    }

    pub fn reset(&mut self) {
        let table = std::mem::take(&mut self.interpolation_table);
        *self = Self::new();
        self.interpolation_table = table;
    }

    pub fn read_address(&self) -> u8 {
        self.register_address
    }

    pub fn write_address(&mut self, value: u8) {
        self.register_address = value;
    }

    pub fn read_register(&self) -> u8 {
        self.registers[usize::from(self.register_address & 0x7F)]
    }

    pub fn write_register(&mut self, value: u8) {
        // Addresses $80-$FF are read-only mirrors
        if self.register_address.bit(7) {
            return;
        }
        let address = usize::from(self.register_address);

        match address {
            // KON: schedule key-on with the documented delay
            0x4C => {
                for (index, voice) in self.voices.iter_mut().enumerate() {
                    if value.bit(index as u8) {
                        voice.key_on_delay = KEY_ON_DELAY;
                    }
                }
                self.registers[address] = value;
            }
            // KOF: anything keyed off enters release
            0x5C => {
                for (index, voice) in self.voices.iter_mut().enumerate() {
                    if value.bit(index as u8) && voice.keyed_on {
                        voice.envelope_mode = EnvelopeMode::Release;
                    }
                }
                self.registers[address] = value;
            }
            // ENDX: any write clears every bit
            0x7C => {
                self.registers[address] = 0;
            }
            _ => self.registers[address] = value,
        }
    }

    fn voice_register(&self, voice: usize, register: usize) -> u8 {
        self.registers[(voice << 4) | register]
    }

    fn flg(&self) -> u8 {
        self.registers[0x6C]
    }

    fn sample_directory(&self) -> u16 {
        u16::from(self.registers[0x5D]) << 8
    }

    fn voice_pitch(&self, voice: usize) -> u32 {
        u32::from(self.voice_register(voice, 0x2))
            | (u32::from(self.voice_register(voice, 0x3) & 0x3F) << 8)
    }

    fn lookup_brr_address(&self, voice: usize, loop_entry: bool, ram: &[u8; AUDIO_RAM_LEN]) -> u16 {
        let source = self.voice_register(voice, 0x4);
        let entry = self.sample_directory().wrapping_add(u16::from(source) * 4);
        let offset = if loop_entry { 2 } else { 0 };
        u16::from_le_bytes([
            ram[usize::from(entry.wrapping_add(offset))],
            ram[usize::from(entry.wrapping_add(offset + 1))],
        ])
    }

    /// Produce one stereo sample (called at the 32kHz sample rate).
    pub fn clock(&mut self, ram: &mut [u8; AUDIO_RAM_LEN]) -> (i16, i16) {
        self.clock_noise();

        let flg = self.flg();
        let pmon = self.registers[0x2D];
        let non = self.registers[0x3D];
        let eon = self.registers[0x4D];

        let mut main_left = 0_i32;
        let mut main_right = 0_i32;
        let mut echo_left = 0_i32;
        let mut echo_right = 0_i32;
        let mut previous_output = 0_i32;

        for voice_index in 0..VOICES {
            let raw = self.clock_voice(voice_index, ram, previous_output, pmon, non);
            previous_output = i32::from(self.voices[voice_index].output);

            let vol_left = i32::from(self.voice_register(voice_index, 0x0) as i8);
            let vol_right = i32::from(self.voice_register(voice_index, 0x1) as i8);
            let left = (raw * vol_left) >> 7;
            let right = (raw * vol_right) >> 7;

            main_left += left;
            main_right += right;
            if eon.bit(voice_index as u8) {
                echo_left += left;
                echo_right += right;
            }
        }

        let (echo_out_left, echo_out_right) = self.clock_echo(ram, echo_left, echo_right);

        let mvol_left = i32::from(self.registers[0x0C] as i8);
        let mvol_right = i32::from(self.registers[0x1C] as i8);
        let evol_left = i32::from(self.registers[0x2C] as i8);
        let evol_right = i32::from(self.registers[0x3C] as i8);

        let mut left = ((main_left * mvol_left) >> 7) + ((echo_out_left * evol_left) >> 7);
        let mut right = ((main_right * mvol_right) >> 7) + ((echo_out_right * evol_right) >> 7);

        if flg.bit(6) {
            left = 0;
            right = 0;
        }

        (clamp16(left), clamp16(right))
    }

    fn start_voice(&mut self, voice_index: usize, ram: &[u8; AUDIO_RAM_LEN]) {
        let address = self.lookup_brr_address(voice_index, false, ram);

        let voice = &mut self.voices[voice_index];
        voice.brr_address = address;
        voice.brr_offset = 1;
        voice.sample_ring = [0; RING_LEN];
        voice.write_index = 0;
        voice.read_index = 0;
        voice.samples_available = 0;
        voice.phase = 0;
        voice.prev1 = 0;
        voice.prev2 = 0;
        voice.keyed_on = true;
        voice.envelope_mode = EnvelopeMode::Attack;
        voice.envelope_level = 0;
        voice.envelope_counter = 0;

        // Prime the ring so interpolation has a full window
        self.decode_brr_group(voice_index, ram);
        self.decode_brr_group(voice_index, ram);
    }

    fn clock_voice(
        &mut self,
        voice_index: usize,
        ram: &[u8; AUDIO_RAM_LEN],
        previous_output: i32,
        pmon: u8,
        non: u8,
    ) -> i32 {
        let start_playback = {
            let voice = &mut self.voices[voice_index];
            if voice.key_on_delay > 0 {
                voice.key_on_delay -= 1;
                voice.key_on_delay == 0
            } else {
                false
            }
        };
        if start_playback {
            self.start_voice(voice_index, ram);
        }

        // Soft reset forces every voice into release at zero
        if self.flg().bit(7) {
            let voice = &mut self.voices[voice_index];
            voice.envelope_mode = EnvelopeMode::Release;
            voice.envelope_level = 0;
        }

        self.clock_envelope(voice_index);

        let mut step = self.voice_pitch(voice_index);
        if pmon.bit(voice_index as u8) && voice_index > 0 {
            // Pitch modulation by the previous voice's output
            let factor = (previous_output >> 4) + 0x400;
            step = ((i64::from(step) * i64::from(factor)) >> 10).clamp(0, 0x3FFF) as u32;
        }

        let fraction = {
            let voice = &mut self.voices[voice_index];
            voice.phase += step;
            let advance = (voice.phase >> 12) as u8;
            voice.phase &= 0xFFF;

            voice.read_index = (voice.read_index + advance) % RING_LEN as u8;
            voice.samples_available -= advance as i8;
            (voice.phase >> 4) as usize
        };

        while self.voices[voice_index].samples_available < 4 {
            self.decode_brr_group(voice_index, ram);
        }

        let sample = if non.bit(voice_index as u8) {
            // Noise replaces the sample data
            i32::from((self.noise_lfsr << 1) as i16 >> 1)
        } else {
            self.interpolate(voice_index, fraction)
        };

        let amplified = (sample * self.voices[voice_index].envelope_level) >> 11;
        let voice = &mut self.voices[voice_index];
        voice.output = clamp16(amplified);
        self.registers[(voice_index << 4) | 0x8] = (voice.envelope_level >> 4) as u8;
        self.registers[(voice_index << 4) | 0x9] = (voice.output >> 8) as u8;

        amplified
    }

    fn interpolate(&self, voice_index: usize, fraction: usize) -> i32 {
        let voice = &self.voices[voice_index];
        let table = &self.interpolation_table;

        let sample = |offset: u8| {
            i32::from(
                voice.sample_ring[usize::from(voice.read_index + offset) % RING_LEN],
            )
        };

        // Four taps at distances (1+f, f, 1-f, 2-f) from the playback point
        let result = (sample(0) * table[256 + fraction]
            + sample(1) * table[fraction]
            + sample(2) * table[256 - fraction]
            + sample(3) * table[511 - fraction])
            >> 11;
        result.clamp(-0x8000, 0x7FFF)
    }

    // Decode the next four BRR samples into the ring
    fn decode_brr_group(&mut self, voice_index: usize, ram: &[u8; AUDIO_RAM_LEN]) {
        let (address, offset) = {
            let voice = &self.voices[voice_index];
            (voice.brr_address, voice.brr_offset)
        };

        let header = ram[usize::from(address)];
        let shift = header >> 4;
        let filter = (header >> 2) & 0x3;

        let mut prev1 = self.voices[voice_index].prev1;
        let mut prev2 = self.voices[voice_index].prev2;
        let mut decoded = [0_i16; 4];

        for (i, sample_slot) in decoded.iter_mut().enumerate() {
            let byte = ram[(usize::from(address) + usize::from(offset) + i / 2) % AUDIO_RAM_LEN];
            let nibble = if i % 2 == 0 { i32::from(byte >> 4) } else { i32::from(byte & 0x0F) };
            // Sign-extend the 4-bit value
            let nibble = (nibble << 28) >> 28;

            let mut sample = if shift <= 12 {
                (nibble << shift) >> 1
            } else {
                // Invalid shifts collapse to the sign
                (nibble >> 3) << 11
            };

            sample += match filter {
                0 => 0,
                1 => prev1 * 15 / 16,
                2 => prev1 * 61 / 32 - prev2 * 15 / 16,
                _ => prev1 * 115 / 64 - prev2 * 13 / 16,
            };

            let sample = clamp15(sample);
            prev2 = prev1;
            prev1 = sample.into();
            *sample_slot = sample;
        }

        {
            let voice = &mut self.voices[voice_index];
            voice.prev1 = prev1;
            voice.prev2 = prev2;
            for sample in decoded {
                voice.sample_ring[usize::from(voice.write_index)] = sample;
                voice.write_index = (voice.write_index + 1) % RING_LEN as u8;
            }
            voice.samples_available += 4;
            voice.brr_offset += 2;
        }

        if self.voices[voice_index].brr_offset > 8 {
            // Block exhausted; honor the end/loop flags
            let end = header.bit(0);
            let looping = header.bit(1);

            if end {
                self.registers[0x7C] |= 1 << voice_index;

                if looping {
                    let loop_address = self.lookup_brr_address(voice_index, true, ram);
                    let voice = &mut self.voices[voice_index];
                    voice.brr_address = loop_address;
                    voice.brr_offset = 1;
                } else {
                    let voice = &mut self.voices[voice_index];
                    voice.envelope_mode = EnvelopeMode::Release;
                    voice.envelope_level = 0;
                    voice.brr_offset = 1;
                }
            } else {
                let voice = &mut self.voices[voice_index];
                voice.brr_address = voice.brr_address.wrapping_add(9);
                voice.brr_offset = 1;
            }
        }
    }

    fn clock_envelope(&mut self, voice_index: usize) {
        let adsr1 = self.voice_register(voice_index, 0x5);
        let adsr2 = self.voice_register(voice_index, 0x6);
        let gain = self.voice_register(voice_index, 0x7);

        let voice = &mut self.voices[voice_index];

        if voice.envelope_mode == EnvelopeMode::Release {
            // Release always ramps down by 8 per sample
            voice.envelope_level = (voice.envelope_level - 8).max(0);
            if voice.envelope_level == 0 {
                voice.keyed_on = false;
            }
            return;
        }

        if adsr1.bit(7) {
            // ADSR mode
            let (rate, attacking) = match voice.envelope_mode {
                EnvelopeMode::Attack => ((adsr1 & 0x0F) * 2 + 1, true),
                EnvelopeMode::Decay => (((adsr1 >> 4) & 0x7) * 2 + 16, false),
                EnvelopeMode::Sustain | EnvelopeMode::Release => (adsr2 & 0x1F, false),
            };

            if !envelope_tick(&mut voice.envelope_counter, rate) {
                return;
            }

            if attacking {
                voice.envelope_level += if rate == 31 { 1024 } else { 32 };
                if voice.envelope_level >= ENVELOPE_MAX {
                    voice.envelope_level = ENVELOPE_MAX;
                    voice.envelope_mode = EnvelopeMode::Decay;
                }
            } else {
                // Exponential decay toward the sustain level, then onward
                voice.envelope_level -= ((voice.envelope_level - 1) >> 8) + 1;
                voice.envelope_level = voice.envelope_level.max(0);

                let sustain_level = (i32::from(adsr2 >> 5) + 1) << 8;
                if voice.envelope_mode == EnvelopeMode::Decay
                    && voice.envelope_level <= sustain_level
                {
                    voice.envelope_mode = EnvelopeMode::Sustain;
                }
            }
        } else if gain.bit(7) {
            // Parameterized GAIN
            let rate = gain & 0x1F;
            if !envelope_tick(&mut voice.envelope_counter, rate) {
                return;
            }

            match (gain >> 5) & 0x3 {
                // Linear decrease
                0 => voice.envelope_level = (voice.envelope_level - 32).max(0),
                // Exponential decrease
                1 => {
                    voice.envelope_level -= ((voice.envelope_level - 1) >> 8) + 1;
                    voice.envelope_level = voice.envelope_level.max(0);
                }
                // Linear increase
                2 => {
                    voice.envelope_level = (voice.envelope_level + 32).min(ENVELOPE_MAX);
                }
                // Bent line: fast, then slow near the top
                _ => {
                    let step = if voice.envelope_level < 0x600 { 32 } else { 8 };
                    voice.envelope_level = (voice.envelope_level + step).min(ENVELOPE_MAX);
                }
            }
        } else {
            // Direct GAIN
            voice.envelope_level = i32::from(gain & 0x7F) << 4;
        }
    }

    fn clock_noise(&mut self) {
        let rate = self.flg() & 0x1F;
        if rate == 0 {
            return;
        }

        self.noise_counter += 1;
        if self.noise_counter >= RATE_TABLE[usize::from(rate)] {
            self.noise_counter = 0;
            let feedback = (self.noise_lfsr ^ (self.noise_lfsr >> 1)) & 1;
            self.noise_lfsr = (self.noise_lfsr >> 1) | (feedback << 14);
        }
    }

    fn clock_echo(
        &mut self,
        ram: &mut [u8; AUDIO_RAM_LEN],
        input_left: i32,
        input_right: i32,
    ) -> (i32, i32) {
        let echo_base = u32::from(self.registers[0x6D]) << 8;
        let echo_length = match self.registers[0x7D] & 0x0F {
            0 => 4_u32,
            delay => u32::from(delay) << 11,
        };

        let read_address = (echo_base + u32::from(self.echo_offset)) as usize % AUDIO_RAM_LEN;
        let raw_left =
            i16::from_le_bytes([ram[read_address], ram[(read_address + 1) % AUDIO_RAM_LEN]]);
        let raw_right = i16::from_le_bytes([
            ram[(read_address + 2) % AUDIO_RAM_LEN],
            ram[(read_address + 3) % AUDIO_RAM_LEN],
        ]);

        // Shift the FIR history and apply the 8 coefficients in $xF
        for side in &mut self.fir_history {
            side.rotate_left(1);
        }
        self.fir_history[0][7] = i32::from(raw_left) >> 1;
        self.fir_history[1][7] = i32::from(raw_right) >> 1;

        let mut fir_left = 0_i32;
        let mut fir_right = 0_i32;
        for tap in 0..8 {
            let coefficient = i32::from(self.registers[(tap << 4) | 0x0F] as i8);
            fir_left += (self.fir_history[0][tap] * coefficient) >> 6;
            fir_right += (self.fir_history[1][tap] * coefficient) >> 6;
        }

        // Write feedback into the buffer unless echo writes are disabled
        if !self.flg().bit(5) {
            let feedback = i32::from(self.registers[0x0D] as i8);
            let write_left = clamp16(input_left + ((fir_left * feedback) >> 7));
            let write_right = clamp16(input_right + ((fir_right * feedback) >> 7));

            let [left_lsb, left_msb] = write_left.to_le_bytes();
            let [right_lsb, right_msb] = write_right.to_le_bytes();
            ram[read_address] = left_lsb;
            ram[(read_address + 1) % AUDIO_RAM_LEN] = left_msb;
            ram[(read_address + 2) % AUDIO_RAM_LEN] = right_lsb;
            ram[(read_address + 3) % AUDIO_RAM_LEN] = right_msb;
        }

        self.echo_offset += 4;
        if u32::from(self.echo_offset) >= echo_length {
            self.echo_offset = 0;
        }

        (fir_left, fir_right)
    }
}

fn envelope_tick(counter: &mut u16, rate: u8) -> bool {
    let period = RATE_TABLE[usize::from(rate & 0x1F)];
    if period == 0 {
        return false;
    }

    *counter += 1;
    if *counter >= period {
        *counter = 0;
        true
    } else {
        false
    }
}

fn clamp16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

// BRR output clips to 15 bits signed
fn clamp15(value: i32) -> i16 {
    value.clamp(-0x4000, 0x3FFF) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_taps_sum_to_unity() {
        let table = build_interpolation_table();
        for fraction in 0..256 {
            let sum = table[256 + fraction]
                + table[fraction]
                + table[256 - fraction]
                + table[511 - fraction];
            assert!((2046..=2050).contains(&sum), "fraction {fraction}: sum {sum}");
        }
    }

    #[test]
    fn brr_filter_zero_decodes_shifted_nibbles() {
        let mut dsp = AudioDsp::new();
        let mut ram: Box<[u8; AUDIO_RAM_LEN]> =
            vec![0; AUDIO_RAM_LEN].into_boxed_slice().try_into().unwrap();

        // Sample directory at $0200, source 0 points at $0300
        dsp.write_address(0x5D);
        dsp.write_register(0x02);
        ram[0x200] = 0x00;
        ram[0x201] = 0x03;

        // BRR block: shift 4, filter 0; first byte has nibbles +1 and -1
        ram[0x300] = 0x40;
        ram[0x301] = 0x1F;

        dsp.write_address(0x4C);
        dsp.write_register(0x01);

        // Run past the key-on delay so the first block decodes
        for _ in 0..8 {
            dsp.clock(&mut ram);
        }

        let ring = &dsp.voices[0].sample_ring;
        assert_eq!(ring[0], 8, "+1 << 4 >> 1");
        assert_eq!(ring[1], -8, "-1 << 4 >> 1");
    }

    #[test]
    fn release_ramps_envelope_to_zero() {
        let mut dsp = AudioDsp::new();
        dsp.voices[0].envelope_level = 64;
        dsp.voices[0].envelope_mode = EnvelopeMode::Release;
        dsp.voices[0].keyed_on = true;

        for _ in 0..7 {
            dsp.clock_envelope(0);
        }
        assert_eq!(dsp.voices[0].envelope_level, 8);
        dsp.clock_envelope(0);
        assert_eq!(dsp.voices[0].envelope_level, 0);
        assert!(!dsp.voices[0].keyed_on);
    }

    #[test]
    fn key_on_takes_effect_after_the_delay() {
        let mut dsp = AudioDsp::new();
        let mut ram: Box<[u8; AUDIO_RAM_LEN]> =
            vec![0; AUDIO_RAM_LEN].into_boxed_slice().try_into().unwrap();

        dsp.write_address(0x4C);
        dsp.write_register(0x01);

        for _ in 0..KEY_ON_DELAY - 1 {
            dsp.clock(&mut ram);
            assert!(!dsp.voices[0].keyed_on);
        }
        dsp.clock(&mut ram);
        assert!(dsp.voices[0].keyed_on);
    }
}
