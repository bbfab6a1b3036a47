//! Audio processing unit: the four PSG channels, the frame sequencer, and
//! sample generation

pub mod components;
pub mod noise;
pub mod pulse;
pub mod wavetable;

use bincode::{Decode, Encode};
use noise::NoiseChannel;
use pulse::PulseChannel;
use retrio_common::num::GetBit;
use wavetable::WaveChannel;

pub const CPU_CLOCK_HZ: u32 = 4_194_304;
pub const OUTPUT_FREQUENCY: u32 = 48_000;

// The frame sequencer advances at 512 Hz
const FRAME_SEQUENCER_PERIOD: u32 = CPU_CLOCK_HZ / 512;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Apu {
    enabled: bool,
    pulse_1: PulseChannel,
    pulse_2: PulseChannel,
    wave: WaveChannel,
    noise: NoiseChannel,
    // NR50 / NR51
    master_volume: u8,
    panning: u8,
    frame_sequencer_counter: u32,
    frame_sequencer_step: u8,
    sample_counter: u64,
    sample_queue: Vec<(f32, f32)>,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            enabled: true,
            pulse_1: PulseChannel::new(true),
            pulse_2: PulseChannel::new(false),
            wave: WaveChannel::new(false),
            noise: NoiseChannel::new(),
            master_volume: 0x77,
            panning: 0xF3,
            frame_sequencer_counter: 0,
            frame_sequencer_step: 0,
            sample_counter: 0,
            sample_queue: Vec::new(),
        }
    }

    /// Advance by CPU T-cycles (dot-rate cycles in double speed mode).
    pub fn tick(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.tick_cycle();
        }
    }

    fn tick_cycle(&mut self) {
        if self.enabled {
            self.pulse_1.tick(1);
            self.pulse_2.tick(1);
            self.wave.tick(1);
            self.noise.tick(1);

            self.frame_sequencer_counter += 1;
            if self.frame_sequencer_counter == FRAME_SEQUENCER_PERIOD {
                self.frame_sequencer_counter = 0;
                self.clock_frame_sequencer();
            }
        }

        // Fractional-rate sample emission: 48000 samples per CPU-clock second
        self.sample_counter += u64::from(OUTPUT_FREQUENCY);
        if self.sample_counter >= u64::from(CPU_CLOCK_HZ) {
            self.sample_counter -= u64::from(CPU_CLOCK_HZ);
            let sample = self.mix_sample();
            self.sample_queue.push(sample);
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

    fn mix_sample(&self) -> (f32, f32) {
        if !self.enabled {
            return (0.0, 0.0);
        }

        let channels = [
            self.pulse_1.sample(),
            self.pulse_2.sample(),
            self.wave.sample(),
            self.noise.sample(),
        ];

        let mut left = 0.0;
        let mut right = 0.0;
        for (i, channel) in channels.into_iter().enumerate() {
            // A powered-off DAC contributes silence rather than a centered 0
            let Some(value) = channel else { continue };
            let analog = f32::from(value) / 7.5 - 1.0;

            if self.panning.bit(i as u8 + 4) {
                left += analog;
            }
            if self.panning.bit(i as u8) {
                right += analog;
            }
        }

        let left_volume = f32::from((self.master_volume >> 4) & 0x07) + 1.0;
        let right_volume = f32::from(self.master_volume & 0x07) + 1.0;

        (left * left_volume / 32.0, right * right_volume / 32.0)
    }

    pub fn drain_samples_into(&mut self, out: &mut Vec<(f32, f32)>) {
        out.append(&mut self.sample_queue);
    }

    pub fn read_register(&self, address: u16) -> u8 {
        match address & 0xFF {
            0x10 => self.pulse_1.read_register_0(),
            0x11 => self.pulse_1.read_register_1(),
            0x12 => self.pulse_1.read_register_2(),
            0x14 => self.pulse_1.read_register_4(),
            0x16 => self.pulse_2.read_register_1(),
            0x17 => self.pulse_2.read_register_2(),
            0x19 => self.pulse_2.read_register_4(),
            0x1A => self.wave.read_register_0(),
            0x1C => self.wave.read_register_2(),
            0x1E => self.wave.read_register_4(),
            0x21 => self.noise.read_register_2(),
            0x22 => self.noise.read_register_3(),
            0x23 => self.noise.read_register_4(),
            0x24 => self.master_volume,
            0x25 => self.panning,
            0x26 => {
                0x70 | (u8::from(self.enabled) << 7)
                    | (u8::from(self.noise.enabled()) << 3)
                    | (u8::from(self.wave.enabled()) << 2)
                    | (u8::from(self.pulse_2.enabled()) << 1)
                    | u8::from(self.pulse_1.enabled())
            }
            0x30..=0x3F => self.wave.read_wave_ram(address as u8),
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, address: u16, value: u8) {
        let register = address & 0xFF;

        // Wave RAM and NR52 are writable even while the APU is off
        if !self.enabled && register != 0x26 && !(0x30..=0x3F).contains(&register) {
            return;
        }

        match register {
            0x10 => self.pulse_1.write_register_0(value),
            0x11 => self.pulse_1.write_register_1(value),
            0x12 => self.pulse_1.write_register_2(value),
            0x13 => self.pulse_1.write_register_3(value),
            0x14 => self.pulse_1.write_register_4(value),
            0x16 => self.pulse_2.write_register_1(value),
            0x17 => self.pulse_2.write_register_2(value),
            0x18 => self.pulse_2.write_register_3(value),
            0x19 => self.pulse_2.write_register_4(value),
            0x1A => self.wave.write_register_0(value),
            0x1B => self.wave.write_register_1(value),
            0x1C => self.wave.write_register_2(value),
            0x1D => self.wave.write_register_3(value),
            0x1E => self.wave.write_register_4(value),
            0x20 => self.noise.write_register_1(value),
            0x21 => self.noise.write_register_2(value),
            0x22 => self.noise.write_register_3(value),
            0x23 => self.noise.write_register_4(value),
            0x24 => self.master_volume = value,
            0x25 => self.panning = value,
            0x26 => {
                let was_enabled = self.enabled;
                self.enabled = value.bit(7);
                if was_enabled && !self.enabled {
                    // Powering off clears every channel register
                    let wave_ram: Vec<u8> =
                        (0..16).map(|i| self.wave.read_wave_ram(i)).collect();
                    *self = Self::new();
                    self.enabled = false;
                    for (i, &byte) in wave_ram.iter().enumerate() {
                        self.wave.write_wave_ram(i as u8, byte);
                    }
                }
            }
            0x30..=0x3F => self.wave.write_wave_ram(address as u8, value),
            _ => log::debug!("Unexpected APU register write: {address:04X} {value:02X}"),
        }
    }

    pub fn read_pcm12(&self) -> u8 {
        let p1 = self.pulse_1.sample().unwrap_or(0);
        let p2 = self.pulse_2.sample().unwrap_or(0);
        (p2 << 4) | p1
    }

    pub fn read_pcm34(&self) -> u8 {
        let wave = self.wave.sample().unwrap_or(0);
        let noise = self.noise.sample().unwrap_or(0);
        (noise << 4) | wave
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_samples_at_the_output_rate() {
        let mut apu = Apu::new();
        apu.tick(CPU_CLOCK_HZ / 60);

        let mut samples = Vec::new();
        apu.drain_samples_into(&mut samples);

        let expected = OUTPUT_FREQUENCY as usize / 60;
        assert!(
            (samples.len() as i64 - expected as i64).abs() <= 1,
            "got {} samples, expected ~{expected}",
            samples.len()
        );
    }

    #[test]
    fn sweep_overflow_disables_the_channel() {
        let mut apu = Apu::new();

        // Sweep up with shift 1 from a high frequency overflows immediately
        apu.write_register(0xFF10, 0x11);
        apu.write_register(0xFF12, 0xF0);
        apu.write_register(0xFF13, 0xFF);
        apu.write_register(0xFF14, 0x87);

        assert!(
            !apu.pulse_1.enabled(),
            "trigger overflow check must disable the channel"
        );
    }

    #[test]
    fn disabling_dac_forces_channel_off() {
        let mut apu = Apu::new();

        apu.write_register(0xFF12, 0xF0);
        apu.write_register(0xFF14, 0x80);
        assert!(apu.pulse_1.enabled());

        apu.write_register(0xFF12, 0x00);
        assert!(!apu.pulse_1.enabled());
    }
}
