//! APU: the SPC700 sound CPU, its timers and mailbox ports, the IPL boot
//! ROM, and the DSP, all running on their own clock
//!
//! The scheduler feeds in master-clock cycles; the APU accumulates them as
//! credit and runs one SPC700 instruction whenever enough credit exists to
//! cover one SPC cycle (about 21 master clocks). Every 32 SPC cycles the
//! DSP produces one stereo sample.

mod dsp;

use bincode::{Decode, Encode};
use dsp::AudioDsp;
use retrio_common::boxedarray::BoxedByteArray;
use retrio_common::num::GetBit;
use spc700_emu::Spc700;
use spc700_emu::traits::BusInterface;

pub const AUDIO_RAM_LEN: usize = 64 * 1024;

pub const OUTPUT_FREQUENCY: u32 = 32_000;

// Master clocks per SPC700 clock (21.477MHz / 1.024MHz, rounded)
const MCLKS_PER_SPC_CYCLE: u64 = 21;

// One DSP sample per 32 SPC clocks
const SPC_CYCLES_PER_SAMPLE: u64 = 32;

// The on-chip boot ROM: waits for the main CPU handshake, accepts an
// upload through the ports, and jumps to it
const IPL_ROM: [u8; 64] = [
    0xCD, 0xEF, 0xBD, 0xE8, 0x00, 0xC6, 0x1D, 0xD0, 0xFC, 0x8F, 0xAA, 0xF4, 0x8F, 0xBB, 0xF5,
    0x78, 0xCC, 0xF4, 0xD0, 0xFB, 0x2F, 0x19, 0xEB, 0xF4, 0xD0, 0xFC, 0x7E, 0xF4, 0xD0, 0x0B,
    0xE4, 0xF5, 0xCB, 0xF4, 0xD7, 0x00, 0xFC, 0xD0, 0xEF, 0xAB, 0x01, 0x10, 0xEB, 0xBA, 0xF6,
    0xDA, 0x00, 0xBA, 0xF4, 0xC4, 0xF4, 0xDD, 0x5D, 0xD0, 0xDB, 0x1F, 0x00, 0x00, 0xC0, 0xFF,
    0x00, 0x00, 0xC0, 0xFF,
];

#[derive(Debug, Clone, Encode, Decode)]
struct ApuTimer {
    enabled: bool,
    divider: u8,
    spc_cycles_per_tick: u16,
    cycle_counter: u16,
    stage: u8,
    output: u8,
}

impl ApuTimer {
    fn new(spc_cycles_per_tick: u16) -> Self {
        Self {
            enabled: false,
            divider: 0,
            spc_cycles_per_tick,
            cycle_counter: 0,
            stage: 0,
            output: 0,
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if !self.enabled && enabled {
            self.stage = 0;
            self.output = 0;
        }
        self.enabled = enabled;
    }

    fn tick(&mut self) {
        self.cycle_counter += 1;
        if self.cycle_counter < self.spc_cycles_per_tick {
            return;
        }
        self.cycle_counter = 0;

        if !self.enabled {
            return;
        }

        self.stage = self.stage.wrapping_add(1);
        if self.stage == self.divider || (self.divider == 0 && self.stage == 0) {
            self.stage = 0;
            // 4-bit output counter
            self.output = (self.output + 1) & 0x0F;
        }
    }

    fn read_output(&mut self) -> u8 {
        std::mem::take(&mut self.output)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Apu {
    spc700: Spc700,
    dsp: AudioDsp,
    audio_ram: BoxedByteArray<AUDIO_RAM_LEN>,
    boot_rom_mapped: bool,
    // $2140-$2143 from the main CPU's perspective
    main_to_spc: [u8; 4],
    spc_to_main: [u8; 4],
    timers: [ApuTimer; 3],
    mclk_credit: u64,
    spc_cycle_count: u64,
    sample_queue: Vec<(f32, f32)>,
}

struct Spc700Bus<'a> {
    dsp: &'a mut AudioDsp,
    audio_ram: &'a mut BoxedByteArray<AUDIO_RAM_LEN>,
    boot_rom_mapped: &'a mut bool,
    main_to_spc: &'a mut [u8; 4],
    spc_to_main: &'a mut [u8; 4],
    timers: &'a mut [ApuTimer; 3],
}

impl Spc700Bus<'_> {
    fn read_register(&mut self, offset: u16) -> u8 {
        match offset {
            0xF0 => 0,
            0xF1 => {
                (u8::from(*self.boot_rom_mapped) << 7)
                    | (u8::from(self.timers[2].enabled) << 2)
                    | (u8::from(self.timers[1].enabled) << 1)
                    | u8::from(self.timers[0].enabled)
            }
            0xF2 => self.dsp.read_address(),
            0xF3 => self.dsp.read_register(),
            0xF4..=0xF7 => self.main_to_spc[usize::from(offset - 0xF4)],
            0xF8 | 0xF9 => 0,
            0xFA..=0xFC => self.timers[usize::from(offset - 0xFA)].divider,
            0xFD..=0xFF => self.timers[usize::from(offset - 0xFD)].read_output(),
            _ => 0,
        }
    }

    fn write_register(&mut self, offset: u16, value: u8) {
        match offset {
            0xF1 => {
                self.timers[0].set_enabled(value.bit(0));
                self.timers[1].set_enabled(value.bit(1));
                self.timers[2].set_enabled(value.bit(2));

                // Port latch clears
                if value.bit(4) {
                    self.main_to_spc[0] = 0;
                    self.main_to_spc[1] = 0;
                }
                if value.bit(5) {
                    self.main_to_spc[2] = 0;
                    self.main_to_spc[3] = 0;
                }

                *self.boot_rom_mapped = value.bit(7);
            }
            0xF2 => self.dsp.write_address(value),
            0xF3 => self.dsp.write_register(value),
            0xF4..=0xF7 => self.spc_to_main[usize::from(offset - 0xF4)] = value,
            0xFA..=0xFC => self.timers[usize::from(offset - 0xFA)].divider = value,
            _ => {}
        }
    }
}

impl BusInterface for Spc700Bus<'_> {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x00F0..=0x00FF => self.read_register(address),
            0xFFC0..=0xFFFF if *self.boot_rom_mapped => {
                IPL_ROM[usize::from(address - 0xFFC0)]
            }
            _ => self.audio_ram[usize::from(address)],
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        if let 0x00F0..=0x00FF = address {
            self.write_register(address, value);
        }
        // RAM sits underneath the register window and the IPL ROM
        self.audio_ram[usize::from(address)] = value;
    }

    fn idle(&mut self) {}
}

macro_rules! spc700_bus {
    ($self:expr) => {
        Spc700Bus {
            dsp: &mut $self.dsp,
            audio_ram: &mut $self.audio_ram,
            boot_rom_mapped: &mut $self.boot_rom_mapped,
            main_to_spc: &mut $self.main_to_spc,
            spc_to_main: &mut $self.spc_to_main,
            timers: &mut $self.timers,
        }
    };
}

impl Apu {
    pub fn new() -> Self {
        let mut apu = Self {
            spc700: Spc700::new(),
            dsp: AudioDsp::new(),
            audio_ram: BoxedByteArray::new(),
            boot_rom_mapped: true,
            main_to_spc: [0; 4],
            spc_to_main: [0; 4],
            timers: [ApuTimer::new(128), ApuTimer::new(128), ApuTimer::new(16)],
            mclk_credit: 0,
            spc_cycle_count: 0,
            sample_queue: Vec::new(),
        };
        apu.spc700.reset(&mut spc700_bus!(apu));
        apu
    }

    /// Advance the APU clock domain by the given number of master cycles.
    pub fn tick(&mut self, master_cycles: u64) {
        self.mclk_credit += master_cycles;

        while self.mclk_credit >= MCLKS_PER_SPC_CYCLE {
            let spc_cycles =
                u64::from(self.spc700.execute_instruction(&mut spc700_bus!(self)));
            self.mclk_credit = self
                .mclk_credit
                .saturating_sub(spc_cycles * MCLKS_PER_SPC_CYCLE);

            for _ in 0..spc_cycles {
                for timer in &mut self.timers {
                    timer.tick();
                }
            }

            let samples_before = self.spc_cycle_count / SPC_CYCLES_PER_SAMPLE;
            self.spc_cycle_count += spc_cycles;
            let samples_after = self.spc_cycle_count / SPC_CYCLES_PER_SAMPLE;
            for _ in samples_before..samples_after {
                let (left, right) = self.dsp.clock(&mut self.audio_ram);
                self.sample_queue.push((
                    f32::from(left) / -f32::from(i16::MIN),
                    f32::from(right) / -f32::from(i16::MIN),
                ));
            }
        }
    }

    /// Main-CPU side of the mailbox ports ($2140-$2143).
    pub fn read_port(&self, port: u16) -> u8 {
        self.spc_to_main[usize::from(port & 3)]
    }

    pub fn write_port(&mut self, port: u16, value: u8) {
        self.main_to_spc[usize::from(port & 3)] = value;
    }

    pub fn drain_samples_into(&mut self, out: &mut Vec<(f32, f32)>) {
        out.append(&mut self.sample_queue);
    }

    pub fn reset(&mut self) {
        self.boot_rom_mapped = true;
        self.main_to_spc = [0; 4];
        self.spc_to_main = [0; 4];
        self.spc700.reset(&mut spc700_bus!(self));
        self.dsp.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipl_rom_reports_ready_handshake() {
        let mut apu = Apu::new();

        // The IPL ROM signals readiness by writing $AA/$BB to ports 0/1
        apu.tick(100_000);
        assert_eq!(apu.read_port(0), 0xAA);
        assert_eq!(apu.read_port(1), 0xBB);
    }

    #[test]
    fn produces_samples_at_32khz_rate() {
        let mut apu = Apu::new();

        // One 60th of a second of master clocks at ~21.477MHz
        apu.tick(357_366);

        let mut samples = Vec::new();
        apu.drain_samples_into(&mut samples);
        // 32000 Hz / 60 = 533 samples, give or take accumulator slack
        assert!((500..=560).contains(&samples.len()), "{} samples", samples.len());
    }
}
