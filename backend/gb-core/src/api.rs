//! Game Boy emulator public interface and frame scheduler

use crate::apu::Apu;
use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::cgb::CgbRegisters;
use crate::dma::DmaUnit;
use crate::inputs::InputState;
use crate::interrupts::InterruptRegisters;
use crate::memory::Memory;
use crate::ppu::Ppu;
use crate::serial::SerialPort;
use crate::sm83::Sm83;
use crate::timer::GbTimer;
use crate::{CpuSpeed, HardwareMode, apu, ppu};
use bincode::{Decode, Encode};
use retrio_common::frontend::{EmulatorCore, FrameBuffer, JoypadState};
use retrio_common::num::GetBit;
use retrio_common::savestate::{self, SaveStateError};
use thiserror::Error;

const SAVE_STATE_VERSION: &str = "gb-1";

#[derive(Debug, Error)]
pub enum GameBoyLoadError {
    #[error("ROM image is too small to contain a header ({length} bytes)")]
    RomTooSmall { length: usize },
    #[error("ROM header contains invalid SRAM size byte: ${0:02X}")]
    InvalidSramByte(u8),
    #[error("ROM header contains unsupported mapper byte: ${0:02X}")]
    UnsupportedMapperByte(u8),
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GameBoyEmulatorConfig {
    pub force_dmg_mode: bool,
    pub force_cgb_mode: bool,
}

#[derive(Debug, Encode, Decode)]
pub struct GameBoyEmulator {
    hardware_mode: HardwareMode,
    // Field order fixes the save-state layout: CPU, then graphics, then the
    // bus-owned pieces, then audio, then the mapper
    cpu: Sm83,
    ppu: Ppu,
    memory: Memory,
    serial_port: SerialPort,
    interrupts: InterruptRegisters,
    cgb_registers: CgbRegisters,
    timer: GbTimer,
    dma_unit: DmaUnit,
    input_state: InputState,
    apu: Apu,
    cartridge: Cartridge,
    config: GameBoyEmulatorConfig,
    frame_count: u64,
}

impl GameBoyEmulator {
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded (e.g. unsupported
    /// mapper).
    pub fn create(
        rom: Vec<u8>,
        initial_sram: Option<Vec<u8>>,
        config: GameBoyEmulatorConfig,
    ) -> Result<Self, GameBoyLoadError> {
        let cgb_flag = rom.get(0x143).copied().unwrap_or(0);
        let cgb_software = cgb_flag.bit(7);
        let hardware_mode = match (cgb_software, config.force_dmg_mode, config.force_cgb_mode) {
            (_, _, true) => HardwareMode::Cgb,
            (_, true, false) => HardwareMode::Dmg,
            (true, false, false) => HardwareMode::Cgb,
            (false, false, false) => HardwareMode::Dmg,
        };

        log::info!("Running in {hardware_mode} mode");

        // Seed power-on WRAM from the ROM contents so runs are reproducible
        let wram_seed = rom.iter().map(|&byte| u64::from(byte)).sum();

        let cartridge = Cartridge::create(rom.into_boxed_slice(), initial_sram)?;

        Ok(Self {
            hardware_mode,
            cpu: Sm83::new(hardware_mode),
            ppu: Ppu::new(hardware_mode),
            memory: Memory::new(hardware_mode, wram_seed),
            serial_port: SerialPort::new(),
            interrupts: InterruptRegisters::default(),
            cgb_registers: CgbRegisters::new(),
            timer: GbTimer::new(),
            dma_unit: DmaUnit::new(),
            input_state: InputState::new(),
            apu: Apu::new(),
            cartridge,
            config,
            frame_count: 0,
        })
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn run_one_step(&mut self) {
        let mut bus = Bus {
            hardware_mode: self.hardware_mode,
            ppu: &mut self.ppu,
            apu: &mut self.apu,
            memory: &mut self.memory,
            serial_port: &mut self.serial_port,
            cartridge: &mut self.cartridge,
            interrupts: &mut self.interrupts,
            cgb_registers: &mut self.cgb_registers,
            timer: &mut self.timer,
            dma_unit: &mut self.dma_unit,
            input_state: &mut self.input_state,
            dma_stall_cycles: 0,
        };

        let mut t_cycles = self.cpu.execute_instruction(&mut bus);
        t_cycles += 4 * bus.dma_stall_cycles;

        // In double speed mode the CPU runs twice as fast as the dot clock
        let dots = match self.cgb_registers.speed {
            CpuSpeed::Normal => t_cycles,
            CpuSpeed::Double => t_cycles / 2,
        };

        self.timer.tick(t_cycles, &mut self.interrupts);
        self.serial_port.tick(t_cycles, &mut self.interrupts);
        self.dma_unit.oam_dma_tick(t_cycles / 4, &self.cartridge, &self.memory, &mut self.ppu);

        self.ppu.tick(dots, &mut self.interrupts);
        for _ in 0..self.ppu.take_hblank_events() {
            self.dma_unit.on_hblank(&self.cartridge, &self.memory, &mut self.ppu);
        }

        self.apu.tick(dots);
        self.cartridge.tick(dots.into());
    }
}

impl EmulatorCore for GameBoyEmulator {
    fn run_frame(&mut self, joypad: JoypadState) {
        self.input_state.set_joypad(joypad, &mut self.interrupts);

        loop {
            self.run_one_step();
            if self.ppu.take_frame_complete() {
                break;
            }
        }

        self.frame_count += 1;
    }

    fn reset(&mut self) {
        let rom = self.cartridge.take_rom();
        let sram = self.cartridge.sram().to_vec();
        let sram = (!sram.is_empty()).then_some(sram);

        *self = Self::create(rom.into_vec(), sram, self.config)
            .expect("reset cannot fail for a previously-loaded ROM");
    }

    fn frame_buffer(&self) -> FrameBuffer<'_> {
        FrameBuffer { pixels: self.ppu.frame_buffer(), size: ppu::FRAME_SIZE }
    }

    fn audio_sample_rate(&self) -> u32 {
        apu::OUTPUT_FREQUENCY
    }

    fn drain_audio_samples(&mut self, out: &mut Vec<(f32, f32)>) {
        self.apu.drain_samples_into(out);
    }

    fn save_state(&self, out: &mut Vec<u8>) -> Result<(), SaveStateError> {
        savestate::save(self, SAVE_STATE_VERSION, out)
    }

    fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let mut loaded: Self = savestate::load(bytes, SAVE_STATE_VERSION)?;

        // ROM images are not serialized; carry the current one over
        loaded.cartridge.set_rom(self.cartridge.take_rom());
        *self = loaded;
        Ok(())
    }

    fn has_battery_save(&self) -> bool {
        self.cartridge.has_battery()
    }

    fn battery_save(&self) -> Option<Vec<u8>> {
        self.cartridge.has_battery().then(|| self.cartridge.sram().to_vec())
    }

    fn set_battery_save(&mut self, bytes: &[u8]) {
        self.cartridge.set_sram(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_rom() -> Vec<u8> {
        // 32KB of NOPs with a minimal header (no mapper, no RAM)
        let mut rom = vec![0; 32 * 1024];
        rom[0x147] = 0x00;
        rom[0x149] = 0x00;
        rom
    }

    fn create_emulator() -> GameBoyEmulator {
        GameBoyEmulator::create(nop_rom(), None, GameBoyEmulatorConfig::default()).unwrap()
    }

    #[test]
    fn rejects_undersized_roms() {
        let result =
            GameBoyEmulator::create(vec![0; 64], None, GameBoyEmulatorConfig::default());
        assert!(matches!(result, Err(GameBoyLoadError::RomTooSmall { .. })));
    }

    #[test]
    fn frame_output_is_deterministic() {
        let mut first = create_emulator();
        let mut second = create_emulator();

        for _ in 0..3 {
            first.run_frame(JoypadState::default());
            second.run_frame(JoypadState::default());
        }

        assert_eq!(first.ppu.frame_buffer(), second.ppu.frame_buffer());

        let mut first_audio = Vec::new();
        let mut second_audio = Vec::new();
        first.drain_audio_samples(&mut first_audio);
        second.drain_audio_samples(&mut second_audio);
        assert_eq!(first_audio, second_audio);
    }

    #[test]
    fn save_state_round_trip() {
        let mut emulator = create_emulator();
        for _ in 0..2 {
            emulator.run_frame(JoypadState::default());
        }

        let mut state = Vec::new();
        emulator.save_state(&mut state).unwrap();

        let mut reference = Vec::new();
        emulator.run_frame(JoypadState::default());
        emulator.save_state(&mut reference).unwrap();

        // Restoring and re-running must land in exactly the same state
        emulator.load_state(&state).unwrap();
        emulator.run_frame(JoypadState::default());

        let mut after = Vec::new();
        emulator.save_state(&mut after).unwrap();
        assert_eq!(reference, after);
    }

    #[test]
    fn load_state_rejects_garbage() {
        let mut emulator = create_emulator();
        assert!(emulator.load_state(b"not a save state").is_err());
    }
}
