//! Work RAM and high RAM

use crate::HardwareMode;
use bincode::{Decode, Encode};
use rand::{RngExt, SeedableRng};
use retrio_common::boxedarray::BoxedByteArray;

// 8 banks of 4KB; DMG only ever sees the first two
const WRAM_LEN: usize = 8 * 4 * 1024;
const HRAM_LEN: usize = 127;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Memory {
    hardware_mode: HardwareMode,
    wram: BoxedByteArray<WRAM_LEN>,
    hram: [u8; HRAM_LEN],
    // SVBK; bank 0 acts as bank 1
    wram_bank: u8,
}

impl Memory {
    pub fn new(hardware_mode: HardwareMode, wram_seed: u64) -> Self {
        // Power-on WRAM contents are effectively random; seeding from the ROM
        // checksum keeps runs deterministic
        let mut wram = BoxedByteArray::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(wram_seed);
        rng.fill(wram.as_mut_slice());

        Self { hardware_mode, wram, hram: [0; HRAM_LEN], wram_bank: 1 }
    }

    fn banked_wram_addr(&self, address: u16) -> usize {
        match address & 0x1FFF {
            // $C000-$CFFF is always bank 0
            offset @ 0x0000..=0x0FFF => offset as usize,
            offset => {
                let bank = match self.hardware_mode {
                    HardwareMode::Dmg => 1,
                    HardwareMode::Cgb => self.wram_bank.max(1) as usize,
                };
                bank * 0x1000 + (offset as usize - 0x1000)
            }
        }
    }

    pub fn read_main_ram(&self, address: u16) -> u8 {
        self.wram[self.banked_wram_addr(address)]
    }

    pub fn write_main_ram(&mut self, address: u16, value: u8) {
        let wram_addr = self.banked_wram_addr(address);
        self.wram[wram_addr] = value;
    }

    pub fn read_hram(&self, address: u16) -> u8 {
        self.hram[(address & 0x7F) as usize % HRAM_LEN]
    }

    pub fn write_hram(&mut self, address: u16, value: u8) {
        self.hram[(address & 0x7F) as usize % HRAM_LEN] = value;
    }

    pub fn read_svbk(&self) -> u8 {
        0xF8 | self.wram_bank
    }

    pub fn write_svbk(&mut self, value: u8) {
        self.wram_bank = value & 0x07;
    }
}
