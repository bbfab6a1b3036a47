//! BIOS, EWRAM, and IWRAM
//!
//! No BIOS image is required: the only BIOS code games rely on jumping into
//! is the IRQ dispatcher, which is written into the BIOS region as literal
//! ARM words at construction. SWI calls are high-level-emulated by the bus.

use crate::api::GbaLoadError;
use bincode::{Decode, Encode};
use retrio_common::boxedarray::BoxedByteArray;

pub const BIOS_LEN: usize = 16 * 1024;
const EWRAM_LEN: usize = 256 * 1024;
const IWRAM_LEN: usize = 32 * 1024;

// The standard BIOS IRQ handler:
//   $18: stmfd sp!, {r0-r3, r12, lr}
//   $1C: mov   r0, #$04000000
//   $20: add   lr, pc, #0
//   $24: ldr   pc, [r0, #-4]        ; user handler pointer at $03FFFFFC
//   $28: ldmfd sp!, {r0-r3, r12, lr}
//   $2C: subs  pc, lr, #4
const IRQ_DISPATCHER: [(usize, u32); 6] = [
    (0x18, 0xE92D500F),
    (0x1C, 0xE3A00301),
    (0x20, 0xE28FE000),
    (0x24, 0xE510F004),
    (0x28, 0xE8BD500F),
    (0x2C, 0xE25EF004),
];

#[derive(Debug, Clone, Encode, Decode)]
pub struct Memory {
    bios: BoxedByteArray<BIOS_LEN>,
    ewram: BoxedByteArray<EWRAM_LEN>,
    iwram: BoxedByteArray<IWRAM_LEN>,
}

impl Memory {
    /// Build memory with either a real BIOS image or the HLE stub.
    ///
    /// # Errors
    ///
    /// Returns an error if a BIOS image is supplied with the wrong length.
    pub fn new(bios_rom: Option<Vec<u8>>) -> Result<Self, GbaLoadError> {
        let mut bios = BoxedByteArray::new();
        match bios_rom {
            Some(image) => {
                if image.len() != BIOS_LEN {
                    return Err(GbaLoadError::InvalidBiosLength {
                        expected: BIOS_LEN,
                        actual: image.len(),
                    });
                }
                bios.copy_from_slice(&image);
            }
            None => {
                for (address, word) in IRQ_DISPATCHER {
                    bios[address..address + 4].copy_from_slice(&word.to_le_bytes());
                }
            }
        }

        Ok(Self { bios, ewram: BoxedByteArray::new(), iwram: BoxedByteArray::new() })
    }

    pub fn read_bios(&self, address: u32) -> u8 {
        self.bios[(address as usize) & (BIOS_LEN - 1)]
    }

    pub fn read_ewram(&self, address: u32) -> u8 {
        self.ewram[(address as usize) & (EWRAM_LEN - 1)]
    }

    pub fn write_ewram(&mut self, address: u32, value: u8) {
        self.ewram[(address as usize) & (EWRAM_LEN - 1)] = value;
    }

    pub fn read_iwram(&self, address: u32) -> u8 {
        self.iwram[(address as usize) & (IWRAM_LEN - 1)]
    }

    pub fn write_iwram(&mut self, address: u32, value: u8) {
        self.iwram[(address as usize) & (IWRAM_LEN - 1)] = value;
    }
}
