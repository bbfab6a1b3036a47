//! IE / IF interrupt registers

use crate::sm83::InterruptType;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct InterruptRegisters {
    enabled: u8,
    flags: u8,
}

impl InterruptRegisters {
    pub fn read_ie(&self) -> u8 {
        self.enabled
    }

    pub fn write_ie(&mut self, value: u8) {
        self.enabled = value;
    }

    pub fn read_if(&self) -> u8 {
        // Upper 3 bits read as 1
        self.flags | 0xE0
    }

    pub fn write_if(&mut self, value: u8) {
        self.flags = value & 0x1F;
    }

    pub fn request(&mut self, interrupt: InterruptType) {
        self.flags |= interrupt.register_mask();
    }

    pub fn clear(&mut self, interrupt: InterruptType) {
        self.flags &= !interrupt.register_mask();
    }

    pub fn pending(&self) -> bool {
        self.enabled & self.flags & 0x1F != 0
    }
}
