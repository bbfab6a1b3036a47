//! IE / IF / IME interrupt registers

use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    VBlank,
    HBlank,
    VCounter,
    Timer(u8),
    Serial,
    Dma(u8),
    Keypad,
    GamePak,
}

impl InterruptType {
    fn register_mask(self) -> u16 {
        match self {
            Self::VBlank => 1 << 0,
            Self::HBlank => 1 << 1,
            Self::VCounter => 1 << 2,
            Self::Timer(timer) => 1 << (3 + timer),
            Self::Serial => 1 << 7,
            Self::Dma(channel) => 1 << (8 + channel),
            Self::Keypad => 1 << 12,
            Self::GamePak => 1 << 13,
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct InterruptRegisters {
    enabled: u16,
    flags: u16,
    master_enable: bool,
}

impl InterruptRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, interrupt: InterruptType) {
        self.flags |= interrupt.register_mask();
    }

    pub fn read_ie(&self) -> u16 {
        self.enabled
    }

    pub fn write_ie(&mut self, value: u16) {
        self.enabled = value & 0x3FFF;
    }

    pub fn read_if(&self) -> u16 {
        self.flags
    }

    /// IF is acknowledge-on-write: set bits clear exactly those flags.
    pub fn write_if(&mut self, value: u16) {
        self.flags &= !value;
    }

    pub fn read_ime(&self) -> u16 {
        self.master_enable.into()
    }

    pub fn write_ime(&mut self, value: u16) {
        self.master_enable = value.bit(0);
    }

    pub fn irq_line(&self) -> bool {
        self.master_enable && self.enabled & self.flags != 0
    }

    /// HALTCNT wake condition ignores IME.
    pub fn any_enabled_flag_set(&self) -> bool {
        self.enabled & self.flags != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledging_clears_exactly_the_written_bits() {
        let mut interrupts = InterruptRegisters::new();
        interrupts.request(InterruptType::VBlank);
        interrupts.request(InterruptType::Timer(0));
        interrupts.request(InterruptType::Dma(3));

        interrupts.write_if(1 << 3);

        assert_eq!(interrupts.read_if(), (1 << 0) | (1 << 11));
    }

    #[test]
    fn irq_line_requires_master_enable() {
        let mut interrupts = InterruptRegisters::new();
        interrupts.write_ie(1);
        interrupts.request(InterruptType::VBlank);
        assert!(!interrupts.irq_line());

        interrupts.write_ime(1);
        assert!(interrupts.irq_line());
    }
}
