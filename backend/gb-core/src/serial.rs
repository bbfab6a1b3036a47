//! Serial port: no link cable is attached, but transfer timing and the
//! serial interrupt are emulated so games polling it make progress

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

// Internal clock: 8192 Hz, so 512 CPU cycles per bit
const CYCLES_PER_BIT: u32 = 512;

#[derive(Debug, Clone, Encode, Decode)]
pub struct SerialPort {
    data: u8,
    control: u8,
    bits_remaining: u8,
    cycle_counter: u32,
}

impl SerialPort {
    pub fn new() -> Self {
        Self { data: 0, control: 0, bits_remaining: 0, cycle_counter: 0 }
    }

    pub fn read_data(&self) -> u8 {
        self.data
    }

    pub fn write_data(&mut self, value: u8) {
        self.data = value;
    }

    pub fn read_control(&self) -> u8 {
        0x7E | self.control
    }

    pub fn write_control(&mut self, value: u8) {
        self.control = value & 0x81;
        if value.bit(7) && value.bit(0) {
            // Transfer with internal clock
            self.bits_remaining = 8;
            self.cycle_counter = 0;
        }
    }

    pub fn tick(&mut self, t_cycles: u32, interrupts: &mut InterruptRegisters) {
        if self.bits_remaining == 0 {
            return;
        }

        self.cycle_counter += t_cycles;
        while self.cycle_counter >= CYCLES_PER_BIT && self.bits_remaining > 0 {
            self.cycle_counter -= CYCLES_PER_BIT;
            // With nothing on the other end, ones shift in
            self.data = (self.data << 1) | 1;
            self.bits_remaining -= 1;

            if self.bits_remaining == 0 {
                self.control &= !0x80;
                interrupts.request(InterruptType::Serial);
            }
        }
    }
}
