//! Serial EEPROM save memory (512 bytes or 8KB)
//!
//! Games talk to the EEPROM one bit at a time through DMA transfers to and
//! from the high end of the ROM address space. The address width (6 or 14
//! bits) is inferred from the length of the first DMA.

use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum State {
    ReceiveCommand,
    ReceiveWriteData { address: u16 },
    ReadJunkBits { address: u16 },
    ReadData { address: u16 },
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Eeprom {
    memory: Vec<u8>,
    address_bits: u8,
    state: State,
    shift: u64,
    shift_count: u8,
    dirty: bool,
}

impl Eeprom {
    pub fn new(address_bits: u8, initial_save: Option<&[u8]>) -> Self {
        // 6-bit addressing = 64 doublewords; 14-bit = 1024 (addresses past
        // the end wrap)
        let len = if address_bits == 6 { 512 } else { 8 * 1024 };
        let memory = match initial_save {
            Some(save) if save.len() == len => save.to_vec(),
            _ => vec![0xFF; len],
        };

        Self {
            memory,
            address_bits,
            state: State::ReceiveCommand,
            shift: 0,
            shift_count: 0,
            dirty: false,
        }
    }

    pub fn address_bits(&self) -> u8 {
        self.address_bits
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn set_memory(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() == self.memory.len() {
            self.memory.copy_from_slice(bytes);
            true
        } else {
            false
        }
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn doubleword_index(&self, address: u16) -> usize {
        (usize::from(address) * 8) % self.memory.len()
    }

    pub fn write_bit(&mut self, bit: bool) {
        match self.state {
            State::ReceiveCommand => {
                self.shift = (self.shift << 1) | u64::from(bit);
                self.shift_count += 1;

                let command_len = 2 + u32::from(self.address_bits);
                if u32::from(self.shift_count) < command_len {
                    return;
                }

                let request = (self.shift >> self.address_bits) & 0b11;
                let address = (self.shift & ((1 << self.address_bits) - 1)) as u16;
                self.shift = 0;
                self.shift_count = 0;

                match request {
                    0b11 => {
                        // Read request; one terminator bit follows
                        self.state = State::ReadJunkBits { address };
                    }
                    0b10 => {
                        self.state = State::ReceiveWriteData { address };
                    }
                    _ => {
                        log::debug!("Unknown EEPROM request bits: {request:02b}");
                    }
                }
            }
            State::ReceiveWriteData { address } => {
                self.shift = (self.shift << 1) | u64::from(bit);
                self.shift_count += 1;

                // 64 data bits plus the terminator
                if self.shift_count < 65 {
                    return;
                }

                let data = self.shift >> 1;
                let index = self.doubleword_index(address);
                self.memory[index..index + 8].copy_from_slice(&data.to_be_bytes());
                self.dirty = true;

                self.shift = 0;
                self.shift_count = 0;
                self.state = State::ReceiveCommand;
            }
            State::ReadJunkBits { .. } | State::ReadData { .. } => {
                // The terminator bit of a read request lands here; ignore it
            }
        }
    }

    pub fn read_bit(&mut self) -> bool {
        match self.state {
            State::ReadJunkBits { address } => {
                self.shift_count += 1;
                if self.shift_count == 4 {
                    self.shift_count = 0;
                    let index = self.doubleword_index(address);
                    self.shift =
                        u64::from_be_bytes(self.memory[index..index + 8].try_into().unwrap());
                    self.state = State::ReadData { address };
                }
                false
            }
            State::ReadData { .. } => {
                let bit = self.shift.bit(63);
                self.shift <<= 1;
                self.shift_count += 1;
                if self.shift_count == 64 {
                    self.shift = 0;
                    self.shift_count = 0;
                    self.state = State::ReceiveCommand;
                }
                bit
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_command(eeprom: &mut Eeprom, bits: &[bool]) {
        for &bit in bits {
            eeprom.write_bit(bit);
        }
    }

    fn command_bits(request: u8, address: u16, address_bits: u8) -> Vec<bool> {
        let mut bits = vec![request.bit(1), request.bit(0)];
        for i in (0..address_bits).rev() {
            bits.push(address.bit(i));
        }
        bits
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut eeprom = Eeprom::new(6, None);

        // Write $0123456789ABCDEF to doubleword 5
        let mut bits = command_bits(0b10, 5, 6);
        let data = 0x0123_4567_89AB_CDEF_u64;
        for i in (0..64).rev() {
            bits.push(data.bit(i));
        }
        bits.push(false);
        write_command(&mut eeprom, &bits);

        // Read request for the same address
        let mut read_bits = command_bits(0b11, 5, 6);
        read_bits.push(false);
        write_command(&mut eeprom, &read_bits);

        let mut result = 0_u64;
        for _ in 0..4 {
            eeprom.read_bit();
        }
        for _ in 0..64 {
            result = (result << 1) | u64::from(eeprom.read_bit());
        }

        assert_eq!(result, data);
    }
}
