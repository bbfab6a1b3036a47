//! Flash ROM save memory (64KB and 128KB parts)
//!
//! Commands are issued through the magic sequence $AA@$5555, $55@$2AAA,
//! command@$5555. Writes can only clear bits; erasing fills $FF.

use bincode::{Decode, Encode};

const SECTOR_LEN: usize = 4 * 1024;
const BANK_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum CommandState {
    Ready,
    FirstUnlock,
    SecondUnlock,
    EraseFirstUnlock,
    EraseSecondUnlock,
    EraseCommand,
    WriteByte,
    SelectBank,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct FlashRom {
    memory: Vec<u8>,
    banked: bool,
    bank: u8,
    state: CommandState,
    identifier_mode: bool,
    dirty: bool,
}

impl FlashRom {
    pub fn new(banked: bool, initial_save: Option<&[u8]>) -> Self {
        let len = if banked { 2 * BANK_LEN } else { BANK_LEN };
        let memory = match initial_save {
            Some(save) if save.len() == len => save.to_vec(),
            _ => vec![0xFF; len],
        };

        Self { memory, banked, bank: 0, state: CommandState::Ready, identifier_mode: false, dirty: false }
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

    fn bank_offset(&self) -> usize {
        usize::from(self.bank) * BANK_LEN
    }

    pub fn read(&self, address: u32) -> u8 {
        let offset = (address as usize) & (BANK_LEN - 1);

        if self.identifier_mode && offset < 2 {
            // Panasonic 64KB / Sanyo 128KB device identifiers
            return match (self.banked, offset) {
                (false, 0) => 0x32,
                (false, _) => 0x1B,
                (true, 0) => 0x62,
                (true, _) => 0x13,
            };
        }

        self.memory[self.bank_offset() + offset]
    }

    pub fn write(&mut self, address: u32, value: u8) {
        let offset = (address as usize) & (BANK_LEN - 1);

        match self.state {
            CommandState::Ready | CommandState::EraseCommand => {
                if offset == 0x5555 && value == 0xAA {
                    self.state = if self.state == CommandState::EraseCommand {
                        CommandState::EraseFirstUnlock
                    } else {
                        CommandState::FirstUnlock
                    };
                }
            }
            CommandState::FirstUnlock => {
                self.state = if offset == 0x2AAA && value == 0x55 {
                    CommandState::SecondUnlock
                } else {
                    CommandState::Ready
                };
            }
            CommandState::SecondUnlock => {
                self.state = CommandState::Ready;
                if offset != 0x5555 {
                    return;
                }
                match value {
                    // Enter / exit identifier mode
                    0x90 => self.identifier_mode = true,
                    0xF0 => self.identifier_mode = false,
                    0x80 => self.state = CommandState::EraseCommand,
                    0xA0 => self.state = CommandState::WriteByte,
                    0xB0 if self.banked => self.state = CommandState::SelectBank,
                    _ => log::debug!("Unknown flash command {value:02X}"),
                }
            }
            CommandState::EraseFirstUnlock => {
                self.state = if offset == 0x2AAA && value == 0x55 {
                    CommandState::EraseSecondUnlock
                } else {
                    CommandState::Ready
                };
            }
            CommandState::EraseSecondUnlock => {
                self.state = CommandState::Ready;
                match value {
                    0x10 if offset == 0x5555 => {
                        self.memory.fill(0xFF);
                        self.dirty = true;
                    }
                    0x30 => {
                        let sector_base =
                            self.bank_offset() + (offset & !(SECTOR_LEN - 1));
                        self.memory[sector_base..sector_base + SECTOR_LEN].fill(0xFF);
                        self.dirty = true;
                    }
                    _ => log::debug!("Unknown flash erase command {value:02X}"),
                }
            }
            CommandState::WriteByte => {
                // Flash programming can only clear bits
                let index = self.bank_offset() + offset;
                self.memory[index] &= value;
                self.dirty = true;
                self.state = CommandState::Ready;
            }
            CommandState::SelectBank => {
                if offset == 0 {
                    self.bank = value & 0x01;
                }
                self.state = CommandState::Ready;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlock(flash: &mut FlashRom) {
        flash.write(0x5555, 0xAA);
        flash.write(0x2AAA, 0x55);
    }

    #[test]
    fn chip_erase_fills_ff() {
        let mut flash = FlashRom::new(false, None);

        unlock(&mut flash);
        flash.write(0x5555, 0xA0);
        flash.write(0x1234, 0x00);
        assert_eq!(flash.read(0x1234), 0x00);

        // Full erase command sequence
        unlock(&mut flash);
        flash.write(0x5555, 0x80);
        unlock(&mut flash);
        flash.write(0x5555, 0x10);

        assert!(flash.memory().iter().all(|&byte| byte == 0xFF));
    }

    #[test]
    fn writes_only_clear_bits() {
        let mut flash = FlashRom::new(false, None);

        unlock(&mut flash);
        flash.write(0x5555, 0xA0);
        flash.write(0x100, 0x0F);

        unlock(&mut flash);
        flash.write(0x5555, 0xA0);
        flash.write(0x100, 0xF1);

        assert_eq!(flash.read(0x100), 0x01);
    }

    #[test]
    fn sector_erase_only_touches_one_sector() {
        let mut flash = FlashRom::new(false, None);

        unlock(&mut flash);
        flash.write(0x5555, 0xA0);
        flash.write(0x0000, 0x00);
        unlock(&mut flash);
        flash.write(0x5555, 0xA0);
        flash.write(0x1000, 0x00);

        unlock(&mut flash);
        flash.write(0x5555, 0x80);
        unlock(&mut flash);
        flash.write(0x1000, 0x30);

        assert_eq!(flash.read(0x0000), 0x00);
        assert_eq!(flash.read(0x1000), 0xFF);
    }

    #[test]
    fn banked_part_switches_banks() {
        let mut flash = FlashRom::new(true, None);

        unlock(&mut flash);
        flash.write(0x5555, 0xA0);
        flash.write(0x0042, 0x11);

        unlock(&mut flash);
        flash.write(0x5555, 0xB0);
        flash.write(0x0000, 0x01);

        assert_eq!(flash.read(0x0042), 0xFF, "bank 1 is untouched");
    }
}
