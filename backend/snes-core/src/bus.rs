//! System bus: 24-bit A-bus decode, the $21xx B-bus, WRAM and its data
//! port, open bus, and region-dependent access timing

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::dma::{self, DmaUnit};
use crate::ppu::Ppu;
use crate::registers::CpuInternalRegisters;
use bincode::{Decode, Encode};
use retrio_common::boxedarray::BoxedByteArray;
use retrio_common::frontend::JoypadState;
use retrio_common::num::{GetBit, U24Ext};
use wdc65816_emu::traits::BusInterface;

pub const WRAM_LEN: usize = 128 * 1024;

// Access costs in master cycles
const FAST_CYCLES: u64 = 6;
const SLOW_CYCLES: u64 = 8;
const XSLOW_CYCLES: u64 = 12;

#[derive(Debug, Encode, Decode)]
pub struct Bus {
    pub ppu: Ppu,
    pub wram: BoxedByteArray<WRAM_LEN>,
    // $2181-$2183: 17-bit auto-incrementing WRAM port address
    wram_port_address: u32,
    pub registers: CpuInternalRegisters,
    pub dma: DmaUnit,
    pub apu: Apu,
    pub cartridge: Cartridge,
    pub joypad: JoypadState,
    // $420D MEMSEL bit 0
    fast_rom_enabled: bool,
    open_bus: u8,
    pub cycles: u64,
}

impl Bus {
    pub fn new(ppu: Ppu, apu: Apu, cartridge: Cartridge) -> Self {
        Self {
            ppu,
            wram: BoxedByteArray::new(),
            wram_port_address: 0,
            registers: CpuInternalRegisters::new(),
            dma: DmaUnit::new(),
            apu,
            cartridge,
            joypad: JoypadState::default(),
            fast_rom_enabled: false,
            open_bus: 0,
            cycles: 0,
        }
    }

    pub fn add_cycles(&mut self, cycles: u64) {
        self.cycles += cycles;
    }

    fn access_cycles(&self, bank: u8, offset: u16) -> u64 {
        match bank & 0x7F {
            0x00..=0x3F => match offset {
                0x0000..=0x1FFF => SLOW_CYCLES,
                0x2000..=0x3FFF => FAST_CYCLES,
                0x4000..=0x41FF => XSLOW_CYCLES,
                0x4200..=0x5FFF => FAST_CYCLES,
                _ => {
                    if bank.bit(7) && self.fast_rom_enabled {
                        FAST_CYCLES
                    } else {
                        SLOW_CYCLES
                    }
                }
            },
            _ => {
                if bank.bit(7) && self.fast_rom_enabled {
                    FAST_CYCLES
                } else {
                    SLOW_CYCLES
                }
            }
        }
    }

    /// B-bus read ($2100-$21FF), shared by the CPU and DMA.
    pub fn read_b_bus(&mut self, address: u16) -> u8 {
        let value = match address {
            0x2134..=0x213F => self.ppu.read_register(address - 0x2100),
            0x2140..=0x217F => Some(self.apu.read_port(address)),
            0x2180 => {
                let value = self.wram[(self.wram_port_address as usize) & (WRAM_LEN - 1)];
                self.wram_port_address = (self.wram_port_address + 1) & 0x1_FFFF;
                Some(value)
            }
            _ => None,
        };

        match value {
            Some(value) => {
                self.open_bus = value;
                value
            }
            None => self.open_bus,
        }
    }

    /// B-bus write, shared by the CPU and DMA.
    pub fn write_b_bus(&mut self, address: u16, value: u8) {
        self.open_bus = value;

        match address {
            0x2100..=0x2133 => self.ppu.write_register(address - 0x2100, value),
            0x2140..=0x217F => self.apu.write_port(address, value),
            0x2180 => {
                let wram_addr = (self.wram_port_address as usize) & (WRAM_LEN - 1);
                self.wram[wram_addr] = value;
                self.wram_port_address = (self.wram_port_address + 1) & 0x1_FFFF;
            }
            0x2181 => self.wram_port_address.set_low_byte(value),
            0x2182 => self.wram_port_address.set_mid_byte(value),
            0x2183 => {
                self.wram_port_address.set_high_byte(value & 1);
            }
            _ => log::trace!("Unhandled B-bus write: {address:04X} {value:02X}"),
        }
    }

    fn read_internal(&mut self, address: u32) -> Option<u8> {
        let bank = address.high_byte();
        let offset = address as u16;

        match bank & 0x7F {
            0x7E | 0x7F if !bank.bit(7) => {
                Some(self.wram[(address as usize - 0x7E_0000) & (WRAM_LEN - 1)])
            }
            0x00..=0x3F => match offset {
                0x0000..=0x1FFF => Some(self.wram[usize::from(offset)]),
                0x2100..=0x21FF => Some(self.read_b_bus(offset)),
                0x4016 | 0x4017 => self.registers.read(offset, self.joypad),
                0x4200..=0x421F => self.registers.read(offset, self.joypad),
                0x420B => Some(self.dma.gpdma_enabled),
                0x420C => Some(self.dma.hdma_enabled),
                0x4300..=0x437F => Some(self.dma.read_register(offset - 0x4300)),
                _ => self.cartridge.read(bank, offset),
            },
            _ => self.cartridge.read(bank, offset),
        }
    }

    fn write_internal(&mut self, address: u32, value: u8) {
        let bank = address.high_byte();
        let offset = address as u16;

        match bank & 0x7F {
            0x7E | 0x7F if !bank.bit(7) => {
                self.wram[(address as usize - 0x7E_0000) & (WRAM_LEN - 1)] = value;
            }
            0x00..=0x3F => match offset {
                0x0000..=0x1FFF => self.wram[usize::from(offset)] = value,
                0x2100..=0x21FF => self.write_b_bus(offset, value),
                0x4016 | 0x4017 => {
                    self.registers.write(offset, value, self.joypad);
                }
                0x4200..=0x421F if offset != 0x420B && offset != 0x420C && offset != 0x420D => {
                    self.registers.write(offset, value, self.joypad);
                }
                // $420B starts general-purpose DMA immediately
                0x420B => {
                    self.dma.gpdma_enabled = value;
                    if value != 0 {
                        dma::execute_gpdma(self);
                    }
                }
                0x420C => self.dma.hdma_enabled = value,
                0x420D => self.fast_rom_enabled = value.bit(0),
                0x4300..=0x437F => self.dma.write_register(offset - 0x4300, value),
                _ => self.cartridge.write(bank, offset, value),
            },
            _ => self.cartridge.write(bank, offset, value),
        }
    }

    /// A-bus access on behalf of DMA; the B-bus is not reachable this way.
    pub fn dma_read_a_bus(&mut self, address: u32) -> u8 {
        let offset = address as u16;
        if (0x2100..=0x21FF).contains(&offset) && address.high_byte() & 0x7F <= 0x3F {
            return self.open_bus;
        }

        match self.read_internal(address) {
            Some(value) => {
                self.open_bus = value;
                value
            }
            None => self.open_bus,
        }
    }

    pub fn dma_write_a_bus(&mut self, address: u32, value: u8) {
        let offset = address as u16;
        if (0x2100..=0x21FF).contains(&offset) && address.high_byte() & 0x7F <= 0x3F {
            return;
        }
        self.write_internal(address, value);
    }
}

impl BusInterface for Bus {
    fn read(&mut self, address: u32) -> u8 {
        self.cycles += self.access_cycles(address.high_byte(), address as u16);

        match self.read_internal(address) {
            Some(value) => {
                self.open_bus = value;
                value
            }
            // Unmapped reads return the open-bus latch
            None => self.open_bus,
        }
    }

    fn write(&mut self, address: u32, value: u8) {
        self.cycles += self.access_cycles(address.high_byte(), address as u16);
        self.open_bus = value;
        self.write_internal(address, value);
    }

    fn idle(&mut self) {
        self.cycles += FAST_CYCLES;
    }

    fn nmi(&self) -> bool {
        self.registers.nmi_line()
    }

    fn irq(&self) -> bool {
        self.registers.irq_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    fn test_bus() -> Bus {
        let mut rom = vec![0; 512 * 1024];
        // Minimal valid LoROM header
        rom[0x7FC0..0x7FD5].copy_from_slice(b"BUS TEST             ");
        rom[0x7FD5] = 0x20;
        rom[0x7FD7] = 0x09;
        rom[0x7FDC] = 0xFF;
        rom[0x7FDD] = 0xFF;

        let cartridge = Cartridge::create(rom, None).unwrap();
        Bus::new(Ppu::new(), Apu::new(), cartridge)
    }

    #[test]
    fn open_bus_returns_last_read_value() {
        let mut bus = test_bus();
        bus.wram[0x100] = 0xA7;

        let mapped = bus.read(0x7E_0100);
        assert_eq!(mapped, 0xA7);

        // Bank $5F is unmapped in LoROM low halves
        let unmapped = bus.read(0x5F_0000);
        assert_eq!(unmapped, 0xA7, "unmapped read must return the latch");
    }

    #[test]
    fn wram_data_port_auto_increments() {
        let mut bus = test_bus();

        bus.write(0x00_2181, 0x10);
        bus.write(0x00_2182, 0x00);
        bus.write(0x00_2183, 0x00);
        bus.write(0x00_2180, 0xAA);
        bus.write(0x00_2180, 0xBB);

        assert_eq!(bus.wram[0x10], 0xAA);
        assert_eq!(bus.wram[0x11], 0xBB);

        bus.write(0x00_2181, 0x10);
        bus.write(0x00_2182, 0x00);
        bus.write(0x00_2183, 0x00);
        assert_eq!(bus.read(0x00_2180), 0xAA);
        assert_eq!(bus.read(0x00_2180), 0xBB);
    }

    #[test]
    fn gpdma_writes_to_vram_through_the_b_bus() {
        let mut bus = test_bus();
        for (i, value) in [0x11, 0x22, 0x33, 0x44].into_iter().enumerate() {
            bus.wram[i] = value;
        }

        // VRAM word address 0, increment after the high byte
        bus.write(0x00_2115, 0x80);
        bus.write(0x00_2116, 0x00);
        bus.write(0x00_2117, 0x00);

        // Channel 0: CPU->PPU, mode 1 (two registers), B-bus $2118,
        // A-bus $7E:0000, 4 bytes
        bus.write(0x00_4300, 0x01);
        bus.write(0x00_4301, 0x18);
        bus.write(0x00_4302, 0x00);
        bus.write(0x00_4303, 0x00);
        bus.write(0x00_4304, 0x7E);
        bus.write(0x00_4305, 0x04);
        bus.write(0x00_4306, 0x00);

        bus.write(0x00_420B, 0x01);

        let vram = bus.ppu.vram_word(0);
        assert_eq!(vram, 0x2211);
        assert_eq!(bus.ppu.vram_word(1), 0x4433);
    }
}
