//! System bus: address decoding, wait states, open bus, I/O registers, and
//! DMA transfer execution

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::dma::{DmaChannel, DmaState, DmaTiming};
use crate::input::InputState;
use crate::interrupts::{InterruptRegisters, InterruptType};
use crate::memory::Memory;
use crate::ppu::Ppu;
use crate::timers::Timers;
use arm7tdmi_emu::bus::{BusInterface, MemoryCycle};
use bincode::{Decode, Encode};
use retrio_common::num::{GetBit, U16Ext};

const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct BusState {
    pub cycles: u64,
    // Most recent opcode fetch address, for BIOS read protection
    pub cpu_pc: u32,
    pub last_bios_word: u32,
    pub open_bus: u32,
    pub halted: bool,
}

impl BusState {
    fn new() -> Self {
        Self { cycles: 0, cpu_pc: 0, last_bios_word: 0, open_bus: 0, halted: false }
    }
}

#[derive(Debug, Encode, Decode)]
pub struct Bus {
    pub ppu: Ppu,
    pub memory: Memory,
    pub dma: DmaState,
    pub timers: Timers,
    pub interrupts: InterruptRegisters,
    pub inputs: InputState,
    pub state: BusState,
    pub apu: Apu,
    pub cartridge: Cartridge,
    waitcnt: u16,
    postflg: u8,
    // Wait-state tables indexed by the address high nibble:
    // (non-sequential, sequential) extra cycles for a 16-bit access
    rom_wait_n: [u64; 16],
    rom_wait_s: [u64; 16],
}

impl Bus {
    pub fn new(
        ppu: Ppu,
        memory: Memory,
        apu: Apu,
        cartridge: Cartridge,
    ) -> Self {
        let mut bus = Self {
            ppu,
            memory,
            dma: DmaState::new(),
            timers: Timers::new(),
            interrupts: InterruptRegisters::new(),
            inputs: InputState::new(),
            state: BusState::new(),
            apu,
            cartridge,
            waitcnt: 0,
            postflg: 0,
            rom_wait_n: [0; 16],
            rom_wait_s: [0; 16],
        };
        bus.rebuild_wait_tables();
        bus
    }

    fn rebuild_wait_tables(&mut self) {
        const NONSEQ: [u64; 4] = [4, 3, 2, 8];

        let ws0_n = NONSEQ[usize::from((self.waitcnt >> 2) & 3)];
        let ws0_s = if self.waitcnt.bit(4) { 1 } else { 2 };
        let ws1_n = NONSEQ[usize::from((self.waitcnt >> 5) & 3)];
        let ws1_s = if self.waitcnt.bit(7) { 1 } else { 4 };
        let ws2_n = NONSEQ[usize::from((self.waitcnt >> 8) & 3)];
        let ws2_s = if self.waitcnt.bit(10) { 1 } else { 8 };
        let sram = NONSEQ[usize::from(self.waitcnt & 3)];

        self.rom_wait_n = [0; 16];
        self.rom_wait_s = [0; 16];
        for nibble in [0x8, 0x9] {
            self.rom_wait_n[nibble] = ws0_n;
            self.rom_wait_s[nibble] = ws0_s;
        }
        for nibble in [0xA, 0xB] {
            self.rom_wait_n[nibble] = ws1_n;
            self.rom_wait_s[nibble] = ws1_s;
        }
        for nibble in [0xC, 0xD] {
            self.rom_wait_n[nibble] = ws2_n;
            self.rom_wait_s[nibble] = ws2_s;
        }
        for nibble in [0xE, 0xF] {
            self.rom_wait_n[nibble] = sram;
            self.rom_wait_s[nibble] = sram;
        }
    }

    fn rom_access_cycles(&self, address: u32, cycle: MemoryCycle) -> u64 {
        let nibble = ((address >> 24) & 0xF) as usize;
        1 + match cycle {
            MemoryCycle::N => self.rom_wait_n[nibble],
            MemoryCycle::S => self.rom_wait_s[nibble],
        }
    }

    fn bios_accessible(&self) -> bool {
        self.state.cpu_pc < 0x0000_4000
    }

    fn update_open_bus(&mut self, value: u32) {
        self.state.open_bus = value;
    }

    // 16-bit primary access path; byte and word accesses decompose onto it

    fn read_halfword_internal(&mut self, address: u32, cycle: MemoryCycle) -> u16 {
        match address >> 24 {
            0x00 => {
                self.state.cycles += 1;
                if address < 0x0000_4000 && self.bios_accessible() {
                    let word = u32::from_le_bytes([
                        self.memory.read_bios(address & !3),
                        self.memory.read_bios((address & !3) + 1),
                        self.memory.read_bios((address & !3) + 2),
                        self.memory.read_bios((address & !3) + 3),
                    ]);
                    self.state.last_bios_word = word;
                    (word >> (8 * (address & 2))) as u16
                } else {
                    // Protected or unmapped: the BIOS latch
                    (self.state.last_bios_word >> (8 * (address & 2))) as u16
                }
            }
            0x02 => {
                self.state.cycles += 3;
                u16::from_le_bytes([
                    self.memory.read_ewram(address),
                    self.memory.read_ewram(address + 1),
                ])
            }
            0x03 => {
                self.state.cycles += 1;
                u16::from_le_bytes([
                    self.memory.read_iwram(address),
                    self.memory.read_iwram(address + 1),
                ])
            }
            0x04 => {
                self.state.cycles += 1;
                self.read_io_register(address & 0x3FF)
            }
            0x05 => {
                self.state.cycles += 1;
                u16::from_le_bytes([
                    self.ppu.read_palette(address),
                    self.ppu.read_palette(address + 1),
                ])
            }
            0x06 => {
                self.state.cycles += 1;
                u16::from_le_bytes([self.ppu.read_vram(address), self.ppu.read_vram(address + 1)])
            }
            0x07 => {
                self.state.cycles += 1;
                u16::from_le_bytes([self.ppu.read_oam(address), self.ppu.read_oam(address + 1)])
            }
            0x08..=0x0D => {
                self.state.cycles += self.rom_access_cycles(address, cycle);
                if self.cartridge.is_eeprom_address(address) {
                    return u16::from(self.cartridge.read_eeprom_bit());
                }
                if let Some(value) = self.cartridge.read_register_halfword(address) {
                    return value;
                }
                self.cartridge.read_rom_halfword(address)
            }
            0x0E | 0x0F => {
                // The save-RAM bus is 8 bits wide; bytes replicate
                self.state.cycles += self.rom_access_cycles(address, MemoryCycle::N);
                let byte = self.cartridge.read_sram_byte(address);
                u16::from_le_bytes([byte, byte])
            }
            _ => {
                self.state.cycles += 1;
                // Open bus
                (self.state.open_bus >> (8 * (address & 2))) as u16
            }
        }
    }

    fn write_halfword_internal(&mut self, address: u32, value: u16, cycle: MemoryCycle) {
        match address >> 24 {
            0x00 => {
                // BIOS is not writable
                self.state.cycles += 1;
            }
            0x02 => {
                self.state.cycles += 3;
                self.memory.write_ewram(address, value.lsb());
                self.memory.write_ewram(address + 1, value.msb());
            }
            0x03 => {
                self.state.cycles += 1;
                self.memory.write_iwram(address, value.lsb());
                self.memory.write_iwram(address + 1, value.msb());
            }
            0x04 => {
                self.state.cycles += 1;
                self.write_io_register(address & 0x3FF, value);
            }
            0x05 => {
                self.state.cycles += 1;
                self.ppu.write_palette(address, value.lsb());
                self.ppu.write_palette(address + 1, value.msb());
            }
            0x06 => {
                self.state.cycles += 1;
                self.ppu.write_vram(address, value.lsb());
                self.ppu.write_vram(address + 1, value.msb());
            }
            0x07 => {
                self.state.cycles += 1;
                self.ppu.write_oam(address, value.lsb());
                self.ppu.write_oam(address + 1, value.msb());
            }
            0x08..=0x0D => {
                self.state.cycles += self.rom_access_cycles(address, cycle);
                if self.cartridge.is_eeprom_address(address) {
                    self.cartridge.write_eeprom_bit(value.bit(0));
                } else {
                    self.cartridge.write_rom_halfword(address, value);
                }
            }
            0x0E | 0x0F => {
                self.state.cycles += self.rom_access_cycles(address, MemoryCycle::N);
                self.cartridge.write_sram_byte(address, value.lsb());
            }
            _ => {
                self.state.cycles += 1;
            }
        }
    }

    fn read_io_register(&mut self, offset: u32) -> u16 {
        match offset {
            0x00..=0x56 => self.ppu.read_register(offset),
            0x60..=0x9F => self.apu.read_register(offset),
            0xB0..=0xDF => self.read_dma_register(offset),
            0x100 | 0x104 | 0x108 | 0x10C => {
                self.timers.read_counter(((offset - 0x100) / 4) as usize)
            }
            0x102 | 0x106 | 0x10A | 0x10E => {
                self.timers.read_control(((offset - 0x100) / 4) as usize)
            }
            0x130 => self.inputs.read_keyinput(),
            0x132 => self.inputs.read_keycnt(),
            0x200 => self.interrupts.read_ie(),
            0x202 => self.interrupts.read_if(),
            0x204 => self.waitcnt,
            0x208 => self.interrupts.read_ime(),
            0x300 => self.postflg.into(),
            _ => {
                log::debug!("Unexpected I/O register read: {offset:03X}");
                (self.state.open_bus & 0xFFFF) as u16
            }
        }
    }

    fn read_dma_register(&mut self, offset: u32) -> u16 {
        let channel_index = ((offset - 0xB0) / 12) as usize;
        let channel = &self.dma.channels[channel_index];
        match (offset - 0xB0) % 12 {
            // Source/dest/count are write-only; only control reads back
            0xA => channel.control,
            _ => 0,
        }
    }

    fn write_io_register(&mut self, offset: u32, value: u16) {
        match offset {
            0x00..=0x56 => self.ppu.write_register(offset, value),
            0x60..=0xA7 => self.apu.write_register(offset, value),
            0xB0..=0xDF => self.write_dma_register(offset, value),
            0x100 | 0x104 | 0x108 | 0x10C => {
                self.timers.write_reload(((offset - 0x100) / 4) as usize, value);
            }
            0x102 | 0x106 | 0x10A | 0x10E => {
                self.timers.write_control(((offset - 0x100) / 4) as usize, value);
            }
            0x132 => self.inputs.write_keycnt(value),
            0x200 => self.interrupts.write_ie(value),
            0x202 => self.interrupts.write_if(value),
            0x204 => {
                self.waitcnt = value;
                self.rebuild_wait_tables();
            }
            0x208 => self.interrupts.write_ime(value),
            0x300 => {
                self.postflg = value.lsb() & 1;
                // HALTCNT is the high byte; any write halts until the next
                // enabled interrupt
                self.state.halted = true;
            }
            _ => {
                log::debug!("Unexpected I/O register write: {offset:03X} {value:04X}");
            }
        }
    }

    fn write_dma_register(&mut self, offset: u32, value: u16) {
        let channel_index = ((offset - 0xB0) / 12) as usize;
        let channel = &mut self.dma.channels[channel_index];
        match (offset - 0xB0) % 12 {
            0x0 => channel.source_address.set_halfword_low(value),
            0x2 => channel.source_address.set_halfword_high(value),
            0x4 => channel.dest_address.set_halfword_low(value),
            0x6 => channel.dest_address.set_halfword_high(value),
            0x8 => channel.word_count = value,
            0xA => self.dma.write_control(channel_index, value),
            _ => {}
        }
    }

    /// Run the highest-priority pending DMA to completion (classic atomic
    /// model). Returns false if no DMA was pending.
    pub fn try_progress_dma(&mut self) -> bool {
        let Some(index) = self.dma.next_pending() else { return false };
        self.dma.channels[index].pending = false;

        // Channel startup overhead
        self.state.cycles += 2;

        let channel = self.dma.channels[index].clone();
        let count = channel.effective_count(index);

        log::trace!(
            "DMA{index}: {:08X} -> {:08X}, {count} units",
            channel.internal_source,
            channel.internal_dest
        );

        // EEPROM DMAs reveal the EEPROM's address width
        if index == 3
            && (self.cartridge.is_eeprom_address(channel.internal_dest)
                || self.cartridge.is_eeprom_address(channel.internal_source))
        {
            self.cartridge.configure_eeprom_size(count);
        }

        if channel.is_fifo_mode(index) {
            self.run_fifo_dma(index, &channel);
        } else {
            self.run_normal_dma(index, &channel, count);
        }

        if channel.irq_enabled() {
            self.interrupts.request(InterruptType::Dma(index as u8));
        }

        let channel = &mut self.dma.channels[index];
        if channel.repeat() && channel.timing() != DmaTiming::Immediate {
            if channel.dest_mode() == crate::dma::AddressMode::IncrementReload {
                channel.internal_dest = channel.dest_address;
            }
        } else {
            // One-shot: clear the enable bit
            channel.control &= !(1 << 15);
        }

        true
    }

    fn run_fifo_dma(&mut self, index: usize, channel: &DmaChannel) {
        let mut source = channel.internal_source;
        for _ in 0..4 {
            let value = self.read_word(source, MemoryCycle::S);
            match channel.internal_dest {
                FIFO_A_ADDRESS => self.apu.write_fifo_a_word(value),
                FIFO_B_ADDRESS => self.apu.write_fifo_b_word(value),
                other => log::debug!("FIFO DMA to unexpected address {other:08X}"),
            }
            self.state.cycles += 1;
            source = DmaChannel::advance(source, channel.source_mode(), 4);
        }
        self.dma.channels[index].internal_source = source;
    }

    fn run_normal_dma(&mut self, index: usize, channel: &DmaChannel, count: u32) {
        let step = if channel.transfer_words() { 4 } else { 2 };
        let mut source = channel.internal_source;
        let mut dest = channel.internal_dest;

        for _ in 0..count {
            if channel.transfer_words() {
                let value = self.read_word(source, MemoryCycle::S);
                self.write_word(dest, value, MemoryCycle::S);
            } else {
                let value = self.read_halfword(source, MemoryCycle::S);
                self.write_halfword(dest, value, MemoryCycle::S);
            }
            source = DmaChannel::advance(source, channel.source_mode(), step);
            dest = DmaChannel::advance(dest, channel.dest_mode(), step);
        }

        let channel_state = &mut self.dma.channels[index];
        channel_state.internal_source = source;
        channel_state.internal_dest = dest;
    }
}

// Halfword-granular register helpers for the 32-bit DMA address registers
trait SetHalfword {
    fn set_halfword_low(&mut self, value: u16);
    fn set_halfword_high(&mut self, value: u16);
}

impl SetHalfword for u32 {
    fn set_halfword_low(&mut self, value: u16) {
        *self = (*self & 0xFFFF_0000) | u32::from(value);
    }

    fn set_halfword_high(&mut self, value: u16) {
        *self = (*self & 0x0000_FFFF) | (u32::from(value) << 16);
    }
}

impl BusInterface for Bus {
    fn read_byte(&mut self, address: u32, cycle: MemoryCycle) -> u8 {
        let halfword = self.read_halfword_internal(address & !1, cycle);
        let value = if address.bit(0) { halfword.msb() } else { halfword.lsb() };
        self.update_open_bus(u32::from(value) * 0x0101_0101);
        value
    }

    fn read_halfword(&mut self, address: u32, cycle: MemoryCycle) -> u16 {
        let value = self.read_halfword_internal(address & !1, cycle);
        self.update_open_bus(u32::from(value) * 0x0001_0001);
        value
    }

    fn read_word(&mut self, address: u32, cycle: MemoryCycle) -> u32 {
        let address = address & !3;
        let low = self.read_halfword_internal(address, cycle);
        let high = self.read_halfword_internal(address + 2, MemoryCycle::S);
        let value = u32::from(low) | (u32::from(high) << 16);
        self.update_open_bus(value);
        value
    }

    fn fetch_opcode_halfword(&mut self, address: u32, cycle: MemoryCycle) -> u16 {
        self.state.cpu_pc = address;
        self.read_halfword(address, cycle)
    }

    fn fetch_opcode_word(&mut self, address: u32, cycle: MemoryCycle) -> u32 {
        self.state.cpu_pc = address;
        self.read_word(address, cycle)
    }

    fn write_byte(&mut self, address: u32, value: u8, cycle: MemoryCycle) {
        match address >> 24 {
            // Byte stores to VRAM/palette write the byte to both halves of
            // the halfword; byte stores to OAM are ignored
            0x05 | 0x06 => {
                self.write_halfword_internal(
                    address & !1,
                    u16::from_le_bytes([value, value]),
                    cycle,
                );
            }
            0x07 => {
                self.state.cycles += 1;
            }
            0x0E | 0x0F => {
                self.state.cycles += self.rom_access_cycles(address, MemoryCycle::N);
                self.cartridge.write_sram_byte(address, value);
            }
            _ => {
                let halfword = match address >> 24 {
                    0x02 | 0x03 | 0x04 => {
                        // Read-modify-write of the containing halfword
                        let current = match address >> 24 {
                            0x02 => u16::from_le_bytes([
                                self.memory.read_ewram(address & !1),
                                self.memory.read_ewram((address & !1) + 1),
                            ]),
                            0x03 => u16::from_le_bytes([
                                self.memory.read_iwram(address & !1),
                                self.memory.read_iwram((address & !1) + 1),
                            ]),
                            _ => self.read_io_register(address & 0x3FE),
                        };
                        let mut halfword = current;
                        if address.bit(0) {
                            halfword.set_msb(value);
                        } else {
                            halfword.set_lsb(value);
                        }
                        halfword
                    }
                    _ => u16::from_le_bytes([value, value]),
                };
                self.write_halfword_internal(address & !1, halfword, cycle);
            }
        }
    }

    fn write_halfword(&mut self, address: u32, value: u16, cycle: MemoryCycle) {
        self.write_halfword_internal(address & !1, value, cycle);
    }

    fn write_word(&mut self, address: u32, value: u32, cycle: MemoryCycle) {
        let address = address & !3;
        self.write_halfword_internal(address, value as u16, cycle);
        self.write_halfword_internal(address + 2, (value >> 16) as u16, MemoryCycle::S);
    }

    fn irq(&self) -> bool {
        self.interrupts.irq_line()
    }

    fn internal_cycles(&mut self, cycles: u32) {
        self.state.cycles += u64::from(cycles);
    }
}
