//! OAM DMA and the CGB VRAM DMA (general-purpose and HBlank flavors)

use crate::cartridge::Cartridge;
use crate::memory::Memory;
use crate::ppu::Ppu;
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaUnit {
    // OAM DMA
    oam_dma_source: u8,
    oam_dma_index: Option<u8>,
    // CGB VRAM DMA
    vram_dma_source: u16,
    vram_dma_dest: u16,
    // Remaining length in 16-byte blocks minus one, as the register encodes it
    vram_dma_length: u8,
    hblank_dma_active: bool,
}

impl DmaUnit {
    pub fn new() -> Self {
        Self {
            oam_dma_source: 0xFF,
            oam_dma_index: None,
            vram_dma_source: 0,
            vram_dma_dest: 0,
            vram_dma_length: 0xFF,
            hblank_dma_active: false,
        }
    }

    pub fn read_dma_register(&self) -> u8 {
        self.oam_dma_source
    }

    pub fn write_dma_register(&mut self, value: u8) {
        self.oam_dma_source = value;
        self.oam_dma_index = Some(0);
    }

    pub fn oam_dma_in_progress(&self) -> bool {
        self.oam_dma_index.is_some()
    }

    /// One byte per machine cycle.
    pub fn oam_dma_tick(
        &mut self,
        m_cycles: u32,
        cartridge: &Cartridge,
        memory: &Memory,
        ppu: &mut Ppu,
    ) {
        for _ in 0..m_cycles {
            let Some(index) = self.oam_dma_index else { return };

            let source = (u16::from(self.oam_dma_source) << 8) | u16::from(index);
            let value = match source {
                0x0000..=0x7FFF => cartridge.read_rom(source),
                0x8000..=0x9FFF => ppu.read_vram(source),
                0xA000..=0xBFFF => cartridge.read_ram(source),
                _ => memory.read_main_ram(source),
            };
            ppu.write_oam_dma(index, value);

            self.oam_dma_index = if index == 159 { None } else { Some(index + 1) };
        }
    }

    pub fn write_hdma1(&mut self, value: u8) {
        self.vram_dma_source = (self.vram_dma_source & 0x00FF) | (u16::from(value) << 8);
    }

    pub fn write_hdma2(&mut self, value: u8) {
        self.vram_dma_source = (self.vram_dma_source & 0xFF00) | u16::from(value & 0xF0);
    }

    pub fn write_hdma3(&mut self, value: u8) {
        self.vram_dma_dest = (self.vram_dma_dest & 0x00FF) | (u16::from(value & 0x1F) << 8);
    }

    pub fn write_hdma4(&mut self, value: u8) {
        self.vram_dma_dest = (self.vram_dma_dest & 0xFF00) | u16::from(value & 0xF0);
    }

    pub fn read_hdma5(&self) -> u8 {
        if self.hblank_dma_active {
            self.vram_dma_length
        } else {
            0x80 | self.vram_dma_length
        }
    }

    /// Returns the number of machine cycles the CPU is stalled for (general
    /// DMA copies everything immediately).
    pub fn write_hdma5(
        &mut self,
        value: u8,
        cartridge: &Cartridge,
        memory: &Memory,
        ppu: &mut Ppu,
    ) -> u32 {
        if self.hblank_dma_active && !value.bit(7) {
            // Cancel an in-flight HBlank DMA
            self.hblank_dma_active = false;
            self.vram_dma_length = value & 0x7F;
            return 0;
        }

        self.vram_dma_length = value & 0x7F;

        if value.bit(7) {
            self.hblank_dma_active = true;
            0
        } else {
            // General-purpose DMA: copy all blocks at once
            let blocks = u32::from(self.vram_dma_length) + 1;
            for _ in 0..blocks {
                self.copy_block(cartridge, memory, ppu);
            }
            self.vram_dma_length = 0xFF;
            // 8 machine cycles per 16-byte block
            8 * blocks
        }
    }

    fn copy_block(&mut self, cartridge: &Cartridge, memory: &Memory, ppu: &mut Ppu) {
        for _ in 0..16 {
            let source = self.vram_dma_source;
            let value = match source {
                0x0000..=0x7FFF => cartridge.read_rom(source),
                0xA000..=0xBFFF => cartridge.read_ram(source),
                0xC000..=0xFDFF => memory.read_main_ram(source),
                // VRAM-to-VRAM and other sources read as open garbage
                _ => 0xFF,
            };
            ppu.write_vram(0x8000 | (self.vram_dma_dest & 0x1FFF), value);

            self.vram_dma_source = self.vram_dma_source.wrapping_add(1);
            self.vram_dma_dest = self.vram_dma_dest.wrapping_add(1);
        }
    }

    /// Called once at each HBlank entry on visible scanlines.
    pub fn on_hblank(&mut self, cartridge: &Cartridge, memory: &Memory, ppu: &mut Ppu) -> u32 {
        if !self.hblank_dma_active {
            return 0;
        }

        self.copy_block(cartridge, memory, ppu);
        let (length, done) = self.vram_dma_length.overflowing_sub(1);
        self.vram_dma_length = length;
        if done {
            self.hblank_dma_active = false;
            self.vram_dma_length = 0xFF;
        }

        8
    }
}
