//! PPU register file and the VRAM/CGRAM/OAM data ports

use bincode::{Decode, Encode};
use retrio_common::boxedarray::{BoxedByteArray, BoxedWordArray};
use retrio_common::num::GetBit;

pub const VRAM_WORDS: usize = 0x8000;
pub const CGRAM_WORDS: usize = 256;
pub const OAM_LEN: usize = 544;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    // $2100 INIDISP
    pub forced_blank: bool,
    pub brightness: u8,
    // $2101 OBSEL
    pub obsel: u8,
    // $2102-$2103 + internal cursor (byte address into OAM)
    pub oam_address_reload: u16,
    pub oam_address: u16,
    oam_write_latch: u8,
    // $2105 BGMODE
    pub bg_mode: u8,
    pub bg3_priority: bool,
    pub bg_large_tiles: [bool; 4],
    // $2106 MOSAIC
    pub mosaic_size: u8,
    pub mosaic_enabled: [bool; 4],
    // $2107-$210A BGxSC
    pub bg_map_base: [u16; 4],
    pub bg_map_size: [u8; 4],
    // $210B-$210C BGxxNBA
    pub bg_tile_base: [u16; 4],
    // $210D-$2114 scroll, via the write-twice latch
    pub bg_hofs: [u16; 4],
    pub bg_vofs: [u16; 4],
    scroll_latch: u8,
    // $2115-$2119 VRAM port
    pub vmain: u8,
    pub vram_address: u16,
    vram_prefetch: u16,
    // $211A-$2120 mode 7
    pub m7sel: u8,
    pub m7a: i16,
    pub m7b: i16,
    pub m7c: i16,
    pub m7d: i16,
    pub m7x: i16,
    pub m7y: i16,
    pub m7hofs: i16,
    pub m7vofs: i16,
    m7_latch: u8,
    // $2121-$2122 CGRAM port
    pub cgram_address: u8,
    cgram_latch: Option<u8>,
    // $2123-$212B windows
    pub window_bg_select: [u8; 2],
    pub window_obj_select: u8,
    pub window_left: [u8; 2],
    pub window_right: [u8; 2],
    pub window_bg_logic: u8,
    pub window_obj_logic: u8,
    // $212C-$212F screen designation
    pub main_layers: u8,
    pub sub_layers: u8,
    pub main_window_layers: u8,
    pub sub_window_layers: u8,
    // $2130-$2132 color math
    pub cgwsel: u8,
    pub cgadsub: u8,
    pub fixed_color: u16,
    // $2133 SETINI
    pub pseudo_hires: bool,
    pub extbg: bool,
    pub overscan: bool,
    // Memories
    pub vram: BoxedWordArray<VRAM_WORDS>,
    pub cgram: BoxedWordArray<CGRAM_WORDS>,
    pub oam: BoxedByteArray<OAM_LEN>,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            forced_blank: true,
            brightness: 0,
            obsel: 0,
            oam_address_reload: 0,
            oam_address: 0,
            oam_write_latch: 0,
            bg_mode: 0,
            bg3_priority: false,
            bg_large_tiles: [false; 4],
            mosaic_size: 1,
            mosaic_enabled: [false; 4],
            bg_map_base: [0; 4],
            bg_map_size: [0; 4],
            bg_tile_base: [0; 4],
            bg_hofs: [0; 4],
            bg_vofs: [0; 4],
            scroll_latch: 0,
            vmain: 0,
            vram_address: 0,
            vram_prefetch: 0,
            m7sel: 0,
            m7a: 0,
            m7b: 0,
            m7c: 0,
            m7d: 0,
            m7x: 0,
            m7y: 0,
            m7hofs: 0,
            m7vofs: 0,
            m7_latch: 0,
            cgram_address: 0,
            cgram_latch: None,
            window_bg_select: [0; 2],
            window_obj_select: 0,
            window_left: [0; 2],
            window_right: [0; 2],
            window_bg_logic: 0,
            window_obj_logic: 0,
            main_layers: 0,
            sub_layers: 0,
            main_window_layers: 0,
            sub_window_layers: 0,
            cgwsel: 0,
            cgadsub: 0,
            fixed_color: 0,
            pseudo_hires: false,
            extbg: false,
            overscan: false,
            vram: BoxedWordArray::new(),
            cgram: BoxedWordArray::new(),
            oam: BoxedByteArray::new(),
        }
    }

    fn vram_increment_amount(&self) -> u16 {
        match self.vmain & 0x3 {
            0 => 1,
            1 => 32,
            _ => 128,
        }
    }

    // VMAIN address remapping rotates low bits for bitmap-style uploads
    fn remapped_vram_address(&self) -> u16 {
        let address = self.vram_address;
        match (self.vmain >> 2) & 0x3 {
            0 => address,
            1 => (address & 0xFF00) | ((address & 0x001F) << 3) | ((address >> 5) & 0x7),
            2 => (address & 0xFE00) | ((address & 0x003F) << 3) | ((address >> 6) & 0x7),
            _ => (address & 0xFC00) | ((address & 0x007F) << 3) | ((address >> 7) & 0x7),
        }
    }

    pub fn write_vram_data_low(&mut self, value: u8) {
        let address = usize::from(self.remapped_vram_address()) & (VRAM_WORDS - 1);
        self.vram[address] = (self.vram[address] & 0xFF00) | u16::from(value);
        if !self.vmain.bit(7) {
            self.vram_address = self.vram_address.wrapping_add(self.vram_increment_amount());
        }
    }

    pub fn write_vram_data_high(&mut self, value: u8) {
        let address = usize::from(self.remapped_vram_address()) & (VRAM_WORDS - 1);
        self.vram[address] = (self.vram[address] & 0x00FF) | (u16::from(value) << 8);
        if self.vmain.bit(7) {
            self.vram_address = self.vram_address.wrapping_add(self.vram_increment_amount());
        }
    }

    pub fn read_vram_data_low(&mut self) -> u8 {
        let value = self.vram_prefetch as u8;
        if !self.vmain.bit(7) {
            self.reload_vram_prefetch();
            self.vram_address = self.vram_address.wrapping_add(self.vram_increment_amount());
        }
        value
    }

    pub fn read_vram_data_high(&mut self) -> u8 {
        let value = (self.vram_prefetch >> 8) as u8;
        if self.vmain.bit(7) {
            self.reload_vram_prefetch();
            self.vram_address = self.vram_address.wrapping_add(self.vram_increment_amount());
        }
        value
    }

    pub fn reload_vram_prefetch(&mut self) {
        self.vram_prefetch =
            self.vram[usize::from(self.remapped_vram_address()) & (VRAM_WORDS - 1)];
    }

    pub fn write_cgram_address(&mut self, value: u8) {
        self.cgram_address = value;
        self.cgram_latch = None;
    }

    pub fn write_cgram_data(&mut self, value: u8) {
        match self.cgram_latch.take() {
            None => self.cgram_latch = Some(value),
            Some(low) => {
                self.cgram[usize::from(self.cgram_address)] =
                    (u16::from(value & 0x7F) << 8) | u16::from(low);
                self.cgram_address = self.cgram_address.wrapping_add(1);
            }
        }
    }

    pub fn read_cgram_data(&mut self) -> u8 {
        let word = self.cgram[usize::from(self.cgram_address)];
        match self.cgram_latch.take() {
            None => {
                self.cgram_latch = Some(0);
                word as u8
            }
            Some(_) => {
                self.cgram_address = self.cgram_address.wrapping_add(1);
                (word >> 8) as u8
            }
        }
    }

    pub fn write_oam_data(&mut self, value: u8) {
        let address = usize::from(self.oam_address) % OAM_LEN;
        if self.oam_address < 0x200 {
            // The low table commits in pairs
            if self.oam_address % 2 == 0 {
                self.oam_write_latch = value;
            } else {
                self.oam[address - 1] = self.oam_write_latch;
                self.oam[address] = value;
            }
        } else {
            self.oam[0x200 + (address & 0x1F)] = value;
        }
        self.oam_address = (self.oam_address + 1) % 0x400;
    }

    pub fn read_oam_data(&mut self) -> u8 {
        let address = usize::from(self.oam_address) % OAM_LEN;
        let value = if self.oam_address < 0x200 {
            self.oam[address]
        } else {
            self.oam[0x200 + (address & 0x1F)]
        };
        self.oam_address = (self.oam_address + 1) % 0x400;
        value
    }

    pub fn write_scroll_x(&mut self, bg: usize, value: u8) {
        self.bg_hofs[bg] =
            ((u16::from(value) << 8) | u16::from(self.scroll_latch)) & 0x3FF;
        self.scroll_latch = value;
    }

    pub fn write_scroll_y(&mut self, bg: usize, value: u8) {
        self.bg_vofs[bg] =
            ((u16::from(value) << 8) | u16::from(self.scroll_latch)) & 0x3FF;
        self.scroll_latch = value;
    }

    pub fn write_m7_parameter(&mut self, register: u8, value: u8) {
        let word = i16::from_le_bytes([self.m7_latch, value]);
        self.m7_latch = value;
        match register {
            0 => self.m7a = word,
            1 => self.m7b = word,
            2 => self.m7c = word,
            3 => self.m7d = word,
            4 => self.m7x = word,
            5 => self.m7y = word,
            6 => self.m7hofs = word,
            _ => self.m7vofs = word,
        }
    }

    pub fn write_bgmode(&mut self, value: u8) {
        self.bg_mode = value & 0x7;
        self.bg3_priority = value.bit(3);
        for bg in 0..4 {
            self.bg_large_tiles[bg] = value.bit(4 + bg as u8);
        }
    }

    pub fn write_mosaic(&mut self, value: u8) {
        self.mosaic_size = (value >> 4) + 1;
        for bg in 0..4 {
            self.mosaic_enabled[bg] = value.bit(bg as u8);
        }
    }

    pub fn write_bg_sc(&mut self, bg: usize, value: u8) {
        self.bg_map_base[bg] = u16::from(value & 0xFC) << 8;
        self.bg_map_size[bg] = value & 0x3;
    }

    pub fn write_bg_nba(&mut self, pair: usize, value: u8) {
        self.bg_tile_base[pair * 2] = u16::from(value & 0x0F) << 12;
        self.bg_tile_base[pair * 2 + 1] = u16::from(value >> 4) << 12;
    }

    pub fn write_coldata(&mut self, value: u8) {
        let intensity = u16::from(value & 0x1F);
        if value.bit(5) {
            self.fixed_color = (self.fixed_color & !0x1F) | intensity;
        }
        if value.bit(6) {
            self.fixed_color = (self.fixed_color & !(0x1F << 5)) | (intensity << 5);
        }
        if value.bit(7) {
            self.fixed_color = (self.fixed_color & !(0x1F << 10)) | (intensity << 10);
        }
    }
}
