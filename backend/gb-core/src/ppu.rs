//! Pixel processing unit: scanline renderer with catch-up
//!
//! The PPU tracks a current dot cursor and a rendered-pixel cursor per line.
//! `tick` only moves the dot cursor; pixels are produced lazily, either when
//! the line reaches HBlank or when a register write forces a sync so that
//! mid-scanline effects use the register values in effect at the time.

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use crate::{CpuSpeed, HardwareMode};
use bincode::{Decode, Encode};
use retrio_common::boxedarray::BoxedByteArray;
use retrio_common::frontend::{Color, FrameSize};
use retrio_common::num::GetBit;

pub const SCREEN_WIDTH: u32 = 160;
pub const SCREEN_HEIGHT: u32 = 144;
pub const FRAME_SIZE: FrameSize = FrameSize { width: SCREEN_WIDTH, height: SCREEN_HEIGHT };

pub const DOTS_PER_LINE: u16 = 456;
pub const LINES_PER_FRAME: u8 = 154;
const VBLANK_START_LINE: u8 = 144;

// Mode 3 starts at dot 80; the first pixel leaves the pipeline ~12 dots later
const RENDER_START_DOT: u16 = 80;
const FIRST_PIXEL_DOT: u16 = 92;
const HBLANK_START_DOT: u16 = FIRST_PIXEL_DOT + SCREEN_WIDTH as u16;

const MAX_SPRITES_PER_LINE: usize = 10;

const VRAM_LEN: usize = 2 * 8 * 1024;
const OAM_LEN: usize = 160;

const DMG_COLORS: [Color; 4] = [
    Color::rgb(0xE0, 0xE0, 0xE0),
    Color::rgb(0xA0, 0xA0, 0xA0),
    Color::rgb(0x50, 0x50, 0x50),
    Color::rgb(0x08, 0x08, 0x08),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PpuMode {
    HBlank,
    VBlank,
    OamScan,
    Rendering,
}

impl PpuMode {
    fn status_bits(self) -> u8 {
        match self {
            Self::HBlank => 0,
            Self::VBlank => 1,
            Self::OamScan => 2,
            Self::Rendering => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
struct SpriteData {
    oam_index: u8,
    x: u8,
    y: u8,
    tile: u8,
    attributes: u8,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Ppu {
    hardware_mode: HardwareMode,
    vram: BoxedByteArray<VRAM_LEN>,
    vram_bank: u8,
    oam: [u8; OAM_LEN],
    frame_buffer: Vec<Color>,
    // Background color ids for the current line, for sprite priority
    line_bg_colors: [u8; SCREEN_WIDTH as usize],
    // LCD registers
    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    lyc: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,
    // CGB palette RAM and ports
    bg_palette_ram: [u8; 64],
    obj_palette_ram: [u8; 64],
    bcps: u8,
    ocps: u8,
    opri: bool,
    // Timing cursors
    line: u8,
    dot: u16,
    rendered_x: u16,
    window_line: u8,
    window_active_this_line: bool,
    sprites: Vec<SpriteData>,
    stat_interrupt_line: bool,
    frame_complete: bool,
    pending_hblank_events: u8,
}

impl Ppu {
    pub fn new(hardware_mode: HardwareMode) -> Self {
        Self {
            hardware_mode,
            vram: BoxedByteArray::new(),
            vram_bank: 0,
            oam: [0; OAM_LEN],
            frame_buffer: vec![Color::BLACK; (SCREEN_WIDTH * SCREEN_HEIGHT) as usize],
            line_bg_colors: [0; SCREEN_WIDTH as usize],
            lcdc: 0x91,
            stat: 0,
            scy: 0,
            scx: 0,
            lyc: 0,
            bgp: 0xFC,
            obp0: 0xFF,
            obp1: 0xFF,
            wy: 0,
            wx: 0,
            bg_palette_ram: [0xFF; 64],
            obj_palette_ram: [0xFF; 64],
            bcps: 0,
            ocps: 0,
            opri: hardware_mode == HardwareMode::Dmg,
            line: 0,
            dot: 0,
            rendered_x: 0,
            window_line: 0,
            window_active_this_line: false,
            sprites: Vec::with_capacity(MAX_SPRITES_PER_LINE),
            stat_interrupt_line: false,
            frame_complete: false,
            pending_hblank_events: 0,
        }
    }

    fn lcd_enabled(&self) -> bool {
        self.lcdc.bit(7)
    }

    fn mode(&self) -> PpuMode {
        if !self.lcd_enabled() {
            return PpuMode::HBlank;
        }

        if self.line >= VBLANK_START_LINE {
            PpuMode::VBlank
        } else if self.dot < RENDER_START_DOT {
            PpuMode::OamScan
        } else if self.dot < HBLANK_START_DOT {
            PpuMode::Rendering
        } else {
            PpuMode::HBlank
        }
    }

    pub fn frame_buffer(&self) -> &[Color] {
        &self.frame_buffer
    }

    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    pub fn take_hblank_events(&mut self) -> u8 {
        std::mem::take(&mut self.pending_hblank_events)
    }

    /// Advance the dot cursor. Rendering happens lazily.
    pub fn tick(&mut self, dots: u32, interrupts: &mut InterruptRegisters) {
        for _ in 0..dots {
            self.tick_dot(interrupts);
        }
    }

    fn tick_dot(&mut self, interrupts: &mut InterruptRegisters) {
        self.dot += 1;

        if self.dot == RENDER_START_DOT && self.line < VBLANK_START_LINE && self.lcd_enabled() {
            self.latch_line_sprites();
        }

        if self.dot == HBLANK_START_DOT && self.line < VBLANK_START_LINE {
            if self.lcd_enabled() {
                self.render_up_to(SCREEN_WIDTH as u16);
                self.pending_hblank_events += 1;
            }
        }

        if self.dot == DOTS_PER_LINE {
            self.dot = 0;
            self.rendered_x = 0;
            if self.window_active_this_line {
                self.window_line += 1;
                self.window_active_this_line = false;
            }

            self.line += 1;
            match self.line {
                VBLANK_START_LINE => {
                    if self.lcd_enabled() {
                        interrupts.request(InterruptType::VBlank);
                    }
                }
                LINES_PER_FRAME => {
                    self.line = 0;
                    self.window_line = 0;
                    self.frame_complete = true;
                }
                _ => {}
            }
        }

        self.update_stat_interrupt(interrupts);
    }

    fn update_stat_interrupt(&mut self, interrupts: &mut InterruptRegisters) {
        if !self.lcd_enabled() {
            self.stat_interrupt_line = false;
            return;
        }

        let mode = self.mode();
        let line_active = (self.stat.bit(3) && mode == PpuMode::HBlank)
            || (self.stat.bit(4) && mode == PpuMode::VBlank)
            || (self.stat.bit(5) && mode == PpuMode::OamScan)
            || (self.stat.bit(6) && self.line == self.lyc);

        if line_active && !self.stat_interrupt_line {
            interrupts.request(InterruptType::LcdStatus);
        }
        self.stat_interrupt_line = line_active;
    }

    fn sprite_height(&self) -> u8 {
        if self.lcdc.bit(2) { 16 } else { 8 }
    }

    fn latch_line_sprites(&mut self) {
        self.sprites.clear();

        let height = self.sprite_height();
        for oam_index in 0..40_u8 {
            let base = usize::from(oam_index) * 4;
            let y = self.oam[base];
            let line = self.line + 16;
            if (y..y.saturating_add(height)).contains(&line) {
                self.sprites.push(SpriteData {
                    oam_index,
                    x: self.oam[base + 1],
                    y,
                    tile: self.oam[base + 2],
                    attributes: self.oam[base + 3],
                });
                if self.sprites.len() == MAX_SPRITES_PER_LINE {
                    break;
                }
            }
        }

        // DMG priority: leftmost X wins, OAM order breaks ties. CGB uses
        // plain OAM order unless OPRI requests DMG behavior
        if self.opri {
            self.sprites.sort_by_key(|sprite| (sprite.x, sprite.oam_index));
        }
    }

    // Render pending pixels up to the current dot, using the register state
    // currently in effect
    fn sync_to_current(&mut self) {
        if self.mode() != PpuMode::Rendering {
            return;
        }

        let current_x = self.dot.saturating_sub(FIRST_PIXEL_DOT).min(SCREEN_WIDTH as u16);
        self.render_up_to(current_x);
    }

    fn render_up_to(&mut self, target_x: u16) {
        while self.rendered_x < target_x {
            let x = self.rendered_x;
            let color = self.render_pixel(x as u8);
            self.frame_buffer
                [usize::from(self.line) * SCREEN_WIDTH as usize + usize::from(x)] = color;
            self.rendered_x += 1;
        }
    }

    fn render_pixel(&mut self, x: u8) -> Color {
        let (bg_color_id, bg_palette, bg_priority) = self.background_pixel(x);
        self.line_bg_colors[usize::from(x)] = bg_color_id;

        let sprite = if self.lcdc.bit(1) { self.sprite_pixel(x) } else { None };

        match self.hardware_mode {
            HardwareMode::Dmg => {
                if let Some((sprite_color, sprite_attrs)) = sprite {
                    let behind_bg = sprite_attrs.bit(7);
                    if !behind_bg || bg_color_id == 0 {
                        let palette =
                            if sprite_attrs.bit(4) { self.obp1 } else { self.obp0 };
                        return DMG_COLORS[usize::from((palette >> (2 * sprite_color)) & 3)];
                    }
                }
                DMG_COLORS[usize::from((self.bgp >> (2 * bg_color_id)) & 3)]
            }
            HardwareMode::Cgb => {
                if let Some((sprite_color, sprite_attrs)) = sprite {
                    // LCDC bit 0 clear disables all BG priority on CGB
                    let bg_wins = self.lcdc.bit(0)
                        && bg_color_id != 0
                        && (bg_priority || sprite_attrs.bit(7));
                    if !bg_wins {
                        let palette = sprite_attrs & 0x07;
                        return self.cgb_color(&self.obj_palette_ram, palette, sprite_color);
                    }
                }
                self.cgb_color(&self.bg_palette_ram, bg_palette, bg_color_id)
            }
        }
    }

    // Returns (color id, CGB palette, CGB BG-priority attribute)
    fn background_pixel(&mut self, x: u8) -> (u8, u8, bool) {
        if self.hardware_mode == HardwareMode::Dmg && !self.lcdc.bit(0) {
            return (0, 0, false);
        }

        let window_enabled =
            self.lcdc.bit(5) && self.line >= self.wy && u16::from(x) + 7 >= u16::from(self.wx);
        let (tile_map_base, map_x, map_y) = if window_enabled {
            self.window_active_this_line = true;
            let base = if self.lcdc.bit(6) { 0x1C00 } else { 0x1800 };
            let win_x = (u16::from(x) + 7 - u16::from(self.wx)) as u8;
            (base, win_x, self.window_line)
        } else {
            let base = if self.lcdc.bit(3) { 0x1C00 } else { 0x1800 };
            (base, x.wrapping_add(self.scx), self.line.wrapping_add(self.scy))
        };

        let map_index = tile_map_base
            + usize::from(map_y / 8) * 32
            + usize::from(map_x / 8);
        let tile_number = self.vram[map_index];
        let attributes = match self.hardware_mode {
            HardwareMode::Dmg => 0,
            HardwareMode::Cgb => self.vram[0x2000 + map_index],
        };

        let mut row = map_y % 8;
        if attributes.bit(6) {
            row = 7 - row;
        }
        let mut column = map_x % 8;
        if attributes.bit(5) {
            column = 7 - column;
        }

        let tile_addr = if self.lcdc.bit(4) {
            usize::from(tile_number) * 16
        } else {
            (0x1000_i32 + i32::from(tile_number as i8) * 16) as usize
        };
        let bank_offset = if attributes.bit(3) { 0x2000 } else { 0 };

        let low = self.vram[bank_offset + tile_addr + usize::from(row) * 2];
        let high = self.vram[bank_offset + tile_addr + usize::from(row) * 2 + 1];
        let bit = 7 - column;
        let color_id = (u8::from(high.bit(bit)) << 1) | u8::from(low.bit(bit));

        (color_id, attributes & 0x07, attributes.bit(7))
    }

    fn sprite_pixel(&self, x: u8) -> Option<(u8, u8)> {
        let height = self.sprite_height();

        for sprite in &self.sprites {
            let screen_x = u16::from(x) + 8;
            if !(u16::from(sprite.x)..u16::from(sprite.x) + 8).contains(&screen_x) {
                continue;
            }

            let mut row = self.line + 16 - sprite.y;
            if sprite.attributes.bit(6) {
                row = height - 1 - row;
            }

            let tile = if height == 16 {
                (sprite.tile & 0xFE) | u8::from(row >= 8)
            } else {
                sprite.tile
            };
            let row = row % 8;

            let bank_offset = if self.hardware_mode == HardwareMode::Cgb
                && sprite.attributes.bit(3)
            {
                0x2000_usize
            } else {
                0
            };
            let tile_addr = bank_offset + usize::from(tile) * 16 + usize::from(row) * 2;
            let low = self.vram[tile_addr];
            let high = self.vram[tile_addr + 1];

            let mut column = (screen_x - u16::from(sprite.x)) as u8;
            if sprite.attributes.bit(5) {
                column = 7 - column;
            }
            let bit = 7 - column;
            let color_id = (u8::from(high.bit(bit)) << 1) | u8::from(low.bit(bit));

            if color_id != 0 {
                return Some((color_id, sprite.attributes));
            }
        }

        None
    }

    fn cgb_color(&self, palette_ram: &[u8; 64], palette: u8, color_id: u8) -> Color {
        let base = usize::from(palette) * 8 + usize::from(color_id) * 2;
        let word = u16::from_le_bytes([palette_ram[base], palette_ram[base + 1]]);

        let r = (word & 0x1F) as u8;
        let g = ((word >> 5) & 0x1F) as u8;
        let b = ((word >> 10) & 0x1F) as u8;
        Color::rgb((r << 3) | (r >> 2), (g << 3) | (g >> 2), (b << 3) | (b >> 2))
    }

    // VRAM / OAM

    fn vram_addr(&self, address: u16) -> usize {
        usize::from(self.vram_bank) * 0x2000 + usize::from(address & 0x1FFF)
    }

    pub fn read_vram(&self, address: u16) -> u8 {
        self.vram[self.vram_addr(address)]
    }

    pub fn write_vram(&mut self, address: u16, value: u8) {
        self.sync_to_current();
        let vram_addr = self.vram_addr(address);
        self.vram[vram_addr] = value;
    }

    pub fn read_oam(&self, address: u16) -> u8 {
        self.oam[usize::from(address) % OAM_LEN]
    }

    pub fn write_oam(&mut self, address: u16, value: u8) {
        self.oam[usize::from(address) % OAM_LEN] = value;
    }

    pub fn write_oam_dma(&mut self, index: u8, value: u8) {
        self.oam[usize::from(index)] = value;
    }

    // Register access

    pub fn read_register(&self, address: u16) -> u8 {
        match address & 0xFF {
            0x40 => self.lcdc,
            0x41 => {
                0x80 | self.stat
                    | (u8::from(self.line == self.lyc) << 2)
                    | self.mode().status_bits()
            }
            0x42 => self.scy,
            0x43 => self.scx,
            0x44 => self.line,
            0x45 => self.lyc,
            0x47 => self.bgp,
            0x48 => self.obp0,
            0x49 => self.obp1,
            0x4A => self.wy,
            0x4B => self.wx,
            0x4F => 0xFE | self.vram_bank,
            0x68 => self.bcps,
            0x69 => self.bg_palette_ram[usize::from(self.bcps & 0x3F)],
            0x6A => self.ocps,
            0x6B => self.obj_palette_ram[usize::from(self.ocps & 0x3F)],
            0x6C => 0xFE | u8::from(self.opri),
            _ => 0xFF,
        }
    }

    pub fn write_register(
        &mut self,
        address: u16,
        value: u8,
        _speed: CpuSpeed,
        interrupts: &mut InterruptRegisters,
    ) {
        // Any register that affects pixel output syncs rendering first
        match address & 0xFF {
            0x40 => {
                self.sync_to_current();
                let was_enabled = self.lcd_enabled();
                self.lcdc = value;
                if was_enabled && !self.lcd_enabled() {
                    // Turning the LCD off resets the timing cursors
                    self.line = 0;
                    self.dot = 0;
                    self.rendered_x = 0;
                    self.window_line = 0;
                }
            }
            0x41 => {
                self.stat = value & 0x78;
                self.update_stat_interrupt(interrupts);
            }
            0x42 => {
                self.sync_to_current();
                self.scy = value;
            }
            0x43 => {
                self.sync_to_current();
                self.scx = value;
            }
            0x45 => {
                self.lyc = value;
                self.update_stat_interrupt(interrupts);
            }
            0x47 => {
                self.sync_to_current();
                self.bgp = value;
            }
            0x48 => {
                self.sync_to_current();
                self.obp0 = value;
            }
            0x49 => {
                self.sync_to_current();
                self.obp1 = value;
            }
            0x4A => {
                self.sync_to_current();
                self.wy = value;
            }
            0x4B => {
                self.sync_to_current();
                self.wx = value;
            }
            0x4F => self.vram_bank = value & 0x01,
            0x68 => self.bcps = value & 0xBF,
            0x69 => {
                self.sync_to_current();
                self.bg_palette_ram[usize::from(self.bcps & 0x3F)] = value;
                if self.bcps.bit(7) {
                    self.bcps = (self.bcps & 0x80) | (self.bcps.wrapping_add(1) & 0x3F);
                }
            }
            0x6A => self.ocps = value & 0xBF,
            0x6B => {
                self.sync_to_current();
                self.obj_palette_ram[usize::from(self.ocps & 0x3F)] = value;
                if self.ocps.bit(7) {
                    self.ocps = (self.ocps & 0x80) | (self.ocps.wrapping_add(1) & 0x3F);
                }
            }
            0x6C => self.opri = value.bit(0),
            _ => log::debug!("Unexpected PPU register write: {address:04X} {value:02X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_dots(ppu: &mut Ppu, interrupts: &mut InterruptRegisters, dots: u32) {
        ppu.tick(dots, interrupts);
    }

    #[test]
    fn vblank_interrupt_fires_at_line_144() {
        let mut ppu = Ppu::new(HardwareMode::Dmg);
        let mut interrupts = InterruptRegisters::default();

        run_dots(&mut ppu, &mut interrupts, 144 * u32::from(DOTS_PER_LINE));
        assert!(interrupts.read_if() & 0x01 != 0);
    }

    #[test]
    fn frame_completes_after_all_lines() {
        let mut ppu = Ppu::new(HardwareMode::Dmg);
        let mut interrupts = InterruptRegisters::default();

        run_dots(&mut ppu, &mut interrupts, 154 * u32::from(DOTS_PER_LINE));
        assert!(ppu.take_frame_complete());
        assert!(!ppu.take_frame_complete(), "flag is consumed");
    }

    #[test]
    fn rendered_cursor_never_passes_current_cursor() {
        let mut ppu = Ppu::new(HardwareMode::Dmg);
        let mut interrupts = InterruptRegisters::default();

        run_dots(&mut ppu, &mut interrupts, u32::from(RENDER_START_DOT) + 50);
        // A mid-scanline palette write renders only up to the current dot
        ppu.write_register(0xFF47, 0x1B, CpuSpeed::Normal, &mut interrupts);
        assert_eq!(ppu.rendered_x, 50 + RENDER_START_DOT - FIRST_PIXEL_DOT);
    }

    #[test]
    fn hblank_events_accumulate_once_per_visible_line() {
        let mut ppu = Ppu::new(HardwareMode::Cgb);
        let mut interrupts = InterruptRegisters::default();

        run_dots(&mut ppu, &mut interrupts, 10 * u32::from(DOTS_PER_LINE));
        assert_eq!(ppu.take_hblank_events(), 10);
        assert_eq!(ppu.take_hblank_events(), 0);
    }
}
