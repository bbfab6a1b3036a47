//! PPU register file. Registers are stored raw with accessors for the
//! fields the renderer needs; write-only details stay readable internally.

use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    pub dispcnt: u16,
    pub dispstat: u16,
    pub bgcnt: [u16; 4],
    pub bghofs: [u16; 4],
    pub bgvofs: [u16; 4],
    // Affine parameters for BG2/BG3
    pub bgpa: [i16; 2],
    pub bgpb: [i16; 2],
    pub bgpc: [i16; 2],
    pub bgpd: [i16; 2],
    pub bgx: [i32; 2],
    pub bgy: [i32; 2],
    pub winh: [u16; 2],
    pub winv: [u16; 2],
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            dispcnt: 0x0080,
            dispstat: 0,
            bgcnt: [0; 4],
            bghofs: [0; 4],
            bgvofs: [0; 4],
            bgpa: [0x100; 2],
            bgpb: [0; 2],
            bgpc: [0; 2],
            bgpd: [0x100; 2],
            bgx: [0; 2],
            bgy: [0; 2],
            winh: [0; 2],
            winv: [0; 2],
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
        }
    }

    pub fn bg_mode(&self) -> u16 {
        self.dispcnt & 0x7
    }

    pub fn bitmap_frame_base(&self) -> usize {
        if self.dispcnt.bit(4) { 0xA000 } else { 0 }
    }

    pub fn forced_blank(&self) -> bool {
        self.dispcnt.bit(7)
    }

    pub fn bg_enabled(&self, bg: usize) -> bool {
        self.dispcnt.bit(8 + bg as u8)
    }

    pub fn obj_enabled(&self) -> bool {
        self.dispcnt.bit(12)
    }

    pub fn obj_1d_mapping(&self) -> bool {
        self.dispcnt.bit(6)
    }

    pub fn window_enabled(&self, window: usize) -> bool {
        self.dispcnt.bit(13 + window as u8)
    }

    pub fn obj_window_enabled(&self) -> bool {
        self.dispcnt.bit(15)
    }

    pub fn any_window_enabled(&self) -> bool {
        self.window_enabled(0) || self.window_enabled(1) || self.obj_window_enabled()
    }

    pub fn vblank_irq_enabled(&self) -> bool {
        self.dispstat.bit(3)
    }

    pub fn hblank_irq_enabled(&self) -> bool {
        self.dispstat.bit(4)
    }

    pub fn vcount_irq_enabled(&self) -> bool {
        self.dispstat.bit(5)
    }

    pub fn vcount_target(&self) -> u16 {
        self.dispstat >> 8
    }

    // BGxCNT fields

    pub fn bg_priority(&self, bg: usize) -> u16 {
        self.bgcnt[bg] & 0x3
    }

    pub fn bg_tile_base(&self, bg: usize) -> usize {
        usize::from((self.bgcnt[bg] >> 2) & 0x3) * 0x4000
    }

    pub fn bg_256_colors(&self, bg: usize) -> bool {
        self.bgcnt[bg].bit(7)
    }

    pub fn bg_map_base(&self, bg: usize) -> usize {
        usize::from((self.bgcnt[bg] >> 8) & 0x1F) * 0x800
    }

    pub fn bg_affine_wrap(&self, bg: usize) -> bool {
        self.bgcnt[bg].bit(13)
    }

    pub fn bg_size(&self, bg: usize) -> u16 {
        self.bgcnt[bg] >> 14
    }

    // Windows: (left, right) / (top, bottom), right/bottom exclusive with
    // wraparound semantics when left > right

    pub fn window_x_range(&self, window: usize) -> (u16, u16) {
        (self.winh[window] >> 8, self.winh[window] & 0xFF)
    }

    pub fn window_y_range(&self, window: usize) -> (u16, u16) {
        (self.winv[window] >> 8, self.winv[window] & 0xFF)
    }

    pub fn window_contains(&self, window: usize, x: u16, y: u16) -> bool {
        let (left, right) = self.window_x_range(window);
        let (top, bottom) = self.window_y_range(window);

        let x_inside = if left <= right { (left..right).contains(&x) } else { x >= left || x < right };
        let y_inside = if top <= bottom { (top..bottom).contains(&y) } else { y >= top || y < bottom };
        x_inside && y_inside
    }

    // Blending

    pub fn blend_mode(&self) -> u16 {
        (self.bldcnt >> 6) & 0x3
    }

    pub fn first_target(&self, layer: u16) -> bool {
        self.bldcnt.bit(layer as u8)
    }

    pub fn second_target(&self, layer: u16) -> bool {
        self.bldcnt.bit(8 + layer as u8)
    }

    pub fn blend_eva(&self) -> u16 {
        (self.bldalpha & 0x1F).min(16)
    }

    pub fn blend_evb(&self) -> u16 {
        ((self.bldalpha >> 8) & 0x1F).min(16)
    }

    pub fn brightness_coefficient(&self) -> u16 {
        (self.bldy & 0x1F).min(16)
    }
}
