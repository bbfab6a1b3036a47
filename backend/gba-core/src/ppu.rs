//! Pixel processing unit: modes 0-5, sprites, windows, and color effects
//!
//! The PPU keeps a dot cursor and a rendered-pixel cursor per scanline and
//! renders lazily: pixels are produced when the line reaches HBlank or when
//! a register/VRAM write forces a sync, so mid-scanline raster effects see
//! the register values that were live at that dot.

mod registers;

use crate::interrupts::{InterruptRegisters, InterruptType};
use bincode::{Decode, Encode};
use registers::Registers;
use retrio_common::boxedarray::BoxedByteArray;
use retrio_common::frontend::{Color, FrameSize};
use retrio_common::num::GetBit;

pub const SCREEN_WIDTH: u32 = 240;
pub const SCREEN_HEIGHT: u32 = 160;
pub const FRAME_SIZE: FrameSize = FrameSize { width: SCREEN_WIDTH, height: SCREEN_HEIGHT };

pub const LINES_PER_FRAME: u16 = 228;
pub const DOTS_PER_LINE: u16 = 308;
pub const CYCLES_PER_DOT: u32 = 4;
pub const CYCLES_PER_FRAME: u64 =
    (LINES_PER_FRAME as u64) * (DOTS_PER_LINE as u64) * (CYCLES_PER_DOT as u64);

const HBLANK_START_DOT: u16 = 240;
const VBLANK_START_LINE: u16 = 160;

const VRAM_LEN: usize = 96 * 1024;
const PALETTE_LEN: usize = 1024;
const OAM_LEN: usize = 1024;

const BACKDROP_LAYER: u16 = 5;
const OBJ_LAYER: u16 = 4;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct ObjPixel {
    color: u16,
    opaque: bool,
    priority: u16,
    semi_transparent: bool,
    window: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PpuTickEvents {
    pub hblank_starts: u8,
    pub vblank_starts: u8,
    pub frame_complete: bool,
}

// Transient per-tick event flags don't belong in save states
impl Encode for PpuTickEvents {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        _encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        Ok(())
    }
}

impl<Context> Decode<Context> for PpuTickEvents {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        _decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self::default())
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for PpuTickEvents {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        _decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self::default())
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Ppu {
    registers: Registers,
    vram: BoxedByteArray<VRAM_LEN>,
    palette: BoxedByteArray<PALETTE_LEN>,
    oam: BoxedByteArray<OAM_LEN>,
    frame_buffer: Vec<Color>,
    scanline: u16,
    dot: u16,
    cycle_remainder: u32,
    rendered_x: u16,
    sprites_evaluated: bool,
    obj_line: [ObjPixel; SCREEN_WIDTH as usize],
    // Internal affine reference points, latched at frame start
    internal_x: [i32; 2],
    internal_y: [i32; 2],
    // Compatibility quirk: request VBlank IRQs even when disabled in DISPSTAT
    forced_vblank_irq: bool,
    events: PpuTickEvents,
}

impl Ppu {
    pub fn new(forced_vblank_irq: bool) -> Self {
        Self {
            registers: Registers::new(),
            vram: BoxedByteArray::new(),
            palette: BoxedByteArray::new(),
            oam: BoxedByteArray::new(),
            frame_buffer: vec![Color::BLACK; (SCREEN_WIDTH * SCREEN_HEIGHT) as usize],
            scanline: 0,
            dot: 0,
            cycle_remainder: 0,
            rendered_x: 0,
            sprites_evaluated: false,
            obj_line: [ObjPixel::default(); SCREEN_WIDTH as usize],
            internal_x: [0; 2],
            internal_y: [0; 2],
            forced_vblank_irq,
            events: PpuTickEvents::default(),
        }
    }

    pub fn frame_buffer(&self) -> &[Color] {
        &self.frame_buffer
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn take_events(&mut self) -> PpuTickEvents {
        std::mem::take(&mut self.events)
    }

    pub fn tick(&mut self, cycles: u32, interrupts: &mut InterruptRegisters) {
        self.cycle_remainder += cycles;
        while self.cycle_remainder >= CYCLES_PER_DOT {
            self.cycle_remainder -= CYCLES_PER_DOT;
            self.tick_dot(interrupts);
        }
    }

    fn tick_dot(&mut self, interrupts: &mut InterruptRegisters) {
        self.dot += 1;

        if self.dot == HBLANK_START_DOT {
            if self.scanline < VBLANK_START_LINE {
                self.render_up_to(SCREEN_WIDTH as u16);
                self.events.hblank_starts += 1;
            }
            // The HBlank IRQ fires on every line, including during VBlank
            if self.registers.hblank_irq_enabled() {
                interrupts.request(InterruptType::HBlank);
            }
        }

        if self.dot == DOTS_PER_LINE {
            self.dot = 0;
            self.rendered_x = 0;
            self.sprites_evaluated = false;

            if self.scanline < VBLANK_START_LINE {
                // Affine reference points step by PB/PD per rendered line
                for bg in 0..2 {
                    self.internal_x[bg] =
                        self.internal_x[bg].wrapping_add(self.registers.bgpb[bg].into());
                    self.internal_y[bg] =
                        self.internal_y[bg].wrapping_add(self.registers.bgpd[bg].into());
                }
            }

            self.scanline += 1;
            match self.scanline {
                VBLANK_START_LINE => {
                    self.events.vblank_starts += 1;
                    if self.registers.vblank_irq_enabled() || self.forced_vblank_irq {
                        interrupts.request(InterruptType::VBlank);
                    }
                }
                LINES_PER_FRAME => {
                    self.scanline = 0;
                    self.events.frame_complete = true;
                    self.latch_affine_references();
                }
                _ => {}
            }

            if self.registers.vcount_irq_enabled()
                && self.scanline == self.registers.vcount_target()
            {
                interrupts.request(InterruptType::VCounter);
            }
        }
    }

    fn latch_affine_references(&mut self) {
        for bg in 0..2 {
            self.internal_x[bg] = sign_extend_28(self.registers.bgx[bg]);
            self.internal_y[bg] = sign_extend_28(self.registers.bgy[bg]);
        }
    }

    fn in_vblank(&self) -> bool {
        (VBLANK_START_LINE..227).contains(&self.scanline)
    }

    fn in_hblank(&self) -> bool {
        self.dot >= HBLANK_START_DOT
    }

    // Catch-up: render pending pixels of the current line with the current
    // register state before a visible write takes effect
    fn sync_to_current(&mut self) {
        if self.scanline >= VBLANK_START_LINE {
            return;
        }
        let current_x = self.dot.min(SCREEN_WIDTH as u16);
        self.render_up_to(current_x);
    }

    fn render_up_to(&mut self, target_x: u16) {
        if !self.sprites_evaluated {
            self.evaluate_line_sprites();
            self.sprites_evaluated = true;
        }

        while self.rendered_x < target_x {
            let x = self.rendered_x;
            let color = self.render_pixel(x);
            self.frame_buffer[usize::from(self.scanline) * SCREEN_WIDTH as usize
                + usize::from(x)] = rgb555_to_color(color);
            self.rendered_x += 1;
        }
    }

    fn render_pixel(&self, x: u16) -> u16 {
        if self.registers.forced_blank() {
            return 0x7FFF;
        }

        let (bg_mask, obj_allowed, effects_allowed) = self.window_masks(x);

        // Find the two topmost opaque layers
        let backdrop = self.palette_color(0);
        let mut first: Option<(u16, u16, bool)> = None; // (layer, color, obj semi)
        let mut second: Option<(u16, u16)> = None;

        let obj = &self.obj_line[usize::from(x)];
        let obj_visible = self.registers.obj_enabled() && obj_allowed && obj.opaque;

        for priority in 0..4_u16 {
            if obj_visible && obj.priority == priority {
                if first.is_none() {
                    first = Some((OBJ_LAYER, obj.color, obj.semi_transparent));
                } else if second.is_none() {
                    second = Some((OBJ_LAYER, obj.color));
                }
            }

            for bg in 0..4_usize {
                if !self.registers.bg_enabled(bg)
                    || !bg_mask.bit(bg as u8)
                    || self.registers.bg_priority(bg) != priority
                {
                    continue;
                }
                let Some(color) = self.bg_pixel(bg, x) else { continue };

                if first.is_none() {
                    first = Some((bg as u16, color, false));
                } else if second.is_none() {
                    second = Some((bg as u16, color));
                    break;
                }
            }

            if second.is_some() {
                break;
            }
        }

        let (first_layer, first_color, first_semi) =
            first.unwrap_or((BACKDROP_LAYER, backdrop, false));
        let (second_layer, second_color) = second.unwrap_or((BACKDROP_LAYER, backdrop));

        if !effects_allowed && !first_semi {
            return first_color;
        }

        // Semi-transparent sprites force alpha blending when the layer
        // below is a second target
        if first_semi && self.registers.second_target(second_layer) {
            return alpha_blend(
                first_color,
                second_color,
                self.registers.blend_eva(),
                self.registers.blend_evb(),
            );
        }

        match self.registers.blend_mode() {
            1 if self.registers.first_target(first_layer)
                && self.registers.second_target(second_layer) =>
            {
                alpha_blend(
                    first_color,
                    second_color,
                    self.registers.blend_eva(),
                    self.registers.blend_evb(),
                )
            }
            2 if self.registers.first_target(first_layer) => {
                brighten(first_color, self.registers.brightness_coefficient())
            }
            3 if self.registers.first_target(first_layer) => {
                darken(first_color, self.registers.brightness_coefficient())
            }
            _ => first_color,
        }
    }

    // Returns (bg enable mask, obj enabled, color effects enabled)
    fn window_masks(&self, x: u16) -> (u16, bool, bool) {
        if !self.registers.any_window_enabled() {
            return (0xF, true, true);
        }

        let y = self.scanline;
        for window in 0..2 {
            if self.registers.window_enabled(window)
                && self.registers.window_contains(window, x, y)
            {
                let bits = (self.registers.winin >> (8 * window)) & 0x3F;
                return (bits & 0xF, bits.bit(4), bits.bit(5));
            }
        }

        if self.registers.obj_window_enabled() && self.obj_line[usize::from(x)].window {
            let bits = (self.registers.winout >> 8) & 0x3F;
            return (bits & 0xF, bits.bit(4), bits.bit(5));
        }

        let bits = self.registers.winout & 0x3F;
        (bits & 0xF, bits.bit(4), bits.bit(5))
    }

    fn bg_pixel(&self, bg: usize, x: u16) -> Option<u16> {
        match (self.registers.bg_mode(), bg) {
            (0, _) | (1, 0 | 1) => self.text_bg_pixel(bg, x),
            (1, 2) | (2, 2 | 3) => self.affine_bg_pixel(bg, x),
            (3, 2) => self.bitmap_pixel(x, BitmapFormat::Direct240),
            (4, 2) => self.bitmap_pixel(x, BitmapFormat::Paletted240),
            (5, 2) => self.bitmap_pixel(x, BitmapFormat::Direct160),
            _ => None,
        }
    }

    fn text_bg_pixel(&self, bg: usize, x: u16) -> Option<u16> {
        let scrolled_x = u32::from(x) + u32::from(self.bghofs(bg));
        let scrolled_y = u32::from(self.scanline) + u32::from(self.bgvofs(bg));

        let (width_tiles, height_tiles) = match self.registers.bg_size(bg) {
            0 => (32, 32),
            1 => (64, 32),
            2 => (32, 64),
            _ => (64, 64),
        };
        let tile_x = (scrolled_x / 8) % width_tiles;
        let tile_y = (scrolled_y / 8) % height_tiles;

        // 512-wide/tall maps are split into 32x32 screen blocks
        let block = match (width_tiles, height_tiles) {
            (64, 32) => tile_x / 32,
            (32, 64) => tile_y / 32,
            (64, 64) => (tile_y / 32) * 2 + tile_x / 32,
            _ => 0,
        };

        let map_addr = self.registers.bg_map_base(bg)
            + (block as usize) * 0x800
            + ((tile_y % 32) as usize * 32 + (tile_x % 32) as usize) * 2;
        let entry = u16::from_le_bytes([self.vram[map_addr], self.vram[map_addr + 1]]);

        let tile_number = usize::from(entry & 0x3FF);
        let mut pixel_x = (scrolled_x % 8) as usize;
        let mut pixel_y = (scrolled_y % 8) as usize;
        if entry.bit(10) {
            pixel_x = 7 - pixel_x;
        }
        if entry.bit(11) {
            pixel_y = 7 - pixel_y;
        }

        if self.registers.bg_256_colors(bg) {
            let tile_addr = self.registers.bg_tile_base(bg) + tile_number * 64;
            let color_index = self.vram[(tile_addr + pixel_y * 8 + pixel_x) % VRAM_LEN];
            (color_index != 0).then(|| self.palette_color(color_index.into()))
        } else {
            let tile_addr = self.registers.bg_tile_base(bg) + tile_number * 32;
            let byte = self.vram[(tile_addr + pixel_y * 4 + pixel_x / 2) % VRAM_LEN];
            let color_index = if pixel_x % 2 == 0 { byte & 0xF } else { byte >> 4 };
            let palette = usize::from(entry >> 12);
            (color_index != 0)
                .then(|| self.palette_color(palette * 16 + usize::from(color_index)))
        }
    }

    fn affine_texture_coords(&self, bg_index: usize, x: u16) -> (i32, i32) {
        let texture_x = self.internal_x[bg_index]
            .wrapping_add(i32::from(self.registers.bgpa[bg_index]) * i32::from(x))
            >> 8;
        let texture_y = self.internal_y[bg_index]
            .wrapping_add(i32::from(self.registers.bgpc[bg_index]) * i32::from(x))
            >> 8;
        (texture_x, texture_y)
    }

    fn affine_bg_pixel(&self, bg: usize, x: u16) -> Option<u16> {
        let bg_index = bg - 2;
        let (mut texture_x, mut texture_y) = self.affine_texture_coords(bg_index, x);

        let size_pixels = 128_i32 << self.registers.bg_size(bg);
        if self.registers.bg_affine_wrap(bg) {
            texture_x = texture_x.rem_euclid(size_pixels);
            texture_y = texture_y.rem_euclid(size_pixels);
        } else if !(0..size_pixels).contains(&texture_x)
            || !(0..size_pixels).contains(&texture_y)
        {
            return None;
        }

        let tiles_per_row = (size_pixels / 8) as usize;
        let map_addr = self.registers.bg_map_base(bg)
            + (texture_y as usize / 8) * tiles_per_row
            + texture_x as usize / 8;
        let tile_number = usize::from(self.vram[map_addr % VRAM_LEN]);

        // Affine backgrounds are always 256-color
        let tile_addr = self.registers.bg_tile_base(bg)
            + tile_number * 64
            + (texture_y as usize % 8) * 8
            + texture_x as usize % 8;
        let color_index = self.vram[tile_addr % VRAM_LEN];
        (color_index != 0).then(|| self.palette_color(color_index.into()))
    }

    fn bitmap_pixel(&self, x: u16, format: BitmapFormat) -> Option<u16> {
        // The bitmap layer goes through the BG2 affine transform
        let (texture_x, texture_y) = self.affine_texture_coords(0, x);

        let (width, height) = match format {
            BitmapFormat::Direct240 | BitmapFormat::Paletted240 => (240, 160),
            BitmapFormat::Direct160 => (160, 128),
        };
        if !(0..width).contains(&texture_x) || !(0..height).contains(&texture_y) {
            return None;
        }
        let offset = (texture_y * width + texture_x) as usize;

        match format {
            BitmapFormat::Direct240 => {
                let addr = offset * 2;
                Some(u16::from_le_bytes([self.vram[addr], self.vram[addr + 1]]) & 0x7FFF)
            }
            BitmapFormat::Paletted240 => {
                let addr = self.registers.bitmap_frame_base() + offset;
                let color_index = self.vram[addr];
                (color_index != 0).then(|| self.palette_color(color_index.into()))
            }
            BitmapFormat::Direct160 => {
                let addr = self.registers.bitmap_frame_base() + offset * 2;
                Some(u16::from_le_bytes([self.vram[addr], self.vram[addr + 1]]) & 0x7FFF)
            }
        }
    }

    fn evaluate_line_sprites(&mut self) {
        self.obj_line = [ObjPixel::default(); SCREEN_WIDTH as usize];

        if !self.registers.obj_enabled() && !self.registers.obj_window_enabled() {
            return;
        }

        for index in 0..128 {
            let base = index * 8;
            let attr0 = u16::from_le_bytes([self.oam[base], self.oam[base + 1]]);
            let attr1 = u16::from_le_bytes([self.oam[base + 2], self.oam[base + 3]]);
            let attr2 = u16::from_le_bytes([self.oam[base + 4], self.oam[base + 5]]);

            let affine = attr0.bit(8);
            if !affine && attr0.bit(9) {
                // Disabled sprite
                continue;
            }

            let (width, height) = sprite_size(attr0 >> 14, attr1 >> 14);
            let double_size = affine && attr0.bit(9);
            let box_width = if double_size { width * 2 } else { width };
            let box_height = if double_size { height * 2 } else { height };

            let y = attr0 & 0xFF;
            // Y wraps within 256
            let line = u16::from(self.scanline.wrapping_sub(y) as u8);
            if line >= box_height {
                continue;
            }

            let x_start = attr1 & 0x1FF;
            let mode = (attr0 >> 10) & 3;
            if mode == 3 {
                // Prohibited
                continue;
            }

            for box_x in 0..box_width {
                let screen_x = (x_start + box_x) & 0x1FF;
                if screen_x >= SCREEN_WIDTH as u16 {
                    continue;
                }

                let texture = if affine {
                    self.sprite_affine_texture(
                        attr1,
                        box_x,
                        line,
                        width,
                        height,
                        box_width,
                        box_height,
                    )
                } else {
                    let mut texture_x = box_x;
                    let mut texture_y = line;
                    if attr1.bit(12) {
                        texture_x = width - 1 - texture_x;
                    }
                    if attr1.bit(13) {
                        texture_y = height - 1 - texture_y;
                    }
                    Some((texture_x, texture_y))
                };
                let Some((texture_x, texture_y)) = texture else { continue };

                let Some(color) =
                    self.sprite_texel(attr0, attr2, texture_x, texture_y, width)
                else {
                    continue;
                };

                let pixel = &mut self.obj_line[usize::from(screen_x)];
                if mode == 2 {
                    pixel.window = true;
                    continue;
                }

                let priority = (attr2 >> 10) & 3;
                if !pixel.opaque || priority < pixel.priority {
                    *pixel = ObjPixel {
                        color,
                        opaque: true,
                        priority,
                        semi_transparent: mode == 1,
                        window: pixel.window,
                    };
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sprite_affine_texture(
        &self,
        attr1: u16,
        box_x: u16,
        box_y: u16,
        width: u16,
        height: u16,
        box_width: u16,
        box_height: u16,
    ) -> Option<(u16, u16)> {
        let group = usize::from((attr1 >> 9) & 0x1F);
        let parameter = |index: usize| -> i32 {
            let addr = group * 32 + index * 8 + 6;
            i32::from(i16::from_le_bytes([self.oam[addr], self.oam[addr + 1]]))
        };
        let (pa, pb, pc, pd) = (parameter(0), parameter(1), parameter(2), parameter(3));

        // Texture coordinate via the inverse transform about the box center
        let local_x = i32::from(box_x) - i32::from(box_width / 2);
        let local_y = i32::from(box_y) - i32::from(box_height / 2);
        let texture_x = ((pa * local_x + pb * local_y) >> 8) + i32::from(width / 2);
        let texture_y = ((pc * local_x + pd * local_y) >> 8) + i32::from(height / 2);

        ((0..i32::from(width)).contains(&texture_x) && (0..i32::from(height)).contains(&texture_y))
            .then_some((texture_x as u16, texture_y as u16))
    }

    fn sprite_texel(
        &self,
        attr0: u16,
        attr2: u16,
        texture_x: u16,
        texture_y: u16,
        width: u16,
    ) -> Option<u16> {
        const OBJ_TILE_BASE: usize = 0x10000;

        let color_256 = attr0.bit(13);
        let tile_number = usize::from(attr2 & 0x3FF);

        let tile_x = usize::from(texture_x / 8);
        let tile_y = usize::from(texture_y / 8);
        let tiles_per_row = if self.registers.obj_1d_mapping() {
            usize::from(width / 8) * if color_256 { 2 } else { 1 }
        } else {
            32
        };

        let tile_index = if color_256 {
            // 256-color tiles occupy two tile slots each
            tile_number + tile_y * tiles_per_row + tile_x * 2
        } else {
            tile_number + tile_y * tiles_per_row + tile_x
        };

        let pixel_x = usize::from(texture_x % 8);
        let pixel_y = usize::from(texture_y % 8);

        if color_256 {
            let addr = OBJ_TILE_BASE + (tile_index % 1024) * 32 + pixel_y * 8 + pixel_x;
            let color_index = self.vram[addr % VRAM_LEN];
            (color_index != 0).then(|| self.palette_color(256 + usize::from(color_index)))
        } else {
            let addr = OBJ_TILE_BASE + (tile_index % 1024) * 32 + pixel_y * 4 + pixel_x / 2;
            let byte = self.vram[addr % VRAM_LEN];
            let color_index = if pixel_x % 2 == 0 { byte & 0xF } else { byte >> 4 };
            let palette = usize::from((attr2 >> 12) & 0xF);
            (color_index != 0)
                .then(|| self.palette_color(256 + palette * 16 + usize::from(color_index)))
        }
    }

    fn palette_color(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.palette[index * 2], self.palette[index * 2 + 1]]) & 0x7FFF
    }

    fn bghofs(&self, bg: usize) -> u16 {
        self.registers.bghofs[bg] & 0x1FF
    }

    fn bgvofs(&self, bg: usize) -> u16 {
        self.registers.bgvofs[bg] & 0x1FF
    }

    // Memory interface

    pub fn read_vram(&self, address: u32) -> u8 {
        self.vram[mirror_vram(address)]
    }

    pub fn write_vram(&mut self, address: u32, value: u8) {
        self.sync_to_current();
        self.vram[mirror_vram(address)] = value;
    }

    pub fn read_palette(&self, address: u32) -> u8 {
        self.palette[(address as usize) & (PALETTE_LEN - 1)]
    }

    pub fn write_palette(&mut self, address: u32, value: u8) {
        self.sync_to_current();
        self.palette[(address as usize) & (PALETTE_LEN - 1)] = value;
    }

    pub fn read_oam(&self, address: u32) -> u8 {
        self.oam[(address as usize) & (OAM_LEN - 1)]
    }

    pub fn write_oam(&mut self, address: u32, value: u8) {
        self.oam[(address as usize) & (OAM_LEN - 1)] = value;
    }

    // Register interface (halfword granularity, offset from $04000000)

    pub fn read_register(&self, offset: u32) -> u16 {
        match offset {
            0x00 => self.registers.dispcnt,
            0x04 => {
                (self.registers.dispstat & 0xFF38)
                    | u16::from(self.in_vblank())
                    | (u16::from(self.in_hblank()) << 1)
                    | (u16::from(self.scanline == self.registers.vcount_target()) << 2)
            }
            0x06 => self.scanline,
            0x08..=0x0E => self.registers.bgcnt[((offset - 0x08) / 2) as usize],
            0x48 => self.registers.winin,
            0x4A => self.registers.winout,
            0x50 => self.registers.bldcnt,
            0x52 => self.registers.bldalpha,
            _ => 0,
        }
    }

    pub fn write_register(&mut self, offset: u32, value: u16) {
        // Writes that change pixel production sync the renderer first
        self.sync_to_current();

        match offset {
            0x00 => self.registers.dispcnt = value,
            0x04 => self.registers.dispstat = value & 0xFFF8,
            0x08..=0x0E => self.registers.bgcnt[((offset - 0x08) / 2) as usize] = value,
            0x10 | 0x14 | 0x18 | 0x1C => {
                self.registers.bghofs[((offset - 0x10) / 4) as usize] = value & 0x1FF;
            }
            0x12 | 0x16 | 0x1A | 0x1E => {
                self.registers.bgvofs[((offset - 0x12) / 4) as usize] = value & 0x1FF;
            }
            0x20 | 0x30 => self.registers.bgpa[((offset - 0x20) / 0x10) as usize] = value as i16,
            0x22 | 0x32 => self.registers.bgpb[((offset - 0x22) / 0x10) as usize] = value as i16,
            0x24 | 0x34 => self.registers.bgpc[((offset - 0x24) / 0x10) as usize] = value as i16,
            0x26 | 0x36 => self.registers.bgpd[((offset - 0x26) / 0x10) as usize] = value as i16,
            0x28 | 0x38 => {
                let bg = ((offset - 0x28) / 0x10) as usize;
                self.registers.bgx[bg] =
                    (self.registers.bgx[bg] & !0xFFFF) | i32::from(value);
                self.internal_x[bg] = sign_extend_28(self.registers.bgx[bg]);
            }
            0x2A | 0x3A => {
                let bg = ((offset - 0x2A) / 0x10) as usize;
                self.registers.bgx[bg] =
                    (self.registers.bgx[bg] & 0xFFFF) | (i32::from(value & 0x0FFF) << 16);
                self.internal_x[bg] = sign_extend_28(self.registers.bgx[bg]);
            }
            0x2C | 0x3C => {
                let bg = ((offset - 0x2C) / 0x10) as usize;
                self.registers.bgy[bg] =
                    (self.registers.bgy[bg] & !0xFFFF) | i32::from(value);
                self.internal_y[bg] = sign_extend_28(self.registers.bgy[bg]);
            }
            0x2E | 0x3E => {
                let bg = ((offset - 0x2E) / 0x10) as usize;
                self.registers.bgy[bg] =
                    (self.registers.bgy[bg] & 0xFFFF) | (i32::from(value & 0x0FFF) << 16);
                self.internal_y[bg] = sign_extend_28(self.registers.bgy[bg]);
            }
            0x40 | 0x42 => self.registers.winh[((offset - 0x40) / 2) as usize] = value,
            0x44 | 0x46 => self.registers.winv[((offset - 0x44) / 2) as usize] = value,
            0x48 => self.registers.winin = value & 0x3F3F,
            0x4A => self.registers.winout = value & 0x3F3F,
            0x4C => self.registers.mosaic = value,
            0x50 => self.registers.bldcnt = value & 0x3FFF,
            0x52 => self.registers.bldalpha = value & 0x1F1F,
            0x54 => self.registers.bldy = value & 0x1F,
            _ => log::debug!("Unhandled PPU register write: {offset:02X} {value:04X}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitmapFormat {
    Direct240,
    Paletted240,
    Direct160,
}

// VRAM is 96KB mirrored oddly: the upper 32KB of each 128KB mirror repeats
fn mirror_vram(address: u32) -> usize {
    let mut offset = (address as usize) & 0x1FFFF;
    if offset >= 0x18000 {
        offset -= 0x8000;
    }
    offset
}

fn sign_extend_28(value: i32) -> i32 {
    (value << 4) >> 4
}

fn rgb555_to_color(value: u16) -> Color {
    let r = (value & 0x1F) as u8;
    let g = ((value >> 5) & 0x1F) as u8;
    let b = ((value >> 10) & 0x1F) as u8;
    Color::rgb((r << 3) | (r >> 2), (g << 3) | (g >> 2), (b << 3) | (b >> 2))
}

fn alpha_blend(first: u16, second: u16, eva: u16, evb: u16) -> u16 {
    let component = |shift: u16| {
        let a = (first >> shift) & 0x1F;
        let b = (second >> shift) & 0x1F;
        ((a * eva + b * evb) / 16).min(31)
    };
    component(0) | (component(5) << 5) | (component(10) << 10)
}

fn brighten(color: u16, coefficient: u16) -> u16 {
    let component = |shift: u16| {
        let value = (color >> shift) & 0x1F;
        value + ((31 - value) * coefficient) / 16
    };
    component(0) | (component(5) << 5) | (component(10) << 10)
}

fn darken(color: u16, coefficient: u16) -> u16 {
    let component = |shift: u16| {
        let value = (color >> shift) & 0x1F;
        value - (value * coefficient) / 16
    };
    component(0) | (component(5) << 5) | (component(10) << 10)
}

fn sprite_size(shape: u16, size: u16) -> (u16, u16) {
    match (shape, size) {
        (0, 0) => (8, 8),
        (0, 1) => (16, 16),
        (0, 2) => (32, 32),
        (0, _) => (64, 64),
        (1, 0) => (16, 8),
        (1, 1) => (32, 8),
        (1, 2) => (32, 16),
        (1, _) => (64, 32),
        (_, 0) => (8, 16),
        (_, 1) => (8, 32),
        (_, 2) => (16, 32),
        _ => (32, 64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vblank_fires_at_line_160_and_frame_completes() {
        let mut ppu = Ppu::new(false);
        let mut interrupts = InterruptRegisters::new();
        ppu.write_register(0x04, 1 << 3);

        ppu.tick(160 * u32::from(DOTS_PER_LINE) * CYCLES_PER_DOT, &mut interrupts);
        let events = ppu.take_events();
        assert_eq!(events.vblank_starts, 1);
        assert_eq!(interrupts.read_if() & 1, 1);
        assert!(!events.frame_complete);

        ppu.tick(68 * u32::from(DOTS_PER_LINE) * CYCLES_PER_DOT, &mut interrupts);
        assert!(ppu.take_events().frame_complete);
    }

    #[test]
    fn forced_vblank_irq_compat_flag() {
        let mut ppu = Ppu::new(true);
        let mut interrupts = InterruptRegisters::new();
        // DISPSTAT VBlank IRQ disabled

        ppu.tick(160 * u32::from(DOTS_PER_LINE) * CYCLES_PER_DOT, &mut interrupts);
        assert_eq!(interrupts.read_if() & 1, 1);
    }

    #[test]
    fn hblank_events_only_on_visible_lines() {
        let mut ppu = Ppu::new(false);
        let mut interrupts = InterruptRegisters::new();

        ppu.tick(
            u32::from(LINES_PER_FRAME) * u32::from(DOTS_PER_LINE) * CYCLES_PER_DOT,
            &mut interrupts,
        );
        let events = ppu.take_events();
        assert_eq!(events.hblank_starts, 160);
    }

    #[test]
    fn mode3_bitmap_pixel_renders() {
        let mut ppu = Ppu::new(false);
        let mut interrupts = InterruptRegisters::new();

        ppu.write_register(0x00, 3 | (1 << 10)); // mode 3, BG2 on
        // Pixel (0,0) = pure red
        ppu.write_vram(0x0600_0000, 0x1F);
        ppu.write_vram(0x0600_0001, 0x00);

        ppu.tick(u32::from(DOTS_PER_LINE) * CYCLES_PER_DOT, &mut interrupts);
        assert_eq!(ppu.frame_buffer()[0], Color::rgb(0xFF, 0, 0));
    }
}
