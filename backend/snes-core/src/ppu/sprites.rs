//! Sprite (OBJ) evaluation and line rendering
//!
//! Sprite state for a scanline is latched in two steps on the previous
//! line: the range scan (which sprites fall on the line) keys off the
//! force-blank flag at dot 270, and the tile fetch keys off it again at
//! dot 272. A sprite only appears if the screen was active at both points.

use crate::ppu::Ppu;
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

pub const SCREEN_WIDTH: usize = 256;

// Hardware limits per scanline
const MAX_RANGE_SPRITES: usize = 32;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct ObjPixel {
    pub color: u8,
    pub palette: u8,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy)]
struct SpriteEntry {
    x: i16,
    y: u8,
    tile: u16,
    palette: u8,
    priority: u8,
    h_flip: bool,
    v_flip: bool,
    width: u16,
    height: u16,
}

fn sprite_sizes(obsel: u8) -> ((u16, u16), (u16, u16)) {
    match (obsel >> 5) & 0x7 {
        0 => ((8, 8), (16, 16)),
        1 => ((8, 8), (32, 32)),
        2 => ((8, 8), (64, 64)),
        3 => ((16, 16), (32, 32)),
        4 => ((16, 16), (64, 64)),
        5 => ((32, 32), (64, 64)),
        6 => ((16, 32), (32, 64)),
        _ => ((16, 32), (32, 32)),
    }
}

impl Ppu {
    /// Evaluate and render the sprites for `line` into the OBJ line buffer.
    /// `range_blank` / `fetch_blank` are the two force-blank latches.
    pub(super) fn render_obj_line(&mut self, line: u16, range_blank: bool, fetch_blank: bool) {
        self.obj_line = [ObjPixel::default(); SCREEN_WIDTH];
        self.obj_range_over = false;

        if range_blank {
            return;
        }

        let obsel = self.registers.obsel;
        let (small, large) = sprite_sizes(obsel);
        let name_base = u16::from(obsel & 0x7) << 13;
        let name_gap = (u16::from((obsel >> 3) & 0x3) + 1) << 12;

        // Range scan, in OAM order
        let mut selected = [None; MAX_RANGE_SPRITES];
        let mut count = 0;
        for index in 0..128 {
            let base = index * 4;
            let high = self.registers.oam[0x200 + index / 4];
            let high_bits = (high >> ((index % 4) * 2)) & 0x3;

            let (width, height) = if high_bits.bit(1) { large } else { small };
            let x = i16::from(self.registers.oam[base]) - i16::from(high_bits & 1) * 256;
            let y = self.registers.oam[base + 1];

            let line_offset = line.wrapping_sub(u16::from(y)) & 0xFF;
            if line_offset >= height {
                continue;
            }
            // Fully off-screen to the left still occupies a range slot at
            // x = -256; beyond that the sprite is skipped
            if x <= -(width as i16) && x != -256 {
                continue;
            }

            if count == MAX_RANGE_SPRITES {
                self.obj_range_over = true;
                break;
            }

            let tile = self.registers.oam[base + 2];
            let attributes = self.registers.oam[base + 3];
            selected[count] = Some(SpriteEntry {
                x,
                y,
                tile: u16::from(tile) | (u16::from(attributes & 1) << 8),
                palette: (attributes >> 1) & 0x7,
                priority: (attributes >> 4) & 0x3,
                h_flip: attributes.bit(6),
                v_flip: attributes.bit(7),
                width,
                height,
            });
            count += 1;
        }

        if fetch_blank {
            // Sprites were found but their tiles are never fetched
            return;
        }

        // Earlier OAM entries win overlaps, so paint in reverse order
        for entry in selected[..count].iter().rev().flatten() {
            self.render_sprite(line, entry, name_base, name_gap);
        }
    }

    fn render_sprite(&mut self, line: u16, sprite: &SpriteEntry, name_base: u16, name_gap: u16) {
        let mut row = line.wrapping_sub(u16::from(sprite.y)) & 0xFF;
        if sprite.v_flip {
            row = sprite.height - 1 - row;
        }

        for pixel in 0..sprite.width {
            let screen_x = i32::from(sprite.x) + i32::from(pixel);
            if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                continue;
            }

            let mut column = pixel;
            if sprite.h_flip {
                column = sprite.width - 1 - column;
            }

            // Large sprites are grids of 8x8 characters; the character
            // index wraps within a 16x16-character table row
            let tile_row = (sprite.tile >> 4).wrapping_add(row / 8) & 0x0F;
            let tile_col = sprite.tile.wrapping_add(column / 8) & 0x0F;
            let character = (tile_row << 4) | tile_col;

            let mut word_address = name_base + character * 16 + (row % 8);
            if sprite.tile.bit(8) {
                word_address = word_address.wrapping_add(name_gap);
            }

            let color = self.sprite_tile_pixel(word_address, (column % 8) as u8);
            if color == 0 {
                continue;
            }

            self.obj_line[screen_x as usize] =
                ObjPixel { color, palette: sprite.palette, priority: sprite.priority };
        }
    }

    // 4bpp fetch: planes 0/1 in the first 8 words, 2/3 in the next 8
    fn sprite_tile_pixel(&self, word_address: u16, column: u8) -> u8 {
        let planes01 = self.registers.vram[usize::from(word_address) & 0x7FFF];
        let planes23 = self.registers.vram[usize::from(word_address + 8) & 0x7FFF];

        let bit = 7 - column;
        u8::from(planes01.bit(bit))
            | (u8::from(planes01.bit(bit + 8)) << 1)
            | (u8::from(planes23.bit(bit)) << 2)
            | (u8::from(planes23.bit(bit + 8)) << 3)
    }
}
