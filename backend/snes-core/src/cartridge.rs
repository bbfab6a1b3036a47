//! Cartridge: header detection/scoring, LoROM/HiROM/ExHiROM address
//! mapping, and battery-backed SRAM

use crate::api::SnesLoadError;
use bincode::{Decode, Encode};
use retrio_proc_macros::{FakeDecode, FakeEncode};
use std::fmt::{Display, Formatter};
use std::ops::Deref;

const HEADER_LEN: usize = 0x20;

const LOROM_HEADER_ADDR: usize = 0x7FC0;
const HIROM_HEADER_ADDR: usize = 0xFFC0;
const EXHIROM_HEADER_ADDR: usize = 0x40_FFC0;

#[derive(Debug, Default, FakeEncode, FakeDecode)]
struct Rom(Box<[u8]>);

impl Deref for Rom {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum MapperLayout {
    LoRom,
    HiRom,
    ExHiRom,
}

impl Display for MapperLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoRom => write!(f, "LoROM"),
            Self::HiRom => write!(f, "HiROM"),
            Self::ExHiRom => write!(f, "ExHiROM"),
        }
    }
}

/// Coprocessor chips are detected and reported but not emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Coprocessor {
    SuperFx,
    Sa1,
    Dsp,
    Spc7110,
    SDd1,
    Obc1,
    Other(u8),
}

#[derive(Debug, Encode, Decode)]
pub struct Cartridge {
    rom: Rom,
    sram: Vec<u8>,
    layout: MapperLayout,
    coprocessor: Option<Coprocessor>,
    has_battery: bool,
    title: String,
    sram_dirty: bool,
}

/// Score a candidate 32-byte header. The weights mirror the checks that
/// matter in practice: checksum complement consistency dominates, then map
/// mode, declared sizes, region, ROM type, and a printable title.
fn score_header(rom: &[u8], header_addr: usize) -> i32 {
    if rom.len() < header_addr + HEADER_LEN {
        return i32::MIN;
    }
    let header = &rom[header_addr..header_addr + HEADER_LEN];

    let map_mode = header[0x15];
    let rom_type = header[0x16];
    let rom_size_byte = header[0x17];
    let ram_size_byte = header[0x18];
    let region = header[0x19];
    let checksum_complement = u16::from_le_bytes([header[0x1C], header[0x1D]]);
    let checksum = u16::from_le_bytes([header[0x1E], header[0x1F]]);

    let mut score = 0;

    if checksum ^ checksum_complement == 0xFFFF {
        score += 8;
    }

    if matches!(map_mode & 0x0F, 0x0 | 0x1 | 0x2 | 0x3 | 0x5) {
        score += 2;
    }

    if (0x08..=0x0D).contains(&rom_size_byte) {
        score += 2;
        let declared = 1024_usize << rom_size_byte;
        if declared <= rom.len() * 2 && declared >= rom.len() / 2 {
            score += 2;
        }
    }

    if ram_size_byte <= 0x07 {
        score += 1;
    }

    if region <= 0x0D {
        score += 1;
    }

    if matches!(
        rom_type,
        0x00..=0x03 | 0x13..=0x15 | 0x1A | 0x23 | 0x32..=0x35 | 0x43 | 0x45 | 0x55 | 0xF3 | 0xF5
    ) {
        score += 2;
    }

    if header[..0x15].iter().all(|&byte| byte == 0x20 || byte.is_ascii_graphic()) {
        score += 2;
    }

    score
}

fn detect_layout(rom: &[u8]) -> Result<(MapperLayout, usize), SnesLoadError> {
    let lorom = score_header(rom, LOROM_HEADER_ADDR);
    let hirom = score_header(rom, HIROM_HEADER_ADDR);
    let exhirom = score_header(rom, EXHIROM_HEADER_ADDR);

    log::debug!("Header scores: LoROM={lorom}, HiROM={hirom}, ExHiROM={exhirom}");

    if exhirom > lorom && exhirom > hirom && exhirom > 0 {
        return Ok((MapperLayout::ExHiRom, EXHIROM_HEADER_ADDR));
    }
    if hirom > lorom && hirom > 0 {
        return Ok((MapperLayout::HiRom, HIROM_HEADER_ADDR));
    }
    if lorom > 0 {
        return Ok((MapperLayout::LoRom, LOROM_HEADER_ADDR));
    }

    // No candidate scored; guess from the image size, preferring ExHiROM
    // for oversized images and LoROM for everything else
    if rom.len() > 4 * 1024 * 1024 {
        Ok((MapperLayout::ExHiRom, EXHIROM_HEADER_ADDR))
    } else if rom.len() > 0x8000 {
        Ok((MapperLayout::LoRom, LOROM_HEADER_ADDR))
    } else {
        Err(SnesLoadError::UnrecognizedRom)
    }
}

// A 512-byte copier header may precede the image; score both alignments
fn strip_copier_header(rom: &mut Vec<u8>) {
    if rom.len() % 1024 != 512 || rom.len() < 0x8000 + 512 {
        return;
    }

    let with_skip = score_header(&rom[512..], LOROM_HEADER_ADDR)
        .max(score_header(&rom[512..], HIROM_HEADER_ADDR));
    let without_skip =
        score_header(rom, LOROM_HEADER_ADDR).max(score_header(rom, HIROM_HEADER_ADDR));

    if with_skip >= without_skip {
        log::info!("Stripping 512-byte copier header");
        rom.drain(..512);
    }
}

fn detect_coprocessor(rom_type: u8) -> Option<Coprocessor> {
    match rom_type {
        0x00..=0x02 => None,
        0x13..=0x15 | 0x1A => Some(Coprocessor::SuperFx),
        0x32..=0x35 => Some(Coprocessor::Sa1),
        0x03..=0x05 => Some(Coprocessor::Dsp),
        0xF5 | 0xF9 => Some(Coprocessor::Spc7110),
        0x43 | 0x45 => Some(Coprocessor::SDd1),
        0x23 | 0x25 => Some(Coprocessor::Obc1),
        other if other & 0x0F >= 0x03 => Some(Coprocessor::Other(other)),
        _ => None,
    }
}

impl Cartridge {
    pub fn create(mut rom: Vec<u8>, initial_sram: Option<Vec<u8>>) -> Result<Self, SnesLoadError> {
        if rom.len() < 0x8000 {
            return Err(SnesLoadError::RomTooSmall { length: rom.len() });
        }

        strip_copier_header(&mut rom);
        let (layout, header_addr) = detect_layout(&rom)?;

        let header = &rom[header_addr..header_addr + HEADER_LEN];
        let title = String::from_utf8_lossy(&header[..0x15]).trim_end().to_string();
        let rom_type = header[0x16];
        let ram_size_byte = header[0x18];

        let sram_len = match ram_size_byte {
            0 => 0,
            byte @ 1..=7 => 1024_usize << byte,
            _ => 0,
        };
        let has_battery = sram_len != 0 && matches!(rom_type & 0x0F, 0x02 | 0x05 | 0x06);

        let coprocessor = detect_coprocessor(rom_type);
        if let Some(coprocessor) = coprocessor {
            log::warn!(
                "ROM requests unsupported coprocessor {coprocessor:?}; running without it"
            );
        }

        log::info!("Loaded \"{title}\" as {layout}, {sram_len} bytes SRAM, battery={has_battery}");

        let sram = match initial_sram {
            Some(sram) if sram.len() == sram_len => sram,
            _ => vec![0xFF; sram_len],
        };

        Ok(Self {
            rom: Rom(rom.into_boxed_slice()),
            sram,
            layout,
            coprocessor,
            has_battery: has_battery || sram_len != 0,
            title,
            sram_dirty: false,
        })
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn coprocessor(&self) -> Option<Coprocessor> {
        self.coprocessor
    }

    fn rom_byte(&self, offset: usize) -> u8 {
        // Mirror up to the next power of two
        if self.rom.is_empty() {
            return 0;
        }
        let mask = self.rom.len().next_power_of_two() - 1;
        let mut offset = offset & mask;
        while offset >= self.rom.len() {
            offset -= self.rom.len().next_power_of_two() / 2;
        }
        self.rom[offset]
    }

    /// Read through the cartridge decode for bank/offset; None when the
    /// address does not map to the cartridge.
    pub fn read(&self, bank: u8, offset: u16) -> Option<u8> {
        match self.layout {
            MapperLayout::LoRom => self.lorom_read(bank, offset),
            MapperLayout::HiRom => self.hirom_read(bank, offset, 0),
            MapperLayout::ExHiRom => {
                // Banks $00-$7D map the second 4MB, $80-$FF the first
                let base = if bank < 0x80 { 0x40_0000 } else { 0 };
                self.hirom_read(bank, offset, base)
            }
        }
    }

    fn lorom_read(&self, bank: u8, offset: u16) -> Option<u8> {
        let bank = bank & 0x7F;
        match (bank, offset) {
            // 32KB ROM banks in the upper half of each bank
            (_, 0x8000..=0xFFFF) => {
                Some(self.rom_byte((usize::from(bank) << 15) | usize::from(offset & 0x7FFF)))
            }
            // SRAM in banks $70-$7D low halves
            (0x70..=0x7D, 0x0000..=0x7FFF) if !self.sram.is_empty() => {
                let index = (usize::from(bank - 0x70) << 15) | usize::from(offset);
                Some(self.sram[index % self.sram.len()])
            }
            _ => None,
        }
    }

    fn hirom_read(&self, bank: u8, offset: u16, base: usize) -> Option<u8> {
        let bank = bank & 0x7F;
        match (bank, offset) {
            // 64KB ROM banks at $40-$7D
            (0x40..=0x7D, _) => {
                Some(self.rom_byte(base + ((usize::from(bank - 0x40) << 16) | usize::from(offset))))
            }
            // System banks mirror ROM in the upper halves
            (0x00..=0x3F, 0x8000..=0xFFFF) => {
                Some(self.rom_byte(base + ((usize::from(bank) << 16) | usize::from(offset))))
            }
            // SRAM at $20-$3F:$6000-$7FFF
            (0x20..=0x3F, 0x6000..=0x7FFF) if !self.sram.is_empty() => {
                let index = (usize::from(bank - 0x20) << 13) | usize::from(offset - 0x6000);
                Some(self.sram[index % self.sram.len()])
            }
            _ => None,
        }
    }

    /// ROM-region writes only ever land in SRAM; ROM bytes are immutable.
    pub fn write(&mut self, bank: u8, offset: u16, value: u8) {
        if self.sram.is_empty() {
            return;
        }

        let masked_bank = bank & 0x7F;
        let index = match self.layout {
            MapperLayout::LoRom => match (masked_bank, offset) {
                (0x70..=0x7D, 0x0000..=0x7FFF) => {
                    Some((usize::from(masked_bank - 0x70) << 15) | usize::from(offset))
                }
                _ => None,
            },
            MapperLayout::HiRom | MapperLayout::ExHiRom => match (masked_bank, offset) {
                (0x20..=0x3F, 0x6000..=0x7FFF) => {
                    Some((usize::from(masked_bank - 0x20) << 13) | usize::from(offset - 0x6000))
                }
                _ => None,
            },
        };

        if let Some(index) = index {
            let len = self.sram.len();
            self.sram[index % len] = value;
            self.sram_dirty = true;
        }
    }

    pub fn has_battery(&self) -> bool {
        self.has_battery && !self.sram.is_empty()
    }

    pub fn get_and_clear_sram_dirty(&mut self) -> bool {
        std::mem::take(&mut self.sram_dirty)
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn set_sram(&mut self, bytes: &[u8]) {
        if bytes.len() == self.sram.len() {
            self.sram.copy_from_slice(bytes);
        } else {
            log::warn!(
                "Battery save has wrong length ({} bytes, expected {}); resetting",
                bytes.len(),
                self.sram.len()
            );
            self.sram.fill(0xFF);
        }
        self.sram_dirty = false;
    }

    pub fn take_rom(&mut self) -> Box<[u8]> {
        std::mem::take(&mut self.rom).0
    }

    pub fn set_rom(&mut self, rom: Box<[u8]>) {
        self.rom = Rom(rom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_header(header_addr: usize, len: usize, map_mode: u8) -> Vec<u8> {
        let mut rom = vec![0; len];
        let header = &mut rom[header_addr..header_addr + HEADER_LEN];
        header[..0x15].copy_from_slice(b"TEST CARTRIDGE       ");
        header[0x15] = map_mode;
        header[0x16] = 0x02; // ROM + RAM + battery
        header[0x17] = 0x09; // 512KB
        header[0x18] = 0x03; // 8KB SRAM
        header[0x19] = 0x01;
        // Consistent checksum/complement pair
        header[0x1C] = 0xFF;
        header[0x1D] = 0xFF;
        header[0x1E] = 0x00;
        header[0x1F] = 0x00;
        rom
    }

    #[test]
    fn lorom_header_wins_for_lorom_images() {
        let rom = rom_with_header(LOROM_HEADER_ADDR, 512 * 1024, 0x20);
        let cartridge = Cartridge::create(rom, None).unwrap();
        assert_eq!(cartridge.layout, MapperLayout::LoRom);
        assert_eq!(cartridge.title(), "TEST CARTRIDGE");
    }

    #[test]
    fn hirom_header_wins_for_hirom_images() {
        let rom = rom_with_header(HIROM_HEADER_ADDR, 1024 * 1024, 0x21);
        let cartridge = Cartridge::create(rom, None).unwrap();
        assert_eq!(cartridge.layout, MapperLayout::HiRom);
    }

    #[test]
    fn tiny_images_are_rejected() {
        assert!(matches!(
            Cartridge::create(vec![0; 1024], None),
            Err(SnesLoadError::RomTooSmall { .. })
        ));
    }

    #[test]
    fn lorom_maps_32k_banks() {
        let mut rom = rom_with_header(LOROM_HEADER_ADDR, 512 * 1024, 0x20);
        // Tag each 32KB bank
        for bank in 0..16 {
            rom[bank * 0x8000] = bank as u8;
        }
        let cartridge = Cartridge::create(rom, None).unwrap();

        assert_eq!(cartridge.read(0x00, 0x8000), Some(0));
        assert_eq!(cartridge.read(0x01, 0x8000), Some(1));
        assert_eq!(cartridge.read(0x81, 0x8000), Some(1), "high banks mirror");
        assert_eq!(cartridge.read(0x00, 0x0000), None, "low half is not cartridge");
    }

    #[test]
    fn sram_writes_never_touch_rom() {
        let rom = rom_with_header(LOROM_HEADER_ADDR, 512 * 1024, 0x20);
        let mut cartridge = Cartridge::create(rom, None).unwrap();

        let rom_before = cartridge.read(0x00, 0x8123);
        cartridge.write(0x00, 0x8123, 0x55);
        assert_eq!(cartridge.read(0x00, 0x8123), rom_before);

        cartridge.write(0x70, 0x0010, 0x99);
        assert_eq!(cartridge.read(0x70, 0x0010), Some(0x99));
    }
}
