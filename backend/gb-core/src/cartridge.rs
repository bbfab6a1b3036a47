//! Cartridge: ROM image, save RAM, and the memory bank controller

mod mappers;

use crate::api::GameBoyLoadError;
use bincode::{Decode, Encode};
use retrio_proc_macros::{FakeDecode, FakeEncode};
use std::ops::Deref;

use mappers::{Mapper, Mbc3Rtc};

const MBC2_RAM_LEN: usize = 512;

// ROM images are not serialized into save states; the frontend re-attaches
// the image after loading a state
#[derive(Debug, Default, FakeEncode, FakeDecode)]
struct Rom(Box<[u8]>);

impl Deref for Rom {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Encode, Decode)]
pub struct Cartridge {
    rom: Rom,
    sram: Vec<u8>,
    mapper: Mapper,
    has_battery: bool,
    sram_dirty: bool,
}

impl Cartridge {
    pub fn create(rom: Box<[u8]>, initial_sram: Option<Vec<u8>>) -> Result<Self, GameBoyLoadError> {
        if rom.len() < 0x150 {
            return Err(GameBoyLoadError::RomTooSmall { length: rom.len() });
        }

        let mapper_byte = rom[0x147];
        let ram_size_byte = rom[0x149];

        let ram_len = match ram_size_byte {
            0x00 => 0,
            0x02 => 8 * 1024,
            0x03 => 32 * 1024,
            0x04 => 128 * 1024,
            0x05 => 64 * 1024,
            _ => return Err(GameBoyLoadError::InvalidSramByte(ram_size_byte)),
        };

        let rom_len = rom.len() as u32;
        let (mapper, has_battery, ram_len) = match mapper_byte {
            0x00 => (Mapper::none(), false, ram_len),
            0x01 | 0x02 => (Mapper::mbc1(rom_len, ram_len as u32), false, ram_len),
            0x03 => (Mapper::mbc1(rom_len, ram_len as u32), true, ram_len),
            // MBC2 carries its own 512x4-bit RAM regardless of the header
            0x05 => (Mapper::mbc2(rom_len), false, MBC2_RAM_LEN),
            0x06 => (Mapper::mbc2(rom_len), true, MBC2_RAM_LEN),
            0x0F | 0x10 => (Mapper::mbc3(rom_len, ram_len as u32, Some(Mbc3Rtc::new())), true, ram_len),
            0x11 | 0x12 => (Mapper::mbc3(rom_len, ram_len as u32, None), false, ram_len),
            0x13 => (Mapper::mbc3(rom_len, ram_len as u32, None), true, ram_len),
            0x19 | 0x1A | 0x1C | 0x1D => (Mapper::mbc5(rom_len, ram_len as u32), false, ram_len),
            0x1B | 0x1E => (Mapper::mbc5(rom_len, ram_len as u32), true, ram_len),
            _ => return Err(GameBoyLoadError::UnsupportedMapperByte(mapper_byte)),
        };

        log::info!(
            "Loaded cartridge: mapper byte ${mapper_byte:02X}, {} bytes ROM, {ram_len} bytes RAM, battery={has_battery}",
            rom.len()
        );

        let sram = match initial_sram {
            Some(sram) if sram.len() == ram_len => sram,
            _ => vec![0xFF; ram_len],
        };

        Ok(Self { rom: Rom(rom), sram, mapper, has_battery, sram_dirty: false })
    }

    pub fn read_rom(&self, address: u16) -> u8 {
        let rom_addr = self.mapper.map_rom_address(address) as usize;
        self.rom.get(rom_addr).copied().unwrap_or(0xFF)
    }

    // ROM-region writes drive the mapper's bank registers; the ROM bytes
    // themselves are immutable
    pub fn write_rom(&mut self, address: u16, value: u8) {
        self.mapper.write_rom_address(address, value);
    }

    pub fn read_ram(&self, address: u16) -> u8 {
        self.mapper.read_ram(address, &self.sram)
    }

    pub fn write_ram(&mut self, address: u16, value: u8) {
        if self.mapper.write_ram(address, value, &mut self.sram) {
            self.sram_dirty = true;
        }
    }

    /// Advance the RTC (if present) by CPU T-cycles.
    pub fn tick(&mut self, t_cycles: u64) {
        self.mapper.tick_rtc(t_cycles);
    }

    pub fn has_battery(&self) -> bool {
        self.has_battery && !self.sram.is_empty()
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn set_sram(&mut self, bytes: &[u8]) {
        if bytes.len() == self.sram.len() {
            self.sram.copy_from_slice(bytes);
        } else {
            // A malformed save resets the media to factory contents
            log::warn!(
                "Ignoring battery save of {} bytes; expected {}",
                bytes.len(),
                self.sram.len()
            );
            self.sram.fill(0xFF);
        }
        self.sram_dirty = false;
    }

    pub fn get_and_clear_sram_dirty(&mut self) -> bool {
        std::mem::take(&mut self.sram_dirty)
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

    fn make_rom(mapper_byte: u8, ram_size_byte: u8, len: usize) -> Box<[u8]> {
        let mut rom = vec![0; len];
        rom[0x147] = mapper_byte;
        rom[0x149] = ram_size_byte;
        // Tag each 16KB bank with its index for addressing tests
        for (bank, chunk) in rom.chunks_mut(0x4000).enumerate() {
            chunk[0] = bank as u8;
        }
        rom.into_boxed_slice()
    }

    // MBC1 bank switching across the fixed and switchable regions
    #[test]
    fn mbc1_bank_switching() {
        let rom = make_rom(0x01, 0x00, 512 * 1024);
        let mut cartridge = Cartridge::create(rom, None).unwrap();

        cartridge.write_rom(0x2000, 0x03);
        assert_eq!(cartridge.read_rom(0x4000), 3, "bank 3 selected");

        cartridge.write_rom(0x2000, 0x00);
        assert_eq!(cartridge.read_rom(0x4000), 1, "bank 0 is remapped to bank 1");
        assert_eq!(cartridge.read_rom(0x0000), 0, "fixed region still sees bank 0");
    }

    #[test]
    fn mbc2_has_nibble_ram_with_bit8_register_decode() {
        let rom = make_rom(0x06, 0x00, 256 * 1024);
        let mut cartridge = Cartridge::create(rom, None).unwrap();

        // Address bit 8 clear: RAM enable
        cartridge.write_rom(0x0000, 0x0A);
        cartridge.write_ram(0xA000, 0xAB);
        assert_eq!(cartridge.read_ram(0xA000), 0xFB, "upper nibble reads as 1s");

        // Address bit 8 set: ROM bank select
        cartridge.write_rom(0x0100, 0x02);
        assert_eq!(cartridge.read_rom(0x4000), 2);
    }

    #[test]
    fn mbc3_rtc_latches_on_rising_edge() {
        let rom = make_rom(0x10, 0x03, 512 * 1024);
        let mut cartridge = Cartridge::create(rom, None).unwrap();

        cartridge.write_rom(0x0000, 0x0A);
        // Run ~2 emulated seconds
        cartridge.tick(2 * 4_194_304 + 1000);

        // Latch: $00 -> $01 rising edge
        cartridge.write_rom(0x6000, 0x00);
        cartridge.write_rom(0x6000, 0x01);

        // Select the seconds register (bank $08)
        cartridge.write_rom(0x4000, 0x08);
        assert_eq!(cartridge.read_ram(0xA000), 2);

        // More time passes; latched value must not move without a new edge
        cartridge.tick(3 * 4_194_304);
        assert_eq!(cartridge.read_ram(0xA000), 2);

        // Writing $01 again without $00 first is not an edge
        cartridge.write_rom(0x6000, 0x01);
        assert_eq!(cartridge.read_ram(0xA000), 2);

        cartridge.write_rom(0x6000, 0x00);
        cartridge.write_rom(0x6000, 0x01);
        assert_eq!(cartridge.read_ram(0xA000), 5);
    }

    #[test]
    fn writes_to_rom_never_change_rom_bytes() {
        let rom = make_rom(0x01, 0x00, 512 * 1024);
        let mut cartridge = Cartridge::create(rom, None).unwrap();

        let before = cartridge.read_rom(0x0123);
        cartridge.write_rom(0x0123, 0x55);
        // Only the RAM-enable register changed; the ROM byte is intact
        assert_eq!(cartridge.read_rom(0x0123), before);
    }

    #[test]
    fn battery_round_trip() {
        let rom = make_rom(0x03, 0x03, 64 * 1024);
        let mut cartridge = Cartridge::create(rom, None).unwrap();

        cartridge.write_rom(0x0000, 0x0A);
        cartridge.write_ram(0xA123, 0x42);

        let save = cartridge.sram().to_vec();
        cartridge.set_sram(&save);
        assert_eq!(cartridge.read_ram(0xA123), 0x42);
    }
}
