//! Game Pak: ROM, save memory detection and access, and the GPIO RTC

mod eeprom;
mod flashrom;
mod gpio;

use bincode::{Decode, Encode};
use eeprom::Eeprom;
use flashrom::FlashRom;
use gpio::GpioRtc;
use retrio_common::num::GetBit;
use retrio_proc_macros::{FakeDecode, FakeEncode};
use std::ops::Deref;

const SRAM_LEN: usize = 32 * 1024;

#[derive(Debug, Default, FakeEncode, FakeDecode)]
struct Rom(Box<[u8]>);

impl Deref for Rom {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Encode, Decode)]
enum SaveMemory {
    None,
    Sram { memory: Vec<u8>, dirty: bool },
    // Address width unknown until the first EEPROM DMA reveals it
    EepromUnknownSize,
    Eeprom(Eeprom),
    Flash(FlashRom),
}

impl SaveMemory {
    fn detect(rom: &[u8]) -> Self {
        // The save library leaves an ASCII tag like "FLASH1M_V103" in ROM
        const TAGS: &[(&[u8], fn() -> SaveMemory)] = &[
            (b"EEPROM_V", || SaveMemory::EepromUnknownSize),
            (b"SRAM_V", || SaveMemory::Sram { memory: vec![0xFF; SRAM_LEN], dirty: false }),
            (b"FLASH1M_V", || SaveMemory::Flash(FlashRom::new(true, None))),
            (b"FLASH512_V", || SaveMemory::Flash(FlashRom::new(false, None))),
            (b"FLASH_V", || SaveMemory::Flash(FlashRom::new(false, None))),
        ];

        for &(tag, constructor) in TAGS {
            if rom.windows(tag.len()).any(|window| window == tag) {
                let memory = constructor();
                log::info!("Detected save memory type: {}", memory.name());
                return memory;
            }
        }

        log::info!("No save memory tag found in ROM");
        Self::None
    }

    fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sram { .. } => "SRAM",
            Self::EepromUnknownSize | Self::Eeprom(..) => "EEPROM",
            Self::Flash(flash) => {
                if flash.memory().len() > 64 * 1024 { "Flash 128K" } else { "Flash 64K" }
            }
        }
    }
}

#[derive(Debug, Encode, Decode)]
pub struct Cartridge {
    rom: Rom,
    save_memory: SaveMemory,
    rtc: Option<GpioRtc>,
    initial_save: Option<Vec<u8>>,
}

impl Cartridge {
    pub fn new(mut rom: Vec<u8>, initial_save: Option<Vec<u8>>) -> Self {
        strip_copier_header(&mut rom);

        let mut save_memory = SaveMemory::detect(&rom);
        if let Some(save) = &initial_save {
            restore_save(&mut save_memory, save);
        }

        // Carrying an RTC is harmless for games that lack one; they never
        // touch the GPIO registers
        let rtc = Some(GpioRtc::new());

        Self { rom: Rom(rom.into_boxed_slice()), save_memory, rtc, initial_save }
    }

    pub fn tick(&mut self, cycles: u64) {
        if let Some(rtc) = &mut self.rtc {
            rtc.tick(cycles);
        }
    }

    /// True when the given ROM offset addresses the EEPROM rather than ROM
    /// (top of the 32MB space, or everything past 16MB for small ROMs).
    pub fn is_eeprom_address(&self, address: u32) -> bool {
        if !matches!(
            self.save_memory,
            SaveMemory::EepromUnknownSize | SaveMemory::Eeprom(..)
        ) {
            return false;
        }

        let offset = address & 0x01FF_FFFF;
        if self.rom.len() <= 16 * 1024 * 1024 {
            offset >= 0x0100_0000
        } else {
            offset >= 0x01FF_FF00
        }
    }

    /// Called by the DMA unit before an EEPROM transfer so the address
    /// width can be inferred from the transfer length.
    pub fn configure_eeprom_size(&mut self, dma_length: u32) {
        if let SaveMemory::EepromUnknownSize = self.save_memory {
            // 512-byte parts use 6 address bits (9/73-unit DMAs); 8KB parts
            // use 14 (17/81-unit DMAs)
            let address_bits = if matches!(dma_length, 9 | 73) { 6 } else { 14 };
            log::info!("EEPROM address width set to {address_bits} bits");

            let mut eeprom = Eeprom::new(address_bits, self.initial_save.as_deref());
            if let Some(save) = &self.initial_save {
                eeprom.set_memory(save);
            }
            self.save_memory = SaveMemory::Eeprom(eeprom);
        }
    }

    pub fn read_rom_byte(&self, address: u32) -> u8 {
        let offset = (address & 0x01FF_FFFF) as usize;
        self.rom.get(offset).copied().unwrap_or_else(|| {
            // Reads past the end of ROM return the address bus value
            let halfword = (address >> 1) as u16;
            if address.bit(0) { (halfword >> 8) as u8 } else { halfword as u8 }
        })
    }

    pub fn read_rom_halfword(&self, address: u32) -> u16 {
        u16::from_le_bytes([self.read_rom_byte(address & !1), self.read_rom_byte(address | 1)])
    }

    pub fn read_register_halfword(&self, address: u32) -> Option<u16> {
        // GPIO registers at $080000C4-$080000C9
        if (0xC4..=0xC9).contains(&(address & 0x01FF_FFFF)) {
            return self.rtc.as_ref().map(|rtc| rtc.read_register(address));
        }
        None
    }

    pub fn write_rom_halfword(&mut self, address: u32, value: u16) {
        let offset = address & 0x01FF_FFFF;
        if (0xC4..=0xC9).contains(&offset) {
            if let Some(rtc) = &mut self.rtc {
                rtc.write_register(address, value);
            }
        }
    }

    pub fn read_eeprom_bit(&mut self) -> bool {
        match &mut self.save_memory {
            SaveMemory::Eeprom(eeprom) => eeprom.read_bit(),
            _ => true,
        }
    }

    pub fn write_eeprom_bit(&mut self, bit: bool) {
        if let SaveMemory::Eeprom(eeprom) = &mut self.save_memory {
            eeprom.write_bit(bit);
        }
    }

    /// Save RAM sits on an 8-bit bus at $0E000000.
    pub fn read_sram_byte(&self, address: u32) -> u8 {
        match &self.save_memory {
            SaveMemory::Sram { memory, .. } => memory[(address as usize) & (SRAM_LEN - 1)],
            SaveMemory::Flash(flash) => flash.read(address),
            _ => 0xFF,
        }
    }

    pub fn write_sram_byte(&mut self, address: u32, value: u8) {
        match &mut self.save_memory {
            SaveMemory::Sram { memory, dirty } => {
                memory[(address as usize) & (SRAM_LEN - 1)] = value;
                *dirty = true;
            }
            SaveMemory::Flash(flash) => flash.write(address, value),
            _ => {}
        }
    }

    pub fn has_battery(&self) -> bool {
        !matches!(self.save_memory, SaveMemory::None)
    }

    pub fn save_data(&self) -> Option<Vec<u8>> {
        match &self.save_memory {
            SaveMemory::None | SaveMemory::EepromUnknownSize => None,
            SaveMemory::Sram { memory, .. } => Some(memory.clone()),
            SaveMemory::Eeprom(eeprom) => Some(eeprom.memory().to_vec()),
            SaveMemory::Flash(flash) => Some(flash.memory().to_vec()),
        }
    }

    pub fn set_save_data(&mut self, bytes: &[u8]) {
        restore_save(&mut self.save_memory, bytes);
        self.initial_save = Some(bytes.to_vec());
    }

    pub fn take_rom(&mut self) -> Box<[u8]> {
        std::mem::take(&mut self.rom).0
    }

    pub fn set_rom(&mut self, rom: Box<[u8]>) {
        self.rom = Rom(rom);
    }
}

fn restore_save(save_memory: &mut SaveMemory, bytes: &[u8]) {
    let restored = match save_memory {
        SaveMemory::None | SaveMemory::EepromUnknownSize => true,
        SaveMemory::Sram { memory, dirty } => {
            *dirty = false;
            if memory.len() == bytes.len() {
                memory.copy_from_slice(bytes);
                true
            } else {
                false
            }
        }
        SaveMemory::Eeprom(eeprom) => eeprom.set_memory(bytes),
        SaveMemory::Flash(flash) => flash.set_memory(bytes),
    };

    if !restored {
        log::warn!("Battery save has the wrong length ({} bytes); keeping factory contents", bytes.len());
    }
}

// A 512-byte copier header may precede the ROM iff the size is 512 bytes
// past a 1KB multiple; both alignments are scored and the better one wins
fn strip_copier_header(rom: &mut Vec<u8>) {
    if rom.len() % 1024 != 512 || rom.len() < 512 + 0xC0 {
        return;
    }

    let score_at = |bytes: &[u8]| -> u32 {
        let mut score = 0;
        // Entry point is an ARM branch
        if bytes.len() > 3 && bytes[3] == 0xEA {
            score += 2;
        }
        // Fixed header byte
        if bytes.len() > 0xB2 && bytes[0xB2] == 0x96 {
            score += 4;
        }
        score
    };

    if score_at(&rom[512..]) > score_at(rom) {
        log::info!("Stripping 512-byte copier header");
        rom.drain(..512);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flash_rom() -> Vec<u8> {
        let mut rom = vec![0; 1024 * 1024];
        rom[0x1000..0x1009].copy_from_slice(b"FLASH_V12");
        rom
    }

    // Full-chip erase through the command sequence, observed through the
    // save-RAM window
    #[test]
    fn flash_chip_erase_reads_ff_everywhere() {
        let mut cartridge = Cartridge::new(flash_rom(), None);

        // Program a couple of bytes first
        for (address, value) in [(0x0_u32, 0x12_u8), (0xFFFF, 0x34)] {
            cartridge.write_sram_byte(0x5555, 0xAA);
            cartridge.write_sram_byte(0x2AAA, 0x55);
            cartridge.write_sram_byte(0x5555, 0xA0);
            cartridge.write_sram_byte(address, value);
        }

        cartridge.write_sram_byte(0x5555, 0xAA);
        cartridge.write_sram_byte(0x2AAA, 0x55);
        cartridge.write_sram_byte(0x5555, 0x80);
        cartridge.write_sram_byte(0x5555, 0xAA);
        cartridge.write_sram_byte(0x2AAA, 0x55);
        cartridge.write_sram_byte(0x5555, 0x10);

        for address in (0..0x10000).step_by(0x101) {
            assert_eq!(cartridge.read_sram_byte(address), 0xFF);
        }
    }

    #[test]
    fn save_type_detection_finds_tags() {
        let mut rom = vec![0; 4096 + 0xC0];
        rom[0x200..0x208].copy_from_slice(b"EEPROM_V");
        let cartridge = Cartridge::new(rom, None);
        assert!(matches!(cartridge.save_memory, SaveMemory::EepromUnknownSize));
    }

    #[test]
    fn copier_header_is_stripped_when_it_scores_better() {
        let mut rom = vec![0; 512 + 2048];
        // Valid-looking header only at offset 512
        rom[512 + 3] = 0xEA;
        rom[512 + 0xB2] = 0x96;

        let cartridge = Cartridge::new(rom, None);
        assert_eq!(cartridge.rom.len(), 2048);
        assert_eq!(cartridge.read_rom_byte(3), 0xEA);
    }

    #[test]
    fn open_bus_reads_past_rom_end() {
        let cartridge = Cartridge::new(vec![0; 0xC0 + 1024], None);
        // Past the end, reads return the low halfword of (address >> 1)
        let address = 0x0080_0000_u32;
        let expected = ((address >> 1) & 0xFFFF) as u16;
        assert_eq!(cartridge.read_rom_halfword(address), expected);
    }
}
