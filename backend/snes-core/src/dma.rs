//! General-purpose DMA and HBlank DMA (8 channels)

use crate::bus::Bus;
use bincode::{Decode, Encode};
use retrio_common::num::{GetBit, U16Ext};

const CHANNELS: usize = 8;

// B-bus addresses live at $2100-$21FF
const B_BUS_BASE: u16 = 0x2100;

// Master cycles per DMA byte
const MCLKS_PER_DMA_BYTE: u64 = 8;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct DmaChannel {
    // $43x0 DMAP
    pub control: u8,
    // $43x1 BBAD
    pub b_bus_address: u8,
    // $43x2-$43x4 A1T / A1B
    pub a_bus_address: u16,
    pub a_bus_bank: u8,
    // $43x5-$43x6 DAS: byte count for GPDMA, indirect address for HDMA
    pub transfer_size: u16,
    // $43x7 DASB: indirect HDMA bank
    pub indirect_bank: u8,
    // $43x8-$43x9 A2A: HDMA table cursor
    pub table_address: u16,
    // $43xA NLTR: line counter (low 7 bits) + repeat flag (bit 7)
    pub line_counter: u8,
    // HDMA per-frame state
    pub hdma_terminated: bool,
    pub hdma_do_transfer: bool,
}

impl DmaChannel {
    fn direction_b_to_a(&self) -> bool {
        self.control.bit(7)
    }

    fn hdma_indirect(&self) -> bool {
        self.control.bit(6)
    }

    fn a_bus_step(&self) -> i32 {
        match (self.control >> 3) & 0x3 {
            0 => 1,
            2 => -1,
            _ => 0,
        }
    }

    fn transfer_pattern(&self) -> &'static [u8] {
        match self.control & 0x7 {
            0 => &[0],
            1 => &[0, 1],
            2 | 6 => &[0, 0],
            3 | 7 => &[0, 0, 1, 1],
            4 => &[0, 1, 2, 3],
            _ => &[0, 1, 0, 1],
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaUnit {
    pub channels: [DmaChannel; CHANNELS],
    pub gpdma_enabled: u8,
    pub hdma_enabled: u8,
}

impl DmaUnit {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| DmaChannel::default()),
            gpdma_enabled: 0,
            hdma_enabled: 0,
        }
    }

    pub fn read_register(&self, offset: u16) -> u8 {
        let channel = &self.channels[usize::from((offset >> 4) & 0x7)];
        match offset & 0xF {
            0x0 => channel.control,
            0x1 => channel.b_bus_address,
            0x2 => channel.a_bus_address.lsb(),
            0x3 => channel.a_bus_address.msb(),
            0x4 => channel.a_bus_bank,
            0x5 => channel.transfer_size.lsb(),
            0x6 => channel.transfer_size.msb(),
            0x7 => channel.indirect_bank,
            0x8 => channel.table_address.lsb(),
            0x9 => channel.table_address.msb(),
            0xA => channel.line_counter,
            _ => 0,
        }
    }

    pub fn write_register(&mut self, offset: u16, value: u8) {
        let channel = &mut self.channels[usize::from((offset >> 4) & 0x7)];
        match offset & 0xF {
            0x0 => channel.control = value,
            0x1 => channel.b_bus_address = value,
            0x2 => channel.a_bus_address.set_lsb(value),
            0x3 => channel.a_bus_address.set_msb(value),
            0x4 => channel.a_bus_bank = value,
            0x5 => channel.transfer_size.set_lsb(value),
            0x6 => channel.transfer_size.set_msb(value),
            0x7 => channel.indirect_bank = value,
            0x8 => channel.table_address.set_lsb(value),
            0x9 => channel.table_address.set_msb(value),
            0xA => channel.line_counter = value,
            _ => {}
        }
    }
}

fn a_bus_address(bank: u8, offset: u16) -> u32 {
    (u32::from(bank) << 16) | u32::from(offset)
}

fn dma_copy_byte(bus: &mut Bus, channel_index: usize, b_offset: u8) {
    let channel = &bus.dma.channels[channel_index];
    let a_address = a_bus_address(channel.a_bus_bank, channel.a_bus_address);
    let b_address = B_BUS_BASE | u16::from(channel.b_bus_address.wrapping_add(b_offset));
    let b_to_a = channel.direction_b_to_a();

    if b_to_a {
        let value = bus.read_b_bus(b_address);
        bus.dma_write_a_bus(a_address, value);
    } else {
        let value = bus.dma_read_a_bus(a_address);
        bus.write_b_bus(b_address, value);
    }

    let channel = &mut bus.dma.channels[channel_index];
    channel.a_bus_address =
        channel.a_bus_address.wrapping_add_signed(channel.a_bus_step() as i16);
    bus.add_cycles(MCLKS_PER_DMA_BYTE);
}

/// Execute all channels requested via $420B, in channel order, atomically.
pub fn execute_gpdma(bus: &mut Bus) {
    let enabled = std::mem::take(&mut bus.dma.gpdma_enabled);

    for channel_index in 0..CHANNELS {
        if !enabled.bit(channel_index as u8) {
            continue;
        }

        let pattern = bus.dma.channels[channel_index].transfer_pattern();
        let count = match bus.dma.channels[channel_index].transfer_size {
            0 => 0x10000_u32,
            size => size.into(),
        };

        log::trace!(
            "GPDMA channel {channel_index}: {count} bytes, B-bus ${:02X}",
            bus.dma.channels[channel_index].b_bus_address
        );

        for unit in 0..count {
            let b_offset = pattern[(unit as usize) % pattern.len()];
            dma_copy_byte(bus, channel_index, b_offset);
        }

        bus.dma.channels[channel_index].transfer_size = 0;
    }
}

fn hdma_load_entry(bus: &mut Bus, channel_index: usize) {
    let channel = &bus.dma.channels[channel_index];
    let table = a_bus_address(channel.a_bus_bank, channel.table_address);
    let entry = bus.dma_read_a_bus(table);

    let channel = &mut bus.dma.channels[channel_index];
    channel.table_address = channel.table_address.wrapping_add(1);
    channel.line_counter = entry;

    if entry == 0 {
        // A zero entry ends this channel for the rest of the frame
        channel.hdma_terminated = true;
        channel.hdma_do_transfer = false;
        return;
    }
    channel.hdma_do_transfer = true;

    if channel.hdma_indirect() {
        let channel = &bus.dma.channels[channel_index];
        let table = a_bus_address(channel.a_bus_bank, channel.table_address);
        let lsb = bus.dma_read_a_bus(table);
        let msb = bus.dma_read_a_bus(table.wrapping_add(1));

        let channel = &mut bus.dma.channels[channel_index];
        channel.table_address = channel.table_address.wrapping_add(2);
        channel.transfer_size = u16::from_le_bytes([lsb, msb]);
    }
}

/// Per-frame HDMA initialization at the top of the frame (V=0).
pub fn hdma_init(bus: &mut Bus) {
    for channel_index in 0..CHANNELS {
        let enabled = bus.dma.hdma_enabled.bit(channel_index as u8);
        let channel = &mut bus.dma.channels[channel_index];
        channel.hdma_terminated = !enabled;
        channel.hdma_do_transfer = false;
        if !enabled {
            continue;
        }

        // The table cursor restarts from the programmed table base
        channel.table_address = channel.a_bus_address;
        hdma_load_entry(bus, channel_index);
    }
}

fn hdma_transfer_unit(bus: &mut Bus, channel_index: usize) {
    let channel = &bus.dma.channels[channel_index];
    let pattern = channel.transfer_pattern();
    let indirect = channel.hdma_indirect();

    for &b_offset in pattern {
        let channel = &bus.dma.channels[channel_index];
        let a_address = if indirect {
            a_bus_address(channel.indirect_bank, channel.transfer_size)
        } else {
            a_bus_address(channel.a_bus_bank, channel.table_address)
        };
        let b_address = B_BUS_BASE | u16::from(channel.b_bus_address.wrapping_add(b_offset));

        if channel.direction_b_to_a() {
            let value = bus.read_b_bus(b_address);
            bus.dma_write_a_bus(a_address, value);
        } else {
            let value = bus.dma_read_a_bus(a_address);
            bus.write_b_bus(b_address, value);
        }

        let channel = &mut bus.dma.channels[channel_index];
        if indirect {
            channel.transfer_size = channel.transfer_size.wrapping_add(1);
        } else {
            channel.table_address = channel.table_address.wrapping_add(1);
        }
        bus.add_cycles(MCLKS_PER_DMA_BYTE);
    }
}

/// Run HDMA for all active channels at the HBlank of a visible scanline.
pub fn hdma_run_hblank(bus: &mut Bus) {
    for channel_index in 0..CHANNELS {
        if !bus.dma.hdma_enabled.bit(channel_index as u8)
            || bus.dma.channels[channel_index].hdma_terminated
        {
            continue;
        }

        if bus.dma.channels[channel_index].hdma_do_transfer {
            hdma_transfer_unit(bus, channel_index);
        }

        let channel = &mut bus.dma.channels[channel_index];
        channel.line_counter = channel.line_counter.wrapping_sub(1);
        if channel.line_counter & 0x7F == 0 {
            hdma_load_entry(bus, channel_index);
        } else {
            // Between reloads, only repeat-mode entries keep transferring
            let repeat = channel.line_counter.bit(7);
            channel.hdma_do_transfer = repeat;
        }
    }
}
