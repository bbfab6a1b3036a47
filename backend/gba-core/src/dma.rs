//! The four DMA channels. Transfers themselves are executed by the bus
//! (which owns both the channels and the memories); this module keeps the
//! per-channel register and latch state.

use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum AddressMode {
    Increment,
    Decrement,
    Fixed,
    IncrementReload,
}

impl AddressMode {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum DmaTiming {
    Immediate,
    VBlank,
    HBlank,
    // Sound FIFO on channels 1-2, video capture on channel 3
    Special,
}

impl DmaTiming {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::HBlank,
            _ => Self::Special,
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct DmaChannel {
    pub source_address: u32,
    pub dest_address: u32,
    pub word_count: u16,
    pub control: u16,
    // Internal latches, loaded when the channel is enabled
    pub internal_source: u32,
    pub internal_dest: u32,
    pub pending: bool,
}

impl DmaChannel {
    pub fn enabled(&self) -> bool {
        self.control.bit(15)
    }

    pub fn irq_enabled(&self) -> bool {
        self.control.bit(14)
    }

    pub fn timing(&self) -> DmaTiming {
        DmaTiming::from_bits(self.control >> 12)
    }

    pub fn transfer_words(&self) -> bool {
        self.control.bit(10)
    }

    pub fn repeat(&self) -> bool {
        self.control.bit(9)
    }

    pub fn source_mode(&self) -> AddressMode {
        AddressMode::from_bits(self.control >> 7)
    }

    pub fn dest_mode(&self) -> AddressMode {
        AddressMode::from_bits(self.control >> 5)
    }

    pub fn effective_count(&self, channel_index: usize) -> u32 {
        if self.is_fifo_mode(channel_index) {
            // FIFO refills are always four 32-bit words
            return 4;
        }

        match (self.word_count, channel_index) {
            (0, 3) => 0x10000,
            (0, _) => 0x4000,
            (count, _) => count.into(),
        }
    }

    pub fn is_fifo_mode(&self, channel_index: usize) -> bool {
        (channel_index == 1 || channel_index == 2) && self.timing() == DmaTiming::Special
    }

    pub fn advance(address: u32, mode: AddressMode, step: u32) -> u32 {
        match mode {
            AddressMode::Increment | AddressMode::IncrementReload => address.wrapping_add(step),
            AddressMode::Decrement => address.wrapping_sub(step),
            AddressMode::Fixed => address,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaState {
    pub channels: [DmaChannel; 4],
}

impl DmaState {
    pub fn new() -> Self {
        Self { channels: std::array::from_fn(|_| DmaChannel::default()) }
    }

    pub fn write_control(&mut self, index: usize, value: u16) {
        let channel = &mut self.channels[index];
        let was_enabled = channel.enabled();
        channel.control = value;

        if !was_enabled && channel.enabled() {
            channel.internal_source = channel.source_address;
            channel.internal_dest = channel.dest_address;
            if channel.timing() == DmaTiming::Immediate {
                channel.pending = true;
            }
        }
        if !channel.enabled() {
            channel.pending = false;
        }
    }

    pub fn notify_vblank(&mut self) {
        for channel in &mut self.channels {
            if channel.enabled() && channel.timing() == DmaTiming::VBlank {
                channel.pending = true;
            }
        }
    }

    pub fn notify_hblank(&mut self) {
        for channel in &mut self.channels {
            if channel.enabled() && channel.timing() == DmaTiming::HBlank {
                channel.pending = true;
            }
        }
    }

    pub fn notify_fifo(&mut self, fifo_index: usize) {
        // Timer 0 feeds FIFO A via channel 1, timer 1 feeds FIFO B via
        // channel 2, by convention of the destination address
        let channel_index = fifo_index + 1;
        let channel = &mut self.channels[channel_index];
        if channel.enabled() && channel.is_fifo_mode(channel_index) {
            channel.pending = true;
        }
    }

    pub fn next_pending(&self) -> Option<usize> {
        // Lower-numbered channels have priority
        (0..4).find(|&index| self.channels[index].pending)
    }
}
