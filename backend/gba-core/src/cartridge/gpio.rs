//! Cartridge GPIO port and the S-3511 real-time clock wired to it
//!
//! The RTC sits on a 3-pin serial interface: SCK, SIO, and CS. Commands are
//! clocked in LSB-first on SCK rising edges while CS is high. Time counts
//! emulated seconds from a fixed epoch so that runs stay deterministic.

use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

const SYSTEM_CLOCK_HZ: u64 = 16 * 1024 * 1024;

const SCK: u8 = 0;
const SIO: u8 = 1;
const CS: u8 = 2;

fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum RtcState {
    ReceiveCommand,
    ReceiveWrite { register: u8, remaining_bytes: u8 },
    Send { remaining_bits: u8 },
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct GpioRtc {
    // Pin latches and GPIO registers
    pin_data: u8,
    direction: u8,
    readable: bool,
    // Serial state
    state: RtcState,
    shift: u64,
    bit_count: u8,
    // Control register (24-hour flag lives in bit 6)
    control: u8,
    // Emulated wall clock
    cycle_accumulator: u64,
    total_seconds: u64,
}

impl GpioRtc {
    pub fn new() -> Self {
        Self {
            pin_data: 0,
            direction: 0,
            readable: false,
            state: RtcState::ReceiveCommand,
            shift: 0,
            bit_count: 0,
            control: 0x40,
            cycle_accumulator: 0,
            total_seconds: 0,
        }
    }

    pub fn tick(&mut self, cycles: u64) {
        self.cycle_accumulator += cycles;
        while self.cycle_accumulator >= SYSTEM_CLOCK_HZ {
            self.cycle_accumulator -= SYSTEM_CLOCK_HZ;
            self.total_seconds += 1;
        }
    }

    // Date/time derived from the running seconds counter; months are
    // simplified to 30 days from the fixed epoch
    fn datetime_bcd(&self) -> [u8; 7] {
        let seconds = (self.total_seconds % 60) as u8;
        let minutes = ((self.total_seconds / 60) % 60) as u8;
        let hours = ((self.total_seconds / 3600) % 24) as u8;
        let total_days = self.total_seconds / 86_400;
        let day = (total_days % 30 + 1) as u8;
        let month = ((total_days / 30) % 12 + 1) as u8;
        let year = (total_days / 360 % 100) as u8;
        let weekday = (total_days % 7) as u8;

        [
            to_bcd(year),
            to_bcd(month),
            to_bcd(day),
            to_bcd(weekday),
            to_bcd(hours),
            to_bcd(minutes),
            to_bcd(seconds),
        ]
    }

    pub fn read_register(&self, address: u32) -> u16 {
        if !self.readable {
            return 0;
        }

        match address & 0xF {
            0x4 => {
                // Output pins read back their latched values; input pins
                // read the RTC's SIO output
                u16::from(self.pin_data)
            }
            0x6 => u16::from(self.direction),
            0x8 => u16::from(self.readable),
            _ => 0,
        }
    }

    pub fn write_register(&mut self, address: u32, value: u16) {
        match address & 0xF {
            0x4 => self.write_pins(value as u8),
            0x6 => self.direction = (value as u8) & 0x0F,
            0x8 => self.readable = value.bit(0),
            _ => {}
        }
    }

    fn write_pins(&mut self, value: u8) {
        let old_sck = self.pin_data.bit(SCK);
        let new = (self.pin_data & !self.direction) | (value & self.direction);

        if !new.bit(CS) {
            // Deselect resets the serial state machine
            self.state = RtcState::ReceiveCommand;
            self.shift = 0;
            self.bit_count = 0;
            self.pin_data = new;
            return;
        }

        // Clocked on the SCK rising edge
        if !old_sck && new.bit(SCK) {
            match self.state {
                RtcState::ReceiveCommand => {
                    self.clock_in_bit(new.bit(SIO));
                    if self.bit_count == 8 {
                        let command = self.shift as u8;
                        self.shift = 0;
                        self.bit_count = 0;
                        self.start_command(command);
                    }
                }
                RtcState::ReceiveWrite { register, remaining_bytes } => {
                    self.clock_in_bit(new.bit(SIO));
                    if self.bit_count == 8 {
                        let byte = self.shift as u8;
                        self.shift = 0;
                        self.bit_count = 0;
                        if register == 0x63 {
                            self.control = byte;
                        }
                        if remaining_bytes > 1 {
                            self.state = RtcState::ReceiveWrite {
                                register,
                                remaining_bytes: remaining_bytes - 1,
                            };
                        } else {
                            self.state = RtcState::ReceiveCommand;
                        }
                    }
                }
                RtcState::Send { remaining_bits } => {
                    let bit = self.shift & 1;
                    self.shift >>= 1;

                    self.pin_data = (new & !(1 << SIO)) | ((bit as u8) << SIO);
                    if remaining_bits > 1 {
                        self.state = RtcState::Send { remaining_bits: remaining_bits - 1 };
                    } else {
                        self.state = RtcState::ReceiveCommand;
                    }
                    return;
                }
            }
        }

        self.pin_data = new;
    }

    fn clock_in_bit(&mut self, bit: bool) {
        // LSB first
        self.shift |= u64::from(bit) << self.bit_count;
        self.bit_count += 1;
    }

    fn start_command(&mut self, command: u8) {
        log::trace!("RTC command {command:02X}");

        match command {
            // Full date/time read: 7 bytes
            0x65 => {
                let datetime = self.datetime_bcd();
                self.shift = datetime
                    .iter()
                    .enumerate()
                    .fold(0_u64, |acc, (i, &byte)| acc | (u64::from(byte) << (8 * i)));
                self.state = RtcState::Send { remaining_bits: 56 };
            }
            // Time-only read: 3 bytes
            0x67 => {
                let datetime = self.datetime_bcd();
                self.shift = u64::from(datetime[4])
                    | (u64::from(datetime[5]) << 8)
                    | (u64::from(datetime[6]) << 16);
                self.state = RtcState::Send { remaining_bits: 24 };
            }
            // Control read
            0x63 => {
                self.shift = u64::from(self.control);
                self.state = RtcState::Send { remaining_bits: 8 };
            }
            // Control write
            0x62 => {
                self.state = RtcState::ReceiveWrite { register: 0x63, remaining_bytes: 1 };
            }
            // Force reset
            0x60 => {
                self.control = 0;
                self.total_seconds = 0;
            }
            _ => {
                log::debug!("Unknown RTC command: {command:02X}");
            }
        }
    }
}
