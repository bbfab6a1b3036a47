//! High-level emulation of the BIOS SWI functions
//!
//! Games never see real BIOS code for these; the call is intercepted at the
//! SWI vector, performed here, and returned from directly.

use crate::bus::Bus;
use arm7tdmi_emu::Arm7Tdmi;
use arm7tdmi_emu::bus::{BusInterface, MemoryCycle};
use retrio_common::num::GetBit;

const BIOS_CHECKSUM: u32 = 0xBAAE_187F;

pub fn handle_swi(cpu: &mut Arm7Tdmi, bus: &mut Bus) {
    let return_address = cpu.registers().r[14];
    let function = if cpu.swi_from_thumb() {
        bus.read_halfword(return_address.wrapping_sub(2), MemoryCycle::N) as u8
    } else {
        (bus.read_word(return_address.wrapping_sub(4), MemoryCycle::N) >> 16) as u8
    };

    log::trace!("HLE BIOS call {function:02X}");

    match function {
        // RegisterRamReset; memory clearing is left to the game's own init
        0x01 => {}
        // Halt / IntrWait / VBlankIntrWait all stop the CPU until an
        // enabled interrupt is requested
        0x02 | 0x04 | 0x05 => {
            bus.state.halted = true;
        }
        0x06 => {
            let numerator = cpu.registers().r[0] as i32;
            let denominator = cpu.registers().r[1] as i32;
            let (quotient, remainder) = checked_div(numerator, denominator);
            let registers = cpu.registers_mut();
            registers.r[0] = quotient as u32;
            registers.r[1] = remainder as u32;
            registers.r[3] = quotient.unsigned_abs();
        }
        0x07 => {
            let numerator = cpu.registers().r[1] as i32;
            let denominator = cpu.registers().r[0] as i32;
            let (quotient, remainder) = checked_div(numerator, denominator);
            let registers = cpu.registers_mut();
            registers.r[0] = quotient as u32;
            registers.r[1] = remainder as u32;
            registers.r[3] = quotient.unsigned_abs();
        }
        0x08 => {
            cpu.registers_mut().r[0] = integer_sqrt(cpu.registers().r[0]);
        }
        0x09 => {
            // ArcTan: result in 0x0000-0xFFFF for -PI/2..PI/2
            let tangent = f64::from(cpu.registers().r[0] as i16) / 16384.0;
            let angle = tangent.atan() / std::f64::consts::PI * 32768.0;
            cpu.registers_mut().r[0] = (angle as i32 as u32) & 0xFFFF;
        }
        0x0A => {
            let x = f64::from(cpu.registers().r[0] as i16);
            let y = f64::from(cpu.registers().r[1] as i16);
            let angle = y.atan2(x) / std::f64::consts::TAU * 65536.0;
            cpu.registers_mut().r[0] = (angle as i32 as u32) & 0xFFFF;
        }
        0x0B => cpu_set(cpu, bus),
        0x0C => cpu_fast_set(cpu, bus),
        0x0D => {
            cpu.registers_mut().r[0] = BIOS_CHECKSUM;
        }
        0x11 | 0x12 => lz77_decompress(cpu, bus),
        0x14 | 0x15 => run_length_decompress(cpu, bus),
        _ => {
            log::debug!("Unimplemented BIOS call {function:02X}; returning without effect");
        }
    }

    cpu.return_from_exception(bus);
}

fn checked_div(numerator: i32, denominator: i32) -> (i32, i32) {
    if denominator == 0 {
        // Hardware-ish behavior: +-1 with the numerator as remainder
        (if numerator < 0 { -1 } else { 1 }, numerator)
    } else {
        (numerator.wrapping_div(denominator), numerator.wrapping_rem(denominator))
    }
}

fn integer_sqrt(value: u32) -> u32 {
    let mut root = 0_u32;
    let mut bit = 1_u32 << 30;
    let mut remainder = value;

    while bit != 0 {
        if remainder >= root + bit {
            remainder -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}

fn cpu_set(cpu: &mut Arm7Tdmi, bus: &mut Bus) {
    let mut source = cpu.registers().r[0];
    let mut dest = cpu.registers().r[1];
    let control = cpu.registers().r[2];

    let count = control & 0x1F_FFFF;
    let fill = control.bit(24);
    let words = control.bit(26);
    let step = if words { 4 } else { 2 };

    let fill_value = if words {
        bus.read_word(source, MemoryCycle::N)
    } else {
        bus.read_halfword(source, MemoryCycle::N).into()
    };

    for _ in 0..count {
        let value = if fill {
            fill_value
        } else {
            let value = if words {
                bus.read_word(source, MemoryCycle::S)
            } else {
                bus.read_halfword(source, MemoryCycle::S).into()
            };
            source = source.wrapping_add(step);
            value
        };

        if words {
            bus.write_word(dest, value, MemoryCycle::S);
        } else {
            bus.write_halfword(dest, value as u16, MemoryCycle::S);
        }
        dest = dest.wrapping_add(step);
    }
}

fn cpu_fast_set(cpu: &mut Arm7Tdmi, bus: &mut Bus) {
    let mut source = cpu.registers().r[0];
    let mut dest = cpu.registers().r[1];
    let control = cpu.registers().r[2];

    // Always words, count rounded up to a multiple of 8
    let count = (control & 0x1F_FFFF).next_multiple_of(8);
    let fill = control.bit(24);
    let fill_value = bus.read_word(source, MemoryCycle::N);

    for _ in 0..count {
        let value = if fill {
            fill_value
        } else {
            let value = bus.read_word(source, MemoryCycle::S);
            source = source.wrapping_add(4);
            value
        };
        bus.write_word(dest, value, MemoryCycle::S);
        dest = dest.wrapping_add(4);
    }
}

fn lz77_decompress(cpu: &mut Arm7Tdmi, bus: &mut Bus) {
    let mut source = cpu.registers().r[0];
    let mut dest = cpu.registers().r[1];

    let header = bus.read_word(source, MemoryCycle::N);
    source = source.wrapping_add(4);
    let mut remaining = header >> 8;

    while remaining > 0 {
        let flags = bus.read_byte(source, MemoryCycle::S);
        source = source.wrapping_add(1);

        for block in (0..8).rev() {
            if remaining == 0 {
                break;
            }

            if flags.bit(block) {
                // Back-reference: 4-bit length, 12-bit displacement
                let first = bus.read_byte(source, MemoryCycle::S);
                let second = bus.read_byte(source.wrapping_add(1), MemoryCycle::S);
                source = source.wrapping_add(2);

                let length = u32::from(first >> 4) + 3;
                let displacement =
                    (u32::from(first & 0x0F) << 8 | u32::from(second)) + 1;

                for _ in 0..length.min(remaining) {
                    let value = bus.read_byte(dest.wrapping_sub(displacement), MemoryCycle::S);
                    bus.write_byte(dest, value, MemoryCycle::S);
                    dest = dest.wrapping_add(1);
                }
                remaining = remaining.saturating_sub(length);
            } else {
                let value = bus.read_byte(source, MemoryCycle::S);
                source = source.wrapping_add(1);
                bus.write_byte(dest, value, MemoryCycle::S);
                dest = dest.wrapping_add(1);
                remaining -= 1;
            }
        }
    }
}

fn run_length_decompress(cpu: &mut Arm7Tdmi, bus: &mut Bus) {
    let mut source = cpu.registers().r[0];
    let mut dest = cpu.registers().r[1];

    let header = bus.read_word(source, MemoryCycle::N);
    source = source.wrapping_add(4);
    let mut remaining = header >> 8;

    while remaining > 0 {
        let flag = bus.read_byte(source, MemoryCycle::S);
        source = source.wrapping_add(1);

        if flag.bit(7) {
            let length = (u32::from(flag & 0x7F) + 3).min(remaining);
            let value = bus.read_byte(source, MemoryCycle::S);
            source = source.wrapping_add(1);
            for _ in 0..length {
                bus.write_byte(dest, value, MemoryCycle::S);
                dest = dest.wrapping_add(1);
            }
            remaining -= length;
        } else {
            let length = (u32::from(flag & 0x7F) + 1).min(remaining);
            for _ in 0..length {
                let value = bus.read_byte(source, MemoryCycle::S);
                source = source.wrapping_add(1);
                bus.write_byte(dest, value, MemoryCycle::S);
                dest = dest.wrapping_add(1);
            }
            remaining -= length;
        }
    }
}
