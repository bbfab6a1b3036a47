//! Sharp SM83, the Game Boy CPU
//!
//! Instruction-level: one `execute_instruction` call runs a single
//! instruction (or the interrupt service routine) and returns the T-cycles
//! it consumed.

mod arithmetic;
mod bits;
pub mod bus;
mod flow;
mod load;

use crate::HardwareMode;
use crate::sm83::bus::BusInterface;
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub(crate) struct Flags {
    pub zero: bool,
    pub subtract: bool,
    pub half_carry: bool,
    pub carry: bool,
}

impl From<Flags> for u8 {
    fn from(value: Flags) -> Self {
        (u8::from(value.zero) << 7)
            | (u8::from(value.subtract) << 6)
            | (u8::from(value.half_carry) << 5)
            | (u8::from(value.carry) << 4)
    }
}

impl From<u8> for Flags {
    fn from(value: u8) -> Self {
        Self {
            zero: value.bit(7),
            subtract: value.bit(6),
            half_carry: value.bit(5),
            carry: value.bit(4),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Registers {
    pub a: u8,
    pub f: Flags,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
    pub ime: bool,
}

const ENTRY_POINT: u16 = 0x0100;

impl Registers {
    // Post-boot-ROM register values; DMG sets A=$01 and CGB sets A=$11
    fn new(hardware_mode: HardwareMode) -> Self {
        match hardware_mode {
            HardwareMode::Dmg => Self {
                a: 0x01,
                f: Flags { zero: true, subtract: false, half_carry: true, carry: true },
                b: 0x00,
                c: 0x13,
                d: 0x00,
                e: 0xD8,
                h: 0x01,
                l: 0x4D,
                sp: 0xFFFE,
                pc: ENTRY_POINT,
                ime: false,
            },
            HardwareMode::Cgb => Self {
                a: 0x11,
                f: Flags { zero: true, subtract: false, half_carry: false, carry: false },
                b: 0x00,
                c: 0x00,
                d: 0xFF,
                e: 0x56,
                h: 0x00,
                l: 0x0D,
                sp: 0xFFFE,
                pc: ENTRY_POINT,
                ime: false,
            },
        }
    }

    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    pub fn set_bc(&mut self, value: u16) {
        [self.b, self.c] = value.to_be_bytes();
    }

    pub fn set_de(&mut self, value: u16) {
        [self.d, self.e] = value.to_be_bytes();
    }

    pub fn set_hl(&mut self, value: u16) {
        [self.h, self.l] = value.to_be_bytes();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    VBlank,
    LcdStatus,
    Timer,
    Serial,
    Joypad,
}

impl InterruptType {
    // Descending priority order
    pub const ALL: [Self; 5] =
        [Self::VBlank, Self::LcdStatus, Self::Timer, Self::Serial, Self::Joypad];

    fn vector(self) -> u16 {
        match self {
            Self::VBlank => 0x0040,
            Self::LcdStatus => 0x0048,
            Self::Timer => 0x0050,
            Self::Serial => 0x0058,
            Self::Joypad => 0x0060,
        }
    }

    pub fn register_mask(self) -> u8 {
        match self {
            Self::VBlank => 1 << 0,
            Self::LcdStatus => 1 << 1,
            Self::Timer => 1 << 2,
            Self::Serial => 1 << 3,
            Self::Joypad => 1 << 4,
        }
    }

    fn highest_priority(bits: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|interrupt| bits & interrupt.register_mask() != 0)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Sm83 {
    registers: Registers,
    pending_ime_set: bool,
    halted: bool,
    halt_bug_armed: bool,
    frozen: bool,
    m_cycles: u32,
}

impl Sm83 {
    pub fn new(hardware_mode: HardwareMode) -> Self {
        Self {
            registers: Registers::new(hardware_mode),
            pending_ime_set: false,
            halted: false,
            halt_bug_armed: false,
            frozen: false,
            m_cycles: 0,
        }
    }

    /// Execute one instruction and return consumed T-cycles.
    pub fn execute_instruction<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        self.m_cycles = 0;

        if self.frozen {
            // An invalid opcode locked the CPU up for good
            self.idle();
            return self.t_cycles();
        }

        if self.halted {
            // HALT ends when any interrupt is requested, regardless of IME
            if !bus.interrupt_pending() {
                self.idle();
                return self.t_cycles();
            }
            self.halted = false;
        }

        if self.registers.ime && bus.interrupt_pending() {
            self.service_interrupt(bus);
            return self.t_cycles();
        }

        if self.pending_ime_set {
            self.registers.ime = true;
            self.pending_ime_set = false;
        }

        let opcode = self.fetch_opcode(bus);
        self.execute_opcode(bus, opcode);
        self.t_cycles()
    }

    fn t_cycles(&self) -> u32 {
        4 * self.m_cycles
    }

    // Counted access helpers; one machine cycle per memory access

    fn read<B: BusInterface>(&mut self, bus: &mut B, address: u16) -> u8 {
        self.m_cycles += 1;
        bus.read(address)
    }

    fn write<B: BusInterface>(&mut self, bus: &mut B, address: u16, value: u8) {
        self.m_cycles += 1;
        bus.write(address, value);
    }

    fn idle(&mut self) {
        self.m_cycles += 1;
    }

    fn fetch_opcode<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let opcode = self.read(bus, self.registers.pc);
        if self.halt_bug_armed {
            // The HALT bug: the opcode after HALT is fetched without
            // advancing PC
            self.halt_bug_armed = false;
        } else {
            self.registers.pc = self.registers.pc.wrapping_add(1);
        }
        opcode
    }

    fn fetch_operand<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let operand = self.read(bus, self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        operand
    }

    fn fetch_operand_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.fetch_operand(bus);
        let msb = self.fetch_operand(bus);
        u16::from_le_bytes([lsb, msb])
    }

    fn push_stack<B: BusInterface>(&mut self, bus: &mut B, value: u8) {
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        self.write(bus, self.registers.sp, value);
    }

    fn push_stack_u16<B: BusInterface>(&mut self, bus: &mut B, value: u16) {
        let [lsb, msb] = value.to_le_bytes();
        self.push_stack(bus, msb);
        self.push_stack(bus, lsb);
    }

    fn pop_stack<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let value = self.read(bus, self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(1);
        value
    }

    fn pop_stack_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.pop_stack(bus);
        let msb = self.pop_stack(bus);
        u16::from_le_bytes([lsb, msb])
    }

    fn service_interrupt<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle();
        self.idle();

        let [pc_lsb, pc_msb] = self.registers.pc.to_le_bytes();
        self.push_stack(bus, pc_msb);
        // IE is sampled between the two pushes; a push over IE can cancel
        // the interrupt
        let ie_register = bus.read_ie_register();
        self.push_stack(bus, pc_lsb);
        self.idle();

        let if_register = bus.read_if_register();
        self.registers.ime = false;

        let Some(interrupt) = InterruptType::highest_priority(ie_register & if_register & 0x1F)
        else {
            self.registers.pc = 0x0000;
            return;
        };

        bus.acknowledge_interrupt(interrupt);
        self.registers.pc = interrupt.vector();

        log::trace!("Servicing {interrupt:?} interrupt");
    }

    fn read_register8<B: BusInterface>(&mut self, bus: &mut B, bits: u8) -> u8 {
        match bits & 0x7 {
            0x0 => self.registers.b,
            0x1 => self.registers.c,
            0x2 => self.registers.d,
            0x3 => self.registers.e,
            0x4 => self.registers.h,
            0x5 => self.registers.l,
            // (HL)
            0x6 => self.read(bus, self.registers.hl()),
            _ => self.registers.a,
        }
    }

    fn write_register8<B: BusInterface>(&mut self, bus: &mut B, bits: u8, value: u8) {
        match bits & 0x7 {
            0x0 => self.registers.b = value,
            0x1 => self.registers.c = value,
            0x2 => self.registers.d = value,
            0x3 => self.registers.e = value,
            0x4 => self.registers.h = value,
            0x5 => self.registers.l = value,
            // (HL)
            0x6 => self.write(bus, self.registers.hl(), value),
            _ => self.registers.a = value,
        }
    }

    fn execute_opcode<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        match opcode {
            // NOP
            0x00 => {}
            // LD rr, u16
            0x01 | 0x11 | 0x21 | 0x31 => self.ld_rr_nn(bus, opcode),
            // LD (BC), A / LD (DE), A
            0x02 => self.ld_indirect_a(bus, self.registers.bc()),
            0x12 => self.ld_indirect_a(bus, self.registers.de()),
            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => self.inc_rr(bus, opcode),
            0x0B | 0x1B | 0x2B | 0x3B => self.dec_rr(bus, opcode),
            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => self.add_hl_rr(opcode),
            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => self.inc_r(bus, opcode),
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => self.dec_r(bus, opcode),
            // LD r, u8
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => self.ld_r_imm(bus, opcode),
            // Accumulator rotates
            0x07 => self.rlca(),
            0x0F => self.rrca(),
            0x17 => self.rla(),
            0x1F => self.rra(),
            // LD (u16), SP
            0x08 => self.ld_indirect_sp(bus),
            // LD A, (BC) / LD A, (DE)
            0x0A => self.ld_a_indirect_rr(bus, self.registers.bc()),
            0x1A => self.ld_a_indirect_rr(bus, self.registers.de()),
            // STOP
            0x10 => self.stop(bus),
            // JR
            0x18 => self.jr(bus, true),
            0x20 | 0x28 | 0x30 | 0x38 => {
                let taken = self.check_condition(opcode);
                self.jr(bus, taken);
            }
            // LD (HL±), A / LD A, (HL±)
            0x22 => self.ld_hl_a_postincrement(bus, 1),
            0x32 => self.ld_hl_a_postincrement(bus, -1),
            0x2A => self.ld_a_hl_postincrement(bus, 1),
            0x3A => self.ld_a_hl_postincrement(bus, -1),
            // DAA / CPL / SCF / CCF
            0x27 => self.daa(),
            0x2F => self.cpl(),
            0x37 => self.scf(),
            0x3F => self.ccf(),
            // HALT
            0x76 => self.halt(bus),
            // LD r, r'
            0x40..=0x7F => self.ld_r_r(bus, opcode),
            // 8-bit ALU on registers
            0x80..=0x87 => self.add_a_r(bus, opcode, false),
            0x88..=0x8F => self.add_a_r(bus, opcode, true),
            0x90..=0x97 => self.sub_a_r(bus, opcode, false),
            0x98..=0x9F => self.sub_a_r(bus, opcode, true),
            0xA0..=0xA7 => self.and_a_r(bus, opcode),
            0xA8..=0xAF => self.xor_a_r(bus, opcode),
            0xB0..=0xB7 => self.or_a_r(bus, opcode),
            0xB8..=0xBF => self.cp_a_r(bus, opcode),
            // Conditional and plain returns
            0xC0 | 0xC8 | 0xD0 | 0xD8 => self.ret_cc(bus, opcode),
            0xC9 => self.ret(bus),
            0xD9 => self.reti(bus),
            // POP / PUSH
            0xC1 | 0xD1 | 0xE1 | 0xF1 => self.pop_rr(bus, opcode),
            0xC5 | 0xD5 | 0xE5 | 0xF5 => self.push_rr(bus, opcode),
            // JP / CALL
            0xC3 => self.jp(bus, true),
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let taken = self.check_condition(opcode);
                self.jp(bus, taken);
            }
            0xCD => self.call(bus, true),
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let taken = self.check_condition(opcode);
                self.call(bus, taken);
            }
            // RST
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => self.rst(bus, opcode),
            // 8-bit ALU on immediates
            0xC6 => self.add_a_imm(bus, false),
            0xCE => self.add_a_imm(bus, true),
            0xD6 => self.sub_a_imm(bus, false),
            0xDE => self.sub_a_imm(bus, true),
            0xE6 => self.and_a_imm(bus),
            0xEE => self.xor_a_imm(bus),
            0xF6 => self.or_a_imm(bus),
            0xFE => self.cp_a_imm(bus),
            // $CB prefix
            0xCB => self.execute_cb_opcode(bus),
            // High-page loads
            0xE0 => self.ldh_imm_a(bus),
            0xF0 => self.ldh_a_imm(bus),
            0xE2 => self.ldh_c_a(bus),
            0xF2 => self.ldh_a_c(bus),
            // LD (u16), A / LD A, (u16)
            0xEA => self.ld_nn_a(bus),
            0xFA => self.ld_a_nn(bus),
            // SP arithmetic
            0xE8 => self.add_sp_e(bus),
            0xF8 => self.ld_hl_sp_e(bus),
            0xF9 => self.ld_sp_hl(),
            // JP HL
            0xE9 => self.registers.pc = self.registers.hl(),
            // DI / EI
            0xF3 => {
                self.registers.ime = false;
                self.pending_ime_set = false;
            }
            0xFB => self.pending_ime_set = true,
            // Invalid opcodes freeze the CPU
            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                log::error!(
                    "SM83 executed invalid opcode ${opcode:02X} at ${:04X}; CPU is frozen",
                    self.registers.pc.wrapping_sub(1)
                );
                self.frozen = true;
            }
        }
    }

    fn execute_cb_opcode<B: BusInterface>(&mut self, bus: &mut B) {
        let opcode = self.fetch_operand(bus);
        match opcode {
            0x00..=0x07 => self.rlc_r(bus, opcode),
            0x08..=0x0F => self.rrc_r(bus, opcode),
            0x10..=0x17 => self.rl_r(bus, opcode),
            0x18..=0x1F => self.rr_r(bus, opcode),
            0x20..=0x27 => self.sla_r(bus, opcode),
            0x28..=0x2F => self.sra_r(bus, opcode),
            0x30..=0x37 => self.swap_r(bus, opcode),
            0x38..=0x3F => self.srl_r(bus, opcode),
            0x40..=0x7F => self.bit_r(bus, opcode),
            0x80..=0xBF => self.res_r(bus, opcode),
            0xC0..=0xFF => self.set_r(bus, opcode),
        }
    }

    fn check_condition(&self, opcode: u8) -> bool {
        match (opcode >> 3) & 0x3 {
            0x0 => !self.registers.f.zero,
            0x1 => self.registers.f.zero,
            0x2 => !self.registers.f.carry,
            _ => self.registers.f.carry,
        }
    }

    fn halt<B: BusInterface>(&mut self, bus: &mut B) {
        if !self.registers.ime && bus.interrupt_pending() {
            // HALT with a pending interrupt and IME clear triggers the bug
            // instead of halting
            self.halt_bug_armed = true;
        } else {
            self.halted = true;
        }
    }

    fn stop<B: BusInterface>(&mut self, bus: &mut B) {
        // STOP's operand byte is skipped
        self.fetch_operand(bus);

        if bus.speed_switch_armed() {
            bus.perform_speed_switch();
        }
        // Actual STOP-mode power-down is not entered; games use STOP almost
        // exclusively for the CGB speed switch
    }
}
