//! ARM7TDMI CPU core, as used in the Game Boy Advance
//!
//! Executes both the 32-bit ARM and 16-bit Thumb instruction sets with a
//! 2-deep prefetch pipeline. One `execute_instruction` call runs a single
//! instruction (or takes a pending IRQ) and returns the nominal cycle count;
//! wait states are accounted by the bus implementation.

pub mod bus;
mod instructions;

use crate::bus::{BusInterface, MemoryCycle};
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CpuState {
    #[default]
    Arm = 0,
    Thumb = 1,
}

impl CpuState {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::Thumb } else { Self::Arm }
    }

    fn opcode_len(self) -> u32 {
        match self {
            Self::Arm => 4,
            Self::Thumb => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CpuMode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    #[default]
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1B,
    System = 0x1F,
}

impl CpuMode {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x1F {
            0x11 => Self::Fiq,
            0x12 => Self::Irq,
            0x13 => Self::Supervisor,
            0x17 => Self::Abort,
            0x1B => Self::Undefined,
            0x1F => Self::System,
            // Anything else is invalid; treat as User, which has no banked state
            _ => Self::User,
        }
    }

    // Index into the R13/R14 bank table
    fn bank_index(self) -> usize {
        match self {
            Self::User | Self::System => 0,
            Self::Fiq => 1,
            Self::Irq => 2,
            Self::Supervisor => 3,
            Self::Abort => 4,
            Self::Undefined => 5,
        }
    }

    // Index into the R8-R12 bank table; only FIQ banks these
    fn r8_r12_bank(self) -> usize {
        usize::from(self == Self::Fiq)
    }

    fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusRegister(u32);

macro_rules! impl_status_flag {
    ($get:ident, $set:ident, $bit:expr) => {
        #[inline]
        fn $get(self) -> bool {
            self.0.bit($bit)
        }

        #[inline]
        fn $set(&mut self, value: bool) {
            if value {
                self.0 |= 1 << $bit;
            } else {
                self.0 &= !(1 << $bit);
            }
        }
    };
}

impl StatusRegister {
    const T_BIT: u32 = 5;

    impl_status_flag!(sign, set_sign, 31);
    impl_status_flag!(zero, set_zero, 30);
    impl_status_flag!(carry, set_carry, 29);
    impl_status_flag!(overflow, set_overflow, 28);
    impl_status_flag!(irq_disabled, set_irq_disabled, 7);
    impl_status_flag!(fiq_disabled, set_fiq_disabled, 6);

    fn state(self) -> CpuState {
        CpuState::from_bit(self.0.bit(Self::T_BIT as u8))
    }

    fn set_state(&mut self, state: CpuState) {
        self.0 = (self.0 & !(1 << Self::T_BIT)) | ((state as u32) << Self::T_BIT);
    }

    fn mode(self) -> CpuMode {
        CpuMode::from_bits(self.0)
    }

    fn set_mode(&mut self, mode: CpuMode) {
        self.0 = (self.0 & !0x1F) | (mode as u32);
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        // Supervisor mode, ARM state, IRQ+FIQ disabled
        Self(0xC0 | CpuMode::Supervisor as u32)
    }
}

impl From<StatusRegister> for u32 {
    fn from(value: StatusRegister) -> Self {
        value.0
    }
}

impl From<u32> for StatusRegister {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Register file with flat per-mode bank tables. A mode change swaps exactly
/// the banked registers through one routine; the shared registers are never
/// touched.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct Registers {
    // Live register file; R15 is the program counter
    pub r: [u32; 16],
    // [0] = all modes except FIQ, [1] = FIQ
    r8_r12_banks: [[u32; 5]; 2],
    // Indexed by CpuMode::bank_index
    r13_r14_banks: [[u32; 2]; 6],
    pub cpsr: StatusRegister,
    // Indexed by CpuMode::bank_index - 1 (FIQ/IRQ/Supervisor/Abort/Undefined)
    spsr: [StatusRegister; 5],
}

impl Registers {
    fn change_mode(&mut self, new_mode: CpuMode) {
        let old_mode = self.cpsr.mode();
        if old_mode == new_mode {
            return;
        }

        let old_bank = old_mode.bank_index();
        let new_bank = new_mode.bank_index();
        if old_bank != new_bank {
            self.r13_r14_banks[old_bank] = [self.r[13], self.r[14]];
            [self.r[13], self.r[14]] = self.r13_r14_banks[new_bank];
        }

        let old_r8_bank = old_mode.r8_r12_bank();
        let new_r8_bank = new_mode.r8_r12_bank();
        if old_r8_bank != new_r8_bank {
            self.r8_r12_banks[old_r8_bank].copy_from_slice(&self.r[8..13]);
            self.r[8..13].copy_from_slice(&self.r8_r12_banks[new_r8_bank]);
        }

        self.cpsr.set_mode(new_mode);
    }

    fn spsr(&self) -> StatusRegister {
        let mode = self.cpsr.mode();
        if mode.has_spsr() {
            self.spsr[mode.bank_index() - 1]
        } else {
            // User/System have no SPSR; reads see the CPSR
            self.cpsr
        }
    }

    fn set_spsr(&mut self, value: StatusRegister) {
        let mode = self.cpsr.mode();
        if mode.has_spsr() {
            self.spsr[mode.bank_index() - 1] = value;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exception {
    Undefined,
    SoftwareInterrupt,
    Irq,
}

impl Exception {
    fn vector(self) -> u32 {
        match self {
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::Irq => 0x18,
        }
    }

    fn mode(self) -> CpuMode {
        match self {
            Self::Undefined => CpuMode::Undefined,
            Self::SoftwareInterrupt => CpuMode::Supervisor,
            Self::Irq => CpuMode::Irq,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Arm7Tdmi {
    registers: Registers,
    // Prefetched opcodes; [0] executes next
    pipeline: [u32; 2],
    pipeline_flushed: bool,
}

impl Arm7Tdmi {
    #[must_use]
    pub fn new() -> Self {
        Self { registers: Registers::default(), pipeline: [0, 0], pipeline_flushed: false }
    }

    /// Reset into the post-boot state: ARM state, System mode, IRQs enabled,
    /// executing from `entry_point`.
    pub fn reset<B: BusInterface>(&mut self, entry_point: u32, bus: &mut B) {
        self.registers = Registers::default();
        self.registers.cpsr.set_mode(CpuMode::System);
        self.registers.cpsr.set_irq_disabled(false);
        self.registers.r[15] = entry_point;
        self.refill_pipeline(bus);
        self.pipeline_flushed = false;
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// Set a mode's banked R13, whether or not that mode is current. Boot
    /// code normally does this itself; HLE boot paths use this instead.
    pub fn set_banked_stack_pointer(&mut self, mode: CpuMode, value: u32) {
        let bank = mode.bank_index();
        if bank == self.registers.cpsr.mode().bank_index() {
            self.registers.r[13] = value;
        } else {
            self.registers.r13_r14_banks[bank][0] = value;
        }
    }

    /// Address of the instruction that will execute next.
    #[must_use]
    pub fn next_pc(&self) -> u32 {
        self.registers.r[15].wrapping_sub(2 * self.opcode_len())
    }

    fn opcode_len(&self) -> u32 {
        self.registers.cpsr.state().opcode_len()
    }

    /// Execute one instruction, or take a pending IRQ. Returns the nominal
    /// S/N/I cycle count; bus wait states come on top of this.
    pub fn execute_instruction<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        if bus.irq() && !self.registers.cpsr.irq_disabled() {
            let cycles = self.handle_exception(Exception::Irq, bus);
            // No instruction ran, so there is no PC adjustment to suppress
            self.pipeline_flushed = false;
            return cycles;
        }

        match self.registers.cpsr.state() {
            CpuState::Arm => {
                let opcode = self.advance_pipeline_arm(bus);
                let cycles = self.execute_arm_opcode(opcode, bus);
                self.finish_instruction(4);
                cycles
            }
            CpuState::Thumb => {
                let opcode = self.advance_pipeline_thumb(bus);
                let cycles = self.execute_thumb_opcode(opcode, bus);
                self.finish_instruction(2);
                cycles
            }
        }
    }

    fn advance_pipeline_arm<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        let opcode = self.pipeline[0];
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] = bus.fetch_opcode_word(self.registers.r[15], MemoryCycle::S);
        opcode
    }

    fn advance_pipeline_thumb<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let opcode = self.pipeline[0] as u16;
        self.pipeline[0] = self.pipeline[1];
        self.pipeline[1] =
            bus.fetch_opcode_halfword(self.registers.r[15], MemoryCycle::S).into();
        opcode
    }

    fn finish_instruction(&mut self, opcode_len: u32) {
        if self.pipeline_flushed {
            self.pipeline_flushed = false;
        } else {
            self.registers.r[15] = self.registers.r[15].wrapping_add(opcode_len);
        }
    }

    /// Discard the pipeline and refetch from R15. R15 must already hold the
    /// (unaligned) branch target; afterwards it points two opcodes ahead so
    /// that PC reads observe instruction+8 (ARM) / instruction+4 (Thumb).
    fn refill_pipeline<B: BusInterface>(&mut self, bus: &mut B) {
        match self.registers.cpsr.state() {
            CpuState::Arm => {
                let target = self.registers.r[15] & !3;
                self.pipeline[0] = bus.fetch_opcode_word(target, MemoryCycle::N);
                self.pipeline[1] =
                    bus.fetch_opcode_word(target.wrapping_add(4), MemoryCycle::S);
                self.registers.r[15] = target.wrapping_add(8);
            }
            CpuState::Thumb => {
                let target = self.registers.r[15] & !1;
                self.pipeline[0] = bus.fetch_opcode_halfword(target, MemoryCycle::N).into();
                self.pipeline[1] =
                    bus.fetch_opcode_halfword(target.wrapping_add(2), MemoryCycle::S).into();
                self.registers.r[15] = target.wrapping_add(4);
            }
        }
        self.pipeline_flushed = true;
    }

    fn handle_exception<B: BusInterface>(&mut self, exception: Exception, bus: &mut B) -> u32 {
        // Return address pushed to the new mode's LR:
        //   IRQ: next instruction + 4 (handler returns with SUBS PC, LR, #4)
        //   SWI/Undefined: the following instruction
        let opcode_len = self.opcode_len();
        let return_address = match exception {
            Exception::Irq => self.registers.r[15].wrapping_sub(2 * opcode_len).wrapping_add(4),
            Exception::SoftwareInterrupt | Exception::Undefined => {
                self.registers.r[15].wrapping_sub(opcode_len)
            }
        };

        let old_cpsr = self.registers.cpsr;
        self.registers.change_mode(exception.mode());
        self.registers.set_spsr(old_cpsr);
        self.registers.r[14] = return_address;

        self.registers.cpsr.set_state(CpuState::Arm);
        self.registers.cpsr.set_irq_disabled(true);

        log::trace!("Taking {exception:?} exception, vector {:08X}", exception.vector());

        self.registers.r[15] = exception.vector();
        self.refill_pipeline(bus);

        // 2S + 1N
        3
    }

    /// Write CPSR wholesale (e.g. from MSR or SPSR restore), applying any
    /// resulting mode change through the bank-swap routine.
    fn write_cpsr(&mut self, value: u32) {
        let new_mode = CpuMode::from_bits(value);
        self.registers.change_mode(new_mode);
        self.registers.cpsr = StatusRegister::from(value);
    }

    // Hooks for high-level-emulated BIOS implementations

    /// True immediately after a SWI exception was taken and before the
    /// handler's first instruction has executed.
    #[must_use]
    pub fn at_swi_vector(&self) -> bool {
        self.registers.cpsr.mode() == CpuMode::Supervisor
            && self.next_pc() == Exception::SoftwareInterrupt.vector()
    }

    /// Whether the SWI was issued from Thumb state (per the saved SPSR).
    #[must_use]
    pub fn swi_from_thumb(&self) -> bool {
        self.registers.spsr().state() == CpuState::Thumb
    }

    /// Complete an exception at the emulator level: restore CPSR from the
    /// SPSR and resume at the banked return address.
    pub fn return_from_exception<B: BusInterface>(&mut self, bus: &mut B) {
        let spsr = self.registers.spsr();
        let return_address = self.registers.r[14];
        self.write_cpsr(spsr.into());
        self.registers.r[15] = return_address;
        self.refill_pipeline(bus);
        self.pipeline_flushed = false;
    }
}

impl Default for Arm7Tdmi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        memory: Vec<u8>,
        irq_line: bool,
        internal: u32,
    }

    impl TestBus {
        fn new() -> Self {
            Self { memory: vec![0; 0x10000], irq_line: false, internal: 0 }
        }

        fn write_word_raw(&mut self, address: u32, value: u32) {
            self.memory[address as usize..(address + 4) as usize]
                .copy_from_slice(&value.to_le_bytes());
        }
    }

    impl BusInterface for TestBus {
        fn read_byte(&mut self, address: u32, _cycle: MemoryCycle) -> u8 {
            self.memory[(address as usize) & 0xFFFF]
        }

        fn read_halfword(&mut self, address: u32, _cycle: MemoryCycle) -> u16 {
            let address = (address as usize) & 0xFFFE;
            u16::from_le_bytes([self.memory[address], self.memory[address + 1]])
        }

        fn read_word(&mut self, address: u32, _cycle: MemoryCycle) -> u32 {
            let address = (address as usize) & 0xFFFC;
            u32::from_le_bytes(self.memory[address..address + 4].try_into().unwrap())
        }

        fn write_byte(&mut self, address: u32, value: u8, _cycle: MemoryCycle) {
            self.memory[(address as usize) & 0xFFFF] = value;
        }

        fn write_halfword(&mut self, address: u32, value: u16, _cycle: MemoryCycle) {
            let address = (address as usize) & 0xFFFE;
            self.memory[address..address + 2].copy_from_slice(&value.to_le_bytes());
        }

        fn write_word(&mut self, address: u32, value: u32, _cycle: MemoryCycle) {
            let address = (address as usize) & 0xFFFC;
            self.memory[address..address + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn irq(&self) -> bool {
            self.irq_line
        }

        fn internal_cycles(&mut self, cycles: u32) {
            self.internal += cycles;
        }
    }

    #[test]
    fn failed_condition_is_a_one_cycle_no_op() {
        let mut bus = TestBus::new();
        // MOVEQ R0, #1 with Z clear, then ADD R1, R1, #1
        bus.write_word_raw(0, 0x03A0_0001);
        bus.write_word_raw(4, 0xE281_1001);

        let mut cpu = Arm7Tdmi::new();
        cpu.reset(0, &mut bus);
        cpu.registers_mut().cpsr.set_zero(false);

        assert_eq!(cpu.execute_instruction(&mut bus), 1);
        assert_eq!(cpu.registers().r[0], 0);

        assert_eq!(cpu.execute_instruction(&mut bus), 1);
        assert_eq!(cpu.registers().r[1], 1);
    }

    #[test]
    fn unaligned_ldr_rotates_the_aligned_word() {
        let mut bus = TestBus::new();
        // LDR R0, [R1]
        bus.write_word_raw(0, 0xE591_0000);
        bus.write_word_raw(0x100, 0xAABB_CCDD);

        let mut cpu = Arm7Tdmi::new();
        cpu.reset(0, &mut bus);
        cpu.registers_mut().r[1] = 0x102;

        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers().r[0], 0xCCDD_AABB);
    }

    #[test]
    fn mode_change_swaps_exactly_the_banked_registers() {
        let mut registers = Registers::default();
        registers.cpsr.set_mode(CpuMode::Supervisor);
        registers.r[8] = 111;
        registers.r[13] = 0x3007FE0;
        registers.r[14] = 0x8000123;

        registers.change_mode(CpuMode::Irq);
        registers.r[13] = 0x3007FA0;
        assert_eq!(registers.r[8], 111);

        registers.change_mode(CpuMode::Fiq);
        registers.r[8] = 222;

        registers.change_mode(CpuMode::Supervisor);
        assert_eq!(registers.r[8], 111);
        assert_eq!(registers.r[13], 0x3007FE0);
        assert_eq!(registers.r[14], 0x8000123);
    }

    #[test]
    fn bx_switches_to_thumb_state() {
        let mut bus = TestBus::new();
        // BX R0 with R0 = 0x201 (Thumb target 0x200)
        bus.write_word_raw(0, 0xE12F_FF10);
        // MOV R3, #7 (Thumb)
        bus.memory[0x200] = 0x07;
        bus.memory[0x201] = 0x23;

        let mut cpu = Arm7Tdmi::new();
        cpu.reset(0, &mut bus);
        cpu.registers_mut().r[0] = 0x201;

        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers().cpsr.state(), CpuState::Thumb);

        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers().r[3], 7);
    }

    #[test]
    fn irq_is_not_taken_while_masked() {
        let mut bus = TestBus::new();
        bus.write_word_raw(0, 0xE281_1001);
        bus.write_word_raw(4, 0xE281_1001);
        bus.irq_line = true;

        let mut cpu = Arm7Tdmi::new();
        cpu.reset(0, &mut bus);
        cpu.registers_mut().cpsr.set_irq_disabled(true);

        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers().r[1], 1, "masked IRQ must not preempt execution");

        cpu.registers_mut().cpsr.set_irq_disabled(false);
        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers().cpsr.mode(), CpuMode::Irq);
        assert_eq!(cpu.registers().r[1], 1, "IRQ entry must not execute an instruction");
    }
}
