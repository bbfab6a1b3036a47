//! Thumb (16-bit) instruction set

use crate::bus::{BusInterface, MemoryCycle};
use crate::instructions::arm::read_rotated_word;
use crate::instructions::{
    Condition, ShiftType, add_values, multiply_cycles, shift_immediate, shift_register,
    subtract_values,
};
use crate::{Arm7Tdmi, CpuState, Exception};
use retrio_common::num::GetBit;

impl Arm7Tdmi {
    pub(crate) fn execute_thumb_opcode<B: BusInterface>(
        &mut self,
        opcode: u16,
        bus: &mut B,
    ) -> u32 {
        log::trace!("Thumb opcode {opcode:04X} at {:08X}", self.registers.r[15].wrapping_sub(4));

        match opcode >> 12 {
            0x0 | 0x1 => {
                if opcode >> 11 == 0b00011 {
                    self.thumb_add_subtract(opcode)
                } else {
                    self.thumb_shift_immediate(opcode)
                }
            }
            0x2 | 0x3 => self.thumb_alu_immediate(opcode),
            0x4 => match (opcode >> 10) & 3 {
                0b00 => self.thumb_alu(opcode, bus),
                0b01 => self.thumb_high_register_op(opcode, bus),
                _ => self.thumb_pc_relative_load(opcode, bus),
            },
            0x5 => self.thumb_load_store_register_offset(opcode, bus),
            0x6 | 0x7 => self.thumb_load_store_word_byte(opcode, bus),
            0x8 => self.thumb_load_store_halfword(opcode, bus),
            0x9 => self.thumb_load_store_sp_relative(opcode, bus),
            0xA => self.thumb_load_address(opcode),
            0xB => {
                if (opcode >> 8) & 0xF == 0 {
                    self.thumb_adjust_sp(opcode)
                } else {
                    self.thumb_push_pop(opcode, bus)
                }
            }
            0xC => self.thumb_load_store_multiple(opcode, bus),
            0xD => {
                if (opcode >> 8) & 0xF == 0xF {
                    self.handle_exception(Exception::SoftwareInterrupt, bus)
                } else {
                    self.thumb_conditional_branch(opcode, bus)
                }
            }
            0xE => self.thumb_unconditional_branch(opcode, bus),
            _ => self.thumb_long_branch_link(opcode, bus),
        }
    }

    fn set_nz(&mut self, value: u32) {
        self.registers.cpsr.set_sign(value.bit(31));
        self.registers.cpsr.set_zero(value == 0);
    }

    // Format 1: LSL/LSR/ASR with a 5-bit immediate
    fn thumb_shift_immediate(&mut self, opcode: u16) -> u32 {
        let shift_type = ShiftType::from_bits(u32::from(opcode >> 11));
        let amount = u32::from((opcode >> 6) & 0x1F);
        let rs = usize::from((opcode >> 3) & 7);
        let rd = usize::from(opcode & 7);

        let out =
            shift_immediate(self.registers.r[rs], shift_type, amount, self.registers.cpsr.carry());
        self.registers.r[rd] = out.value;
        self.set_nz(out.value);
        self.registers.cpsr.set_carry(out.carry);

        1
    }

    // Format 2: ADD/SUB with a register or 3-bit immediate
    fn thumb_add_subtract(&mut self, opcode: u16) -> u32 {
        let operand2 = if opcode.bit(10) {
            u32::from((opcode >> 6) & 7)
        } else {
            self.registers.r[usize::from((opcode >> 6) & 7)]
        };
        let rs = usize::from((opcode >> 3) & 7);
        let rd = usize::from(opcode & 7);

        let result = if opcode.bit(9) {
            subtract_values(self.registers.r[rs], operand2, true)
        } else {
            add_values(self.registers.r[rs], operand2, false)
        };

        self.registers.r[rd] = result.value;
        self.set_nz(result.value);
        self.registers.cpsr.set_carry(result.carry);
        self.registers.cpsr.set_overflow(result.overflow);

        1
    }

    // Format 3: MOV/CMP/ADD/SUB with an 8-bit immediate
    fn thumb_alu_immediate(&mut self, opcode: u16) -> u32 {
        let rd = usize::from((opcode >> 8) & 7);
        let immediate = u32::from(opcode & 0xFF);

        match (opcode >> 11) & 3 {
            0b00 => {
                self.registers.r[rd] = immediate;
                self.set_nz(immediate);
            }
            0b01 => {
                let result = subtract_values(self.registers.r[rd], immediate, true);
                self.set_nz(result.value);
                self.registers.cpsr.set_carry(result.carry);
                self.registers.cpsr.set_overflow(result.overflow);
            }
            0b10 => {
                let result = add_values(self.registers.r[rd], immediate, false);
                self.registers.r[rd] = result.value;
                self.set_nz(result.value);
                self.registers.cpsr.set_carry(result.carry);
                self.registers.cpsr.set_overflow(result.overflow);
            }
            _ => {
                let result = subtract_values(self.registers.r[rd], immediate, true);
                self.registers.r[rd] = result.value;
                self.set_nz(result.value);
                self.registers.cpsr.set_carry(result.carry);
                self.registers.cpsr.set_overflow(result.overflow);
            }
        }

        1
    }

    // Format 4: register-to-register ALU operations
    fn thumb_alu<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let rs = usize::from((opcode >> 3) & 7);
        let rd = usize::from(opcode & 7);
        let operand1 = self.registers.r[rd];
        let operand2 = self.registers.r[rs];
        let carry_in = self.registers.cpsr.carry();

        let mut cycles = 1;
        match (opcode >> 6) & 0xF {
            0x0 => {
                let value = operand1 & operand2;
                self.registers.r[rd] = value;
                self.set_nz(value);
            }
            0x1 => {
                let value = operand1 ^ operand2;
                self.registers.r[rd] = value;
                self.set_nz(value);
            }
            // Register-specified shifts take one internal cycle
            shift_op @ (0x2 | 0x3 | 0x4 | 0x7) => {
                let shift_type = match shift_op {
                    0x2 => ShiftType::Left,
                    0x3 => ShiftType::LogicalRight,
                    0x4 => ShiftType::ArithmeticRight,
                    _ => ShiftType::RotateRight,
                };
                let out = shift_register(operand1, shift_type, operand2, carry_in);
                self.registers.r[rd] = out.value;
                self.set_nz(out.value);
                self.registers.cpsr.set_carry(out.carry);
                bus.internal_cycles(1);
                cycles = 2;
            }
            0x5 => {
                let result = add_values(operand1, operand2, carry_in);
                self.registers.r[rd] = result.value;
                self.set_full_flags(result);
            }
            0x6 => {
                let result = subtract_values(operand1, operand2, carry_in);
                self.registers.r[rd] = result.value;
                self.set_full_flags(result);
            }
            0x8 => self.set_nz(operand1 & operand2),
            0x9 => {
                let result = subtract_values(0, operand2, true);
                self.registers.r[rd] = result.value;
                self.set_full_flags(result);
            }
            0xA => {
                let result = subtract_values(operand1, operand2, true);
                self.set_full_flags(result);
            }
            0xB => {
                let result = add_values(operand1, operand2, false);
                self.set_full_flags(result);
            }
            0xC => {
                let value = operand1 | operand2;
                self.registers.r[rd] = value;
                self.set_nz(value);
            }
            0xD => {
                let value = operand1.wrapping_mul(operand2);
                self.registers.r[rd] = value;
                self.set_nz(value);
                let internal = multiply_cycles(operand1, true);
                bus.internal_cycles(internal);
                cycles = 1 + internal;
            }
            0xE => {
                let value = operand1 & !operand2;
                self.registers.r[rd] = value;
                self.set_nz(value);
            }
            _ => {
                let value = !operand2;
                self.registers.r[rd] = value;
                self.set_nz(value);
            }
        }

        cycles
    }

    fn set_full_flags(&mut self, result: crate::instructions::ArithmeticResult) {
        self.set_nz(result.value);
        self.registers.cpsr.set_carry(result.carry);
        self.registers.cpsr.set_overflow(result.overflow);
    }

    // Format 5: ADD/CMP/MOV on high registers, plus BX
    fn thumb_high_register_op<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let rs = usize::from(((opcode >> 3) & 7) | ((opcode >> 3) & 8));
        let rd = usize::from((opcode & 7) | ((opcode >> 4) & 8));
        let operand2 = self.registers.r[rs];

        match (opcode >> 8) & 3 {
            0b00 => {
                let value = self.registers.r[rd].wrapping_add(operand2);
                return self.write_thumb_register(rd, value, bus);
            }
            0b01 => {
                let result = subtract_values(self.registers.r[rd], operand2, true);
                self.set_full_flags(result);
            }
            0b10 => {
                return self.write_thumb_register(rd, operand2, bus);
            }
            _ => {
                // BX
                self.registers.cpsr.set_state(CpuState::from_bit(operand2.bit(0)));
                self.registers.r[15] = operand2;
                self.refill_pipeline(bus);
                return 3;
            }
        }

        1
    }

    fn write_thumb_register<B: BusInterface>(&mut self, rd: usize, value: u32, bus: &mut B) -> u32 {
        if rd == 15 {
            self.registers.r[15] = value & !1;
            self.refill_pipeline(bus);
            3
        } else {
            self.registers.r[rd] = value;
            1
        }
    }

    // Format 6: PC-relative load (PC reads as bit-1-cleared)
    fn thumb_pc_relative_load<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let rd = usize::from((opcode >> 8) & 7);
        let offset = u32::from(opcode & 0xFF) << 2;
        let address = (self.registers.r[15] & !2).wrapping_add(offset);

        self.registers.r[rd] = bus.read_word(address, MemoryCycle::N);
        bus.internal_cycles(1);

        3
    }

    // Format 7/8: load/store with register offset
    fn thumb_load_store_register_offset<B: BusInterface>(
        &mut self,
        opcode: u16,
        bus: &mut B,
    ) -> u32 {
        let ro = usize::from((opcode >> 6) & 7);
        let rb = usize::from((opcode >> 3) & 7);
        let rd = usize::from(opcode & 7);
        let address = self.registers.r[rb].wrapping_add(self.registers.r[ro]);

        if opcode.bit(9) {
            // Format 8: sign/halfword variants
            match (opcode >> 10) & 3 {
                0b00 => {
                    bus.write_halfword(address, self.registers.r[rd] as u16, MemoryCycle::N);
                    return 2;
                }
                0b01 => {
                    self.registers.r[rd] = bus.read_byte(address, MemoryCycle::N) as i8 as u32;
                }
                0b10 => {
                    let halfword = bus.read_halfword(address & !1, MemoryCycle::N);
                    self.registers.r[rd] = u32::from(halfword).rotate_right(8 * (address & 1));
                }
                _ => {
                    self.registers.r[rd] = if address.bit(0) {
                        bus.read_byte(address, MemoryCycle::N) as i8 as u32
                    } else {
                        bus.read_halfword(address, MemoryCycle::N) as i16 as u32
                    };
                }
            }
            bus.internal_cycles(1);
            3
        } else {
            match (opcode >> 10) & 3 {
                0b00 => {
                    bus.write_word(address, self.registers.r[rd], MemoryCycle::N);
                    2
                }
                0b01 => {
                    bus.write_byte(address, self.registers.r[rd] as u8, MemoryCycle::N);
                    2
                }
                0b10 => {
                    self.registers.r[rd] = read_rotated_word(bus, address, MemoryCycle::N);
                    bus.internal_cycles(1);
                    3
                }
                _ => {
                    self.registers.r[rd] = bus.read_byte(address, MemoryCycle::N).into();
                    bus.internal_cycles(1);
                    3
                }
            }
        }
    }

    // Format 9: load/store word/byte with 5-bit immediate offset
    fn thumb_load_store_word_byte<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let byte = opcode.bit(12);
        let load = opcode.bit(11);
        let offset = u32::from((opcode >> 6) & 0x1F);
        let rb = usize::from((opcode >> 3) & 7);
        let rd = usize::from(opcode & 7);

        let address =
            self.registers.r[rb].wrapping_add(if byte { offset } else { offset << 2 });

        match (load, byte) {
            (true, false) => {
                self.registers.r[rd] = read_rotated_word(bus, address, MemoryCycle::N);
                bus.internal_cycles(1);
                3
            }
            (true, true) => {
                self.registers.r[rd] = bus.read_byte(address, MemoryCycle::N).into();
                bus.internal_cycles(1);
                3
            }
            (false, false) => {
                bus.write_word(address, self.registers.r[rd], MemoryCycle::N);
                2
            }
            (false, true) => {
                bus.write_byte(address, self.registers.r[rd] as u8, MemoryCycle::N);
                2
            }
        }
    }

    // Format 10: load/store halfword with immediate offset
    fn thumb_load_store_halfword<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let load = opcode.bit(11);
        let offset = u32::from((opcode >> 6) & 0x1F) << 1;
        let rb = usize::from((opcode >> 3) & 7);
        let rd = usize::from(opcode & 7);
        let address = self.registers.r[rb].wrapping_add(offset);

        if load {
            let halfword = bus.read_halfword(address & !1, MemoryCycle::N);
            self.registers.r[rd] = u32::from(halfword).rotate_right(8 * (address & 1));
            bus.internal_cycles(1);
            3
        } else {
            bus.write_halfword(address, self.registers.r[rd] as u16, MemoryCycle::N);
            2
        }
    }

    // Format 11: SP-relative load/store
    fn thumb_load_store_sp_relative<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let load = opcode.bit(11);
        let rd = usize::from((opcode >> 8) & 7);
        let offset = u32::from(opcode & 0xFF) << 2;
        let address = self.registers.r[13].wrapping_add(offset);

        if load {
            self.registers.r[rd] = read_rotated_word(bus, address, MemoryCycle::N);
            bus.internal_cycles(1);
            3
        } else {
            bus.write_word(address, self.registers.r[rd], MemoryCycle::N);
            2
        }
    }

    // Format 12: ADD Rd, PC/SP, #imm
    fn thumb_load_address(&mut self, opcode: u16) -> u32 {
        let rd = usize::from((opcode >> 8) & 7);
        let offset = u32::from(opcode & 0xFF) << 2;

        self.registers.r[rd] = if opcode.bit(11) {
            self.registers.r[13].wrapping_add(offset)
        } else {
            (self.registers.r[15] & !2).wrapping_add(offset)
        };

        1
    }

    // Format 13: ADD SP, #±imm
    fn thumb_adjust_sp(&mut self, opcode: u16) -> u32 {
        let offset = u32::from(opcode & 0x7F) << 2;
        self.registers.r[13] = if opcode.bit(7) {
            self.registers.r[13].wrapping_sub(offset)
        } else {
            self.registers.r[13].wrapping_add(offset)
        };

        1
    }

    // Format 14: PUSH/POP
    fn thumb_push_pop<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let load = opcode.bit(11);
        let include_pc_lr = opcode.bit(8);
        let rlist = u32::from(opcode & 0xFF);
        let count = rlist.count_ones() + u32::from(include_pc_lr);

        if count == 0 {
            return 1;
        }

        let mut cycle = MemoryCycle::N;
        if load {
            // POP: ascending from SP
            let mut address = self.registers.r[13];
            for r in 0..8_u8 {
                if rlist.bit(r) {
                    self.registers.r[usize::from(r)] = bus.read_word(address, cycle);
                    address = address.wrapping_add(4);
                    cycle = MemoryCycle::S;
                }
            }

            let mut pc_loaded = false;
            if include_pc_lr {
                let value = bus.read_word(address, cycle);
                address = address.wrapping_add(4);
                self.registers.r[15] = value & !1;
                pc_loaded = true;
            }

            self.registers.r[13] = address;
            bus.internal_cycles(1);

            if pc_loaded {
                self.refill_pipeline(bus);
                count + 4
            } else {
                count + 2
            }
        } else {
            // PUSH: descending, stored ascending from the new SP
            let mut address = self.registers.r[13].wrapping_sub(4 * count);
            self.registers.r[13] = address;

            for r in 0..8_u8 {
                if rlist.bit(r) {
                    bus.write_word(address, self.registers.r[usize::from(r)], cycle);
                    address = address.wrapping_add(4);
                    cycle = MemoryCycle::S;
                }
            }
            if include_pc_lr {
                bus.write_word(address, self.registers.r[14], cycle);
            }

            count + 1
        }
    }

    // Format 15: LDMIA/STMIA
    fn thumb_load_store_multiple<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let load = opcode.bit(11);
        let rb = usize::from((opcode >> 8) & 7);
        let rlist = u32::from(opcode & 0xFF);

        if rlist == 0 {
            // Empty list transfers R15 and moves the base by 0x40
            let base = self.registers.r[rb];
            if load {
                self.registers.r[15] = bus.read_word(base, MemoryCycle::N) & !1;
                self.registers.r[rb] = base.wrapping_add(0x40);
                bus.internal_cycles(1);
                self.refill_pipeline(bus);
                return 5;
            }
            bus.write_word(base, self.registers.r[15].wrapping_add(2), MemoryCycle::N);
            self.registers.r[rb] = base.wrapping_add(0x40);
            return 2;
        }

        let count = rlist.count_ones();
        let mut address = self.registers.r[rb];
        let written_back = address.wrapping_add(4 * count);

        let mut cycle = MemoryCycle::N;
        let mut first = true;
        for r in 0..8_u8 {
            if !rlist.bit(r) {
                continue;
            }

            if load {
                self.registers.r[usize::from(r)] = bus.read_word(address, cycle);
            } else {
                let value = if usize::from(r) == rb && !first {
                    written_back
                } else {
                    self.registers.r[usize::from(r)]
                };
                bus.write_word(address, value, cycle);
            }

            address = address.wrapping_add(4);
            cycle = MemoryCycle::S;
            first = false;
        }

        // A load that includes the base register wins over writeback
        if !(load && rlist.bit(rb as u8)) {
            self.registers.r[rb] = written_back;
        }

        if load {
            bus.internal_cycles(1);
            count + 2
        } else {
            count + 1
        }
    }

    // Format 16: conditional branch with 8-bit offset
    fn thumb_conditional_branch<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let condition = Condition::from_bits(u32::from(opcode >> 8));
        if !condition.check(self.registers.cpsr) {
            return 1;
        }

        let offset = i32::from(opcode as i8) << 1;
        self.registers.r[15] = self.registers.r[15].wrapping_add_signed(offset);
        self.refill_pipeline(bus);

        3
    }

    // Format 18: unconditional branch with 11-bit offset
    fn thumb_unconditional_branch<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        let offset = ((i32::from(opcode) & 0x7FF) << 21) >> 20;
        self.registers.r[15] = self.registers.r[15].wrapping_add_signed(offset);
        self.refill_pipeline(bus);

        3
    }

    // Format 19: BL, split across two opcodes
    fn thumb_long_branch_link<B: BusInterface>(&mut self, opcode: u16, bus: &mut B) -> u32 {
        if !opcode.bit(11) {
            // First half: LR = PC + (signed offset << 12)
            let offset = ((i32::from(opcode) & 0x7FF) << 21) >> 9;
            self.registers.r[14] = self.registers.r[15].wrapping_add_signed(offset);
            1
        } else {
            // Second half: branch to LR + (offset << 1), LR = return | 1
            let offset = u32::from(opcode & 0x7FF) << 1;
            let target = self.registers.r[14].wrapping_add(offset);
            self.registers.r[14] = self.registers.r[15].wrapping_sub(2) | 1;
            self.registers.r[15] = target;
            self.refill_pipeline(bus);
            3
        }
    }
}
