//! Jumps, calls, returns, and restarts

use crate::sm83::Sm83;
use crate::sm83::bus::BusInterface;

impl Sm83 {
    pub(super) fn jr<B: BusInterface>(&mut self, bus: &mut B, taken: bool) {
        let offset = self.fetch_operand(bus) as i8;
        if taken {
            self.registers.pc = self.registers.pc.wrapping_add_signed(offset.into());
            self.idle();
        }
    }

    pub(super) fn jp<B: BusInterface>(&mut self, bus: &mut B, taken: bool) {
        let target = self.fetch_operand_u16(bus);
        if taken {
            self.registers.pc = target;
            self.idle();
        }
    }

    pub(super) fn call<B: BusInterface>(&mut self, bus: &mut B, taken: bool) {
        let target = self.fetch_operand_u16(bus);
        if taken {
            self.idle();
            self.push_stack_u16(bus, self.registers.pc);
            self.registers.pc = target;
        }
    }

    pub(super) fn ret<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.pc = self.pop_stack_u16(bus);
        self.idle();
    }

    pub(super) fn reti<B: BusInterface>(&mut self, bus: &mut B) {
        self.ret(bus);
        self.registers.ime = true;
    }

    pub(super) fn ret_cc<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        self.idle();
        if self.check_condition(opcode) {
            self.ret(bus);
        }
    }

    pub(super) fn rst<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        self.idle();
        self.push_stack_u16(bus, self.registers.pc);
        self.registers.pc = u16::from(opcode & 0x38);
    }
}
