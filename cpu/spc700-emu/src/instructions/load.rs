//! MOV instructions in all their forms

use crate::Spc700;
use crate::instructions::{AddressingMode, RegisterTarget};
use crate::traits::BusInterface;

impl Spc700 {
    pub(crate) fn mov_register_load<B: BusInterface>(
        &mut self,
        bus: &mut B,
        target: RegisterTarget,
        mode: AddressingMode,
    ) {
        let value = self.read_operand(bus, mode);
        *self.register(target) = value;
        self.registers.psw.set_nz(value);
    }

    // MOV A, (X)+
    pub(crate) fn mov_a_x_autoinc<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        let address = self.direct_page_addr(self.registers.x);
        let value = self.read(bus, address);
        self.idle(bus);

        self.registers.x = self.registers.x.wrapping_add(1);
        self.registers.a = value;
        self.registers.psw.set_nz(value);
    }

    // MOV (X)+, A
    pub(crate) fn mov_x_autoinc_a<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        let address = self.direct_page_addr(self.registers.x);
        self.write(bus, address, self.registers.a);
        self.idle(bus);

        self.registers.x = self.registers.x.wrapping_add(1);
    }

    /// Stores perform a dummy read of the target address before writing.
    /// MOV stores do not affect flags.
    pub(crate) fn mov_store<B: BusInterface>(
        &mut self,
        bus: &mut B,
        mode: AddressingMode,
        source: RegisterTarget,
    ) {
        let address = self.operand_address(bus, mode);
        self.read(bus, address);
        let value = *self.register(source);
        self.write(bus, address, value);
    }

    pub(crate) fn mov_register_register<B: BusInterface>(
        &mut self,
        bus: &mut B,
        target: RegisterTarget,
        source: RegisterTarget,
    ) {
        self.idle(bus);
        let value = *self.register(source);
        *self.register(target) = value;
        self.registers.psw.set_nz(value);
    }

    pub(crate) fn mov_x_sp<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.registers.x = self.registers.sp;
        self.registers.psw.set_nz(self.registers.x);
    }

    // MOV SP, X does not affect flags
    pub(crate) fn mov_sp_x<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.registers.sp = self.registers.x;
    }

    // MOV dp, dp reads the source but not the destination, and sets no flags
    pub(crate) fn mov_dp_dp<B: BusInterface>(&mut self, bus: &mut B) {
        let src_offset = self.fetch(bus);
        let value = self.read(bus, self.direct_page_addr(src_offset));
        let dst_offset = self.fetch(bus);
        let dst_addr = self.direct_page_addr(dst_offset);
        self.write(bus, dst_addr, value);
    }

    // MOV dp, #imm performs a dummy read of the destination and sets no flags
    pub(crate) fn mov_dp_imm<B: BusInterface>(&mut self, bus: &mut B) {
        let immediate = self.fetch(bus);
        let dst_offset = self.fetch(bus);
        let dst_addr = self.direct_page_addr(dst_offset);
        self.read(bus, dst_addr);
        self.write(bus, dst_addr, immediate);
    }
}
