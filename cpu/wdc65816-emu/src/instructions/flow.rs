//! Control flow: branches, jumps, subroutine calls, interrupts, and the
//! mode-manipulation instructions

use crate::traits::BusInterface;
use crate::{InterruptType, StatusRegister, Wdc65816};
use retrio_common::num::U16Ext;

impl Wdc65816 {
    pub(crate) fn flag_op<B: BusInterface>(&mut self, bus: &mut B, op: fn(&mut StatusRegister)) {
        self.idle(bus);
        op(&mut self.registers.p);
    }

    pub(crate) fn branch_if<B: BusInterface>(
        &mut self,
        bus: &mut B,
        condition: fn(&StatusRegister) -> bool,
    ) {
        let offset = self.fetch(bus) as i8;
        if condition(&self.registers.p) {
            self.idle(bus);
            let target = self.registers.pc.wrapping_add_signed(offset.into());
            // Emulation mode pays an extra cycle for crossing a page
            if self.registers.emulation_mode && (target & 0xFF00) != (self.registers.pc & 0xFF00) {
                self.idle(bus);
            }
            self.registers.pc = target;
        }
    }

    pub(crate) fn brl<B: BusInterface>(&mut self, bus: &mut B) {
        let offset = self.fetch_u16(bus) as i16;
        self.idle(bus);
        self.registers.pc = self.registers.pc.wrapping_add_signed(offset);
    }

    pub(crate) fn jmp_absolute<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.pc = self.fetch_u16(bus);
    }

    // JMP (abs): the pointer is always read from bank 0
    pub(crate) fn jmp_absolute_indirect<B: BusInterface>(&mut self, bus: &mut B) {
        let pointer = self.fetch_u16(bus);
        let lsb = self.read(bus, pointer.into());
        let msb = self.read(bus, u32::from(pointer.wrapping_add(1)));
        self.registers.pc = u16::from_le_bytes([lsb, msb]);
    }

    // JMP (abs,X): the pointer is read from the program bank
    pub(crate) fn jmp_absolute_x_indirect<B: BusInterface>(&mut self, bus: &mut B) {
        let base = self.fetch_u16(bus);
        self.idle(bus);
        let pointer = base.wrapping_add(self.registers.x);
        let bank = u32::from(self.registers.pbr) << 16;
        let lsb = self.read(bus, bank | u32::from(pointer));
        let msb = self.read(bus, bank | u32::from(pointer.wrapping_add(1)));
        self.registers.pc = u16::from_le_bytes([lsb, msb]);
    }

    pub(crate) fn jml_long<B: BusInterface>(&mut self, bus: &mut B) {
        let pc = self.fetch_u16(bus);
        let pbr = self.fetch(bus);
        self.registers.pc = pc;
        self.registers.pbr = pbr;
    }

    // JML [abs]: 24-bit pointer in bank 0
    pub(crate) fn jml_absolute_indirect<B: BusInterface>(&mut self, bus: &mut B) {
        let pointer = self.fetch_u16(bus);
        let lsb = self.read(bus, pointer.into());
        let mid = self.read(bus, u32::from(pointer.wrapping_add(1)));
        let msb = self.read(bus, u32::from(pointer.wrapping_add(2)));
        self.registers.pc = u16::from_le_bytes([lsb, mid]);
        self.registers.pbr = msb;
    }

    pub(crate) fn jsr_absolute<B: BusInterface>(&mut self, bus: &mut B) {
        let target = self.fetch_u16(bus);
        self.idle(bus);

        // The pushed address is that of the operand's last byte
        let return_address = self.registers.pc.wrapping_sub(1);
        self.push(bus, return_address.msb());
        self.push(bus, return_address.lsb());

        self.registers.pc = target;
    }

    pub(crate) fn jsr_absolute_x_indirect<B: BusInterface>(&mut self, bus: &mut B) {
        let base = self.fetch_u16(bus);
        let return_address = self.registers.pc.wrapping_sub(1);
        self.push(bus, return_address.msb());
        self.push(bus, return_address.lsb());
        self.idle(bus);

        let pointer = base.wrapping_add(self.registers.x);
        let bank = u32::from(self.registers.pbr) << 16;
        let lsb = self.read(bus, bank | u32::from(pointer));
        let msb = self.read(bus, bank | u32::from(pointer.wrapping_add(1)));
        self.registers.pc = u16::from_le_bytes([lsb, msb]);
    }

    pub(crate) fn jsl<B: BusInterface>(&mut self, bus: &mut B) {
        let pc = self.fetch_u16(bus);
        self.push(bus, self.registers.pbr);
        self.idle(bus);
        let pbr = self.fetch(bus);

        let return_address = self.registers.pc.wrapping_sub(1);
        self.push(bus, return_address.msb());
        self.push(bus, return_address.lsb());

        self.registers.pc = pc;
        self.registers.pbr = pbr;
    }

    pub(crate) fn rts<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let lsb = self.pop(bus);
        let msb = self.pop(bus);
        self.idle(bus);
        self.registers.pc = u16::from_le_bytes([lsb, msb]).wrapping_add(1);
    }

    pub(crate) fn rtl<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let lsb = self.pop(bus);
        let msb = self.pop(bus);
        let pbr = self.pop(bus);
        self.registers.pc = u16::from_le_bytes([lsb, msb]).wrapping_add(1);
        self.registers.pbr = pbr;
    }

    pub(crate) fn rti<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);

        let p = self.pop(bus);
        self.registers.p = p.into();
        self.registers.enforce_constraints();

        let lsb = self.pop(bus);
        let msb = self.pop(bus);
        self.registers.pc = u16::from_le_bytes([lsb, msb]);

        if !self.registers.emulation_mode {
            self.registers.pbr = self.pop(bus);
        }
    }

    pub(crate) fn brk<B: BusInterface>(&mut self, bus: &mut B) {
        // The signature byte is fetched and discarded
        self.fetch(bus);
        self.service_interrupt(bus, InterruptType::Break);
    }

    pub(crate) fn cop<B: BusInterface>(&mut self, bus: &mut B) {
        self.fetch(bus);
        self.service_interrupt(bus, InterruptType::Coprocessor);
    }

    pub(crate) fn rep<B: BusInterface>(&mut self, bus: &mut B) {
        let mask = self.fetch(bus);
        self.idle(bus);
        let p: u8 = self.registers.p.into();
        self.registers.p = (p & !mask).into();
        self.registers.enforce_constraints();
    }

    pub(crate) fn sep<B: BusInterface>(&mut self, bus: &mut B) {
        let mask = self.fetch(bus);
        self.idle(bus);
        let p: u8 = self.registers.p.into();
        self.registers.p = (p | mask).into();
        self.registers.enforce_constraints();
    }

    pub(crate) fn xce<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        let old_carry = self.registers.p.carry;
        self.registers.p.carry = self.registers.emulation_mode;
        self.registers.emulation_mode = old_carry;
        self.registers.enforce_constraints();
    }

    pub(crate) fn wai<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        self.wait_for_interrupt();
    }

    pub(crate) fn stp_op<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        self.stop();
    }

    // WDM is a reserved 2-byte NOP
    pub(crate) fn wdm<B: BusInterface>(&mut self, bus: &mut B) {
        self.fetch(bus);
    }

    pub(crate) fn pea<B: BusInterface>(&mut self, bus: &mut B) {
        let value = self.fetch_u16(bus);
        self.push(bus, value.msb());
        self.push(bus, value.lsb());
    }

    pub(crate) fn pei<B: BusInterface>(&mut self, bus: &mut B) {
        let offset = self.fetch(bus);
        if self.registers.d.lsb() != 0 {
            self.idle(bus);
        }
        let base = u16::from(offset);
        let lsb = self.read(bus, u32::from(self.registers.d.wrapping_add(base)));
        let msb = self.read(bus, u32::from(self.registers.d.wrapping_add(base.wrapping_add(1))));
        self.push(bus, msb);
        self.push(bus, lsb);
    }

    pub(crate) fn per<B: BusInterface>(&mut self, bus: &mut B) {
        let offset = self.fetch_u16(bus);
        self.idle(bus);
        let value = self.registers.pc.wrapping_add(offset);
        self.push(bus, value.msb());
        self.push(bus, value.lsb());
    }

    /// MVN/MVP move one byte per execution and rewind PC until the count in
    /// A runs out, which is how the hardware makes them interruptible.
    pub(crate) fn block_move<B: BusInterface>(&mut self, bus: &mut B, ascending: bool) {
        let dest_bank = self.fetch(bus);
        let source_bank = self.fetch(bus);
        self.registers.dbr = dest_bank;

        let source = (u32::from(source_bank) << 16) | u32::from(self.registers.x);
        let dest = (u32::from(dest_bank) << 16) | u32::from(self.registers.y);
        let value = self.read(bus, source);
        self.write(bus, dest, value);
        self.idle(bus);
        self.idle(bus);

        let delta = if ascending { 1 } else { u16::MAX };
        self.registers.x = self.registers.x.wrapping_add(delta);
        self.registers.y = self.registers.y.wrapping_add(delta);
        if !self.x_is_16() {
            self.registers.x &= 0xFF;
            self.registers.y &= 0xFF;
        }

        self.registers.a = self.registers.a.wrapping_sub(1);
        if self.registers.a != 0xFFFF {
            // Repeat the instruction for the next byte
            self.registers.pc = self.registers.pc.wrapping_sub(3);
        }
    }
}
