//! Loads, stores, register transfers, and stack operations

use crate::instructions::{AccessType, AddressingMode};
use crate::traits::BusInterface;
use crate::{SizeBits, Wdc65816};
use retrio_common::num::U16Ext;

impl Wdc65816 {
    pub(crate) fn lda<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = match mode {
            Some(mode) => self.read_m_operand(bus, mode),
            None => self.fetch_m(bus),
        };

        if self.m_is_16() {
            self.registers.a = value;
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | (value & 0xFF);
        }
        let sixteen = self.m_is_16();
        self.set_nz(value, sixteen);
    }

    pub(crate) fn ldx<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = match mode {
            Some(mode) => {
                let address = self.operand_address(bus, mode, AccessType::Read);
                self.read_width(bus, address, self.x_is_16())
            }
            None => self.fetch_x(bus),
        };

        self.registers.x = value;
        let sixteen = self.x_is_16();
        self.set_nz(value, sixteen);
    }

    pub(crate) fn ldy<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = match mode {
            Some(mode) => {
                let address = self.operand_address(bus, mode, AccessType::Read);
                self.read_width(bus, address, self.x_is_16())
            }
            None => self.fetch_x(bus),
        };

        self.registers.y = value;
        let sixteen = self.x_is_16();
        self.set_nz(value, sixteen);
    }

    pub(crate) fn sta<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.m_is_16();
        let value = self.registers.a;
        self.write_width(bus, address, value, sixteen);
    }

    pub(crate) fn stx<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.x_is_16();
        let value = self.registers.x;
        self.write_width(bus, address, value, sixteen);
    }

    pub(crate) fn sty<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.x_is_16();
        let value = self.registers.y;
        self.write_width(bus, address, value, sixteen);
    }

    pub(crate) fn stz<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.m_is_16();
        self.write_width(bus, address, 0, sixteen);
    }

    pub(crate) fn transfer_op<B: BusInterface>(&mut self, bus: &mut B, op: fn(&mut Self)) {
        self.idle(bus);
        op(self);
    }

    pub(crate) fn tcs<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.registers.set_s(self.registers.a);
    }

    pub(crate) fn tsc<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.registers.a = self.registers.s;
        let value = self.registers.a;
        self.set_nz(value, true);
    }

    pub(crate) fn tcd<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.registers.d = self.registers.a;
        let value = self.registers.d;
        self.set_nz(value, true);
    }

    pub(crate) fn tdc<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.registers.a = self.registers.d;
        let value = self.registers.a;
        self.set_nz(value, true);
    }

    pub(crate) fn xba<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        self.registers.a = self.registers.a.rotate_right(8);
        let low = self.registers.a & 0xFF;
        self.set_nz(low, false);
    }

    // Stack pushes

    pub(crate) fn pha<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        if self.m_is_16() {
            self.push(bus, self.registers.a.msb());
        }
        self.push(bus, self.registers.a.lsb());
    }

    pub(crate) fn phx<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        if self.x_is_16() {
            self.push(bus, self.registers.x.msb());
        }
        self.push(bus, self.registers.x.lsb());
    }

    pub(crate) fn phy<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        if self.x_is_16() {
            self.push(bus, self.registers.y.msb());
        }
        self.push(bus, self.registers.y.lsb());
    }

    pub(crate) fn php<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.push(bus, self.registers.p.into());
    }

    pub(crate) fn phd<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.push(bus, self.registers.d.msb());
        self.push(bus, self.registers.d.lsb());
    }

    pub(crate) fn phb<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.push(bus, self.registers.dbr);
    }

    pub(crate) fn phk<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.push(bus, self.registers.pbr);
    }

    // Stack pulls

    pub(crate) fn pla<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let lsb = self.pop(bus);
        if self.m_is_16() {
            let msb = self.pop(bus);
            self.registers.a = u16::from_le_bytes([lsb, msb]);
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | u16::from(lsb);
        }
        let value = self.registers.a;
        let sixteen = self.m_is_16();
        self.set_nz(value, sixteen);
    }

    pub(crate) fn plx<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let lsb = self.pop(bus);
        self.registers.x = if self.x_is_16() {
            let msb = self.pop(bus);
            u16::from_le_bytes([lsb, msb])
        } else {
            lsb.into()
        };
        let value = self.registers.x;
        let sixteen = self.x_is_16();
        self.set_nz(value, sixteen);
    }

    pub(crate) fn ply<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let lsb = self.pop(bus);
        self.registers.y = if self.x_is_16() {
            let msb = self.pop(bus);
            u16::from_le_bytes([lsb, msb])
        } else {
            lsb.into()
        };
        let value = self.registers.y;
        let sixteen = self.x_is_16();
        self.set_nz(value, sixteen);
    }

    pub(crate) fn plp<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let value = self.pop(bus);
        self.registers.p = value.into();
        self.registers.enforce_constraints();
    }

    pub(crate) fn pld<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let lsb = self.pop(bus);
        let msb = self.pop(bus);
        self.registers.d = u16::from_le_bytes([lsb, msb]);
        let value = self.registers.d;
        self.set_nz(value, true);
    }

    pub(crate) fn plb<B: BusInterface>(&mut self, bus: &mut B) {
        self.idle(bus);
        self.idle(bus);
        let value = self.pop(bus);
        self.registers.dbr = value;
        self.set_nz(value.into(), false);
    }
}

// Register transfers (one internal cycle each, applied via transfer_op)

pub(crate) fn txa(cpu: &mut Wdc65816) {
    transfer_to_a(cpu, cpu.registers().x);
}

pub(crate) fn tya(cpu: &mut Wdc65816) {
    transfer_to_a(cpu, cpu.registers().y);
}

pub(crate) fn tax(cpu: &mut Wdc65816) {
    let value = masked_index(cpu, cpu.registers().a);
    cpu.registers_mut().x = value;
    let sixteen = cpu.x_is_16();
    cpu.set_nz(value, sixteen);
}

pub(crate) fn tay(cpu: &mut Wdc65816) {
    let value = masked_index(cpu, cpu.registers().a);
    cpu.registers_mut().y = value;
    let sixteen = cpu.x_is_16();
    cpu.set_nz(value, sixteen);
}

pub(crate) fn txs(cpu: &mut Wdc65816) {
    let value = cpu.registers().x;
    cpu.registers_mut().set_s(value);
}

pub(crate) fn tsx(cpu: &mut Wdc65816) {
    let value = masked_index(cpu, cpu.registers().s);
    cpu.registers_mut().x = value;
    let sixteen = cpu.x_is_16();
    cpu.set_nz(value, sixteen);
}

pub(crate) fn txy(cpu: &mut Wdc65816) {
    let value = cpu.registers().x;
    cpu.registers_mut().y = value;
    let sixteen = cpu.x_is_16();
    cpu.set_nz(value, sixteen);
}

pub(crate) fn tyx(cpu: &mut Wdc65816) {
    let value = cpu.registers().y;
    cpu.registers_mut().x = value;
    let sixteen = cpu.x_is_16();
    cpu.set_nz(value, sixteen);
}

fn transfer_to_a(cpu: &mut Wdc65816, value: u16) {
    if cpu.registers().p.accumulator_size == SizeBits::Sixteen {
        cpu.registers_mut().a = value;
    } else {
        let a = cpu.registers().a;
        cpu.registers_mut().a = (a & 0xFF00) | (value & 0xFF);
    }
    let sixteen = cpu.m_is_16();
    cpu.set_nz(value, sixteen);
}

fn masked_index(cpu: &Wdc65816, value: u16) -> u16 {
    if cpu.x_is_16() { value } else { value & 0xFF }
}
