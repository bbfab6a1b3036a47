//! Arithmetic, logical, compare, bit-test, and read-modify-write operations

use crate::instructions::{AccessType, AddressingMode};
use crate::traits::BusInterface;
use crate::{StatusRegister, Wdc65816};
use retrio_common::num::GetBit;

impl Wdc65816 {
    fn m_operand<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) -> u16 {
        match mode {
            Some(mode) => self.read_m_operand(bus, mode),
            None => self.fetch_m(bus),
        }
    }

    fn x_operand<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) -> u16 {
        match mode {
            Some(mode) => {
                let address = self.operand_address(bus, mode, AccessType::Read);
                self.read_width(bus, address, self.x_is_16())
            }
            None => self.fetch_x(bus),
        }
    }

    pub(crate) fn logical_op<B: BusInterface>(
        &mut self,
        bus: &mut B,
        mode: Option<AddressingMode>,
        op: fn(u16, u16) -> u16,
    ) {
        let value = self.m_operand(bus, mode);
        let result = op(self.registers.a, value);

        if self.m_is_16() {
            self.registers.a = result;
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | (result & 0x00FF);
        }
        let sixteen = self.m_is_16();
        self.set_nz(result, sixteen);
    }

    pub(crate) fn adc_op<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = self.m_operand(bus, mode);
        let result = if self.registers.p.decimal_mode {
            self.decimal_add(value)
        } else {
            self.binary_add(value)
        };

        if self.m_is_16() {
            self.registers.a = result;
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | (result & 0x00FF);
        }
        let sixteen = self.m_is_16();
        self.set_nz(result, sixteen);
    }

    pub(crate) fn sbc_op<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = self.m_operand(bus, mode);
        let mask = if self.m_is_16() { 0xFFFF } else { 0x00FF };

        let result = if self.registers.p.decimal_mode {
            self.decimal_subtract(value)
        } else {
            // Subtraction is addition of the one's complement
            self.binary_add(!value & mask)
        };

        if self.m_is_16() {
            self.registers.a = result;
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | (result & 0x00FF);
        }
        let sixteen = self.m_is_16();
        self.set_nz(result, sixteen);
    }

    fn binary_add(&mut self, value: u16) -> u16 {
        let carry_in = u32::from(self.registers.p.carry);
        let (a, value, sign_bit, mask) = if self.m_is_16() {
            (u32::from(self.registers.a), u32::from(value), 15_u8, 0xFFFF_u32)
        } else {
            (u32::from(self.registers.a & 0xFF), u32::from(value & 0xFF), 7, 0xFF)
        };

        let sum = a + value + carry_in;
        let result = sum & mask;

        self.registers.p.carry = sum > mask;
        self.registers.p.overflow =
            (a.bit(sign_bit) == value.bit(sign_bit)) && (result.bit(sign_bit) != a.bit(sign_bit));

        result as u16
    }

    // BCD addition, one nibble at a time; the overflow flag comes from the
    // sign-bit computation on the adjusted result
    fn decimal_add(&mut self, value: u16) -> u16 {
        let nibbles = if self.m_is_16() { 4 } else { 2 };
        let a = u32::from(self.registers.a);
        let value = u32::from(value);

        let mut result = 0_u32;
        let mut carry = u32::from(self.registers.p.carry);
        for i in 0..nibbles {
            let shift = 4 * i;
            let mut digit = ((a >> shift) & 0xF) + ((value >> shift) & 0xF) + carry;
            carry = 0;
            if digit > 9 {
                digit += 6;
                carry = 1;
            }
            result |= (digit & 0xF) << shift;
        }

        let sign_bit = (4 * nibbles - 1) as u8;
        self.registers.p.carry = carry != 0;
        self.registers.p.overflow =
            (a.bit(sign_bit) == value.bit(sign_bit)) && (result.bit(sign_bit) != a.bit(sign_bit));

        result as u16
    }

    fn decimal_subtract(&mut self, value: u16) -> u16 {
        let nibbles = if self.m_is_16() { 4 } else { 2 };
        let a = u32::from(self.registers.a);
        let value = u32::from(value);

        let mut result = 0_u32;
        let mut borrow = u32::from(!self.registers.p.carry);
        for i in 0..nibbles {
            let shift = 4 * i;
            let lhs = (a >> shift) & 0xF;
            let rhs = ((value >> shift) & 0xF) + borrow;
            borrow = 0;

            let mut digit = lhs.wrapping_sub(rhs);
            if digit > 9 {
                digit = digit.wrapping_add(10) & 0xF;
                if digit > 9 {
                    digit -= 6;
                }
                borrow = 1;
            }
            result |= (digit & 0xF) << shift;
        }

        let sign_bit = (4 * nibbles - 1) as u8;
        self.registers.p.carry = borrow == 0;
        self.registers.p.overflow =
            (a.bit(sign_bit) != value.bit(sign_bit)) && (result.bit(sign_bit) != a.bit(sign_bit));

        result as u16
    }

    fn compare(&mut self, lhs: u16, rhs: u16, sixteen_bit: bool) {
        let (result, borrow) =
            if sixteen_bit { lhs.overflowing_sub(rhs) } else { ((lhs & 0xFF).wrapping_sub(rhs & 0xFF) & 0xFF, (lhs & 0xFF) < (rhs & 0xFF)) };

        self.registers.p.carry = !borrow;
        self.set_nz(result, sixteen_bit);
    }

    pub(crate) fn cmp_a<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = self.m_operand(bus, mode);
        let a = self.registers.a;
        let sixteen = self.m_is_16();
        self.compare(a, value, sixteen);
    }

    pub(crate) fn cpx<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = self.x_operand(bus, mode);
        let x = self.registers.x;
        let sixteen = self.x_is_16();
        self.compare(x, value, sixteen);
    }

    pub(crate) fn cpy<B: BusInterface>(&mut self, bus: &mut B, mode: Option<AddressingMode>) {
        let value = self.x_operand(bus, mode);
        let y = self.registers.y;
        let sixteen = self.x_is_16();
        self.compare(y, value, sixteen);
    }

    pub(crate) fn bit<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let value = self.read_m_operand(bus, mode);

        let (negative_bit, overflow_bit) = if self.m_is_16() { (15, 14) } else { (7, 6) };
        self.registers.p.zero = self.masked_a() & value == 0;
        self.registers.p.negative = value.bit(negative_bit);
        self.registers.p.overflow = value.bit(overflow_bit);
    }

    // BIT #imm only affects Z
    pub(crate) fn bit_immediate<B: BusInterface>(&mut self, bus: &mut B) {
        let value = self.fetch_m(bus);
        self.registers.p.zero = self.masked_a() & value == 0;
    }

    fn masked_a(&self) -> u16 {
        if self.m_is_16() { self.registers.a } else { self.registers.a & 0xFF }
    }

    pub(crate) fn tsb<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.m_is_16();
        let value = self.read_width(bus, address, sixteen);
        self.idle(bus);

        self.registers.p.zero = self.masked_a() & value == 0;
        self.write_width(bus, address, value | self.masked_a(), sixteen);
    }

    pub(crate) fn trb<B: BusInterface>(&mut self, bus: &mut B, mode: AddressingMode) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.m_is_16();
        let value = self.read_width(bus, address, sixteen);
        self.idle(bus);

        self.registers.p.zero = self.masked_a() & value == 0;
        self.write_width(bus, address, value & !self.masked_a(), sixteen);
    }

    pub(crate) fn rmw_op<B: BusInterface>(
        &mut self,
        bus: &mut B,
        mode: AddressingMode,
        op: fn(&mut StatusRegister, u16, bool) -> u16,
    ) {
        let address = self.operand_address(bus, mode, AccessType::Write);
        let sixteen = self.m_is_16();
        let value = self.read_width(bus, address, sixteen);
        self.idle(bus);

        let result = op(&mut self.registers.p, value, sixteen);
        self.write_width(bus, address, result, sixteen);
    }

    pub(crate) fn rmw_accumulator<B: BusInterface>(
        &mut self,
        bus: &mut B,
        op: fn(&mut StatusRegister, u16, bool) -> u16,
    ) {
        self.idle(bus);
        let sixteen = self.m_is_16();
        let value = self.masked_a();
        let result = op(&mut self.registers.p, value, sixteen);

        if sixteen {
            self.registers.a = result;
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | (result & 0xFF);
        }
    }

    pub(crate) fn inc_dec_accumulator<B: BusInterface>(&mut self, bus: &mut B, delta: u16) {
        self.idle(bus);
        let sixteen = self.m_is_16();
        let result = self.masked_a().wrapping_add(delta);

        if sixteen {
            self.registers.a = result;
        } else {
            self.registers.a = (self.registers.a & 0xFF00) | (result & 0xFF);
        }
        self.set_nz(result, sixteen);
    }

    pub(crate) fn inc_dec_x<B: BusInterface>(&mut self, bus: &mut B, delta: u16) {
        self.idle(bus);
        let sixteen = self.x_is_16();
        let result =
            if sixteen { self.registers.x.wrapping_add(delta) } else { (self.registers.x.wrapping_add(delta)) & 0xFF };
        self.registers.x = result;
        self.set_nz(result, sixteen);
    }

    pub(crate) fn inc_dec_y<B: BusInterface>(&mut self, bus: &mut B, delta: u16) {
        self.idle(bus);
        let sixteen = self.x_is_16();
        let result =
            if sixteen { self.registers.y.wrapping_add(delta) } else { (self.registers.y.wrapping_add(delta)) & 0xFF };
        self.registers.y = result;
        self.set_nz(result, sixteen);
    }
}

// Read-modify-write operations; the bool selects 16-bit width

pub(crate) fn asl(p: &mut StatusRegister, value: u16, sixteen_bit: bool) -> u16 {
    let (result, carry) = if sixteen_bit {
        (value << 1, value.bit(15))
    } else {
        ((value << 1) & 0xFF, value.bit(7))
    };
    p.carry = carry;
    set_nz_flags(p, result, sixteen_bit);
    result
}

pub(crate) fn lsr(p: &mut StatusRegister, value: u16, sixteen_bit: bool) -> u16 {
    let masked = if sixteen_bit { value } else { value & 0xFF };
    let result = masked >> 1;
    p.carry = value.bit(0);
    set_nz_flags(p, result, sixteen_bit);
    result
}

pub(crate) fn rol(p: &mut StatusRegister, value: u16, sixteen_bit: bool) -> u16 {
    let carry_in = u16::from(p.carry);
    let (result, carry) = if sixteen_bit {
        ((value << 1) | carry_in, value.bit(15))
    } else {
        (((value << 1) | carry_in) & 0xFF, value.bit(7))
    };
    p.carry = carry;
    set_nz_flags(p, result, sixteen_bit);
    result
}

pub(crate) fn ror(p: &mut StatusRegister, value: u16, sixteen_bit: bool) -> u16 {
    let carry_in = u16::from(p.carry);
    let masked = if sixteen_bit { value } else { value & 0xFF };
    let result = (masked >> 1) | (carry_in << if sixteen_bit { 15 } else { 7 });
    p.carry = value.bit(0);
    set_nz_flags(p, result, sixteen_bit);
    result
}

pub(crate) fn inc(p: &mut StatusRegister, value: u16, sixteen_bit: bool) -> u16 {
    let result = if sixteen_bit { value.wrapping_add(1) } else { value.wrapping_add(1) & 0xFF };
    set_nz_flags(p, result, sixteen_bit);
    result
}

pub(crate) fn dec(p: &mut StatusRegister, value: u16, sixteen_bit: bool) -> u16 {
    let result = if sixteen_bit { value.wrapping_sub(1) } else { value.wrapping_sub(1) & 0xFF };
    set_nz_flags(p, result, sixteen_bit);
    result
}

fn set_nz_flags(p: &mut StatusRegister, value: u16, sixteen_bit: bool) {
    if sixteen_bit {
        p.zero = value == 0;
        p.negative = value.bit(15);
    } else {
        p.zero = value & 0xFF == 0;
        p.negative = value.bit(7);
    }
}
