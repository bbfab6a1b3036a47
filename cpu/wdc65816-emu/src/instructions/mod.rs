//! 65816 instruction dispatch and addressing modes

mod alu;
mod flow;
mod load;

use crate::traits::BusInterface;
use crate::{SizeBits, Wdc65816};
use retrio_common::num::{GetBit, U16Ext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingMode {
    Direct,
    DirectX,
    DirectY,
    // (dp)
    DirectIndirect,
    // (dp,X)
    DirectIndexedIndirect,
    // (dp),Y
    DirectIndirectIndexed,
    // [dp]
    DirectIndirectLong,
    // [dp],Y
    DirectIndirectLongY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    AbsoluteLong,
    AbsoluteLongX,
    // sr,S
    StackRelative,
    // (sr,S),Y
    StackRelativeIndirectY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessType {
    Read,
    // Writes and read-modify-writes always pay the indexing cycle
    Write,
}

impl Wdc65816 {
    pub(crate) fn m_is_16(&self) -> bool {
        self.registers.p.accumulator_size == SizeBits::Sixteen
    }

    pub(crate) fn x_is_16(&self) -> bool {
        self.registers.p.index_size == SizeBits::Sixteen
    }

    pub(crate) fn set_nz(&mut self, value: u16, sixteen_bit: bool) {
        if sixteen_bit {
            self.registers.p.zero = value == 0;
            self.registers.p.negative = value.bit(15);
        } else {
            self.registers.p.zero = value & 0xFF == 0;
            self.registers.p.negative = value.bit(7);
        }
    }

    // Direct page addressing takes an extra cycle when D is not page aligned
    fn direct_page_offset<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let offset = self.fetch(bus);
        if self.registers.d.lsb() != 0 {
            self.idle(bus);
        }
        offset
    }

    fn direct_address(&self, offset: u16) -> u32 {
        // Direct page accesses always stay within bank 0
        u32::from(self.registers.d.wrapping_add(offset))
    }

    fn read_direct_pointer<B: BusInterface>(&mut self, bus: &mut B, pointer_base: u16) -> u16 {
        let lsb = self.read(bus, self.direct_address(pointer_base));
        let msb = self.read(bus, self.direct_address(pointer_base.wrapping_add(1)));
        u16::from_le_bytes([lsb, msb])
    }

    fn indexed_data_address<B: BusInterface>(
        &mut self,
        bus: &mut B,
        bank: u8,
        base: u16,
        index: u16,
        access: AccessType,
    ) -> u32 {
        // Data accesses carry across bank boundaries
        let address = ((u32::from(bank) << 16) + u32::from(base) + u32::from(index)) & 0xFF_FFFF;

        let page_crossed = (base & 0xFF00) != (address as u16 & 0xFF00);
        if access == AccessType::Write || self.x_is_16() || page_crossed {
            self.idle(bus);
        }

        address
    }

    pub(crate) fn operand_address<B: BusInterface>(
        &mut self,
        bus: &mut B,
        mode: AddressingMode,
        access: AccessType,
    ) -> u32 {
        let dbr = self.registers.dbr;

        match mode {
            AddressingMode::Direct => {
                let offset = self.direct_page_offset(bus);
                self.direct_address(offset.into())
            }
            AddressingMode::DirectX => {
                let offset = self.direct_page_offset(bus);
                self.idle(bus);
                self.direct_address(u16::from(offset).wrapping_add(self.registers.x))
            }
            AddressingMode::DirectY => {
                let offset = self.direct_page_offset(bus);
                self.idle(bus);
                self.direct_address(u16::from(offset).wrapping_add(self.registers.y))
            }
            AddressingMode::DirectIndirect => {
                let offset = self.direct_page_offset(bus);
                let pointer = self.read_direct_pointer(bus, offset.into());
                (u32::from(dbr) << 16) | u32::from(pointer)
            }
            AddressingMode::DirectIndexedIndirect => {
                let offset = self.direct_page_offset(bus);
                self.idle(bus);
                let pointer =
                    self.read_direct_pointer(bus, u16::from(offset).wrapping_add(self.registers.x));
                (u32::from(dbr) << 16) | u32::from(pointer)
            }
            AddressingMode::DirectIndirectIndexed => {
                let offset = self.direct_page_offset(bus);
                let pointer = self.read_direct_pointer(bus, offset.into());
                self.indexed_data_address(bus, dbr, pointer, self.registers.y, access)
            }
            AddressingMode::DirectIndirectLong => {
                let offset = self.direct_page_offset(bus);
                let base = u16::from(offset);
                let lsb = self.read(bus, self.direct_address(base));
                let mid = self.read(bus, self.direct_address(base.wrapping_add(1)));
                let msb = self.read(bus, self.direct_address(base.wrapping_add(2)));
                u32::from_le_bytes([lsb, mid, msb, 0])
            }
            AddressingMode::DirectIndirectLongY => {
                let offset = self.direct_page_offset(bus);
                let base = u16::from(offset);
                let lsb = self.read(bus, self.direct_address(base));
                let mid = self.read(bus, self.direct_address(base.wrapping_add(1)));
                let msb = self.read(bus, self.direct_address(base.wrapping_add(2)));
                let pointer = u32::from_le_bytes([lsb, mid, msb, 0]);
                pointer.wrapping_add(self.registers.y.into()) & 0xFF_FFFF
            }
            AddressingMode::Absolute => {
                let base = self.fetch_u16(bus);
                (u32::from(dbr) << 16) | u32::from(base)
            }
            AddressingMode::AbsoluteX => {
                let base = self.fetch_u16(bus);
                self.indexed_data_address(bus, dbr, base, self.registers.x, access)
            }
            AddressingMode::AbsoluteY => {
                let base = self.fetch_u16(bus);
                self.indexed_data_address(bus, dbr, base, self.registers.y, access)
            }
            AddressingMode::AbsoluteLong => {
                let lsb = self.fetch(bus);
                let mid = self.fetch(bus);
                let msb = self.fetch(bus);
                u32::from_le_bytes([lsb, mid, msb, 0])
            }
            AddressingMode::AbsoluteLongX => {
                let lsb = self.fetch(bus);
                let mid = self.fetch(bus);
                let msb = self.fetch(bus);
                let base = u32::from_le_bytes([lsb, mid, msb, 0]);
                base.wrapping_add(self.registers.x.into()) & 0xFF_FFFF
            }
            AddressingMode::StackRelative => {
                let offset = self.fetch(bus);
                self.idle(bus);
                u32::from(self.registers.s.wrapping_add(offset.into()))
            }
            AddressingMode::StackRelativeIndirectY => {
                let offset = self.fetch(bus);
                self.idle(bus);
                let pointer_base = self.registers.s.wrapping_add(offset.into());
                let lsb = self.read(bus, pointer_base.into());
                let msb = self.read(bus, u32::from(pointer_base.wrapping_add(1)));
                self.idle(bus);
                let pointer = u16::from_le_bytes([lsb, msb]);
                ((u32::from(dbr) << 16) + u32::from(pointer) + u32::from(self.registers.y))
                    & 0xFF_FFFF
            }
        }
    }

    /// Read an 8- or 16-bit value; 16-bit reads cross bank boundaries.
    pub(crate) fn read_width<B: BusInterface>(
        &mut self,
        bus: &mut B,
        address: u32,
        sixteen_bit: bool,
    ) -> u16 {
        let lsb = self.read(bus, address);
        if sixteen_bit {
            let msb = self.read(bus, address.wrapping_add(1) & 0xFF_FFFF);
            u16::from_le_bytes([lsb, msb])
        } else {
            lsb.into()
        }
    }

    pub(crate) fn write_width<B: BusInterface>(
        &mut self,
        bus: &mut B,
        address: u32,
        value: u16,
        sixteen_bit: bool,
    ) {
        self.write(bus, address, value.lsb());
        if sixteen_bit {
            self.write(bus, address.wrapping_add(1) & 0xFF_FFFF, value.msb());
        }
    }

    /// Fetch an immediate operand at the accumulator width.
    pub(crate) fn fetch_m<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        if self.m_is_16() { self.fetch_u16(bus) } else { self.fetch(bus).into() }
    }

    /// Fetch an immediate operand at the index width.
    pub(crate) fn fetch_x<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        if self.x_is_16() { self.fetch_u16(bus) } else { self.fetch(bus).into() }
    }

    pub(crate) fn read_m_operand<B: BusInterface>(
        &mut self,
        bus: &mut B,
        mode: AddressingMode,
    ) -> u16 {
        let address = self.operand_address(bus, mode, AccessType::Read);
        self.read_width(bus, address, self.m_is_16())
    }

    pub(crate) fn dispatch<B: BusInterface>(&mut self, opcode: u8, bus: &mut B) {
        use AddressingMode as Mode;

        log::trace!(
            "65816 opcode {opcode:02X} at {:02X}:{:04X}",
            self.registers.pbr,
            self.registers.pc.wrapping_sub(1)
        );

        match opcode {
            0x00 => self.brk(bus),
            0x02 => self.cop(bus),
            0x04 => self.tsb(bus, Mode::Direct),
            0x06 => self.rmw_op(bus, Mode::Direct, alu::asl),
            0x08 => self.php(bus),
            0x0A => self.rmw_accumulator(bus, alu::asl),
            0x0B => self.phd(bus),
            0x0C => self.tsb(bus, Mode::Absolute),
            0x0E => self.rmw_op(bus, Mode::Absolute, alu::asl),
            0x10 => self.branch_if(bus, |p| !p.negative),
            0x14 => self.trb(bus, Mode::Direct),
            0x16 => self.rmw_op(bus, Mode::DirectX, alu::asl),
            0x18 => self.flag_op(bus, |p| p.carry = false),
            0x1A => self.inc_dec_accumulator(bus, 1),
            0x1B => self.tcs(bus),
            0x1C => self.trb(bus, Mode::Absolute),
            0x1E => self.rmw_op(bus, Mode::AbsoluteX, alu::asl),
            0x20 => self.jsr_absolute(bus),
            0x22 => self.jsl(bus),
            0x24 => self.bit(bus, Mode::Direct),
            0x26 => self.rmw_op(bus, Mode::Direct, alu::rol),
            0x28 => self.plp(bus),
            0x2A => self.rmw_accumulator(bus, alu::rol),
            0x2B => self.pld(bus),
            0x2C => self.bit(bus, Mode::Absolute),
            0x2E => self.rmw_op(bus, Mode::Absolute, alu::rol),
            0x30 => self.branch_if(bus, |p| p.negative),
            0x34 => self.bit(bus, Mode::DirectX),
            0x36 => self.rmw_op(bus, Mode::DirectX, alu::rol),
            0x38 => self.flag_op(bus, |p| p.carry = true),
            0x3A => self.inc_dec_accumulator(bus, u16::MAX),
            0x3B => self.tsc(bus),
            0x3C => self.bit(bus, Mode::AbsoluteX),
            0x3E => self.rmw_op(bus, Mode::AbsoluteX, alu::rol),
            0x40 => self.rti(bus),
            0x42 => self.wdm(bus),
            0x44 => self.block_move(bus, false),
            0x46 => self.rmw_op(bus, Mode::Direct, alu::lsr),
            0x48 => self.pha(bus),
            0x4A => self.rmw_accumulator(bus, alu::lsr),
            0x4B => self.phk(bus),
            0x4C => self.jmp_absolute(bus),
            0x4E => self.rmw_op(bus, Mode::Absolute, alu::lsr),
            0x50 => self.branch_if(bus, |p| !p.overflow),
            0x54 => self.block_move(bus, true),
            0x56 => self.rmw_op(bus, Mode::DirectX, alu::lsr),
            0x58 => self.flag_op(bus, |p| p.irq_disabled = false),
            0x5A => self.phy(bus),
            0x5B => self.tcd(bus),
            0x5C => self.jml_long(bus),
            0x5E => self.rmw_op(bus, Mode::AbsoluteX, alu::lsr),
            0x60 => self.rts(bus),
            0x62 => self.per(bus),
            0x64 => self.stz(bus, Mode::Direct),
            0x66 => self.rmw_op(bus, Mode::Direct, alu::ror),
            0x68 => self.pla(bus),
            0x6A => self.rmw_accumulator(bus, alu::ror),
            0x6B => self.rtl(bus),
            0x6C => self.jmp_absolute_indirect(bus),
            0x6E => self.rmw_op(bus, Mode::Absolute, alu::ror),
            0x70 => self.branch_if(bus, |p| p.overflow),
            0x74 => self.stz(bus, Mode::DirectX),
            0x76 => self.rmw_op(bus, Mode::DirectX, alu::ror),
            0x78 => self.flag_op(bus, |p| p.irq_disabled = true),
            0x7A => self.ply(bus),
            0x7B => self.tdc(bus),
            0x7C => self.jmp_absolute_x_indirect(bus),
            0x7E => self.rmw_op(bus, Mode::AbsoluteX, alu::ror),
            0x80 => self.branch_if(bus, |_| true),
            0x82 => self.brl(bus),
            0x84 => self.sty(bus, Mode::Direct),
            0x86 => self.stx(bus, Mode::Direct),
            0x88 => self.inc_dec_y(bus, u16::MAX),
            0x89 => self.bit_immediate(bus),
            0x8A => self.transfer_op(bus, load::txa),
            0x8B => self.phb(bus),
            0x8C => self.sty(bus, Mode::Absolute),
            0x8E => self.stx(bus, Mode::Absolute),
            0x90 => self.branch_if(bus, |p| !p.carry),
            0x94 => self.sty(bus, Mode::DirectX),
            0x96 => self.stx(bus, Mode::DirectY),
            0x98 => self.transfer_op(bus, load::tya),
            0x9A => self.transfer_op(bus, load::txs),
            0x9B => self.transfer_op(bus, load::txy),
            0x9C => self.stz(bus, Mode::Absolute),
            0x9E => self.stz(bus, Mode::AbsoluteX),
            0xA0 => self.ldy(bus, None),
            0xA2 => self.ldx(bus, None),
            0xA4 => self.ldy(bus, Some(Mode::Direct)),
            0xA6 => self.ldx(bus, Some(Mode::Direct)),
            0xA8 => self.transfer_op(bus, load::tay),
            0xAA => self.transfer_op(bus, load::tax),
            0xAB => self.plb(bus),
            0xAC => self.ldy(bus, Some(Mode::Absolute)),
            0xAE => self.ldx(bus, Some(Mode::Absolute)),
            0xB0 => self.branch_if(bus, |p| p.carry),
            0xB4 => self.ldy(bus, Some(Mode::DirectX)),
            0xB6 => self.ldx(bus, Some(Mode::DirectY)),
            0xB8 => self.flag_op(bus, |p| p.overflow = false),
            0xBA => self.transfer_op(bus, load::tsx),
            0xBB => self.transfer_op(bus, load::tyx),
            0xBC => self.ldy(bus, Some(Mode::AbsoluteX)),
            0xBE => self.ldx(bus, Some(Mode::AbsoluteY)),
            0xC0 => self.cpy(bus, None),
            0xC2 => self.rep(bus),
            0xC4 => self.cpy(bus, Some(Mode::Direct)),
            0xC6 => self.rmw_op(bus, Mode::Direct, alu::dec),
            0xC8 => self.inc_dec_y(bus, 1),
            0xCA => self.inc_dec_x(bus, u16::MAX),
            0xCB => self.wai(bus),
            0xCC => self.cpy(bus, Some(Mode::Absolute)),
            0xCE => self.rmw_op(bus, Mode::Absolute, alu::dec),
            0xD0 => self.branch_if(bus, |p| !p.zero),
            0xD4 => self.pei(bus),
            0xD6 => self.rmw_op(bus, Mode::DirectX, alu::dec),
            0xD8 => self.flag_op(bus, |p| p.decimal_mode = false),
            0xDA => self.phx(bus),
            0xDB => self.stp_op(bus),
            0xDC => self.jml_absolute_indirect(bus),
            0xDE => self.rmw_op(bus, Mode::AbsoluteX, alu::dec),
            0xE0 => self.cpx(bus, None),
            0xE2 => self.sep(bus),
            0xE4 => self.cpx(bus, Some(Mode::Direct)),
            0xE6 => self.rmw_op(bus, Mode::Direct, alu::inc),
            0xE8 => self.inc_dec_x(bus, 1),
            0xEA => self.idle(bus),
            0xEB => self.xba(bus),
            0xEC => self.cpx(bus, Some(Mode::Absolute)),
            0xEE => self.rmw_op(bus, Mode::Absolute, alu::inc),
            0xF0 => self.branch_if(bus, |p| p.zero),
            0xF4 => self.pea(bus),
            0xF6 => self.rmw_op(bus, Mode::DirectX, alu::inc),
            0xF8 => self.flag_op(bus, |p| p.decimal_mode = true),
            0xFA => self.plx(bus),
            0xFB => self.xce(bus),
            0xFC => self.jsr_absolute_x_indirect(bus),
            0xFE => self.rmw_op(bus, Mode::AbsoluteX, alu::inc),

            // Everything else is the 8-operation ALU block with the mode
            // encoded in the low five bits
            _ => self.alu_group(opcode, bus),
        }
    }

    fn alu_group<B: BusInterface>(&mut self, opcode: u8, bus: &mut B) {
        use AddressingMode as Mode;

        let mode = match opcode & 0x1F {
            0x01 => Some(Mode::DirectIndexedIndirect),
            0x03 => Some(Mode::StackRelative),
            0x05 => Some(Mode::Direct),
            0x07 => Some(Mode::DirectIndirectLong),
            // Immediate
            0x09 => None,
            0x0D => Some(Mode::Absolute),
            0x0F => Some(Mode::AbsoluteLong),
            0x11 => Some(Mode::DirectIndirectIndexed),
            0x12 => Some(Mode::DirectIndirect),
            0x13 => Some(Mode::StackRelativeIndirectY),
            0x15 => Some(Mode::DirectX),
            0x17 => Some(Mode::DirectIndirectLongY),
            0x19 => Some(Mode::AbsoluteY),
            0x1D => Some(Mode::AbsoluteX),
            0x1F => Some(Mode::AbsoluteLongX),
            _ => {
                // Unused on the 65816 (WDM aside); behaves as a NOP
                log::debug!("Unhandled 65816 opcode {opcode:02X}, treating as NOP");
                self.idle(bus);
                return;
            }
        };

        match opcode >> 5 {
            0 => self.logical_op(bus, mode, |a, value| a | value),
            1 => self.logical_op(bus, mode, |a, value| a & value),
            2 => self.logical_op(bus, mode, |a, value| a ^ value),
            3 => self.adc_op(bus, mode),
            4 => self.sta(bus, mode.expect("STA has no immediate mode")),
            5 => self.lda(bus, mode),
            6 => self.cmp_a(bus, mode),
            _ => self.sbc_op(bus, mode),
        }
    }
}
