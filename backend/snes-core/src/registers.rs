//! CPU-side internal registers: NMI/IRQ control, H/V timers, the hardware
//! multiplier and divider, WRIO, and joypad auto-read

use bincode::{Decode, Encode};
use retrio_common::frontend::JoypadState;
use retrio_common::num::{GetBit, U16Ext};

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuInternalRegisters {
    // $4200 NMITIMEN
    nmi_enabled: bool,
    htime_irq_enabled: bool,
    vtime_irq_enabled: bool,
    auto_joypad_read: bool,
    // Level inputs to the interrupt logic
    vblank_nmi_flag: bool,
    irq_flag: bool,
    // $4201 WRIO
    wrio: u8,
    // $4207-$420A
    htime: u16,
    vtime: u16,
    // Multiplier and divider
    multiplicand: u8,
    multiplier_result: u16,
    dividend: u16,
    divisor: u8,
    quotient: u16,
    // $4218-$421F auto-read results (controller 1 only is populated)
    joypad_data: u16,
    // $4016 manual serial read state
    joypad_strobe: bool,
    joypad_shift: u16,
    in_vblank: bool,
    in_hblank: bool,
}

impl CpuInternalRegisters {
    pub fn new() -> Self {
        Self {
            nmi_enabled: false,
            htime_irq_enabled: false,
            vtime_irq_enabled: false,
            auto_joypad_read: false,
            vblank_nmi_flag: false,
            irq_flag: false,
            wrio: 0xFF,
            htime: 0x1FF,
            vtime: 0x1FF,
            multiplicand: 0xFF,
            multiplier_result: 0,
            dividend: 0xFFFF,
            divisor: 0xFF,
            quotient: 0,
            joypad_data: 0,
            joypad_strobe: false,
            joypad_shift: 0,
            in_vblank: false,
            in_hblank: false,
        }
    }

    /// The NMI input to the CPU; edge detection happens in the CPU core.
    pub fn nmi_line(&self) -> bool {
        self.nmi_enabled && self.vblank_nmi_flag
    }

    /// Level-sensitive IRQ line, held until $4211 is read.
    pub fn irq_line(&self) -> bool {
        self.irq_flag
    }

    pub fn set_vblank(&mut self, in_vblank: bool) {
        self.in_vblank = in_vblank;
        self.vblank_nmi_flag = in_vblank;
    }

    pub fn set_hblank(&mut self, in_hblank: bool) {
        self.in_hblank = in_hblank;
    }

    /// Evaluate the H/V timer IRQ over the half-open dot window
    /// `[dot_start, dot_end)` of `scanline`.
    pub fn check_timer_irq_window(&mut self, scanline: u16, dot_start: u16, dot_end: u16) {
        let window_contains = |dot: u16| (dot_start..dot_end).contains(&dot);

        let fired = match (self.htime_irq_enabled, self.vtime_irq_enabled) {
            (false, false) => false,
            (true, false) => window_contains(self.htime),
            (false, true) => scanline == self.vtime && dot_start == 0,
            (true, true) => scanline == self.vtime && window_contains(self.htime),
        };
        if fired {
            self.irq_flag = true;
        }
    }

    pub fn run_auto_joypad_read(&mut self, joypad: JoypadState) {
        if !self.auto_joypad_read {
            return;
        }
        self.joypad_data = joypad_wire_format(joypad);
    }

    pub fn read(&mut self, offset: u16, joypad: JoypadState) -> Option<u8> {
        match offset {
            // $4210 RDNMI: NMI flag clears on read
            0x4210 => {
                let value = (u8::from(self.vblank_nmi_flag) << 7) | 0x02;
                self.vblank_nmi_flag = false;
                Some(value)
            }
            // $4211 TIMEUP: IRQ flag clears on read
            0x4211 => {
                let value = u8::from(self.irq_flag) << 7;
                self.irq_flag = false;
                Some(value)
            }
            // $4212 HVBJOY
            0x4212 => Some(
                (u8::from(self.in_vblank) << 7) | (u8::from(self.in_hblank) << 6),
            ),
            0x4213 => Some(self.wrio),
            0x4214 => Some(self.quotient.lsb()),
            0x4215 => Some(self.quotient.msb()),
            0x4216 => Some(self.multiplier_result.lsb()),
            0x4217 => Some(self.multiplier_result.msb()),
            0x4218 => Some(self.joypad_data.lsb()),
            0x4219 => Some(self.joypad_data.msb()),
            0x421A..=0x421F => Some(0),
            // $4016/$4017: manual controller serial port
            0x4016 => {
                let bit = if self.joypad_strobe {
                    joypad_wire_format(joypad).bit(15)
                } else {
                    let bit = self.joypad_shift.bit(15);
                    self.joypad_shift <<= 1;
                    self.joypad_shift |= 1;
                    bit
                };
                Some(u8::from(bit))
            }
            0x4017 => Some(0x1C),
            _ => None,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8, joypad: JoypadState) -> bool {
        match offset {
            0x4200 => {
                self.nmi_enabled = value.bit(7);
                self.vtime_irq_enabled = value.bit(5);
                self.htime_irq_enabled = value.bit(4);
                self.auto_joypad_read = value.bit(0);
                if !self.htime_irq_enabled && !self.vtime_irq_enabled {
                    self.irq_flag = false;
                }
            }
            0x4201 => self.wrio = value,
            0x4202 => self.multiplicand = value,
            0x4203 => {
                // Multiply starts immediately on writing the multiplier
                self.multiplier_result = u16::from(self.multiplicand) * u16::from(value);
            }
            0x4204 => self.dividend.set_lsb(value),
            0x4205 => self.dividend.set_msb(value),
            0x4206 => {
                self.divisor = value;
                if self.divisor == 0 {
                    self.quotient = 0xFFFF;
                    self.multiplier_result = self.dividend;
                } else {
                    self.quotient = self.dividend / u16::from(self.divisor);
                    // The remainder lands in the multiplication result
                    self.multiplier_result = self.dividend % u16::from(self.divisor);
                }
            }
            0x4207 => self.htime.set_lsb(value),
            0x4208 => self.htime = (self.htime & 0x00FF) | (u16::from(value & 1) << 8),
            0x4209 => self.vtime.set_lsb(value),
            0x420A => self.vtime = (self.vtime & 0x00FF) | (u16::from(value & 1) << 8),
            0x4016 => {
                let strobe = value.bit(0);
                if self.joypad_strobe && !strobe {
                    // Falling edge latches the shift register
                    self.joypad_shift = joypad_wire_format(joypad);
                }
                self.joypad_strobe = strobe;
            }
            _ => return false,
        }
        true
    }
}

/// SNES controller wire format, MSB-first:
/// B, Y, Select, Start, Up, Down, Left, Right, A, X, L, R, 0000
fn joypad_wire_format(joypad: JoypadState) -> u16 {
    (u16::from(joypad.b) << 15)
        | (u16::from(joypad.y) << 14)
        | (u16::from(joypad.select) << 13)
        | (u16::from(joypad.start) << 12)
        | (u16::from(joypad.up) << 11)
        | (u16::from(joypad.down) << 10)
        | (u16::from(joypad.left) << 9)
        | (u16::from(joypad.right) << 8)
        | (u16::from(joypad.a) << 7)
        | (u16::from(joypad.x) << 6)
        | (u16::from(joypad.l) << 5)
        | (u16::from(joypad.r) << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nmi_line_requires_enable_bit() {
        let mut registers = CpuInternalRegisters::new();
        registers.set_vblank(true);
        assert!(!registers.nmi_line(), "NMI disabled via $4200 must not assert the line");

        registers.write(0x4200, 0x80, JoypadState::default());
        assert!(registers.nmi_line());
    }

    #[test]
    fn rdnmi_read_clears_the_flag() {
        let mut registers = CpuInternalRegisters::new();
        registers.write(0x4200, 0x80, JoypadState::default());
        registers.set_vblank(true);

        let value = registers.read(0x4210, JoypadState::default()).unwrap();
        assert!(value.bit(7));
        let value = registers.read(0x4210, JoypadState::default()).unwrap();
        assert!(!value.bit(7));
    }

    #[test]
    fn division_produces_quotient_and_remainder() {
        let mut registers = CpuInternalRegisters::new();
        let joypad = JoypadState::default();
        registers.write(0x4204, 0xE8, joypad); // 1000
        registers.write(0x4205, 0x03, joypad);
        registers.write(0x4206, 7, joypad);

        assert_eq!(registers.read(0x4214, joypad), Some((1000 / 7) as u8));
        assert_eq!(registers.read(0x4216, joypad), Some((1000 % 7) as u8));
    }
}
