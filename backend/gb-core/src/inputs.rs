//! Joypad register (JOYP) and button state

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use bincode::{Decode, Encode};
use retrio_common::frontend::JoypadState;
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct InputState {
    joypad: JoypadState,
    select_dpad: bool,
    select_buttons: bool,
    last_joyp_low_nibble: u8,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            joypad: JoypadState::default(),
            select_dpad: false,
            select_buttons: false,
            last_joyp_low_nibble: 0x0F,
        }
    }

    pub fn set_joypad(&mut self, joypad: JoypadState, interrupts: &mut InterruptRegisters) {
        self.joypad = joypad;

        // A high-to-low transition on any selected line raises the joypad
        // interrupt
        let nibble = self.low_nibble();
        if self.last_joyp_low_nibble & !nibble != 0 {
            interrupts.request(InterruptType::Joypad);
        }
        self.last_joyp_low_nibble = nibble;
    }

    fn low_nibble(&self) -> u8 {
        let mut nibble = 0x0F;

        if self.select_dpad {
            nibble &= !((u8::from(self.joypad.right))
                | (u8::from(self.joypad.left) << 1)
                | (u8::from(self.joypad.up) << 2)
                | (u8::from(self.joypad.down) << 3));
        }
        if self.select_buttons {
            nibble &= !((u8::from(self.joypad.a))
                | (u8::from(self.joypad.b) << 1)
                | (u8::from(self.joypad.select) << 2)
                | (u8::from(self.joypad.start) << 3));
        }

        nibble
    }

    pub fn read_joyp(&self) -> u8 {
        0xC0 | (u8::from(!self.select_buttons) << 5)
            | (u8::from(!self.select_dpad) << 4)
            | self.low_nibble()
    }

    pub fn write_joyp(&mut self, value: u8) {
        self.select_dpad = !value.bit(4);
        self.select_buttons = !value.bit(5);
        self.last_joyp_low_nibble = self.low_nibble();
    }
}
