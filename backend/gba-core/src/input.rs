//! KEYINPUT / KEYCNT

use crate::interrupts::{InterruptRegisters, InterruptType};
use bincode::{Decode, Encode};
use retrio_common::frontend::JoypadState;
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct InputState {
    // Active-low, like the register
    keyinput: u16,
    keycnt: u16,
}

impl InputState {
    pub fn new() -> Self {
        Self { keyinput: 0x03FF, keycnt: 0 }
    }

    pub fn set_joypad(&mut self, joypad: JoypadState, interrupts: &mut InterruptRegisters) {
        let pressed = u16::from(joypad.a)
            | (u16::from(joypad.b) << 1)
            | (u16::from(joypad.select) << 2)
            | (u16::from(joypad.start) << 3)
            | (u16::from(joypad.right) << 4)
            | (u16::from(joypad.left) << 5)
            | (u16::from(joypad.up) << 6)
            | (u16::from(joypad.down) << 7)
            | (u16::from(joypad.r) << 8)
            | (u16::from(joypad.l) << 9);

        self.keyinput = !pressed & 0x03FF;

        // Keypad interrupt: logical OR mode fires on any selected key,
        // logical AND mode requires all selected keys down
        if self.keycnt.bit(14) {
            let selected = self.keycnt & 0x03FF;
            let fired = if self.keycnt.bit(15) {
                selected != 0 && pressed & selected == selected
            } else {
                pressed & selected != 0
            };
            if fired {
                interrupts.request(InterruptType::Keypad);
            }
        }
    }

    pub fn read_keyinput(&self) -> u16 {
        self.keyinput
    }

    pub fn read_keycnt(&self) -> u16 {
        self.keycnt
    }

    pub fn write_keycnt(&mut self, value: u16) {
        self.keycnt = value;
    }
}
