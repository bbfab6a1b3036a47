//! CGB-only CPU registers (KEY1 double speed)

use crate::CpuSpeed;
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct CgbRegisters {
    pub speed: CpuSpeed,
    pub speed_switch_armed: bool,
}

impl CgbRegisters {
    pub fn new() -> Self {
        Self { speed: CpuSpeed::Normal, speed_switch_armed: false }
    }

    pub fn read_key1(&self) -> u8 {
        0x7E | (u8::from(self.speed == CpuSpeed::Double) << 7)
            | u8::from(self.speed_switch_armed)
    }

    pub fn write_key1(&mut self, value: u8) {
        self.speed_switch_armed = value.bit(0);
    }

    pub fn perform_speed_switch(&mut self) {
        self.speed = match self.speed {
            CpuSpeed::Normal => CpuSpeed::Double,
            CpuSpeed::Double => CpuSpeed::Normal,
        };
        self.speed_switch_armed = false;

        log::debug!("CPU speed is now {:?}", self.speed);
    }
}
