//! The four 16-bit timers, with prescalers, cascading, and the APU FIFO
//! sample clocks

use crate::interrupts::{InterruptRegisters, InterruptType};
use bincode::{Decode, Encode};
use retrio_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Timer {
    counter: u16,
    reload: u16,
    control: u16,
    prescaler_counter: u16,
}

impl Timer {
    fn enabled(&self) -> bool {
        self.control.bit(7)
    }

    fn cascading(&self) -> bool {
        self.control.bit(2)
    }

    fn irq_enabled(&self) -> bool {
        self.control.bit(6)
    }

    fn prescaler_period(&self) -> u16 {
        match self.control & 0x3 {
            0 => 1,
            1 => 64,
            2 => 256,
            _ => 1024,
        }
    }

    // Returns the number of overflows
    fn advance(&mut self, ticks: u32) -> u32 {
        let mut overflows = 0;
        for _ in 0..ticks {
            let (counter, overflowed) = self.counter.overflowing_add(1);
            self.counter = if overflowed { self.reload } else { counter };
            overflows += u32::from(overflowed);
        }
        overflows
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Timers {
    timers: [Timer; 4],
}

/// Timer overflows that the APU cares about this tick (timers 0 and 1 drive
/// the FIFO sample clocks).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerTickEffects {
    pub fifo_clock_overflows: [u32; 2],
}

impl Timers {
    pub fn new() -> Self {
        Self { timers: [Timer::default(), Timer::default(), Timer::default(), Timer::default()] }
    }

    pub fn tick(
        &mut self,
        cycles: u32,
        interrupts: &mut InterruptRegisters,
    ) -> TimerTickEffects {
        let mut effects = TimerTickEffects::default();
        let mut cascade_overflows = 0;

        for index in 0..4 {
            let timer = &mut self.timers[index];
            if !timer.enabled() {
                cascade_overflows = 0;
                continue;
            }

            let ticks = if index > 0 && timer.cascading() {
                cascade_overflows
            } else {
                // Prescaled ticks from the system clock
                let period = u32::from(timer.prescaler_period());
                let total = u32::from(timer.prescaler_counter) + cycles;
                timer.prescaler_counter = (total % period) as u16;
                total / period
            };

            let overflows = timer.advance(ticks);
            if overflows > 0 {
                if timer.irq_enabled() {
                    interrupts.request(InterruptType::Timer(index as u8));
                }
                if index < 2 {
                    effects.fifo_clock_overflows[index] = overflows;
                }
            }
            cascade_overflows = overflows;
        }

        effects
    }

    pub fn read_counter(&self, index: usize) -> u16 {
        self.timers[index].counter
    }

    pub fn read_control(&self, index: usize) -> u16 {
        self.timers[index].control
    }

    pub fn write_reload(&mut self, index: usize, value: u16) {
        self.timers[index].reload = value;
    }

    pub fn write_control(&mut self, index: usize, value: u16) {
        let timer = &mut self.timers[index];
        let was_enabled = timer.enabled();
        timer.control = value;

        // Enabling reloads the counter
        if !was_enabled && timer.enabled() {
            timer.counter = timer.reload;
            timer.prescaler_counter = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaled_timer_overflows_and_raises_irq() {
        let mut timers = Timers::new();
        let mut interrupts = InterruptRegisters::new();
        interrupts.write_ie(1 << 3);

        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, 0x00C0); // enabled, IRQ, prescaler 1

        timers.tick(1, &mut interrupts);
        assert_eq!(interrupts.read_if() & (1 << 3), 1 << 3);
    }

    #[test]
    fn cascade_counts_overflows_of_the_previous_timer() {
        let mut timers = Timers::new();
        let mut interrupts = InterruptRegisters::new();

        timers.write_reload(0, 0xFFFF); // overflows every tick
        timers.write_control(0, 0x0080);
        timers.write_reload(1, 0xFFFE);
        timers.write_control(1, 0x0084); // cascade

        timers.tick(1, &mut interrupts);
        assert_eq!(timers.read_counter(1), 0xFFFF);

        timers.tick(1, &mut interrupts);
        assert_eq!(timers.read_counter(1), 0xFFFE, "second overflow reloads timer 1");
    }
}
