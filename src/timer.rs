// built-in timer in the gameboy

// DIV counts up every 256 clock cycles and cannot be stopped, writing to it resets it to 0.
// TIMA updates at a configurable rate, depends on frequency set in TAC register
// when TIMA overflows an interrupt is issued and TIMA is reset to TMA's value
// NOTE: we are counting clock cycles (T-states), not machine cycles

use crate::apu::Apu;
use crate::util::is_set;

const DIVIDER_PERIOD: u32 = 256;
// TAC bits 0-1 select one of these periods for TIMA
const TIMA_PERIODS: [u32; 4] = [1024, 16, 64, 256];
// the APU frame sequencer is clocked when this DIV bit falls (4194304 / 8192 = 512 Hz)
const FRAME_SEQUENCER_BIT: u8 = 4;

pub struct Timer {
    // divider register
    div: u8,
    // timer counter
    tima: u8,
    // timer modulo
    tma: u8,
    // timer control
    tac: u8,

    div_clock: u32,
    tima_clock: u32,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            div_clock: 0,
            tima_clock: 0,
        }
    }

    /// Advances the timer by `cycles` clock cycles. Returns true when TIMA
    /// overflowed and a timer interrupt has to be requested.
    pub fn update(&mut self, cycles: u32, apu: &mut Apu) -> bool {
        self.div_clock += cycles;
        while self.div_clock >= DIVIDER_PERIOD {
            self.div_clock -= DIVIDER_PERIOD;
            let old = self.div;
            self.div = self.div.wrapping_add(1);
            if is_set(old, FRAME_SEQUENCER_BIT) && !is_set(self.div, FRAME_SEQUENCER_BIT) {
                apu.clock_frame_sequencer();
            }
        }

        if !self.enabled() {
            return false;
        }

        let period = TIMA_PERIODS[(self.tac & 0x03) as usize];
        let mut interrupt = false;
        self.tima_clock += cycles;
        while self.tima_clock >= period {
            self.tima_clock -= period;
            let (tima, overflow) = self.tima.overflowing_add(1);
            if overflow {
                self.tima = self.tma;
                interrupt = true;
            } else {
                self.tima = tima;
            }
        }

        interrupt
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => self.div,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => 0xF8 | self.tac,
            _ => 0xFF,
        }
    }

    /// Returns true when a DIV reset produced a falling edge on the
    /// frame sequencer bit.
    pub fn write_byte(&mut self, addr: u16, value: u8) -> bool {
        match addr {
            0xFF04 => {
                let edge = is_set(self.div, FRAME_SEQUENCER_BIT);
                self.div = 0;
                self.div_clock = 0;
                self.tima_clock = 0;
                return edge;
            }
            0xFF05 => self.tima = value,
            0xFF06 => self.tma = value,
            0xFF07 => self.tac = value & 0x07,
            _ => {}
        }
        false
    }

    fn enabled(&self) -> bool {
        self.tac & 0x04 != 0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
