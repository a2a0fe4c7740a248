use crate::cartridge::Cartridge;
use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::joypad::InputState;
use crate::mmu::Mmu;
use crate::ppu::{Ppu, DEFAULT_PALETTE};

// 154 scanlines of 456 cycles, ~59.73 frames per second
pub const CYCLES_PER_FRAME: u32 = 70_224;

/// Settings fixed for the lifetime of a running cartridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Stop on undefined opcodes instead of executing them as NOP.
    pub strict: bool,
    pub sample_rate: u32,
    pub palette: [u32; 4],
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strict: true,
            sample_rate: 44_100,
            palette: DEFAULT_PALETTE,
        }
    }
}

pub struct Gameboy {
    cpu: Cpu,
    mmu: Mmu,
    ppu: Ppu,
}

impl Gameboy {
    pub fn new(cartridge: Cartridge, options: &Options) -> Self {
        Self {
            cpu: Cpu::new(options.strict),
            mmu: Mmu::new(cartridge, options.sample_rate),
            ppu: Ppu::new(options.palette),
        }
    }

    /// Executes one instruction plus any interrupt dispatch that follows it and
    /// advances the rest of the hardware by the same number of cycles.
    pub fn step(&mut self) -> Result<u32, CpuError> {
        let cycles = self.cpu.execute(&mut self.mmu)?;
        self.tick(cycles);

        let dispatch = self.cpu.handle_interrupts(&mut self.mmu);
        if dispatch > 0 {
            self.tick(dispatch);
        }

        Ok(cycles + dispatch)
    }

    /// Runs with `input` held down until the next v-blank. With the LCD off no
    /// frame ever completes, so a frame worth of cycles is the limit.
    pub fn run_frame(&mut self, input: &InputState) -> Result<(), CpuError> {
        self.mmu.set_input(input);

        let mut cycles = 0;
        while cycles < CYCLES_PER_FRAME {
            cycles += self.step()?;
            if self.ppu.frame_complete() {
                break;
            }
        }

        Ok(())
    }

    pub fn frame_buffer(&self) -> &[u32] {
        self.ppu.frame_buffer()
    }

    /// Interleaved stereo samples produced since the last call.
    pub fn take_samples(&mut self) -> Vec<i16> {
        self.mmu.take_samples()
    }

    pub fn cartridge(&self) -> &Cartridge {
        self.mmu.cartridge()
    }

    // PPU, timer, APU, joypad, always in this order
    fn tick(&mut self, cycles: u32) {
        self.ppu.update(cycles, &mut self.mmu);
        self.mmu.update_timer(cycles);
        self.mmu.update_apu(cycles);
        self.mmu.update_joypad();
    }
}
