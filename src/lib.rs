pub mod apu;
pub mod audio;
pub mod cartridge;
pub mod config;
pub mod cpu;
pub mod error;
pub mod frontend;
pub mod gameboy;
pub mod joypad;
pub mod mmu;
pub mod ppu;
pub mod register;
pub mod timer;
pub mod util;
