// memory management unit
//
// owns every piece of memory the CPU can see and the hardware blocks that sit
// directly on the bus (cartridge, timer, APU, joypad). the PPU reads and writes
// its registers through the I/O block stored here.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::joypad::{InputState, Joypad};
use crate::timer::Timer;

// NOTE: "word" in this context means 16-bit

const VRAM_SIZE: usize = 0x2000;
const WRAM_BANK_SIZE: usize = 0x1000;
const OAM_SIZE: usize = 0xA0;
const IO_SIZE: usize = 0x80;
const HRAM_SIZE: usize = 0x7F;

pub const JOYPAD: u16 = 0xFF00;
pub const DIV: u16 = 0xFF04;
pub const INTERRUPT_FLAG: u16 = 0xFF0F;
pub const LCDC: u16 = 0xFF40;
pub const STAT: u16 = 0xFF41;
pub const SCY: u16 = 0xFF42;
pub const SCX: u16 = 0xFF43;
pub const LY: u16 = 0xFF44;
pub const LYC: u16 = 0xFF45;
pub const DMA: u16 = 0xFF46;
pub const BGP: u16 = 0xFF47;
pub const OBP0: u16 = 0xFF48;
pub const OBP1: u16 = 0xFF49;
pub const WY: u16 = 0xFF4A;
pub const WX: u16 = 0xFF4B;
pub const INTERRUPT_ENABLE: u16 = 0xFFFF;

/// Interrupt sources in priority order, the discriminant is the bit in IE/IF.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    LcdStat = 1,
    Timer = 2,
    Serial = 3,
    Joypad = 4,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::LcdStat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    pub fn mask(self) -> u8 {
        1 << self as u8
    }

    pub fn vector(self) -> u16 {
        0x40 + 8 * self as u16
    }
}

pub struct Mmu {
    cartridge: Cartridge,
    timer: Timer,
    apu: Apu,
    joypad: Joypad,
    // stores graphic tiles and the two background maps
    vram: [u8; VRAM_SIZE],
    // work RAM, fixed bank 0 and bank 1
    wram0: [u8; WRAM_BANK_SIZE],
    wram1: [u8; WRAM_BANK_SIZE],
    // OAM stores data that tells the gameboy
    // which tiles to use to construct moving objects on the screen
    oam: [u8; OAM_SIZE],
    io: [u8; IO_SIZE],
    hram: [u8; HRAM_SIZE],
    ie: u8,
}

impl Mmu {
    pub fn new(cartridge: Cartridge, sample_rate: u32) -> Self {
        let mut mmu = Self {
            cartridge,
            timer: Timer::new(),
            apu: Apu::new(sample_rate),
            joypad: Joypad::new(),
            vram: [0; VRAM_SIZE],
            wram0: [0; WRAM_BANK_SIZE],
            wram1: [0; WRAM_BANK_SIZE],
            oam: [0; OAM_SIZE],
            io: [0; IO_SIZE],
            hram: [0; HRAM_SIZE],
            ie: 0,
        };

        // hardware registers - boot ROM values
        mmu.write_byte(0xFF26, 0x80);
        mmu.write_byte(0xFF11, 0x80);
        mmu.write_byte(0xFF12, 0xF3);
        mmu.write_byte(0xFF24, 0x77);
        mmu.write_byte(0xFF25, 0xF3);
        mmu.write_byte(INTERRUPT_FLAG, 0x01);
        mmu.io[(LCDC & 0x7F) as usize] = 0x91;
        // OAM scan of line 0, LY == LYC
        mmu.io[(STAT & 0x7F) as usize] = 0x06;
        mmu.io[(BGP & 0x7F) as usize] = 0xFC;
        mmu.io[(OBP0 & 0x7F) as usize] = 0xFF;
        mmu.io[(OBP1 & 0x7F) as usize] = 0xFF;

        mmu
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            // from cartridge, fixed bank
            0x0000..=0x3FFF => self.cartridge.read_low_rom(addr),
            // from cartridge, switchable bank
            0x4000..=0x7FFF => self.cartridge.read_high_rom(addr),
            0x8000..=0x9FFF => self.vram[addr as usize & (VRAM_SIZE - 1)],
            0xA000..=0xBFFF => self.cartridge.read_ram(addr),
            0xC000..=0xCFFF => self.wram0[addr as usize & (WRAM_BANK_SIZE - 1)],
            0xD000..=0xDFFF => self.wram1[addr as usize & (WRAM_BANK_SIZE - 1)],
            // echo RAM
            0xE000..=0xEFFF => self.wram0[addr as usize & (WRAM_BANK_SIZE - 1)],
            0xF000..=0xFDFF => self.wram1[addr as usize & (WRAM_BANK_SIZE - 1)],
            // sprite attribute table
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize],
            // prohibited area
            0xFEA0..=0xFEFF => 0xFF,
            JOYPAD => self.joypad.read_byte(),
            0xFF04..=0xFF07 => self.timer.read_byte(addr),
            INTERRUPT_FLAG => self.io[(addr & 0x7F) as usize] | 0xE0,
            0xFF10..=0xFF3F => self.apu.read_byte(addr),
            STAT => self.io[(addr & 0x7F) as usize] | 0x80,
            // serial data/control and the LCD block
            0xFF01 | 0xFF02 | LCDC..=WX => self.io[(addr & 0x7F) as usize],
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            INTERRUPT_ENABLE => self.ie,
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        match addr {
            // bank switching, the ROM itself is never written
            0x0000..=0x7FFF => self.cartridge.write_rom(addr, value),
            0x8000..=0x9FFF => self.vram[addr as usize & (VRAM_SIZE - 1)] = value,
            0xA000..=0xBFFF => self.cartridge.write_ram(addr, value),
            0xC000..=0xCFFF => self.wram0[addr as usize & (WRAM_BANK_SIZE - 1)] = value,
            0xD000..=0xDFFF => self.wram1[addr as usize & (WRAM_BANK_SIZE - 1)] = value,
            0xE000..=0xEFFF => self.wram0[addr as usize & (WRAM_BANK_SIZE - 1)] = value,
            0xF000..=0xFDFF => self.wram1[addr as usize & (WRAM_BANK_SIZE - 1)] = value,
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize] = value,
            0xFEA0..=0xFEFF => {}
            JOYPAD => self.joypad.write_byte(value),
            DIV => {
                // the reset is a falling edge for the frame sequencer bit
                if self.timer.write_byte(addr, value) {
                    self.apu.clock_frame_sequencer();
                }
            }
            0xFF05..=0xFF07 => {
                self.timer.write_byte(addr, value);
            }
            INTERRUPT_FLAG => self.io[(addr & 0x7F) as usize] = value & 0x1F,
            0xFF10..=0xFF3F => self.apu.write_byte(addr, value),
            // mode and coincidence bits belong to the PPU
            STAT => {
                let stat = &mut self.io[(addr & 0x7F) as usize];
                *stat = (*stat & 0x07) | (value & 0x78);
            }
            LY => self.io[(addr & 0x7F) as usize] = 0,
            DMA => {
                self.io[(addr & 0x7F) as usize] = value;
                self.dma_transfer(value);
            }
            0xFF00..=0xFF7F => self.io[(addr & 0x7F) as usize] = value,
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = value,
            INTERRUPT_ENABLE => self.ie = value,
        }
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        (self.read_byte(addr) as u16) | ((self.read_byte(addr.wrapping_add(1)) as u16) << 8)
    }

    pub fn write_word(&mut self, addr: u16, value: u16) {
        self.write_byte(addr, (value & 0xFF) as u8);
        self.write_byte(addr.wrapping_add(1), (value >> 8) as u8);
    }

    // copies 160 bytes from value * 0x100 into OAM
    fn dma_transfer(&mut self, value: u8) {
        let source = (value as u16) << 8;
        for i in 0..OAM_SIZE {
            self.oam[i] = self.read_byte(source.wrapping_add(i as u16));
        }
    }

    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        self.io[(INTERRUPT_FLAG & 0x7F) as usize] |= interrupt.mask();
    }

    pub fn clear_interrupt(&mut self, interrupt: Interrupt) {
        self.io[(INTERRUPT_FLAG & 0x7F) as usize] &= !interrupt.mask();
    }

    /// Interrupts both requested and enabled.
    pub fn pending_interrupts(&self) -> u8 {
        self.ie & self.io[(INTERRUPT_FLAG & 0x7F) as usize] & 0x1F
    }

    /// Raw I/O register access for the PPU, bypassing CPU write side effects.
    pub fn io_register(&self, addr: u16) -> u8 {
        self.io[(addr & 0x7F) as usize]
    }

    pub fn set_io_register(&mut self, addr: u16, value: u8) {
        self.io[(addr & 0x7F) as usize] = value;
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn oam(&self) -> &[u8] {
        &self.oam
    }

    pub fn update_timer(&mut self, cycles: u32) {
        if self.timer.update(cycles, &mut self.apu) {
            self.request_interrupt(Interrupt::Timer);
        }
    }

    pub fn update_apu(&mut self, cycles: u32) {
        self.apu.update(cycles);
    }

    pub fn update_joypad(&mut self) {
        if self.joypad.update() {
            self.request_interrupt(Interrupt::Joypad);
        }
    }

    pub fn set_input(&mut self, input: &InputState) {
        self.joypad.set_input(input);
    }

    pub fn take_samples(&mut self) -> Vec<i16> {
        self.apu.end_frame()
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::tests::rom_image;
    use crate::joypad::Buttons;

    fn mmu_with(cartridge_type: u8, ram_size: u8) -> Mmu {
        let cartridge = Cartridge::from_bytes(rom_image(cartridge_type, 0x00, ram_size)).unwrap();
        Mmu::new(cartridge, 44_100)
    }

    #[test]
    fn test_rom_only_mapping() {
        // Arrange
        let mut rom = rom_image(0x00, 0x00, 0x00);
        rom[0x0000] = 0x12;
        rom[0x4000] = 0x34;
        rom[0x7FFF] = 0x56;
        let mut mmu = Mmu::new(Cartridge::from_bytes(rom).unwrap(), 44_100);

        // Act
        mmu.write_byte(0x4000, 0xAA);
        mmu.write_byte(0x2000, 0x05);

        // Assert
        assert_eq!(0x12, mmu.read_byte(0x0000));
        assert_eq!(0x34, mmu.read_byte(0x4000));
        assert_eq!(0x56, mmu.read_byte(0x7FFF));
        assert_eq!(0xFF, mmu.read_byte(0xA000));
        assert_eq!(0xFF, mmu.read_byte(0xBFFF));
    }

    #[test]
    fn test_ram_round_trip_and_echo() {
        let mut mmu = mmu_with(0x00, 0x00);

        mmu.write_byte(0xC123, 0x11);
        mmu.write_byte(0xD456, 0x22);
        mmu.write_byte(0xFDFF, 0x33);
        mmu.write_byte(0x8000, 0x44);
        mmu.write_byte(0xFF80, 0x55);
        mmu.write_byte(0xFE9F, 0x66);

        assert_eq!(0x11, mmu.read_byte(0xE123));
        assert_eq!(0x22, mmu.read_byte(0xF456));
        assert_eq!(0x33, mmu.read_byte(0xDDFF));
        assert_eq!(0x44, mmu.read_byte(0x8000));
        assert_eq!(0x55, mmu.read_byte(0xFF80));
        assert_eq!(0x66, mmu.read_byte(0xFE9F));
    }

    #[test]
    fn test_unusable_area_reads_ff() {
        let mut mmu = mmu_with(0x00, 0x00);

        mmu.write_byte(0xFEA0, 0x12);

        assert_eq!(0xFF, mmu.read_byte(0xFEA0));
        assert_eq!(0xFF, mmu.read_byte(0xFEFF));
        assert_eq!(0xFF, mmu.read_byte(0xFF03));
        assert_eq!(0xFF, mmu.read_byte(0xFF4C));
    }

    #[test]
    fn test_words_are_little_endian() {
        let mut mmu = mmu_with(0x00, 0x00);

        mmu.write_word(0xC000, 0xBEEF);

        assert_eq!(0xEF, mmu.read_byte(0xC000));
        assert_eq!(0xBE, mmu.read_byte(0xC001));
        assert_eq!(0xBEEF, mmu.read_word(0xC000));
    }

    #[test]
    fn test_div_and_ly_reset_on_write() {
        // Arrange
        let mut mmu = mmu_with(0x00, 0x00);
        mmu.update_timer(256 * 5);
        mmu.set_io_register(LY, 0x42);

        // Act
        let div_before = mmu.read_byte(DIV);
        mmu.write_byte(DIV, 0x99);
        mmu.write_byte(LY, 0x99);

        // Assert
        assert_eq!(5, div_before);
        assert_eq!(0, mmu.read_byte(DIV));
        assert_eq!(0, mmu.read_byte(LY));
    }

    #[test]
    fn test_div_write_clocks_frame_sequencer() {
        // Arrange
        let mut mmu = mmu_with(0x00, 0x00);
        mmu.write_byte(0xFF12, 0xF0);
        mmu.write_byte(0xFF11, 0x3F); // one length tick left
        mmu.write_byte(0xFF14, 0xC0);
        mmu.update_timer(256 * 16); // DIV bit 4 set
        let playing = mmu.read_byte(0xFF26) & 0x01;

        // Act
        mmu.write_byte(DIV, 0x00);

        // Assert
        assert_eq!(0x01, playing);
        assert_eq!(0x00, mmu.read_byte(0xFF26) & 0x01);
    }

    #[test]
    fn test_dma_copies_into_oam() {
        let mut mmu = mmu_with(0x00, 0x00);
        for i in 0..0xA0 {
            mmu.write_byte(0xC100 + i, i as u8 ^ 0x5A);
        }

        mmu.write_byte(DMA, 0xC1);

        for i in 0..0xA0u16 {
            assert_eq!(i as u8 ^ 0x5A, mmu.read_byte(0xFE00 + i));
        }
        assert_eq!(0xC1, mmu.read_byte(DMA));
    }

    #[test]
    fn test_interrupt_flag_upper_bits() {
        // Arrange
        let mut mmu = mmu_with(0x00, 0x00);
        mmu.write_byte(INTERRUPT_FLAG, 0x00);

        // Act
        mmu.request_interrupt(Interrupt::Timer);
        mmu.request_interrupt(Interrupt::Joypad);
        mmu.write_byte(INTERRUPT_ENABLE, 0x04);

        // Assert
        assert_eq!(0xF4, mmu.read_byte(INTERRUPT_FLAG));
        assert_eq!(0x04, mmu.pending_interrupts());

        mmu.clear_interrupt(Interrupt::Timer);
        assert_eq!(0xF0, mmu.read_byte(INTERRUPT_FLAG));
        assert_eq!(0x00, mmu.pending_interrupts());
    }

    #[test]
    fn test_power_on_stat_matches_line_zero() {
        let mmu = mmu_with(0x00, 0x00);

        assert_eq!(0, mmu.read_byte(LY));
        assert_eq!(0x86, mmu.read_byte(STAT));
    }

    #[test]
    fn test_stat_low_bits_read_only() {
        let mut mmu = mmu_with(0x00, 0x00);
        mmu.set_io_register(STAT, 0x02);

        mmu.write_byte(STAT, 0xFF);

        assert_eq!(0xFA, mmu.read_byte(STAT));
    }

    #[test]
    fn test_timer_overflow_requests_interrupt() {
        let mut mmu = mmu_with(0x00, 0x00);
        mmu.write_byte(INTERRUPT_FLAG, 0x00);
        mmu.write_byte(0xFF05, 0xFF);
        mmu.write_byte(0xFF07, 0x05);

        mmu.update_timer(16);

        assert_eq!(Interrupt::Timer.mask(), mmu.read_byte(INTERRUPT_FLAG) & 0x1F);
    }

    #[test]
    fn test_joypad_routed_and_interrupts() {
        let mut mmu = mmu_with(0x00, 0x00);
        mmu.write_byte(INTERRUPT_FLAG, 0x00);
        mmu.write_byte(JOYPAD, 0x10);

        mmu.set_input(&InputState {
            buttons: Buttons::START,
            ..InputState::default()
        });
        mmu.update_joypad();

        assert_eq!(0xD7, mmu.read_byte(JOYPAD));
        assert_eq!(Interrupt::Joypad.mask(), mmu.read_byte(INTERRUPT_FLAG) & 0x1F);
    }

    #[test]
    fn test_cartridge_ram_routed() {
        let mut mmu = mmu_with(0x03, 0x02);

        mmu.write_byte(0xA000, 0x12);
        let disabled = mmu.read_byte(0xA000);
        mmu.write_byte(0x0000, 0x0A);
        mmu.write_byte(0xA000, 0x12);

        assert_eq!(0xFF, disabled);
        assert_eq!(0x12, mmu.read_byte(0xA000));
    }

    #[test]
    fn test_interrupt_vectors() {
        let vectors: Vec<u16> = Interrupt::ALL.iter().map(|i| i.vector()).collect();

        assert_eq!(vec![0x40, 0x48, 0x50, 0x58, 0x60], vectors);
    }
}
