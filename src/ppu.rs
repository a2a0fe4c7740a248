// pixel processing unit
//
// every scanline takes 456 cycles: OAM scan (80), pixel transfer (172), h-blank (204).
// after 144 visible lines come 10 lines of v-blank. the whole line is drawn at once
// when pixel transfer ends.

use log::debug;

use crate::mmu::{Interrupt, Mmu, BGP, LCDC, LY, LYC, OBP0, OBP1, SCX, SCY, STAT, WX, WY};
use crate::util::is_set;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

const OAM_SCAN_CYCLES: u32 = 80;
const PIXEL_TRANSFER_CYCLES: u32 = 172;
const HBLANK_CYCLES: u32 = 204;
const SCANLINE_CYCLES: u32 = 456;
const LAST_LINE: u8 = 153;

const MAX_OAM_ENTRIES: usize = 40;
const MAX_SPRITES_PER_LINE: usize = 10;

/// Shades 0-3 from lightest to darkest, 0x00RRGGBB.
pub const DEFAULT_PALETTE: [u32; 4] = [0x00E0F8D0, 0x0088C070, 0x00346856, 0x00081820];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    PixelTransfer = 3,
}

impl Mode {
    fn from_stat(stat: u8) -> Self {
        match stat & 0x03 {
            0 => Mode::HBlank,
            1 => Mode::VBlank,
            2 => Mode::OamScan,
            _ => Mode::PixelTransfer,
        }
    }

    // STAT bit enabling the interrupt on entering this mode
    fn interrupt_bit(self) -> Option<u8> {
        match self {
            Mode::HBlank => Some(3),
            Mode::VBlank => Some(4),
            Mode::OamScan => Some(5),
            Mode::PixelTransfer => None,
        }
    }
}

pub struct Ppu {
    // lines are drawn here as they finish
    frame_buffer: Vec<u32>,
    // last complete frame, copied from `frame_buffer` on v-blank entry
    screen: Vec<u32>,
    palette: [u32; 4],
    // cycles spent in the current mode
    cycles: u32,
    window_line: u8,
    lcd_on: bool,
    // the LCD has to be on for a whole frame before anything is drawn
    render_enabled: bool,
    coincidence: bool,
    frame_ready: bool,
    // background color ids of the current line, sprites behind the background need them
    bg_line: [u8; SCREEN_WIDTH],
}

impl Ppu {
    pub fn new(palette: [u32; 4]) -> Self {
        Self {
            frame_buffer: vec![palette[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            screen: vec![palette[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            palette,
            cycles: 0,
            window_line: 0,
            lcd_on: true,
            render_enabled: true,
            coincidence: false,
            frame_ready: false,
            bg_line: [0; SCREEN_WIDTH],
        }
    }

    pub fn update(&mut self, cycles: u32, mmu: &mut Mmu) {
        if !is_set(mmu.io_register(LCDC), 7) {
            if self.lcd_on {
                debug!("LCD off");
                self.lcd_on = false;
                self.frame_buffer.fill(self.palette[0]);
                self.screen.fill(self.palette[0]);
            }
            self.render_enabled = false;
            self.cycles = 0;
            self.window_line = 0;
            mmu.set_io_register(LY, 0);
            let stat = mmu.io_register(STAT);
            mmu.set_io_register(STAT, stat & !0x03);
            return;
        }

        if !self.lcd_on {
            debug!("LCD on");
            self.lcd_on = true;
            self.change_mode(Mode::OamScan, mmu);
        }

        self.cycles += cycles;
        loop {
            let mode = Mode::from_stat(mmu.io_register(STAT));
            match mode {
                Mode::OamScan if self.cycles >= OAM_SCAN_CYCLES => {
                    self.cycles -= OAM_SCAN_CYCLES;
                    self.change_mode(Mode::PixelTransfer, mmu);
                }
                Mode::PixelTransfer if self.cycles >= PIXEL_TRANSFER_CYCLES => {
                    self.cycles -= PIXEL_TRANSFER_CYCLES;
                    self.change_mode(Mode::HBlank, mmu);
                    if self.render_enabled {
                        self.render_scanline(mmu);
                    }
                }
                Mode::HBlank if self.cycles >= HBLANK_CYCLES => {
                    self.cycles -= HBLANK_CYCLES;
                    let ly = mmu.io_register(LY) + 1;
                    mmu.set_io_register(LY, ly);
                    if ly as usize == SCREEN_HEIGHT {
                        self.change_mode(Mode::VBlank, mmu);
                        mmu.request_interrupt(Interrupt::VBlank);
                        self.screen.copy_from_slice(&self.frame_buffer);
                        self.frame_ready = true;
                    } else {
                        self.change_mode(Mode::OamScan, mmu);
                    }
                }
                Mode::VBlank if self.cycles >= SCANLINE_CYCLES => {
                    self.cycles -= SCANLINE_CYCLES;
                    let ly = mmu.io_register(LY) + 1;
                    if ly > LAST_LINE {
                        mmu.set_io_register(LY, 0);
                        self.window_line = 0;
                        self.render_enabled = true;
                        self.change_mode(Mode::OamScan, mmu);
                    } else {
                        mmu.set_io_register(LY, ly);
                    }
                }
                _ => break,
            }
            self.check_coincidence(mmu);
        }

        self.check_coincidence(mmu);
    }

    /// True once per completed frame, at the start of v-blank.
    pub fn frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    /// The last frame completed at v-blank, never a frame still being drawn.
    pub fn frame_buffer(&self) -> &[u32] {
        &self.screen
    }

    fn change_mode(&mut self, mode: Mode, mmu: &mut Mmu) {
        let stat = (mmu.io_register(STAT) & !0x03) | mode as u8;
        mmu.set_io_register(STAT, stat);

        if let Some(bit) = mode.interrupt_bit() {
            if is_set(stat, bit) {
                mmu.request_interrupt(Interrupt::LcdStat);
            }
        }
    }

    // LY == LYC, the interrupt fires on the rising edge only
    fn check_coincidence(&mut self, mmu: &mut Mmu) {
        let equal = mmu.io_register(LY) == mmu.io_register(LYC);
        let stat = mmu.io_register(STAT);
        if equal {
            mmu.set_io_register(STAT, stat | 0x04);
            if !self.coincidence && is_set(stat, 6) {
                mmu.request_interrupt(Interrupt::LcdStat);
            }
        } else {
            mmu.set_io_register(STAT, stat & !0x04);
        }
        self.coincidence = equal;
    }

    fn render_scanline(&mut self, mmu: &Mmu) {
        let ly = mmu.io_register(LY);
        if ly as usize >= SCREEN_HEIGHT {
            return;
        }

        let lcdc = mmu.io_register(LCDC);
        self.render_background(mmu, lcdc, ly);
        if is_set(lcdc, 1) {
            self.render_sprites(mmu, lcdc, ly);
        }
    }

    fn render_background(&mut self, mmu: &Mmu, lcdc: u8, ly: u8) {
        let vram = mmu.vram();
        let bgp = mmu.io_register(BGP);
        let scx = mmu.io_register(SCX);
        let scy = mmu.io_register(SCY);
        let wy = mmu.io_register(WY);
        let wx = mmu.io_register(WX) as i16 - 7;
        let row = ly as usize * SCREEN_WIDTH;

        if !is_set(lcdc, 0) {
            // background and window off, color 0 everywhere
            self.bg_line = [0; SCREEN_WIDTH];
            self.frame_buffer[row..row + SCREEN_WIDTH].fill(self.palette[0]);
            return;
        }

        let window_visible = is_set(lcdc, 5) && ly >= wy && wx < SCREEN_WIDTH as i16;
        let mut window_drawn = false;

        for x in 0..SCREEN_WIDTH {
            let in_window = window_visible && x as i16 >= wx;
            let (map, map_x, map_y) = if in_window {
                window_drawn = true;
                let map = if is_set(lcdc, 6) { 0x1C00 } else { 0x1800 };
                (map, (x as i16 - wx) as u8, self.window_line)
            } else {
                let map = if is_set(lcdc, 3) { 0x1C00 } else { 0x1800 };
                (map, scx.wrapping_add(x as u8), scy.wrapping_add(ly))
            };

            let tile_index = vram[map + (map_y as usize / 8) * 32 + map_x as usize / 8];
            let tile = tile_data_offset(lcdc, tile_index) + (map_y as usize % 8) * 2;
            let color_id = color_id(vram[tile], vram[tile + 1], 7 - map_x % 8);

            self.bg_line[x] = color_id;
            self.frame_buffer[row + x] = self.palette[shade(bgp, color_id) as usize];
        }

        if window_drawn {
            self.window_line = self.window_line.wrapping_add(1);
        }
    }

    fn render_sprites(&mut self, mmu: &Mmu, lcdc: u8, ly: u8) {
        let vram = mmu.vram();
        let oam = mmu.oam();
        let height: i16 = if is_set(lcdc, 2) { 16 } else { 8 };
        let line = ly as i16;

        // first ten entries in OAM order that cover this line
        let mut sprites: Vec<(u8, usize)> = (0..MAX_OAM_ENTRIES)
            .filter(|&i| {
                let y = oam[i * 4] as i16 - 16;
                y <= line && line < y + height
            })
            .take(MAX_SPRITES_PER_LINE)
            .map(|i| (oam[i * 4 + 1], i))
            .collect();
        // lower x wins, then lower OAM index
        sprites.sort();

        let obp0 = mmu.io_register(OBP0);
        let obp1 = mmu.io_register(OBP1);
        let row = ly as usize * SCREEN_WIDTH;
        let mut claimed = [false; SCREEN_WIDTH];

        for (_, i) in sprites {
            let y = oam[i * 4] as i16 - 16;
            let x = oam[i * 4 + 1] as i16 - 8;
            let attributes = oam[i * 4 + 3];
            let mut tile = oam[i * 4 + 2];
            if height == 16 {
                tile &= 0xFE;
            }

            let mut tile_row = line - y;
            if is_set(attributes, 6) {
                tile_row = height - 1 - tile_row;
            }
            let addr = tile as usize * 16 + tile_row as usize * 2;
            let (low, high) = (vram[addr], vram[addr + 1]);
            let palette = if is_set(attributes, 4) { obp1 } else { obp0 };

            for p in 0..8 {
                let screen_x = x + p;
                if !(0..SCREEN_WIDTH as i16).contains(&screen_x) {
                    continue;
                }
                let screen_x = screen_x as usize;

                let bit = if is_set(attributes, 5) { p as u8 } else { 7 - p as u8 };
                let id = color_id(low, high, bit);
                // transparent pixels leave room for the next sprite
                if id == 0 || claimed[screen_x] {
                    continue;
                }
                claimed[screen_x] = true;

                if is_set(attributes, 7) && self.bg_line[screen_x] != 0 {
                    continue;
                }
                self.frame_buffer[row + screen_x] = self.palette[shade(palette, id) as usize];
            }
        }
    }
}

// offset into VRAM of a tile, 0x8000 unsigned or 0x9000 signed addressing
fn tile_data_offset(lcdc: u8, index: u8) -> usize {
    if is_set(lcdc, 4) {
        index as usize * 16
    } else {
        (0x1000 + (index as i8 as isize) * 16) as usize
    }
}

fn color_id(low: u8, high: u8, bit: u8) -> u8 {
    ((high >> bit) & 1) << 1 | ((low >> bit) & 1)
}

fn shade(palette: u8, color_id: u8) -> u8 {
    (palette >> (color_id * 2)) & 0x03
}
