// joypad register (P1, 0xFF00)
//
// eight buttons wired as a 2x4 matrix. bit 4 selects the direction keys, bit 5 the
// action keys; a selection bit and a pressed key both read as 0.

use bitflags::bitflags;

// stick deflection below this is ignored
const STICK_DEAD_ZONE: f32 = 0.3;

bitflags! {
    /// Buttons held down, low nibble directions and high nibble actions in
    /// the order they appear on the P1 lines.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Buttons: u8 {
        const RIGHT = 0x01;
        const LEFT = 0x02;
        const UP = 0x04;
        const DOWN = 0x08;
        const A = 0x10;
        const B = 0x20;
        const SELECT = 0x40;
        const START = 0x80;
    }
}

/// External input as sampled by the frontend once per frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputState {
    pub buttons: Buttons,
    // -1.0..=1.0, negative y is up
    pub stick_x: f32,
    pub stick_y: f32,
}

impl InputState {
    /// Digital buttons with stick deflection folded into the directions.
    pub fn resolve(&self) -> Buttons {
        let mut buttons = self.buttons;
        if self.stick_x > STICK_DEAD_ZONE {
            buttons |= Buttons::RIGHT;
        } else if self.stick_x < -STICK_DEAD_ZONE {
            buttons |= Buttons::LEFT;
        }
        if self.stick_y > STICK_DEAD_ZONE {
            buttons |= Buttons::DOWN;
        } else if self.stick_y < -STICK_DEAD_ZONE {
            buttons |= Buttons::UP;
        }
        buttons
    }
}

pub struct Joypad {
    select: u8,     // bits 4-5 as last written
    directions: u8, // pressed = 1
    actions: u8,    // pressed = 1
    last_lines: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            directions: 0,
            actions: 0,
            last_lines: 0,
        }
    }

    pub fn set_input(&mut self, input: &InputState) {
        let buttons = input.resolve().bits();
        self.directions = buttons & 0x0F;
        self.actions = buttons >> 4;
    }

    /// Returns true when a key of a selected group went down since the last update.
    pub fn update(&mut self) -> bool {
        let lines = self.pressed_lines();
        let newly_pressed = lines & !self.last_lines;
        self.last_lines = lines;
        newly_pressed != 0
    }

    pub fn read_byte(&self) -> u8 {
        // bits 7-6 always read as 1
        0xC0 | self.select | (!self.pressed_lines() & 0x0F)
    }

    pub fn write_byte(&mut self, value: u8) {
        // only the selection bits are writable
        self.select = value & 0x30;
    }

    fn pressed_lines(&self) -> u8 {
        let mut lines = 0;
        if self.select & 0x10 == 0 {
            lines |= self.directions;
        }
        if self.select & 0x20 == 0 {
            lines |= self.actions;
        }
        lines
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}
