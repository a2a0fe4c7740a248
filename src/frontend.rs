use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use minifb::{Key, Scale, Window, WindowOptions};

use crate::audio::AudioSink;
use crate::config::Config;
use crate::gameboy::Gameboy;
use crate::joypad::{Buttons, InputState};
use crate::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

// 70224 cycles at 4.194304 MHz
const FRAME_DURATION: Duration = Duration::from_micros(16_742);

const KEY_MAP: [(Key, Buttons); 8] = [
    (Key::Right, Buttons::RIGHT),
    (Key::Left, Buttons::LEFT),
    (Key::Up, Buttons::UP),
    (Key::Down, Buttons::DOWN),
    (Key::X, Buttons::A),
    (Key::Z, Buttons::B),
    (Key::Backspace, Buttons::SELECT),
    (Key::Enter, Buttons::START),
];

/// Runs the window loop until the window is closed or Escape is pressed.
pub fn run(gameboy: &mut Gameboy, audio: &mut AudioSink, config: &Config) -> Result<()> {
    let title = format!("dotboy - {}", gameboy.cartridge().title());
    let options = WindowOptions {
        scale: scale(config.scale),
        ..WindowOptions::default()
    };
    let mut window = Window::new(&title, SCREEN_WIDTH, SCREEN_HEIGHT, options)
        .context("failed to open window")?;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let frame_start = Instant::now();

        let input = InputState {
            buttons: held_buttons(|key| window.is_key_down(key)),
            ..InputState::default()
        };
        gameboy.run_frame(&input)?;
        audio.push(&gameboy.take_samples());

        window
            .update_with_buffer(gameboy.frame_buffer(), SCREEN_WIDTH, SCREEN_HEIGHT)
            .context("failed to present frame")?;

        let elapsed = frame_start.elapsed();
        if elapsed < FRAME_DURATION {
            thread::sleep(FRAME_DURATION - elapsed);
        }
    }

    Ok(())
}

fn held_buttons(is_down: impl Fn(Key) -> bool) -> Buttons {
    KEY_MAP
        .iter()
        .filter(|(key, _)| is_down(*key))
        .fold(Buttons::empty(), |held, (_, button)| held | *button)
}

fn scale(factor: usize) -> Scale {
    match factor {
        1 => Scale::X1,
        2 => Scale::X2,
        8 => Scale::X8,
        _ => Scale::X4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_map_to_buttons() {
        let buttons = held_buttons(|key| matches!(key, Key::Up | Key::X | Key::Enter));

        assert_eq!(Buttons::UP | Buttons::A | Buttons::START, buttons);
        assert_eq!(Buttons::empty(), held_buttons(|_| false));
        assert_eq!(Buttons::all(), held_buttons(|_| true));
    }
}
