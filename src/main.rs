use std::env;

use anyhow::{Context, Result};
use env_logger::Env;
use log::error;

use dotboy::audio::AudioSink;
use dotboy::cartridge::Cartridge;
use dotboy::config::Config;
use dotboy::frontend;
use dotboy::gameboy::Gameboy;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_args(env::args().skip(1)).context("invalid arguments")?;

    let mut cartridge = Cartridge::from_path(&config.rom)
        .with_context(|| format!("failed to load {}", config.rom.display()))?;
    cartridge.load_save_file(&config.save);

    let mut audio = AudioSink::open(config.sample_rate, config.volume);
    let mut gameboy = Gameboy::new(cartridge, &config.options(audio.sample_rate()));

    let result = frontend::run(&mut gameboy, &mut audio, &config);

    // battery RAM is written even when emulation stopped on an error
    if let Err(err) = gameboy.cartridge().write_save_file(&config.save) {
        error!("failed to write save file: {}", err);
    }

    result
}
