use std::path::PathBuf;

use crate::apu::SAMPLE_RATES;
use crate::error::ConfigError;
use crate::gameboy::Options;
use crate::ppu::DEFAULT_PALETTE;

const SCALES: [usize; 4] = [1, 2, 4, 8];

/// Player configuration taken from the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub rom: PathBuf,
    /// Battery RAM file, the ROM path with a `.sav` extension unless given.
    pub save: PathBuf,
    pub scale: usize,
    /// Requested output rate, the audio device may override it.
    pub sample_rate: u32,
    /// Output gain in percent.
    pub volume: u8,
    pub strict: bool,
    pub palette: [u32; 4],
}

impl Config {
    /// Parses the arguments that follow the program name.
    pub fn from_args<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut rom = None;
        let mut save = None;
        let mut scale = 4;
        let mut sample_rate = 44_100;
        let mut volume = 50;
        let mut strict = true;
        let mut palette = DEFAULT_PALETTE;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--lenient" => strict = false,
                "--save" => save = Some(PathBuf::from(value(&arg, args.next())?)),
                "--scale" => {
                    let raw = value(&arg, args.next())?;
                    scale = raw
                        .parse()
                        .ok()
                        .filter(|scale| SCALES.contains(scale))
                        .ok_or_else(|| invalid(&arg, &raw))?;
                }
                "--sample-rate" => {
                    let raw = value(&arg, args.next())?;
                    sample_rate = raw
                        .parse()
                        .ok()
                        .filter(|rate| SAMPLE_RATES.contains(rate))
                        .ok_or_else(|| invalid(&arg, &raw))?;
                }
                "--volume" => {
                    let raw = value(&arg, args.next())?;
                    volume = raw
                        .parse()
                        .ok()
                        .filter(|volume| *volume <= 100)
                        .ok_or_else(|| invalid(&arg, &raw))?;
                }
                "--palette" => {
                    let raw = value(&arg, args.next())?;
                    palette = parse_palette(&raw).ok_or_else(|| invalid(&arg, &raw))?;
                }
                flag if flag.starts_with("--") => {
                    return Err(ConfigError::UnknownArgument(arg));
                }
                _ if rom.is_none() => rom = Some(PathBuf::from(arg)),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        let rom = rom.ok_or(ConfigError::MissingRom)?;
        let save = save.unwrap_or_else(|| rom.with_extension("sav"));

        Ok(Self {
            rom,
            save,
            scale,
            sample_rate,
            volume,
            strict,
            palette,
        })
    }

    /// Emulation settings, with the sample rate the audio device actually runs at.
    pub fn options(&self, sample_rate: u32) -> Options {
        Options {
            strict: self.strict,
            sample_rate,
            palette: self.palette,
        }
    }
}

fn value(flag: &str, next: Option<String>) -> Result<String, ConfigError> {
    next.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn invalid(flag: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    }
}

// four RGB hex colors, lightest first, e.g. "E0F8D0,88C070,346856,081820"
fn parse_palette(raw: &str) -> Option<[u32; 4]> {
    let mut palette = [0; 4];
    let mut parts = raw.split(',');
    for color in palette.iter_mut() {
        let part = parts.next()?.trim();
        let hex = part.trim_start_matches('#').trim_start_matches("0x");
        if hex.len() != 6 {
            return None;
        }
        *color = u32::from_str_radix(hex, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(palette)
}
