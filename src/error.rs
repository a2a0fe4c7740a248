use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartridgeError {
    #[error("header should be at least 336 bytes, was {len} bytes")]
    HeaderTooShort { len: usize },
    #[error("header declares {declared} bytes of ROM, image has {actual}")]
    RomTooShort { declared: usize, actual: usize },
    #[error("unsupported mapper byte in cartridge header: {0:#04X}")]
    UnsupportedMapper(u8),
    #[error("invalid ROM size code in cartridge header: {0:#04X}")]
    InvalidRomSize(u8),
    #[error("error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CpuError {
    #[error("undefined opcode {opcode:#04X} at {pc:#06X}")]
    UndefinedOpcode { opcode: u8, pc: u16 },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("usage: dotboy <ROM> [--save PATH] [--scale N] [--sample-rate HZ] [--volume 0-100] [--lenient] [--palette HEX,HEX,HEX,HEX]")]
    MissingRom,
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },
}
