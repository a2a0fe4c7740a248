use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};

use crate::error::CartridgeError;

const HEADER_END: usize = 0x150;
const TITLE_START: usize = 0x134;
const TITLE_END: usize = 0x143;
const CARTRIDGE_TYPE: usize = 0x147;
const ROM_SIZE: usize = 0x148;
const RAM_SIZE: usize = 0x149;
const HEADER_CHECKSUM: usize = 0x14D;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const MBC2_RAM_SIZE: usize = 0x200;

// real time clock registers of the MBC3, selected through RAM bank values 0x08-0x0C
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rtc {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day_low: u8,
    // bit 0: day counter bit 8, bit 6: halt, bit 7: day counter carry
    pub day_high: u8,
}

impl Rtc {
    fn latch(&mut self, now: NaiveDateTime) {
        let day = now.ordinal0() as u16;
        self.seconds = now.second() as u8;
        self.minutes = now.minute() as u8;
        self.hours = now.hour() as u8;
        self.day_low = (day & 0xFF) as u8;
        self.day_high = (self.day_high & 0xFE) | ((day >> 8) & 0x01) as u8;
    }

    fn read(&self, select: u8) -> u8 {
        match select {
            0x08 => self.seconds,
            0x09 => self.minutes,
            0x0A => self.hours,
            0x0B => self.day_low,
            0x0C => self.day_high,
            _ => 0xFF,
        }
    }

    fn write(&mut self, select: u8, value: u8) {
        match select {
            0x08 => self.seconds = value & 0x3F,
            0x09 => self.minutes = value & 0x3F,
            0x0A => self.hours = value & 0x1F,
            0x0B => self.day_low = value,
            0x0C => self.day_high = value & 0xC1,
            _ => {}
        }
    }
}

// memory bank controller state, picked once from the header byte at load time
#[derive(Clone, Debug, PartialEq, Eq)]
enum Mbc {
    RomOnly,
    Mbc1 {
        ram_enabled: bool,
        rom_bank_low: u8,
        bank_high: u8,
        banking_mode: u8,
    },
    Mbc2 {
        ram_enabled: bool,
        rom_bank: u8,
    },
    Mbc3 {
        ram_enabled: bool,
        rom_bank: u8,
        ram_select: u8,
        latch: u8,
        rtc: Rtc,
    },
    Mbc5 {
        ram_enabled: bool,
        rom_bank: u16,
        ram_bank: u8,
    },
}

impl Mbc {
    fn from_header(cartridge_type: u8) -> Result<Self, CartridgeError> {
        match cartridge_type {
            0x00 => Ok(Mbc::RomOnly),
            0x01..=0x03 => Ok(Mbc::Mbc1 {
                ram_enabled: false,
                rom_bank_low: 1,
                bank_high: 0,
                banking_mode: 0,
            }),
            0x05 | 0x06 => Ok(Mbc::Mbc2 {
                ram_enabled: false,
                rom_bank: 1,
            }),
            0x0F..=0x13 => Ok(Mbc::Mbc3 {
                ram_enabled: false,
                rom_bank: 1,
                ram_select: 0,
                latch: 0xFF,
                rtc: Rtc::default(),
            }),
            0x19..=0x1E => Ok(Mbc::Mbc5 {
                ram_enabled: false,
                rom_bank: 1,
                ram_bank: 0,
            }),
            other => Err(CartridgeError::UnsupportedMapper(other)),
        }
    }
}

pub struct Cartridge {
    title: String,
    ctype: &'static str,
    rom_banks: usize,
    checksum: u8,
    header_checksum: u8,
    battery: bool,
    mbc: Mbc,
    rom: Vec<u8>,
    ram: Vec<u8>,
}

impl Cartridge {
    pub fn from_path(path: &Path) -> Result<Self, CartridgeError> {
        let data = fs::read(path).map_err(|source| CartridgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("{:?} loaded, {} bytes", path, data.len());
        Self::from_bytes(data)
    }

    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_END {
            return Err(CartridgeError::HeaderTooShort { len: rom.len() });
        }

        let cartridge_type = rom[CARTRIDGE_TYPE];
        let mbc = Mbc::from_header(cartridge_type)?;

        let rom_size_code = rom[ROM_SIZE];
        if rom_size_code > 0x08 {
            return Err(CartridgeError::InvalidRomSize(rom_size_code));
        }
        // banks = 2^(n+1)
        let rom_banks = 2usize << rom_size_code;
        if rom.len() < rom_banks * ROM_BANK_SIZE {
            return Err(CartridgeError::RomTooShort {
                declared: rom_banks * ROM_BANK_SIZE,
                actual: rom.len(),
            });
        }

        let ram_size = match mbc {
            Mbc::RomOnly => 0,
            Mbc::Mbc2 { .. } => MBC2_RAM_SIZE,
            _ => ram_size_bytes(rom[RAM_SIZE]),
        };

        let cartridge = Self {
            title: title(&rom),
            ctype: cartridge_type_name(cartridge_type),
            rom_banks,
            checksum: header_checksum(&rom),
            header_checksum: rom[HEADER_CHECKSUM],
            battery: matches!(
                cartridge_type,
                0x03 | 0x06 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
            ),
            mbc,
            rom,
            ram: vec![0; ram_size],
        };

        log::info!("{}", cartridge);
        if cartridge.checksum != cartridge.header_checksum {
            log::warn!(
                "header checksum mismatch: computed {:#04X}, header says {:#04X}",
                cartridge.checksum,
                cartridge.header_checksum
            );
        }

        Ok(cartridge)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn has_battery(&self) -> bool {
        self.battery
    }

    pub fn read_low_rom(&self, addr: u16) -> u8 {
        let bank = match self.mbc {
            Mbc::Mbc1 {
                bank_high,
                banking_mode: 1,
                ..
            } => (bank_high as usize) << 5,
            _ => 0,
        };
        self.rom_byte(bank, addr)
    }

    pub fn read_high_rom(&self, addr: u16) -> u8 {
        let bank = match self.mbc {
            Mbc::RomOnly => 1,
            Mbc::Mbc1 {
                rom_bank_low,
                bank_high,
                ..
            } => (bank_high as usize) << 5 | rom_bank_low as usize,
            Mbc::Mbc2 { rom_bank, .. } => rom_bank as usize,
            Mbc::Mbc3 { rom_bank, .. } => rom_bank as usize,
            Mbc::Mbc5 { rom_bank, .. } => rom_bank as usize,
        };
        self.rom_byte(bank, addr)
    }

    // writes into the ROM area never change ROM, they drive the bank registers
    pub fn write_rom(&mut self, addr: u16, value: u8) {
        match &mut self.mbc {
            Mbc::RomOnly => {}
            Mbc::Mbc1 {
                ram_enabled,
                rom_bank_low,
                bank_high,
                banking_mode,
            } => match addr {
                0x0000..=0x1FFF => *ram_enabled = value & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    // bank 0 is not selectable, the hardware maps it to bank 1
                    *rom_bank_low = match value & 0x1F {
                        0 => 1,
                        bank => bank,
                    };
                }
                0x4000..=0x5FFF => *bank_high = value & 0x03,
                _ => *banking_mode = value & 0x01,
            },
            Mbc::Mbc2 {
                ram_enabled,
                rom_bank,
            } => {
                if addr < 0x4000 {
                    if addr & 0x0100 == 0 {
                        *ram_enabled = value & 0x0F == 0x0A;
                    } else {
                        *rom_bank = match value & 0x0F {
                            0 => 1,
                            bank => bank,
                        };
                    }
                }
            }
            Mbc::Mbc3 {
                ram_enabled,
                rom_bank,
                ram_select,
                latch,
                rtc,
            } => match addr {
                0x0000..=0x1FFF => *ram_enabled = value & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    *rom_bank = match value & 0x7F {
                        0 => 1,
                        bank => bank,
                    };
                }
                0x4000..=0x5FFF => *ram_select = value,
                _ => {
                    if *latch == 0x00 && value == 0x01 {
                        rtc.latch(Local::now().naive_local());
                    }
                    *latch = value;
                }
            },
            Mbc::Mbc5 {
                ram_enabled,
                rom_bank,
                ram_bank,
            } => match addr {
                0x0000..=0x1FFF => *ram_enabled = value & 0x0F == 0x0A,
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | value as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0xFF) | ((value as u16 & 0x01) << 8),
                0x4000..=0x5FFF => *ram_bank = value & 0x0F,
                _ => {}
            },
        }
    }

    pub fn read_ram(&self, addr: u16) -> u8 {
        match self.mbc {
            Mbc::RomOnly => 0xFF,
            Mbc::Mbc1 {
                ram_enabled: true,
                bank_high,
                banking_mode,
                ..
            } => {
                let bank = if banking_mode == 1 { bank_high } else { 0 };
                self.ram_byte(bank as usize, addr)
            }
            Mbc::Mbc2 {
                ram_enabled: true, ..
            } => 0xF0 | self.ram[addr as usize & (MBC2_RAM_SIZE - 1)],
            Mbc::Mbc3 {
                ram_enabled: true,
                ram_select,
                rtc,
                ..
            } => match ram_select {
                0x00..=0x03 => self.ram_byte(ram_select as usize, addr),
                _ => rtc.read(ram_select),
            },
            Mbc::Mbc5 {
                ram_enabled: true,
                ram_bank,
                ..
            } => self.ram_byte(ram_bank as usize, addr),
            _ => 0xFF,
        }
    }

    pub fn write_ram(&mut self, addr: u16, value: u8) {
        match self.mbc {
            Mbc::Mbc1 {
                ram_enabled: true,
                bank_high,
                banking_mode,
                ..
            } => {
                let bank = if banking_mode == 1 { bank_high } else { 0 };
                self.set_ram_byte(bank as usize, addr, value);
            }
            Mbc::Mbc2 {
                ram_enabled: true, ..
            } => self.ram[addr as usize & (MBC2_RAM_SIZE - 1)] = value & 0x0F,
            Mbc::Mbc3 {
                ram_enabled: true,
                ram_select,
                ref mut rtc,
                ..
            } => match ram_select {
                0x00..=0x03 => self.set_ram_byte(ram_select as usize, addr, value),
                _ => rtc.write(ram_select, value),
            },
            Mbc::Mbc5 {
                ram_enabled: true,
                ram_bank,
                ..
            } => self.set_ram_byte(ram_bank as usize, addr, value),
            _ => {}
        }
    }

    /// Restores battery RAM. Short images are zero padded, long ones truncated.
    pub fn load_ram(&mut self, data: &[u8]) {
        if !self.battery {
            return;
        }
        if data.len() != self.ram.len() {
            log::warn!(
                "save size {} does not match cartridge RAM size {}, adjusting",
                data.len(),
                self.ram.len()
            );
        }
        let len = data.len().min(self.ram.len());
        self.ram[..len].copy_from_slice(&data[..len]);
        self.ram[len..].fill(0);
    }

    /// Battery RAM contents, `None` for cartridges that do not persist RAM.
    pub fn save_ram(&self) -> Option<&[u8]> {
        if self.battery && !self.ram.is_empty() {
            Some(&self.ram)
        } else {
            None
        }
    }

    pub fn load_save_file(&mut self, path: &Path) {
        if self.save_ram().is_none() {
            return;
        }
        match fs::read(path) {
            Ok(data) => {
                log::info!("loaded save data from {}", path.display());
                self.load_ram(&data);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::info!("no save file at {}, starting with empty RAM", path.display());
            }
            Err(err) => {
                log::warn!("could not read save file {}: {}", path.display(), err);
            }
        }
    }

    pub fn write_save_file(&self, path: &Path) -> Result<(), CartridgeError> {
        let Some(ram) = self.save_ram() else {
            return Ok(());
        };
        fs::write(path, ram).map_err(|source| CartridgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("saved {} bytes to {}", ram.len(), path.display());
        Ok(())
    }

    fn rom_byte(&self, bank: usize, addr: u16) -> u8 {
        // bank counts are powers of two, so masking wraps to the physical banks
        let bank = bank & (self.rom_banks - 1);
        self.rom
            .get(bank * ROM_BANK_SIZE + (addr as usize & (ROM_BANK_SIZE - 1)))
            .copied()
            .unwrap_or(0xFF)
    }

    fn ram_offset(&self, bank: usize, addr: u16) -> Option<usize> {
        if self.ram.is_empty() {
            return None;
        }
        let offset = bank * RAM_BANK_SIZE + (addr as usize & (RAM_BANK_SIZE - 1));
        Some(offset % self.ram.len())
    }

    fn ram_byte(&self, bank: usize, addr: u16) -> u8 {
        match self.ram_offset(bank, addr) {
            Some(offset) => self.ram[offset],
            None => 0xFF,
        }
    }

    fn set_ram_byte(&mut self, bank: usize, addr: u16, value: u8) {
        if let Some(offset) = self.ram_offset(bank, addr) {
            self.ram[offset] = value;
        }
    }

    #[cfg(test)]
    fn latch_rtc_at(&mut self, now: NaiveDateTime) {
        if let Mbc::Mbc3 { rtc, .. } = &mut self.mbc {
            rtc.latch(now);
        }
    }
}

// title of the game in upper case ascii
fn title(rom: &[u8]) -> String {
    rom[TITLE_START..=TITLE_END]
        .iter()
        .take_while(|&&byte| byte != 0)
        .filter(|byte| byte.is_ascii_graphic() || **byte == b' ')
        .map(|&byte| byte as char)
        .collect()
}

// Size of external ram in cartridge if present
fn ram_size_bytes(code: u8) -> usize {
    match code {
        0x00 => 0,
        0x01 => 0x800,
        0x02 => 0x2000,
        0x03 => 0x8000,
        0x04 => 0x20000,
        0x05 => 0x10000,
        _ => {
            log::warn!("unknown RAM size code {:#04X}, assuming no RAM", code);
            0
        }
    }
}

// Calculate checksum based on header bytes 0x0134 - 0x014C
// if byte at 0x014D does not match lower 8 bits of x, boot rom lock up
fn header_checksum(rom: &[u8]) -> u8 {
    rom[0x0134..=0x014C]
        .iter()
        .fold(0u8, |x, &byte| x.wrapping_sub(byte).wrapping_sub(1))
}

// Specifies which Memory Bank Controller is used in the cartridge and what other external
// hardware is available
fn cartridge_type_name(code: u8) -> &'static str {
    match code {
        0x00 => "ROM ONLY",
        0x01 => "MBC1",
        0x02 => "MBC1+RAM",
        0x03 => "MBC1+RAM+BATTERY",
        0x05 => "MBC2",
        0x06 => "MBC2+BATTERY",
        0x0F => "MBC3+TIMER+BATTERY",
        0x10 => "MBC3+TIMER+RAM+BATTERY",
        0x11 => "MBC3",
        0x12 => "MBC3+RAM",
        0x13 => "MBC3+RAM+BATTERY",
        0x19 => "MBC5",
        0x1A => "MBC5+RAM",
        0x1B => "MBC5+RAM+BATTERY",
        0x1C => "MBC5+RUMBLE",
        0x1D => "MBC5+RUMBLE+RAM",
        0x1E => "MBC5+RUMBLE+RAM+BATTERY",
        _ => "UNKNOWN",
    }
}

impl fmt::Display for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Title: {} | Type: {} | ROM: {} KByte | RAM: {} KByte | Checksum: {:#04X} {}",
            self.title,
            self.ctype,
            self.rom_banks * ROM_BANK_SIZE / 1024,
            self.ram.len() / 1024,
            self.checksum,
            if self.checksum == self.header_checksum {
                "PASSED"
            } else {
                "FAILED"
            }
        )
    }
}
