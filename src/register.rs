use crate::util::{high_byte, low_byte, make_word};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flags {
    Zero,      // set if last operation produced 0, used by conditional jumps
    Subtract,  // set if last operation was subtraction, consumed by DAA
    HalfCarry, // set if lower half of the byte overflowed in last operation
    Carry,     // set if last operation produced result over 255 or under 0
}

impl From<Flags> for u8 {
    fn from(flags: Flags) -> u8 {
        match flags {
            Flags::Zero => 0x80,
            Flags::Subtract => 0x40,
            Flags::HalfCarry => 0x20,
            Flags::Carry => 0x10,
        }
    }
}

/// Builds an F register value from the four flag states.
pub fn flags(zero: bool, subtract: bool, half_carry: bool, carry: bool) -> u8 {
    let mut f = 0;
    if zero {
        f |= u8::from(Flags::Zero);
    }
    if subtract {
        f |= u8::from(Flags::Subtract);
    }
    if half_carry {
        f |= u8::from(Flags::HalfCarry);
    }
    if carry {
        f |= u8::from(Flags::Carry);
    }
    f
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    // 8-bit registers
    pub a: u8,
    f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    // 16-bit registers
    pub sp: u16,
    pub pc: u16,
}

impl Register {
    /// Register state left behind by the boot ROM.
    pub fn new() -> Self {
        Self {
            a: 0x01,
            f: 0xB0,
            b: 0x00,
            c: 0x13,
            d: 0x00,
            e: 0xD8,
            h: 0x01,
            l: 0x4D,
            sp: 0xFFFE,
            // when the gameboy powers up, pc is set to 0x0100
            // and instruction found at that location in the ROM is run.
            pc: 0x0100,
        }
    }

    pub fn f(&self) -> u8 {
        self.f
    }

    // the low nibble of F does not exist in hardware
    pub fn set_f(&mut self, value: u8) {
        self.f = value & 0xF0;
    }

    pub fn flag(&self, flag: Flags) -> bool {
        self.f & u8::from(flag) != 0
    }

    pub fn set_flag(&mut self, flag: Flags, on: bool) {
        if on {
            self.f |= u8::from(flag);
        } else {
            self.f &= !u8::from(flag);
        }
    }

    pub fn get_af(&self) -> u16 {
        make_word(self.a, self.f)
    }

    pub fn set_af(&mut self, value: u16) {
        self.a = high_byte(value);
        self.set_f(low_byte(value));
    }

    pub fn get_bc(&self) -> u16 {
        make_word(self.b, self.c)
    }

    pub fn set_bc(&mut self, value: u16) {
        self.b = high_byte(value);
        self.c = low_byte(value);
    }

    pub fn get_de(&self) -> u16 {
        make_word(self.d, self.e)
    }

    pub fn set_de(&mut self, value: u16) {
        self.d = high_byte(value);
        self.e = low_byte(value);
    }

    pub fn get_hl(&self) -> u16 {
        make_word(self.h, self.l)
    }

    pub fn set_hl(&mut self, value: u16) {
        self.h = high_byte(value);
        self.l = low_byte(value);
    }
}

impl Default for Register {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_values() {
        let reg = Register::new();

        assert_eq!(0x01B0, reg.get_af());
        assert_eq!(0x0013, reg.get_bc());
        assert_eq!(0x00D8, reg.get_de());
        assert_eq!(0x014D, reg.get_hl());
        assert_eq!(0xFFFE, reg.sp);
        assert_eq!(0x0100, reg.pc);
    }

    #[test]
    fn test_pairs_compose_bytes() {
        let mut reg = Register::new();

        reg.set_de(0xBEEF);

        assert_eq!(0xBE, reg.d);
        assert_eq!(0xEF, reg.e);
        assert_eq!(0xBEEF, reg.get_de());
    }

    #[test]
    fn test_f_low_nibble_always_zero() {
        let mut reg = Register::new();

        reg.set_af(0x12FF);

        assert_eq!(0x12F0, reg.get_af());
        assert_eq!(0xF0, reg.f());
    }

    #[test]
    fn test_flag_accessors() {
        let mut reg = Register::new();
        reg.set_f(0);

        reg.set_flag(Flags::HalfCarry, true);
        reg.set_flag(Flags::Carry, true);
        reg.set_flag(Flags::Carry, false);

        assert!(reg.flag(Flags::HalfCarry));
        assert!(!reg.flag(Flags::Carry));
        assert_eq!(flags(false, false, true, false), reg.f());
    }
}
