use log::warn;

use crate::error::CpuError;
use crate::mmu::{Interrupt, Mmu};
use crate::register::{flags, Flags, Register};
use crate::util;

// memory interface can address up to 65536 bytes (16-bit bus)
// programs are accessed through the same address bus as normal memory
// instruction size can be between one and three bytes

// timings assume a CPU frequency of 4.19 MHz, called "T-states"
// because timings are divisible by 4 many specify timings and clock frequency divided by 4, called "M-cycles"
// everything here counts T-states

// base cost of every opcode. conditional jumps, calls and returns list the not-taken
// cost, taking the branch adds TAKEN_* below. 0 marks an undefined opcode.
#[rustfmt::skip]
const CYCLES: [u8; 256] = [
//  x0  x1  x2  x3  x4  x5  x6  x7  x8  x9  xA  xB  xC  xD  xE  xF
     4, 12,  8,  8,  4,  4,  8,  4, 20,  8,  8,  8,  4,  4,  8,  4, // 0x
     4, 12,  8,  8,  4,  4,  8,  4, 12,  8,  8,  8,  4,  4,  8,  4, // 1x
     8, 12,  8,  8,  4,  4,  8,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 2x
     8, 12,  8,  8, 12, 12, 12,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 3x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 4x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 5x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 6x
     8,  8,  8,  8,  8,  8,  4,  8,  4,  4,  4,  4,  4,  4,  8,  4, // 7x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 8x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 9x
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // Ax
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // Bx
     8, 12, 12, 16, 12, 16,  8, 16,  8, 16, 12,  4, 12, 24,  8, 16, // Cx
     8, 12, 12,  0, 12, 16,  8, 16,  8, 16, 12,  0, 12,  0,  8, 16, // Dx
    12, 12,  8,  0,  0, 16,  8, 16, 16,  4, 16,  0,  0,  0,  8, 16, // Ex
    12, 12,  8,  4,  0, 16,  8, 16, 12,  8, 16,  4,  0,  0,  8, 16, // Fx
];

const TAKEN_JR: u32 = 4;
const TAKEN_JP: u32 = 4;
const TAKEN_CALL: u32 = 12;
const TAKEN_RET: u32 = 12;

// dispatching an interrupt takes 5 M-cycles
const INTERRUPT_CYCLES: u32 = 20;
// a halted CPU still burns one M-cycle per step
const HALT_CYCLES: u32 = 4;

// register index used by the opcode encoding, 6 is the byte at (HL)
const HL_INDIRECT: u8 = 6;

pub struct Cpu {
    pub reg: Register,
    // interrupt master enable
    ime: bool,
    // EI enables interrupts after the following instruction
    ei_pending: bool,
    halted: bool,
    // the next opcode fetch does not advance PC
    halt_bug: bool,
    // stop on undefined opcodes instead of treating them as NOP
    strict: bool,
}

impl Cpu {
    pub fn new(strict: bool) -> Self {
        Self {
            reg: Register::new(),
            ime: false,
            ei_pending: false,
            halted: false,
            halt_bug: false,
            strict,
        }
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Runs one instruction and returns the cycles it took.
    pub fn execute(&mut self, mmu: &mut Mmu) -> Result<u32, CpuError> {
        if self.halted {
            // any enabled interrupt wakes the CPU, even with IME clear
            if mmu.pending_interrupts() != 0 {
                self.halted = false;
            }
            return Ok(HALT_CYCLES);
        }

        let enable_interrupts = std::mem::take(&mut self.ei_pending);
        let pc = self.reg.pc;
        let opcode = self.fetch_opcode(mmu);
        let cycles = self.dispatch(opcode, pc, mmu)?;

        // EI immediately followed by DI never enables interrupts
        if enable_interrupts && opcode != 0xF3 {
            self.ime = true;
        }

        Ok(cycles)
    }

    /// Dispatches the highest priority pending interrupt, returns the cycles spent.
    pub fn handle_interrupts(&mut self, mmu: &mut Mmu) -> u32 {
        let pending = mmu.pending_interrupts();
        if pending == 0 || !self.ime {
            return 0;
        }

        for interrupt in Interrupt::ALL {
            if pending & interrupt.mask() != 0 {
                self.ime = false;
                self.halted = false;
                mmu.clear_interrupt(interrupt);
                let pc = self.reg.pc;
                self.push(mmu, pc);
                self.reg.pc = interrupt.vector();
                return INTERRUPT_CYCLES;
            }
        }

        0
    }

    fn fetch_opcode(&mut self, mmu: &Mmu) -> u8 {
        let opcode = mmu.read_byte(self.reg.pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.reg.pc = self.reg.pc.wrapping_add(1);
        }
        opcode
    }

    fn fetch_byte(&mut self, mmu: &Mmu) -> u8 {
        let value = mmu.read_byte(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self, mmu: &Mmu) -> u16 {
        let value = mmu.read_word(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(2);
        value
    }

    fn push(&mut self, mmu: &mut Mmu, value: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(2);
        mmu.write_word(self.reg.sp, value);
    }

    fn pop(&mut self, mmu: &Mmu) -> u16 {
        let value = mmu.read_word(self.reg.sp);
        self.reg.sp = self.reg.sp.wrapping_add(2);
        value
    }

    // B, C, D, E, H, L, (HL), A
    fn read_r8(&self, index: u8, mmu: &Mmu) -> u8 {
        match index {
            0 => self.reg.b,
            1 => self.reg.c,
            2 => self.reg.d,
            3 => self.reg.e,
            4 => self.reg.h,
            5 => self.reg.l,
            HL_INDIRECT => mmu.read_byte(self.reg.get_hl()),
            _ => self.reg.a,
        }
    }

    fn write_r8(&mut self, index: u8, value: u8, mmu: &mut Mmu) {
        match index {
            0 => self.reg.b = value,
            1 => self.reg.c = value,
            2 => self.reg.d = value,
            3 => self.reg.e = value,
            4 => self.reg.h = value,
            5 => self.reg.l = value,
            HL_INDIRECT => mmu.write_byte(self.reg.get_hl(), value),
            _ => self.reg.a = value,
        }
    }

    // BC, DE, HL, SP
    fn read_r16(&self, index: u8) -> u16 {
        match index & 0x03 {
            0 => self.reg.get_bc(),
            1 => self.reg.get_de(),
            2 => self.reg.get_hl(),
            _ => self.reg.sp,
        }
    }

    fn write_r16(&mut self, index: u8, value: u16) {
        match index & 0x03 {
            0 => self.reg.set_bc(value),
            1 => self.reg.set_de(value),
            2 => self.reg.set_hl(value),
            _ => self.reg.sp = value,
        }
    }

    // NZ, Z, NC, C encoded in bits 3-4 of the opcode
    fn condition(&self, opcode: u8) -> bool {
        match (opcode >> 3) & 0x03 {
            0 => !self.reg.flag(Flags::Zero),
            1 => self.reg.flag(Flags::Zero),
            2 => !self.reg.flag(Flags::Carry),
            _ => self.reg.flag(Flags::Carry),
        }
    }

    // ADD, ADC, SUB, SBC, AND, XOR, OR, CP
    fn alu(&mut self, operation: u8, value: u8) {
        let a = self.reg.a;
        let carry = self.reg.flag(Flags::Carry);
        let (result, f) = match operation {
            0 => add8(a, value, false),
            1 => add8(a, value, carry),
            2 => sub8(a, value, false),
            3 => sub8(a, value, carry),
            4 => logic8(a & value, true),
            5 => logic8(a ^ value, false),
            6 => logic8(a | value, false),
            _ => (a, sub8(a, value, false).1),
        };
        self.reg.a = result;
        self.reg.set_f(f);
    }

    fn dispatch(&mut self, opcode: u8, pc: u16, mmu: &mut Mmu) -> Result<u32, CpuError> {
        let mut cycles = CYCLES[opcode as usize] as u32;

        match opcode {
            // NOP
            0x00 => {}
            // STOP, the second byte is padding
            0x10 => {
                self.fetch_byte(mmu);
            }
            // LD rr,d16
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch_word(mmu);
                self.write_r16(opcode >> 4, value);
            }
            // LD (BC),A and LD (DE),A
            0x02 | 0x12 => mmu.write_byte(self.read_r16(opcode >> 4), self.reg.a),
            // LD (HL+),A
            0x22 => {
                let hl = self.reg.get_hl();
                mmu.write_byte(hl, self.reg.a);
                self.reg.set_hl(hl.wrapping_add(1));
            }
            // LD (HL-),A
            0x32 => {
                let hl = self.reg.get_hl();
                mmu.write_byte(hl, self.reg.a);
                self.reg.set_hl(hl.wrapping_sub(1));
            }
            // LD A,(BC) and LD A,(DE)
            0x0A | 0x1A => self.reg.a = mmu.read_byte(self.read_r16(opcode >> 4)),
            // LD A,(HL+)
            0x2A => {
                let hl = self.reg.get_hl();
                self.reg.a = mmu.read_byte(hl);
                self.reg.set_hl(hl.wrapping_add(1));
            }
            // LD A,(HL-)
            0x3A => {
                let hl = self.reg.get_hl();
                self.reg.a = mmu.read_byte(hl);
                self.reg.set_hl(hl.wrapping_sub(1));
            }
            // INC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let value = self.read_r16(opcode >> 4).wrapping_add(1);
                self.write_r16(opcode >> 4, value);
            }
            // DEC rr
            0x0B | 0x1B | 0x2B | 0x3B => {
                let value = self.read_r16(opcode >> 4).wrapping_sub(1);
                self.write_r16(opcode >> 4, value);
            }
            // ADD HL,rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let (result, f) =
                    add16(self.reg.get_hl(), self.read_r16(opcode >> 4), self.reg.f());
                self.reg.set_hl(result);
                self.reg.set_f(f);
            }
            // INC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let index = (opcode >> 3) & 0x07;
                let (result, f) = inc8(self.read_r8(index, mmu), self.reg.f());
                self.write_r8(index, result, mmu);
                self.reg.set_f(f);
            }
            // DEC r
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let index = (opcode >> 3) & 0x07;
                let (result, f) = dec8(self.read_r8(index, mmu), self.reg.f());
                self.write_r8(index, result, mmu);
                self.reg.set_f(f);
            }
            // LD r,d8
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let value = self.fetch_byte(mmu);
                self.write_r8((opcode >> 3) & 0x07, value, mmu);
            }
            // RLCA, RRCA, RLA, RRA always clear Z
            0x07 | 0x0F | 0x17 | 0x1F => {
                let carry = self.reg.flag(Flags::Carry);
                let (result, f) = shift((opcode >> 3) & 0x03, self.reg.a, carry);
                self.reg.a = result;
                self.reg.set_f(f & !u8::from(Flags::Zero));
            }
            // LD (a16),SP
            0x08 => {
                let addr = self.fetch_word(mmu);
                mmu.write_word(addr, self.reg.sp);
            }
            // JR r8
            0x18 => {
                let offset = self.fetch_byte(mmu) as i8;
                self.reg.pc = self.reg.pc.wrapping_add(offset as u16);
            }
            // JR cc,r8
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch_byte(mmu) as i8;
                if self.condition(opcode) {
                    self.reg.pc = self.reg.pc.wrapping_add(offset as u16);
                    cycles += TAKEN_JR;
                }
            }
            // DAA
            0x27 => {
                let (result, f) = daa(self.reg.a, self.reg.f());
                self.reg.a = result;
                self.reg.set_f(f);
            }
            // CPL
            0x2F => {
                self.reg.a = !self.reg.a;
                self.reg.set_flag(Flags::Subtract, true);
                self.reg.set_flag(Flags::HalfCarry, true);
            }
            // SCF
            0x37 => {
                self.reg.set_flag(Flags::Subtract, false);
                self.reg.set_flag(Flags::HalfCarry, false);
                self.reg.set_flag(Flags::Carry, true);
            }
            // CCF
            0x3F => {
                let carry = self.reg.flag(Flags::Carry);
                self.reg.set_flag(Flags::Subtract, false);
                self.reg.set_flag(Flags::HalfCarry, false);
                self.reg.set_flag(Flags::Carry, !carry);
            }
            // HALT
            0x76 => {
                if !self.ime && mmu.pending_interrupts() != 0 {
                    self.halt_bug = true;
                } else {
                    self.halted = true;
                }
            }
            // LD r,r'
            0x40..=0x7F => {
                let value = self.read_r8(opcode & 0x07, mmu);
                self.write_r8((opcode >> 3) & 0x07, value, mmu);
            }
            // ALU A,r
            0x80..=0xBF => {
                let value = self.read_r8(opcode & 0x07, mmu);
                self.alu((opcode >> 3) & 0x07, value);
            }
            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                if self.condition(opcode) {
                    self.reg.pc = self.pop(mmu);
                    cycles += TAKEN_RET;
                }
            }
            // RET
            0xC9 => self.reg.pc = self.pop(mmu),
            // RETI
            0xD9 => {
                self.reg.pc = self.pop(mmu);
                self.ime = true;
            }
            // POP rr
            0xC1 | 0xD1 | 0xE1 => {
                let value = self.pop(mmu);
                self.write_r16((opcode >> 4) & 0x03, value);
            }
            // POP AF
            0xF1 => {
                let value = self.pop(mmu);
                self.reg.set_af(value);
            }
            // PUSH rr
            0xC5 | 0xD5 | 0xE5 => {
                let value = self.read_r16((opcode >> 4) & 0x03);
                self.push(mmu, value);
            }
            // PUSH AF
            0xF5 => {
                let value = self.reg.get_af();
                self.push(mmu, value);
            }
            // JP cc,a16
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch_word(mmu);
                if self.condition(opcode) {
                    self.reg.pc = addr;
                    cycles += TAKEN_JP;
                }
            }
            // JP a16
            0xC3 => self.reg.pc = self.fetch_word(mmu),
            // JP HL
            0xE9 => self.reg.pc = self.reg.get_hl(),
            // CALL cc,a16
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch_word(mmu);
                if self.condition(opcode) {
                    let ret = self.reg.pc;
                    self.push(mmu, ret);
                    self.reg.pc = addr;
                    cycles += TAKEN_CALL;
                }
            }
            // CALL a16
            0xCD => {
                let addr = self.fetch_word(mmu);
                let ret = self.reg.pc;
                self.push(mmu, ret);
                self.reg.pc = addr;
            }
            // ALU A,d8
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.fetch_byte(mmu);
                self.alu((opcode >> 3) & 0x07, value);
            }
            // RST
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let ret = self.reg.pc;
                self.push(mmu, ret);
                self.reg.pc = (opcode & 0x38) as u16;
            }
            // prefix for the extended table
            0xCB => cycles += self.execute_cb(mmu),
            // LDH (a8),A
            0xE0 => {
                let addr = 0xFF00 | self.fetch_byte(mmu) as u16;
                mmu.write_byte(addr, self.reg.a);
            }
            // LDH A,(a8)
            0xF0 => {
                let addr = 0xFF00 | self.fetch_byte(mmu) as u16;
                self.reg.a = mmu.read_byte(addr);
            }
            // LD (C),A
            0xE2 => mmu.write_byte(0xFF00 | self.reg.c as u16, self.reg.a),
            // LD A,(C)
            0xF2 => self.reg.a = mmu.read_byte(0xFF00 | self.reg.c as u16),
            // ADD SP,r8
            0xE8 => {
                let offset = self.fetch_byte(mmu) as i8;
                let (result, f) = add_sp(self.reg.sp, offset);
                self.reg.sp = result;
                self.reg.set_f(f);
            }
            // LD HL,SP+r8
            0xF8 => {
                let offset = self.fetch_byte(mmu) as i8;
                let (result, f) = add_sp(self.reg.sp, offset);
                self.reg.set_hl(result);
                self.reg.set_f(f);
            }
            // LD SP,HL
            0xF9 => self.reg.sp = self.reg.get_hl(),
            // LD (a16),A
            0xEA => {
                let addr = self.fetch_word(mmu);
                mmu.write_byte(addr, self.reg.a);
            }
            // LD A,(a16)
            0xFA => {
                let addr = self.fetch_word(mmu);
                self.reg.a = mmu.read_byte(addr);
            }
            // DI
            0xF3 => {
                self.ime = false;
                self.ei_pending = false;
            }
            // EI
            0xFB => self.ei_pending = true,
            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                if self.strict {
                    return Err(CpuError::UndefinedOpcode { opcode, pc });
                }
                warn!("undefined opcode {:#04X} at {:#06X}, executing as NOP", opcode, pc);
                cycles = 4;
            }
        }

        Ok(cycles)
    }

    // returns the cycles on top of the prefix byte
    fn execute_cb(&mut self, mmu: &mut Mmu) -> u32 {
        let opcode = self.fetch_byte(mmu);
        let index = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        let value = self.read_r8(index, mmu);

        match opcode >> 6 {
            // RLC, RRC, RL, RR, SLA, SRA, SWAP, SRL
            0 => {
                let (result, f) = shift(bit, value, self.reg.flag(Flags::Carry));
                self.write_r8(index, result, mmu);
                self.reg.set_f(f);
            }
            // BIT
            1 => {
                let f = flags(
                    !util::is_set(value, bit),
                    false,
                    true,
                    self.reg.flag(Flags::Carry),
                );
                self.reg.set_f(f);
            }
            // RES
            2 => self.write_r8(index, util::clear(value, bit), mmu),
            // SET
            _ => self.write_r8(index, util::set(value, bit), mmu),
        }

        match (index, opcode >> 6) {
            (HL_INDIRECT, 1) => 8,
            (HL_INDIRECT, _) => 12,
            _ => 4,
        }
    }
}

// flag arithmetic, every function returns the result and the new F register

fn add8(a: u8, b: u8, carry_in: bool) -> (u8, u8) {
    let c = carry_in as u8;
    let result = a.wrapping_add(b).wrapping_add(c);
    let half_carry = (a & 0x0F) + (b & 0x0F) + c > 0x0F;
    let carry = a as u16 + b as u16 + c as u16 > 0xFF;
    (result, flags(result == 0, false, half_carry, carry))
}

fn sub8(a: u8, b: u8, carry_in: bool) -> (u8, u8) {
    let c = carry_in as u8;
    let result = a.wrapping_sub(b).wrapping_sub(c);
    let half_carry = (a & 0x0F) < (b & 0x0F) + c;
    let carry = (a as u16) < b as u16 + c as u16;
    (result, flags(result == 0, true, half_carry, carry))
}

fn logic8(result: u8, half_carry: bool) -> (u8, u8) {
    (result, flags(result == 0, false, half_carry, false))
}

// carry is left untouched
fn inc8(value: u8, f: u8) -> (u8, u8) {
    let result = value.wrapping_add(1);
    let carry = f & u8::from(Flags::Carry) != 0;
    (result, flags(result == 0, false, value & 0x0F == 0x0F, carry))
}

fn dec8(value: u8, f: u8) -> (u8, u8) {
    let result = value.wrapping_sub(1);
    let carry = f & u8::from(Flags::Carry) != 0;
    (result, flags(result == 0, true, value & 0x0F == 0, carry))
}

// zero is left untouched, half carry comes out of bit 11
fn add16(hl: u16, value: u16, f: u8) -> (u16, u8) {
    let (result, carry) = hl.overflowing_add(value);
    let half_carry = (hl & 0x0FFF) + (value & 0x0FFF) > 0x0FFF;
    let zero = f & u8::from(Flags::Zero) != 0;
    (result, flags(zero, false, half_carry, carry))
}

// carries come from the low byte, Z and N are always cleared
fn add_sp(sp: u16, offset: i8) -> (u16, u8) {
    let unsigned = offset as u8 as u16;
    let result = sp.wrapping_add(offset as u16);
    let half_carry = (sp & 0x0F) + (unsigned & 0x0F) > 0x0F;
    let carry = (sp & 0xFF) + unsigned > 0xFF;
    (result, flags(false, false, half_carry, carry))
}

fn daa(a: u8, f: u8) -> (u8, u8) {
    let subtract = f & u8::from(Flags::Subtract) != 0;
    let half_carry = f & u8::from(Flags::HalfCarry) != 0;
    let mut carry = f & u8::from(Flags::Carry) != 0;

    let mut adjust = 0;
    let result = if subtract {
        if carry {
            adjust |= 0x60;
        }
        if half_carry {
            adjust |= 0x06;
        }
        a.wrapping_sub(adjust)
    } else {
        if carry || a > 0x99 {
            adjust |= 0x60;
            carry = true;
        }
        if half_carry || a & 0x0F > 0x09 {
            adjust |= 0x06;
        }
        a.wrapping_add(adjust)
    };

    (result, flags(result == 0, subtract, false, carry))
}

// RLC, RRC, RL, RR, SLA, SRA, SWAP, SRL
fn shift(operation: u8, value: u8, carry_in: bool) -> (u8, u8) {
    let (result, carry) = match operation {
        0 => (value.rotate_left(1), value & 0x80 != 0),
        1 => (value.rotate_right(1), value & 0x01 != 0),
        2 => (value << 1 | carry_in as u8, value & 0x80 != 0),
        3 => (value >> 1 | (carry_in as u8) << 7, value & 0x01 != 0),
        4 => (value << 1, value & 0x80 != 0),
        5 => (value >> 1 | (value & 0x80), value & 0x01 != 0),
        6 => (value.rotate_left(4), false),
        _ => (value >> 1, value & 0x01 != 0),
    };
    (result, flags(result == 0, false, false, carry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::tests::rom_image;
    use crate::cartridge::Cartridge;
    use crate::mmu::{INTERRUPT_ENABLE, INTERRUPT_FLAG};

    const PROGRAM_START: u16 = 0xC000;

    // loads `program` into work RAM and points PC at it
    fn setup(program: &[u8]) -> (Cpu, Mmu) {
        let cartridge = Cartridge::from_bytes(rom_image(0x00, 0x00, 0x00)).unwrap();
        let mut mmu = Mmu::new(cartridge, 44_100);
        mmu.write_byte(INTERRUPT_FLAG, 0x00);
        for (i, byte) in program.iter().enumerate() {
            mmu.write_byte(PROGRAM_START + i as u16, *byte);
        }
        let mut cpu = Cpu::new(true);
        cpu.reg.pc = PROGRAM_START;
        (cpu, mmu)
    }

    fn run(cpu: &mut Cpu, mmu: &mut Mmu, steps: usize) -> u32 {
        let mut cycles = 0;
        for _ in 0..steps {
            cycles = cpu.execute(mmu).unwrap();
        }
        cycles
    }

    #[test]
    fn test_nop() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0x00]);
        let expected_t_cycles = 4;
        let expected_pc = cpu.reg.pc + 1;

        // Act
        let cycles = cpu.execute(&mut mmu).unwrap();

        // Assert
        assert_eq!(expected_t_cycles, cycles);
        assert_eq!(expected_pc, cpu.reg.pc);
    }

    #[test]
    fn test_add_half_carry_without_carry() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x0F, 0xC6, 0x01]);
        let expected_t_cycles = 8;
        let expected_a = 0x10;
        let expected_f = flags(false, false, true, false);

        // Act
        let cycles = run(&mut cpu, &mut mmu, 2);

        // Assert
        assert_eq!(expected_t_cycles, cycles);
        assert_eq!(expected_a, cpu.reg.a);
        assert_eq!(expected_f, cpu.reg.f());
    }

    #[test]
    fn test_sub_borrow_sets_carry_and_half_carry() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x00, 0xD6, 0x01]);
        let expected_a = 0xFF;
        let expected_f = flags(false, true, true, true);

        // Act
        run(&mut cpu, &mut mmu, 2);

        // Assert
        assert_eq!(expected_a, cpu.reg.a);
        assert_eq!(expected_f, cpu.reg.f());
    }

    #[test]
    fn test_alu_flag_boundaries() {
        assert_eq!((0x00, flags(true, false, true, true)), add8(0xFF, 0x01, false));
        assert_eq!((0x10, flags(false, false, true, false)), add8(0x08, 0x07, true));
        assert_eq!((0x00, flags(true, false, true, true)), add8(0xFE, 0x01, true));
        assert_eq!((0xEF, flags(false, true, true, false)), sub8(0xF0, 0x01, false));
        assert_eq!((0xFE, flags(false, true, true, true)), sub8(0x00, 0x01, true));
        assert_eq!((0x00, flags(true, false, true, false)), logic8(0xF0 & 0x0F, true));
        assert_eq!((0x00, flags(true, false, true, false)), inc8(0xFF, 0x00));
        assert_eq!((0x0F, flags(false, true, true, true)), dec8(0x10, 0x10));
    }

    #[test]
    fn test_cp_keeps_a() {
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x42, 0xFE, 0x42]);
        let expected_f = flags(true, true, false, false);

        run(&mut cpu, &mut mmu, 2);

        assert_eq!(0x42, cpu.reg.a);
        assert_eq!(expected_f, cpu.reg.f());
    }

    #[test]
    fn test_inc_dec_preserve_carry() {
        // Arrange
        // LD A,0xFF; SCF; INC A; LD B,0x10; DEC B
        let (mut cpu, mut mmu) = setup(&[0x3E, 0xFF, 0x37, 0x3C, 0x06, 0x10, 0x05]);

        // Act
        run(&mut cpu, &mut mmu, 3);
        let inc_f = cpu.reg.f();
        run(&mut cpu, &mut mmu, 2);

        // Assert
        assert_eq!(0x00, cpu.reg.a);
        assert_eq!(flags(true, false, true, true), inc_f);
        assert_eq!(0x0F, cpu.reg.b);
        assert_eq!(flags(false, true, true, true), cpu.reg.f());
    }

    #[test]
    fn test_daa() {
        // 0x15 + 0x27
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x15, 0xC6, 0x27, 0x27]);
        run(&mut cpu, &mut mmu, 3);
        assert_eq!(0x42, cpu.reg.a);
        assert_eq!(0x00, cpu.reg.f());

        // 0x42 - 0x15
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x42, 0xD6, 0x15, 0x27]);
        run(&mut cpu, &mut mmu, 3);
        assert_eq!(0x27, cpu.reg.a);
        assert_eq!(flags(false, true, false, false), cpu.reg.f());

        // 0x99 + 0x01 wraps to 0x00 with carry
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x99, 0xC6, 0x01, 0x27]);
        run(&mut cpu, &mut mmu, 3);
        assert_eq!(0x00, cpu.reg.a);
        assert_eq!(flags(true, false, false, true), cpu.reg.f());
    }

    #[test]
    fn test_add_hl_half_carry_from_bit_11() {
        // Arrange
        // LD HL,0x0FFF; LD BC,0x0001; ADD HL,BC
        let (mut cpu, mut mmu) = setup(&[0x21, 0xFF, 0x0F, 0x01, 0x01, 0x00, 0x09]);
        let expected_t_cycles = 8;
        // zero survives from the power-on flags
        let expected_f = flags(true, false, true, false);

        // Act
        let cycles = run(&mut cpu, &mut mmu, 3);

        // Assert
        assert_eq!(expected_t_cycles, cycles);
        assert_eq!(0x1000, cpu.reg.get_hl());
        assert_eq!(expected_f, cpu.reg.f());
    }

    #[test]
    fn test_sp_relative_arithmetic() {
        // ADD SP,-1
        let (mut cpu, mut mmu) = setup(&[0xE8, 0xFF]);
        let cycles = run(&mut cpu, &mut mmu, 1);
        assert_eq!(16, cycles);
        assert_eq!(0xFFFD, cpu.reg.sp);
        assert_eq!(flags(false, false, true, true), cpu.reg.f());

        // LD HL,SP+2
        let (mut cpu, mut mmu) = setup(&[0xF8, 0x02]);
        let cycles = run(&mut cpu, &mut mmu, 1);
        assert_eq!(12, cycles);
        assert_eq!(0x0000, cpu.reg.get_hl());
        assert_eq!(flags(false, false, true, true), cpu.reg.f());
    }

    #[test]
    fn test_rotate_a_clears_zero() {
        // LD A,0x80; RLCA
        let (mut cpu, mut mmu) = setup(&[0x3E, 0x80, 0x07]);

        run(&mut cpu, &mut mmu, 2);

        assert_eq!(0x01, cpu.reg.a);
        assert_eq!(flags(false, false, false, true), cpu.reg.f());

        // LD A,0x00; RLA with carry clear sets nothing
        let (mut cpu, mut mmu) = setup(&[0xAF, 0x17]);
        run(&mut cpu, &mut mmu, 2);
        assert_eq!(0x00, cpu.reg.f());
    }

    #[test]
    fn test_shift_operations() {
        assert_eq!((0x00, flags(true, false, false, true)), shift(4, 0x80, false));
        assert_eq!((0xC0, flags(false, false, false, false)), shift(5, 0x80, false));
        assert_eq!((0x40, flags(false, false, false, false)), shift(7, 0x80, false));
        assert_eq!((0x80, flags(false, false, false, true)), shift(3, 0x01, true));
        assert_eq!((0x1F, flags(false, false, false, false)), shift(6, 0xF1, true));
    }

    #[test]
    fn test_cb_on_hl_costs() {
        // Arrange
        // LD HL,0xC100; LD (HL),0xF0; SWAP (HL); BIT 7,(HL); RES 0,(HL)
        let (mut cpu, mut mmu) = setup(&[
            0x21, 0x00, 0xC1, 0x36, 0xF0, 0xCB, 0x36, 0xCB, 0x7E, 0xCB, 0x86,
        ]);

        // Act
        let ld_cycles = run(&mut cpu, &mut mmu, 2);
        let swap_cycles = run(&mut cpu, &mut mmu, 1);
        let swapped = mmu.read_byte(0xC100);
        let bit_cycles = run(&mut cpu, &mut mmu, 1);
        let bit_f = cpu.reg.f();
        let res_cycles = run(&mut cpu, &mut mmu, 1);

        // Assert
        assert_eq!(12, ld_cycles);
        assert_eq!(16, swap_cycles);
        assert_eq!(0x0F, swapped);
        assert_eq!(12, bit_cycles);
        assert_eq!(flags(true, false, true, false), bit_f);
        assert_eq!(16, res_cycles);
        assert_eq!(0x0E, mmu.read_byte(0xC100));
    }

    #[test]
    fn test_cb_on_register() {
        // LD B,0x00; RLC B; SET 3,B
        let (mut cpu, mut mmu) = setup(&[0x06, 0x00, 0xCB, 0x00, 0xCB, 0xD8]);

        run(&mut cpu, &mut mmu, 1);
        let rlc_cycles = run(&mut cpu, &mut mmu, 1);
        let rlc_f = cpu.reg.f();
        run(&mut cpu, &mut mmu, 1);

        assert_eq!(8, rlc_cycles);
        assert_eq!(flags(true, false, false, false), rlc_f);
        assert_eq!(0x08, cpu.reg.b);
    }

    #[test]
    fn test_conditional_jr_costs() {
        // Arrange
        // XOR A; JR NZ,+5; INC A; JR NZ,+2
        let (mut cpu, mut mmu) = setup(&[0xAF, 0x20, 0x05, 0x3C, 0x20, 0x02]);

        // Act
        run(&mut cpu, &mut mmu, 1);
        let not_taken = run(&mut cpu, &mut mmu, 1);
        let taken = run(&mut cpu, &mut mmu, 2);

        // Assert
        assert_eq!(8, not_taken);
        assert_eq!(12, taken);
        assert_eq!(PROGRAM_START + 8, cpu.reg.pc);
    }

    #[test]
    fn test_jr_backwards() {
        let (mut cpu, mut mmu) = setup(&[0x00, 0x18, 0xFD]);

        run(&mut cpu, &mut mmu, 2);

        assert_eq!(PROGRAM_START, cpu.reg.pc);
    }

    #[test]
    fn test_conditional_jp_costs() {
        // XOR A; JP NZ,0xD000; JP Z,0xD000
        let (mut cpu, mut mmu) = setup(&[0xAF, 0xC2, 0x00, 0xD0, 0xCA, 0x00, 0xD0]);

        run(&mut cpu, &mut mmu, 1);
        let not_taken = run(&mut cpu, &mut mmu, 1);
        let taken = run(&mut cpu, &mut mmu, 1);

        assert_eq!(12, not_taken);
        assert_eq!(16, taken);
        assert_eq!(0xD000, cpu.reg.pc);
    }

    #[test]
    fn test_call_and_return_costs() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0xCD, 0x10, 0xC0]);
        // XOR A; RET NZ; RET Z
        for (i, byte) in [0xAF, 0xC0, 0xC8].iter().enumerate() {
            mmu.write_byte(0xC010 + i as u16, *byte);
        }
        let expected_sp = cpu.reg.sp - 2;

        // Act
        let call_cycles = run(&mut cpu, &mut mmu, 1);
        let call_pc = cpu.reg.pc;
        let call_sp = cpu.reg.sp;
        let return_address = mmu.read_word(call_sp);
        run(&mut cpu, &mut mmu, 1);
        let not_taken = run(&mut cpu, &mut mmu, 1);
        let taken = run(&mut cpu, &mut mmu, 1);

        // Assert
        assert_eq!(24, call_cycles);
        assert_eq!(0xC010, call_pc);
        assert_eq!(expected_sp, call_sp);
        assert_eq!(PROGRAM_START + 3, return_address);
        assert_eq!(8, not_taken);
        assert_eq!(20, taken);
        assert_eq!(PROGRAM_START + 3, cpu.reg.pc);
        assert_eq!(0xFFFE, cpu.reg.sp);
    }

    #[test]
    fn test_conditional_call_not_taken() {
        // SCF; CALL NC,0xD000
        let (mut cpu, mut mmu) = setup(&[0x37, 0xD4, 0x00, 0xD0]);

        run(&mut cpu, &mut mmu, 1);
        let cycles = run(&mut cpu, &mut mmu, 1);

        assert_eq!(12, cycles);
        assert_eq!(PROGRAM_START + 4, cpu.reg.pc);
        assert_eq!(0xFFFE, cpu.reg.sp);
    }

    #[test]
    fn test_pop_af_masks_flags() {
        // LD BC,0x12FF; PUSH BC; POP AF
        let (mut cpu, mut mmu) = setup(&[0x01, 0xFF, 0x12, 0xC5, 0xF1]);

        run(&mut cpu, &mut mmu, 1);
        let push_cycles = run(&mut cpu, &mut mmu, 1);
        let pop_cycles = run(&mut cpu, &mut mmu, 1);

        assert_eq!(16, push_cycles);
        assert_eq!(12, pop_cycles);
        assert_eq!(0x12F0, cpu.reg.get_af());
    }

    #[test]
    fn test_rst() {
        let (mut cpu, mut mmu) = setup(&[0xEF]);

        let cycles = run(&mut cpu, &mut mmu, 1);

        assert_eq!(16, cycles);
        assert_eq!(0x0028, cpu.reg.pc);
        assert_eq!(PROGRAM_START + 1, mmu.read_word(cpu.reg.sp));
    }

    #[test]
    fn test_memory_loads() {
        // Arrange
        // LD HL,0xC100; LD A,0x55; LD (HL+),A; LD (HL-),A; LD (0xC200),SP; LDH (0x80),A
        let (mut cpu, mut mmu) = setup(&[
            0x21, 0x00, 0xC1, 0x3E, 0x55, 0x22, 0x32, 0x08, 0x00, 0xC2, 0xE0, 0x80,
        ]);

        // Act
        run(&mut cpu, &mut mmu, 4);
        let sp_cycles = run(&mut cpu, &mut mmu, 1);
        let ldh_cycles = run(&mut cpu, &mut mmu, 1);

        // Assert
        assert_eq!(0x55, mmu.read_byte(0xC100));
        assert_eq!(0x55, mmu.read_byte(0xC101));
        assert_eq!(0xC100, cpu.reg.get_hl());
        assert_eq!(20, sp_cycles);
        assert_eq!(0xFFFE, mmu.read_word(0xC200));
        assert_eq!(12, ldh_cycles);
        assert_eq!(0x55, mmu.read_byte(0xFF80));
    }

    #[test]
    fn test_register_load_costs() {
        // LD B,C; LD B,(HL); LD (HL),B; INC (HL); LD (HL),d8
        let (mut cpu, mut mmu) = setup(&[0x41, 0x46, 0x70, 0x34, 0x36, 0x00]);
        cpu.reg.set_hl(0xC100);

        let costs: Vec<u32> = (0..5).map(|_| cpu.execute(&mut mmu).unwrap()).collect();

        assert_eq!(vec![4, 8, 8, 12, 12], costs);
    }

    #[test]
    fn test_stop_consumes_padding() {
        let (mut cpu, mut mmu) = setup(&[0x10, 0x00, 0x3C]);

        run(&mut cpu, &mut mmu, 1);

        assert_eq!(PROGRAM_START + 2, cpu.reg.pc);
    }

    #[test]
    fn test_ei_takes_effect_after_next_instruction() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0xFB, 0x00, 0x00]);
        mmu.write_byte(INTERRUPT_ENABLE, 0x01);
        mmu.request_interrupt(Interrupt::VBlank);

        // Act
        cpu.execute(&mut mmu).unwrap();
        let after_ei = cpu.handle_interrupts(&mut mmu);
        cpu.execute(&mut mmu).unwrap();
        let after_nop = cpu.handle_interrupts(&mut mmu);

        // Assert
        assert_eq!(0, after_ei);
        assert_eq!(20, after_nop);
        assert_eq!(0x0040, cpu.reg.pc);
        assert_eq!(PROGRAM_START + 2, mmu.read_word(cpu.reg.sp));
        assert_eq!(0xE0, mmu.read_byte(INTERRUPT_FLAG));
        assert!(!cpu.ime);
    }

    #[test]
    fn test_di_right_after_ei() {
        let (mut cpu, mut mmu) = setup(&[0xFB, 0xF3, 0x00]);
        mmu.write_byte(INTERRUPT_ENABLE, 0x01);
        mmu.request_interrupt(Interrupt::VBlank);

        run(&mut cpu, &mut mmu, 2);

        assert!(!cpu.ime);
        assert_eq!(0, cpu.handle_interrupts(&mut mmu));
    }

    #[test]
    fn test_reti_enables_immediately() {
        let (mut cpu, mut mmu) = setup(&[0xD9]);
        cpu.reg.sp = 0xCFFE;
        mmu.write_word(0xCFFE, 0x1234);

        run(&mut cpu, &mut mmu, 1);

        assert!(cpu.ime);
        assert_eq!(0x1234, cpu.reg.pc);
    }

    #[test]
    fn test_interrupt_priority() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0x00]);
        cpu.ime = true;
        mmu.write_byte(INTERRUPT_ENABLE, 0x1F);
        mmu.request_interrupt(Interrupt::Timer);
        mmu.request_interrupt(Interrupt::LcdStat);

        // Act
        let cycles = cpu.handle_interrupts(&mut mmu);

        // Assert
        assert_eq!(20, cycles);
        assert_eq!(0x0048, cpu.reg.pc);
        assert_eq!(Interrupt::Timer.mask(), mmu.read_byte(INTERRUPT_FLAG) & 0x1F);
    }

    #[test]
    fn test_disabled_interrupt_not_dispatched() {
        let (mut cpu, mut mmu) = setup(&[0x00]);
        cpu.ime = true;
        mmu.write_byte(INTERRUPT_ENABLE, 0x01);
        mmu.request_interrupt(Interrupt::Timer);

        assert_eq!(0, cpu.handle_interrupts(&mut mmu));
        assert_eq!(PROGRAM_START, cpu.reg.pc);
    }

    #[test]
    fn test_halt_until_interrupt() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0x76, 0x3C]);
        cpu.ime = true;
        mmu.write_byte(INTERRUPT_ENABLE, 0x04);

        // Act
        run(&mut cpu, &mut mmu, 1);
        let idle = cpu.execute(&mut mmu).unwrap();
        let still_halted = cpu.halted();
        mmu.request_interrupt(Interrupt::Timer);
        let wake = cpu.execute(&mut mmu).unwrap();
        let dispatch = cpu.handle_interrupts(&mut mmu);

        // Assert
        assert_eq!(4, idle);
        assert!(still_halted);
        assert_eq!(4, wake);
        assert_eq!(20, dispatch);
        assert_eq!(0x0050, cpu.reg.pc);
        assert_eq!(PROGRAM_START + 1, mmu.read_word(cpu.reg.sp));
        assert_eq!(0x01, cpu.reg.a);
    }

    #[test]
    fn test_halt_wakes_without_ime() {
        let (mut cpu, mut mmu) = setup(&[0x76, 0x3C]);
        mmu.write_byte(INTERRUPT_ENABLE, 0x01);

        run(&mut cpu, &mut mmu, 2);
        let halted = cpu.halted();
        mmu.request_interrupt(Interrupt::VBlank);
        run(&mut cpu, &mut mmu, 2);

        assert!(halted);
        assert!(!cpu.halted());
        assert_eq!(0x02, cpu.reg.a);
        assert_eq!(0, cpu.handle_interrupts(&mut mmu));
    }

    #[test]
    fn test_halt_bug_repeats_next_byte() {
        // Arrange
        let (mut cpu, mut mmu) = setup(&[0x76, 0x3C, 0x00]);
        mmu.write_byte(INTERRUPT_ENABLE, 0x01);
        mmu.request_interrupt(Interrupt::VBlank);

        // Act
        run(&mut cpu, &mut mmu, 3);

        // Assert
        assert!(!cpu.halted());
        assert_eq!(0x03, cpu.reg.a);
        assert_eq!(PROGRAM_START + 2, cpu.reg.pc);
    }

    #[test]
    fn test_undefined_opcode() {
        let (mut cpu, mut mmu) = setup(&[0xD3, 0x00]);

        let result = cpu.execute(&mut mmu);

        assert_eq!(
            Err(CpuError::UndefinedOpcode {
                opcode: 0xD3,
                pc: PROGRAM_START
            }),
            result
        );

        let (_, mut mmu) = setup(&[0xFD, 0x00]);
        let mut lenient = Cpu::new(false);
        lenient.reg.pc = PROGRAM_START;
        assert_eq!(Ok(4), lenient.execute(&mut mmu));
        assert_eq!(PROGRAM_START + 1, lenient.reg.pc);
    }
}
