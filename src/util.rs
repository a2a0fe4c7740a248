// bit and byte helpers shared by every hardware block

#[inline]
pub fn is_set(value: u8, bit: u8) -> bool {
    (value >> bit) & 1 == 1
}

#[inline]
pub fn set(value: u8, bit: u8) -> u8 {
    value | (1 << bit)
}

#[inline]
pub fn clear(value: u8, bit: u8) -> u8 {
    value & !(1 << bit)
}

#[inline]
pub fn make_word(high: u8, low: u8) -> u16 {
    (high as u16) << 8 | low as u16
}

#[inline]
pub fn high_byte(word: u16) -> u8 {
    (word >> 8) as u8
}

#[inline]
pub fn low_byte(word: u16) -> u8 {
    (word & 0xFF) as u8
}
