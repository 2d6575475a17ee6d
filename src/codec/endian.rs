//! Big-endian wire order conversion for 16/32/64-bit integers.

const BITS_PER_BYTE: u32 = 8;

/// Rebuild a `u16` from two wire bytes.
#[inline]
pub const fn u16_from_wire(bytes: [u8; 2]) -> u16 {
    ((bytes[0] as u16) << BITS_PER_BYTE) | bytes[1] as u16
}

/// Split a `u16` into two wire bytes, most significant first.
#[inline]
pub const fn u16_to_wire(value: u16) -> [u8; 2] {
    [(value >> BITS_PER_BYTE) as u8, value as u8]
}

/// Rebuild a `u32` from four wire bytes.
#[inline]
pub const fn u32_from_wire(bytes: [u8; 4]) -> u32 {
    let mut value = 0u32;
    let mut i = 0;
    while i < 4 {
        value = (value << BITS_PER_BYTE) | bytes[i] as u32;
        i += 1;
    }
    value
}

/// Split a `u32` into four wire bytes, most significant first.
#[inline]
pub const fn u32_to_wire(value: u32) -> [u8; 4] {
    let mut out = [0u8; 4];
    let mut i = 0;
    while i < 4 {
        out[i] = (value >> (BITS_PER_BYTE * (3 - i as u32))) as u8;
        i += 1;
    }
    out
}

/// Rebuild a `u64` from eight wire bytes.
#[inline]
pub const fn u64_from_wire(bytes: [u8; 8]) -> u64 {
    let mut value = 0u64;
    let mut i = 0;
    while i < 8 {
        value = (value << BITS_PER_BYTE) | bytes[i] as u64;
        i += 1;
    }
    value
}

/// Split a `u64` into eight wire bytes, most significant first.
#[inline]
pub const fn u64_to_wire(value: u64) -> [u8; 8] {
    let mut out = [0u8; 8];
    let mut i = 0;
    while i < 8 {
        out[i] = (value >> (BITS_PER_BYTE * (7 - i as u32))) as u8;
        i += 1;
    }
    out
}
