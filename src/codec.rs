//! Wire byte-order helpers: LSB-first bit packing and big-endian words.

use bitvec::prelude::*;

/// Pack bits LSB-first into `ceil(n/8)` bytes; unused tail bits are zero.
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bits = bitvec![u8, Lsb0; 0; values.len()];
    for (index, &value) in values.iter().enumerate() {
        bits.set(index, value);
    }
    bits.into_vec()
}

/// Unpack `count` bits, LSB-first within each byte.
///
/// Bits beyond the end of `bytes` read as false.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    let bits = bytes.view_bits::<Lsb0>();
    (0..count)
        .map(|index| bits.get(index).map_or(false, |bit| *bit))
        .collect()
}

/// Serialize 16-bit words big-endian.
pub fn pack_words(values: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 2);
    for value in values {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    bytes
}

/// Deserialize big-endian 16-bit words; a trailing odd byte is ignored.
pub fn unpack_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}
