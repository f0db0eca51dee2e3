//! Bit-level signal codec for 64-bit CAN message words.
//!
//! A message payload is handled as a single `u64`. Signals are addressed by a
//! start bit and a length. Little-endian (Intel) signals use the start bit as
//! the index of their least significant bit. Big-endian (Motorola) signals use
//! the DBC convention: the start bit names the most significant bit of the
//! signal, numbered `byte * 8 + bit_in_byte`, and the word is laid out so that
//! frame byte 0 is its most significant byte.
//!
//! Malformed bit ranges are programming errors and panic at the call site.

use serde::{Deserialize, Serialize};

/// Number of bits in a CAN message word.
pub const CAN_BITS: u32 = 64;
/// Number of payload bytes in a classic CAN frame.
pub const CAN_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    LittleEndian,
    BigEndian,
}

const fn field_mask(bit_length: u32) -> u64 {
    if bit_length >= CAN_BITS {
        u64::MAX
    } else {
        (1u64 << bit_length) - 1
    }
}

fn check_range(bit_start: u32, bit_length: u32) {
    assert!(
        bit_start < CAN_BITS,
        "signal start bit {bit_start} outside of the 64-bit message word"
    );
    assert!(
        (1..=CAN_BITS).contains(&bit_length),
        "signal length {bit_length} must be between 1 and 64 bits"
    );
}

/// Converts a Motorola start bit into the little-endian index of the
/// signal's least significant bit inside the message word.
///
/// `(15, 16)` maps to `40`: the MSB sits in frame byte 1 bit 7 (word bit 55)
/// and the LSB fifteen bits below it.
///
/// # Panics
///
/// Panics if the range is malformed or the signal would need bits beyond
/// frame byte 7.
pub fn convert_bit_start_big_endian(bit_start: u32, bit_length: u32) -> u32 {
    check_range(bit_start, bit_length);

    let byte = bit_start / 8;
    let bit_in_byte = bit_start % 8;
    let msb_position = (7 - byte) * 8 + bit_in_byte;

    assert!(
        msb_position + 1 >= bit_length,
        "big-endian signal at start bit {bit_start} with length {bit_length} runs past the last byte"
    );
    msb_position + 1 - bit_length
}

/// Resolves the index of the signal's least significant bit in the word.
fn lsb_position(bit_start: u32, bit_length: u32, endianness: Endianness) -> u32 {
    check_range(bit_start, bit_length);

    let position = match endianness {
        Endianness::LittleEndian => bit_start,
        Endianness::BigEndian => convert_bit_start_big_endian(bit_start, bit_length),
    };

    assert!(
        position + bit_length <= CAN_BITS,
        "signal at start bit {bit_start} with length {bit_length} exceeds the 64-bit message word"
    );
    position
}

/// Writes `value`, masked to `bit_length` bits, into `word`. All bits outside
/// the signal are left unchanged.
pub fn set_signal(
    word: u64,
    bit_start: u32,
    bit_length: u32,
    value: u64,
    endianness: Endianness,
) -> u64 {
    let position = lsb_position(bit_start, bit_length, endianness);
    let mask = field_mask(bit_length);

    (word & !(mask << position)) | ((value & mask) << position)
}

/// Reads a signal from `word`. The result is right-justified and
/// zero-extended.
pub fn get_signal(word: u64, bit_start: u32, bit_length: u32, endianness: Endianness) -> u64 {
    let position = lsb_position(bit_start, bit_length, endianness);

    (word >> position) & field_mask(bit_length)
}

/// Splits a message word into frame bytes.
pub fn pack_frame(word: u64, endianness: Endianness) -> [u8; CAN_BYTES] {
    match endianness {
        Endianness::LittleEndian => word.to_le_bytes(),
        Endianness::BigEndian => word.to_be_bytes(),
    }
}

/// Assembles a message word from frame bytes.
pub fn unpack_frame(data: &[u8; CAN_BYTES], endianness: Endianness) -> u64 {
    match endianness {
        Endianness::LittleEndian => u64::from_le_bytes(*data),
        Endianness::BigEndian => u64::from_be_bytes(*data),
    }
}

/// Interprets the low `bit_length` bits of `raw` as a two's complement value.
pub fn sign_extend(raw: u64, bit_length: u32) -> i64 {
    assert!(
        (1..=CAN_BITS).contains(&bit_length),
        "signal length {bit_length} must be between 1 and 64 bits"
    );
    let shift = CAN_BITS - bit_length;
    ((raw << shift) as i64) >> shift
}

/// Location and physical scaling of one signal inside a message.
///
/// `physical = raw * factor + offset`. Values written through
/// [`SignalSpec::encode_physical`] are clamped to `[min, max]` first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSpec {
    pub bit_start: u32,
    pub bit_length: u32,
    pub factor: f32,
    pub offset: f32,
    pub min: f32,
    pub max: f32,
}

impl SignalSpec {
    pub const fn new(bit_start: u32, bit_length: u32) -> Self {
        Self {
            bit_start,
            bit_length,
            factor: 1.0,
            offset: 0.0,
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        }
    }

    #[must_use]
    pub const fn scaled(self, factor: f32, offset: f32) -> Self {
        Self {
            factor,
            offset,
            ..self
        }
    }

    #[must_use]
    pub const fn limited(self, min: f32, max: f32) -> Self {
        Self { min, max, ..self }
    }

    pub fn set_raw(&self, word: u64, raw: u64, endianness: Endianness) -> u64 {
        set_signal(word, self.bit_start, self.bit_length, raw, endianness)
    }

    pub fn get_raw(&self, word: u64, endianness: Endianness) -> u64 {
        get_signal(word, self.bit_start, self.bit_length, endianness)
    }

    /// Clamps, removes offset and factor, rounds and writes the value.
    /// Negative raw values are stored as two's complement within the signal.
    pub fn encode_physical(&self, word: u64, value: f32, endianness: Endianness) -> u64 {
        assert!(self.factor != 0.0, "signal factor must be non-zero");
        assert!(
            self.min <= self.max,
            "signal minimum {} above maximum {}",
            self.min,
            self.max
        );

        let clamped = value.max(self.min).min(self.max);
        let raw = ((clamped - self.offset) / self.factor).round() as i64;
        self.set_raw(word, raw as u64, endianness)
    }

    pub fn decode_physical(&self, word: u64, endianness: Endianness) -> f32 {
        self.get_raw(word, endianness) as f32 * self.factor + self.offset
    }

    /// Like [`SignalSpec::decode_physical`] for signals stored two's complement.
    pub fn decode_physical_signed(&self, word: u64, endianness: Endianness) -> f32 {
        let raw = sign_extend(self.get_raw(word, endianness), self.bit_length);
        raw as f32 * self.factor + self.offset
    }
}
