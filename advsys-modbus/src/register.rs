//! Register descriptors and their decode algorithms.
//!
//! Every register the gateways expose is described by a [`RegisterDescriptor`]:
//! its address, its width in 16-bit words and the [`DecodeKind`] turning the
//! raw big-endian bytes into an engineering value. Decoding is total: a short
//! buffer reads as zero-padded, it never fails.

use std::fmt;

use serde::Serialize;

/// A decoded register value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Unscaled integer.
    Int(i64),
    /// Scaled engineering value.
    Float(f64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Conversion from a decoded [`Value`] into a reading field.
pub trait FromValue {
    fn from_value(value: Value) -> Self;
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Self {
        value.as_f64()
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Self {
        value.as_i64()
    }
}

/// Decode algorithm applied to the raw bytes of a register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeKind {
    /// One word, big-endian, signedness taken from the descriptor.
    RawInt16,
    /// Two words, big-endian, signedness taken from the descriptor.
    RawInt32,
    /// Two words transmitted low word first. Only the magnitude is kept.
    WordSwappedSigned32 { scale: f64 },
    /// One word divided by `scale`.
    LinearScaled16 { scale: f64, signed: bool },
    /// `word_count` words of packed BCD, least significant byte first.
    PackedBcd { word_count: u8, scale: f64 },
}

/// Address, width and decode rule of one register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterDescriptor {
    pub address: u16,
    pub word_count: u8,
    pub signed: bool,
    pub kind: DecodeKind,
}

impl RegisterDescriptor {
    pub const fn raw_i16(address: u16) -> Self {
        Self {
            address,
            word_count: 1,
            signed: true,
            kind: DecodeKind::RawInt16,
        }
    }

    pub const fn raw_u16(address: u16) -> Self {
        Self {
            address,
            word_count: 1,
            signed: false,
            kind: DecodeKind::RawInt16,
        }
    }

    pub const fn raw_i32(address: u16) -> Self {
        Self {
            address,
            word_count: 2,
            signed: true,
            kind: DecodeKind::RawInt32,
        }
    }

    pub const fn raw_u32(address: u16) -> Self {
        Self {
            address,
            word_count: 2,
            signed: false,
            kind: DecodeKind::RawInt32,
        }
    }

    /// Word-swapped 32-bit register. Read as unsigned, the sign is recovered
    /// and then dropped by the decoder.
    pub const fn word_swapped(address: u16, scale: f64) -> Self {
        Self {
            address,
            word_count: 2,
            signed: false,
            kind: DecodeKind::WordSwappedSigned32 { scale },
        }
    }

    pub const fn linear(address: u16, scale: f64, signed: bool) -> Self {
        Self {
            address,
            word_count: 1,
            signed,
            kind: DecodeKind::LinearScaled16 { scale, signed },
        }
    }

    pub const fn packed_bcd(address: u16, word_count: u8, scale: f64) -> Self {
        Self {
            address,
            word_count,
            signed: false,
            kind: DecodeKind::PackedBcd { word_count, scale },
        }
    }

    /// Number of raw bytes this register spans.
    pub fn byte_len(&self) -> usize {
        usize::from(self.word_count) * 2
    }

    /// Decode the raw bytes of this register, in transport order.
    pub fn decode(&self, raw: &[u8]) -> Value {
        match self.kind {
            DecodeKind::RawInt16 => {
                let word = be_uint(raw, 2) as u16;
                if self.signed {
                    Value::Int(i64::from(word as i16))
                } else {
                    Value::Int(i64::from(word))
                }
            }
            DecodeKind::RawInt32 => {
                let dword = be_uint(raw, 4) as u32;
                if self.signed {
                    Value::Int(i64::from(dword as i32))
                } else {
                    Value::Int(i64::from(dword))
                }
            }
            DecodeKind::WordSwappedSigned32 { scale } => {
                Value::Float(word_swapped_magnitude(be_uint(raw, 4) as u32) as f64 / scale)
            }
            DecodeKind::LinearScaled16 { scale, signed } => {
                let word = be_uint(raw, 2) as u16;
                let raw_value = if signed {
                    f64::from(word as i16)
                } else {
                    f64::from(word)
                };
                Value::Float(raw_value / scale)
            }
            DecodeKind::PackedBcd { word_count, scale } => {
                Value::Float(packed_bcd(raw, usize::from(word_count) * 2) as f64 / scale)
            }
        }
    }
}

/// Big-endian unsigned integer over the first `len` bytes of `raw`.
/// Missing bytes read as zero.
fn be_uint(raw: &[u8], len: usize) -> u64 {
    (0..len).fold(0u64, |acc, i| {
        (acc << 8) | u64::from(raw.get(i).copied().unwrap_or(0))
    })
}

/// Swap the two 16-bit halves and return the two's-complement magnitude.
fn word_swapped_magnitude(raw: u32) -> i64 {
    let swapped = ((raw >> 16) & 0xffff) | ((raw & 0xffff) << 16);
    if swapped & 0x8000_0000 != 0 {
        (i64::from(swapped) - 0x1_0000_0000).abs()
    } else {
        i64::from(swapped)
    }
}

/// Reverse `len` bytes and read their nibbles as decimal digits.
fn packed_bcd(raw: &[u8], len: usize) -> u64 {
    (0..len)
        .rev()
        .map(|i| raw.get(i).copied().unwrap_or(0))
        .fold(0u64, |acc, byte| {
            let acc = acc.wrapping_mul(10).wrapping_add(u64::from(byte >> 4));
            acc.wrapping_mul(10).wrapping_add(u64::from(byte & 0x0f))
        })
}

/// A labelled register of a device register map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Register {
    pub label: &'static str,
    pub unit: Option<&'static str>,
    pub descriptor: RegisterDescriptor,
}

/// Ordered, immutable list of the registers read by one poll.
#[derive(Debug, Clone, Copy)]
pub struct RegisterSet {
    pub(crate) registers: &'static [Register],
}

impl RegisterSet {
    pub const fn new(registers: &'static [Register]) -> Self {
        Self { registers }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'static, Register> {
        self.registers.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + use<> {
        self.registers.iter().map(|r| r.label)
    }

    /// Total width of the set in words.
    pub fn total_words(&self) -> usize {
        self.registers
            .iter()
            .map(|r| usize::from(r.descriptor.word_count))
            .sum()
    }

    /// Start address and word count of the set when its registers follow each
    /// other without gaps, in order.
    pub fn contiguous_span(&self) -> Option<(u16, u16)> {
        let first = self.registers.first()?.descriptor.address;
        let mut next = first;
        for register in self.registers {
            if register.descriptor.address != next {
                return None;
            }
            next = next.checked_add(u16::from(register.descriptor.word_count))?;
        }
        Some((first, next - first))
    }
}

/// A typed poll result, one field per register of [`Reading::REGISTERS`].
///
/// Implementations are generated by `register_map!`, which derives the
/// register set and the struct fields from the same list so they cannot
/// drift apart.
pub trait Reading: Sized + Copy + fmt::Debug + Serialize {
    const REGISTERS: RegisterSet;

    /// Build the reading from values decoded in register order.
    /// Returns `None` when `values` does not have one entry per register.
    fn assemble(values: &[Value]) -> Option<Self>;

    /// Field values, in register order.
    fn values(&self) -> Vec<Value>;

    /// Registers paired with their value, in register order.
    fn fields(&self) -> Vec<(&'static Register, Value)> {
        Self::REGISTERS.iter().zip(self.values()).collect()
    }
}

/// Declare a [`Reading`] struct together with its register map.
///
/// ```ignore
/// register_map! {
///     pub struct MeterReading {
///         voltage: f64 ["V"] => RegisterDescriptor::word_swapped(4353, 10.0),
///         pulses: i64 => RegisterDescriptor::raw_i32(4096),
///     }
/// }
/// ```
macro_rules! register_map {
    (@unit) => {
        None
    };
    (@unit $unit:literal) => {
        Some($unit)
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty $([$unit:literal])? => $descriptor:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, ::serde::Serialize)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )+
        }

        impl $crate::register::Reading for $name {
            const REGISTERS: $crate::register::RegisterSet = $crate::register::RegisterSet {
                registers: &[
                    $(
                        $crate::register::Register {
                            label: stringify!($field),
                            unit: $crate::register::register_map!(@unit $($unit)?),
                            descriptor: $descriptor,
                        },
                    )+
                ],
            };

            fn assemble(values: &[$crate::register::Value]) -> Option<Self> {
                let mut values = values.iter().copied();
                let reading = Self {
                    $(
                        $field: $crate::register::FromValue::from_value(values.next()?),
                    )+
                };
                values.next().is_none().then_some(reading)
            }

            fn values(&self) -> Vec<$crate::register::Value> {
                vec![$($crate::register::Value::from(self.$field)),+]
            }
        }
    };
}

pub(crate) use register_map;

#[cfg(test)]
mod tests {
    use super::*;

    register_map! {
        struct Sample {
            counter: i64 => RegisterDescriptor::raw_i32(100),
            voltage: f64 ["V"] => RegisterDescriptor::word_swapped(102, 10.0),
            frequency: f64 ["Hz"] => RegisterDescriptor::linear(104, 10.0, false),
        }
    }

    register_map! {
        struct Scattered {
            a: f64 => RegisterDescriptor::linear(10, 1.0, false),
            b: f64 => RegisterDescriptor::linear(20, 1.0, false),
        }
    }

    #[test]
    fn test_raw_int32_is_big_endian_twos_complement() {
        let reg = RegisterDescriptor::raw_i32(0);
        assert_eq!(reg.decode(&[0x00, 0x00, 0x01, 0x00]), Value::Int(256));
        assert_eq!(reg.decode(&[0xff, 0xff, 0xff, 0xfe]), Value::Int(-2));

        let unsigned = RegisterDescriptor::raw_u32(0);
        assert_eq!(
            unsigned.decode(&[0xff, 0xff, 0xff, 0xfe]),
            Value::Int(0xffff_fffe)
        );
    }

    #[test]
    fn test_raw_int16() {
        assert_eq!(
            RegisterDescriptor::raw_i16(0).decode(&[0x80, 0x00]),
            Value::Int(-32768)
        );
        assert_eq!(
            RegisterDescriptor::raw_u16(0).decode(&[0x80, 0x00]),
            Value::Int(32768)
        );
    }

    #[test]
    fn test_word_swapped_positive() {
        // high word 1, low word 0 swaps to 1
        let reg = RegisterDescriptor::word_swapped(0, 10.0);
        assert_eq!(reg.decode(&[0x00, 0x01, 0x00, 0x00]), Value::Float(0.1));
    }

    #[test]
    fn test_word_swapped_negative_keeps_magnitude() {
        // -1234 is 0xFFFFFB2E, transmitted low word first
        let reg = RegisterDescriptor::word_swapped(0, 1.0);
        assert_eq!(reg.decode(&[0xfb, 0x2e, 0xff, 0xff]), Value::Float(1234.0));

        let scaled = RegisterDescriptor::word_swapped(0, 1000.0);
        assert_eq!(scaled.decode(&[0xfb, 0x2e, 0xff, 0xff]), Value::Float(1.234));
    }

    #[test]
    fn test_word_swapped_matches_formula() {
        for raw in [0u32, 1, 0x0001_0000, 0x1234_5678, 0x8000_0000, 0xffff_ffff] {
            let swapped = raw.rotate_left(16);
            let expected = if swapped & 0x8000_0000 != 0 {
                (i64::from(swapped) - (1i64 << 32)).abs()
            } else {
                i64::from(swapped)
            };
            assert_eq!(word_swapped_magnitude(raw), expected);
        }
    }

    #[test]
    fn test_linear_scaled() {
        let unsigned = RegisterDescriptor::linear(0, 10.0, false);
        assert_eq!(unsigned.decode(&[0x01, 0xf4]), Value::Float(50.0));
        assert_eq!(unsigned.decode(&[0xff, 0xff]), Value::Float(6553.5));

        let signed = RegisterDescriptor::linear(0, 1000.0, true);
        assert_eq!(signed.decode(&[0xff, 0xff]), Value::Float(-0.001));
        assert_eq!(signed.decode(&[0x03, 0xe8]), Value::Float(1.0));
    }

    #[test]
    fn test_packed_bcd() {
        let reg = RegisterDescriptor::packed_bcd(0, 3, 100.0);
        assert_eq!(
            reg.decode(&[1, 2, 3, 4, 5, 6]),
            Value::Float(605040302.01)
        );
        assert_eq!(reg.decode(&[0, 0, 0, 0, 0, 0]), Value::Float(0.0));
        assert_eq!(
            reg.decode(&[0x34, 0x12, 0, 0, 0, 0]),
            Value::Float(12.34)
        );
    }

    #[test]
    fn test_decode_short_buffer_is_total() {
        assert_eq!(RegisterDescriptor::raw_i32(0).decode(&[]), Value::Int(0));
        assert_eq!(
            RegisterDescriptor::raw_i32(0).decode(&[0x01]),
            Value::Int(0x0100_0000)
        );
        assert_eq!(
            RegisterDescriptor::packed_bcd(0, 3, 1.0).decode(&[0x01]),
            Value::Float(1.0)
        );
        assert_eq!(
            RegisterDescriptor::word_swapped(0, 1.0).decode(&[]),
            Value::Float(0.0)
        );
    }

    #[test]
    fn test_packed_bcd_wide_register_does_not_overflow() {
        let reg = RegisterDescriptor::packed_bcd(0, 20, 1.0);
        let raw = [0x99u8; 40];
        let _ = reg.decode(&raw);
    }

    #[test]
    fn test_register_set_labels_follow_declaration() {
        let labels: Vec<_> = Sample::REGISTERS.labels().collect();
        assert_eq!(labels, vec!["counter", "voltage", "frequency"]);
        assert_eq!(Sample::REGISTERS.len(), 3);
        assert_eq!(Sample::REGISTERS.total_words(), 5);
    }

    #[test]
    fn test_register_units() {
        let units: Vec<_> = Sample::REGISTERS.iter().map(|r| r.unit).collect();
        assert_eq!(units, vec![None, Some("V"), Some("Hz")]);
    }

    #[test]
    fn test_contiguous_span() {
        assert_eq!(Sample::REGISTERS.contiguous_span(), Some((100, 5)));
        assert_eq!(Scattered::REGISTERS.contiguous_span(), None);
        assert_eq!(RegisterSet::new(&[]).contiguous_span(), None);
    }

    #[test]
    fn test_assemble_requires_one_value_per_register() {
        let values = [Value::Int(7), Value::Float(230.1), Value::Float(50.0)];
        let reading = Sample::assemble(&values).unwrap();
        assert_eq!(reading.counter, 7);
        assert_eq!(reading.voltage, 230.1);
        assert_eq!(reading.frequency, 50.0);
        assert_eq!(reading.values(), values.to_vec());

        assert!(Sample::assemble(&values[..2]).is_none());
        let mut surplus = values.to_vec();
        surplus.push(Value::Int(0));
        assert!(Sample::assemble(&surplus).is_none());
    }

    #[test]
    fn test_fields_pair_labels_and_values() {
        let reading = Sample {
            counter: 1,
            voltage: 2.0,
            frequency: 3.0,
        };
        let fields: Vec<_> = reading
            .fields()
            .into_iter()
            .map(|(register, value)| (register.label, value))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("counter", Value::Int(1)),
                ("voltage", Value::Float(2.0)),
                ("frequency", Value::Float(3.0)),
            ]
        );
    }
}
