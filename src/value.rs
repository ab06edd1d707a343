//! # Register Value Codec
//!
//! Core types for mapping application values onto raw 16-bit register words:
//! the semantic type tags, the word-order policy for multi-word spans, and
//! the pure byte-level encode/decode functions.
//!
//! Registers are 16 bits wide and big-endian on the wire. Values wider than
//! one register occupy a contiguous run of words whose sequencing is governed
//! by [`WordOrder`]: word order reorders whole words only, never the two
//! bytes inside a word.
//!
//! ```rust
//! use regpoll::{SemanticValue, ValueType, WordOrder};
//!
//! let bytes = ValueType::U32
//!     .encode(&SemanticValue::Unsigned(0x0001_0002), WordOrder::LswFirst)
//!     .unwrap();
//! assert_eq!(bytes, vec![0x00, 0x02, 0x00, 0x01]);
//!
//! let value = ValueType::U32.decode(&bytes, WordOrder::LswFirst).unwrap();
//! assert_eq!(value, SemanticValue::Unsigned(0x0001_0002));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{PollError, PollResult};

/// Sequencing of 16-bit words within a multi-word value.
///
/// Applies only to spans wider than one word. Byte order within each word is
/// always big-endian, matching the Modbus wire convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// Most significant word at the lowest register address.
    #[default]
    MswFirst,
    /// Least significant word at the lowest register address.
    LswFirst,
}

impl WordOrder {
    /// Reorder a big-endian byte sequence into (or out of) wire order.
    ///
    /// The transform is its own inverse: applying it twice returns the
    /// original sequence.
    pub fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            WordOrder::MswFirst => bytes.to_vec(),
            WordOrder::LswFirst => bytes
                .chunks(2)
                .rev()
                .flat_map(|word| word.iter().copied())
                .collect(),
        }
    }
}

/// Semantic type of a register element.
///
/// One parameterized codec keyed by type tag replaces a class per
/// width/signedness combination: the tag carries both the interpretation and
/// the span width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Single register, zero is false, any other value is true.
    Bool,
    /// Unsigned 16-bit integer, one register.
    U16,
    /// Signed 16-bit integer (two's complement), one register.
    I16,
    /// Unsigned 32-bit integer, two registers.
    U32,
    /// Signed 32-bit integer, two registers.
    I32,
    /// Unsigned 64-bit integer, four registers.
    U64,
    /// Signed 64-bit integer, four registers.
    I64,
    /// Unsigned 128-bit integer, eight registers.
    U128,
    /// Signed 128-bit integer, eight registers.
    I128,
    /// IEEE-754 single precision, two registers.
    F32,
    /// IEEE-754 double precision, four registers.
    F64,
    /// Fixed-length ASCII string, two characters per register.
    Text { words: u16 },
    /// Unsigned 16-bit integer scaled by a base-10 exponent.
    ///
    /// A raw register value of 205 with exponent -1 decodes to 20.5.
    ScaledU16 { exponent: i8 },
    /// Signed 16-bit integer scaled by a base-10 exponent.
    ScaledI16 { exponent: i8 },
    /// Unsigned 32-bit integer scaled by a base-10 exponent.
    ScaledU32 { exponent: i8 },
    /// Signed 32-bit integer scaled by a base-10 exponent.
    ScaledI32 { exponent: i8 },
}

impl ValueType {
    /// Span width in 16-bit registers.
    pub fn width_words(&self) -> u16 {
        match self {
            ValueType::Bool | ValueType::U16 | ValueType::I16 => 1,
            ValueType::U32 | ValueType::I32 | ValueType::F32 => 2,
            ValueType::U64 | ValueType::I64 | ValueType::F64 => 4,
            ValueType::U128 | ValueType::I128 => 8,
            ValueType::Text { words } => *words,
            ValueType::ScaledU16 { .. } | ValueType::ScaledI16 { .. } => 1,
            ValueType::ScaledU32 { .. } | ValueType::ScaledI32 { .. } => 2,
        }
    }

    /// Span width in bytes.
    pub fn width_bytes(&self) -> usize {
        self.width_words() as usize * 2
    }

    /// Decode a wire-order byte slice into a semantic value.
    ///
    /// The slice length must equal [`width_bytes`](Self::width_bytes);
    /// anything else is a [`PollError::MalformedPayload`].
    pub fn decode(&self, bytes: &[u8], order: WordOrder) -> PollResult<SemanticValue> {
        if bytes.len() != self.width_bytes() {
            return Err(PollError::malformed_payload(self.width_bytes(), bytes.len()));
        }

        let natural = order.apply(bytes);
        let value = match self {
            ValueType::Bool => SemanticValue::Bool(natural != [0x00, 0x00]),
            ValueType::U16 => {
                SemanticValue::Unsigned(u16::from_be_bytes(to_array(&natural)?) as u128)
            }
            ValueType::I16 => {
                SemanticValue::Signed(i16::from_be_bytes(to_array(&natural)?) as i128)
            }
            ValueType::U32 => {
                SemanticValue::Unsigned(u32::from_be_bytes(to_array(&natural)?) as u128)
            }
            ValueType::I32 => {
                SemanticValue::Signed(i32::from_be_bytes(to_array(&natural)?) as i128)
            }
            ValueType::U64 => {
                SemanticValue::Unsigned(u64::from_be_bytes(to_array(&natural)?) as u128)
            }
            ValueType::I64 => {
                SemanticValue::Signed(i64::from_be_bytes(to_array(&natural)?) as i128)
            }
            ValueType::U128 => SemanticValue::Unsigned(u128::from_be_bytes(to_array(&natural)?)),
            ValueType::I128 => SemanticValue::Signed(i128::from_be_bytes(to_array(&natural)?)),
            ValueType::F32 => {
                SemanticValue::Float(f32::from_be_bytes(to_array(&natural)?) as f64)
            }
            ValueType::F64 => SemanticValue::Float(f64::from_be_bytes(to_array(&natural)?)),
            ValueType::Text { .. } => {
                let text: String = natural
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect();
                SemanticValue::Text(text)
            }
            ValueType::ScaledU16 { exponent } => {
                let raw = u16::from_be_bytes(to_array(&natural)?);
                SemanticValue::Float(raw as f64 * scale_factor(*exponent))
            }
            ValueType::ScaledI16 { exponent } => {
                let raw = i16::from_be_bytes(to_array(&natural)?);
                SemanticValue::Float(raw as f64 * scale_factor(*exponent))
            }
            ValueType::ScaledU32 { exponent } => {
                let raw = u32::from_be_bytes(to_array(&natural)?);
                SemanticValue::Float(raw as f64 * scale_factor(*exponent))
            }
            ValueType::ScaledI32 { exponent } => {
                let raw = i32::from_be_bytes(to_array(&natural)?);
                SemanticValue::Float(raw as f64 * scale_factor(*exponent))
            }
        };

        Ok(value)
    }

    /// Encode a semantic value into a wire-order byte sequence.
    ///
    /// Returns [`PollError::Encoding`] when the value cannot be represented
    /// in this type's width and scale (overflow, wrong variant, non-finite
    /// float, over-long text).
    pub fn encode(&self, value: &SemanticValue, order: WordOrder) -> PollResult<Vec<u8>> {
        let natural = match self {
            ValueType::Bool => match value {
                SemanticValue::Bool(b) => {
                    vec![0x00, if *b { 0x01 } else { 0x00 }]
                }
                other => return Err(type_mismatch("bool", other)),
            },
            ValueType::U16 => (value.to_unsigned("u16")? as u16).to_be_bytes().to_vec(),
            ValueType::I16 => (value.to_signed("i16")? as i16).to_be_bytes().to_vec(),
            ValueType::U32 => (value.to_unsigned_bounded("u32", u32::MAX as u128)? as u32)
                .to_be_bytes()
                .to_vec(),
            ValueType::I32 => (value
                .to_signed_bounded("i32", i32::MIN as i128, i32::MAX as i128)?
                as i32)
                .to_be_bytes()
                .to_vec(),
            ValueType::U64 => (value.to_unsigned_bounded("u64", u64::MAX as u128)? as u64)
                .to_be_bytes()
                .to_vec(),
            ValueType::I64 => (value
                .to_signed_bounded("i64", i64::MIN as i128, i64::MAX as i128)?
                as i64)
                .to_be_bytes()
                .to_vec(),
            ValueType::U128 => value
                .to_unsigned_bounded("u128", u128::MAX)?
                .to_be_bytes()
                .to_vec(),
            ValueType::I128 => value
                .to_signed_bounded("i128", i128::MIN, i128::MAX)?
                .to_be_bytes()
                .to_vec(),
            ValueType::F32 => {
                let wide = match value {
                    SemanticValue::Float(f) => *f,
                    SemanticValue::Unsigned(u) => *u as f64,
                    SemanticValue::Signed(i) => *i as f64,
                    other => return Err(type_mismatch("f32", other)),
                };
                let narrowed = wide as f32;
                // A finite f64 must stay finite after narrowing; infinity
                // passed in deliberately is preserved.
                if wide.is_finite() && !narrowed.is_finite() {
                    return Err(range_error(wide, "f32"));
                }
                narrowed.to_be_bytes().to_vec()
            }
            ValueType::F64 => match value {
                SemanticValue::Float(f) => f.to_be_bytes().to_vec(),
                SemanticValue::Unsigned(u) => (*u as f64).to_be_bytes().to_vec(),
                SemanticValue::Signed(i) => (*i as f64).to_be_bytes().to_vec(),
                other => return Err(type_mismatch("f64", other)),
            },
            ValueType::Text { words } => match value {
                SemanticValue::Text(text) => {
                    let capacity = *words as usize * 2;
                    let bytes = text.as_bytes();
                    if bytes.len() > capacity {
                        return Err(PollError::encoding(format!(
                            "text '{}' exceeds {} characters",
                            text, capacity
                        )));
                    }
                    let mut padded = bytes.to_vec();
                    padded.resize(capacity, 0);
                    padded
                }
                other => return Err(type_mismatch("text", other)),
            },
            ValueType::ScaledU16 { exponent } => {
                let raw = unscale(value, *exponent, 0.0, u16::MAX as f64)?;
                (raw as u16).to_be_bytes().to_vec()
            }
            ValueType::ScaledI16 { exponent } => {
                let raw = unscale(value, *exponent, i16::MIN as f64, i16::MAX as f64)?;
                (raw as i16).to_be_bytes().to_vec()
            }
            ValueType::ScaledU32 { exponent } => {
                let raw = unscale(value, *exponent, 0.0, u32::MAX as f64)?;
                (raw as u32).to_be_bytes().to_vec()
            }
            ValueType::ScaledI32 { exponent } => {
                let raw = unscale(value, *exponent, i32::MIN as f64, i32::MAX as f64)?;
                (raw as i32).to_be_bytes().to_vec()
            }
        };

        Ok(order.apply(&natural))
    }
}

/// An application-level value flowing between register elements and the
/// process value store.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticValue {
    Bool(bool),
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Text(String),
}

impl SemanticValue {
    /// View as f64 where a numeric interpretation exists.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SemanticValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SemanticValue::Unsigned(u) => Some(*u as f64),
            SemanticValue::Signed(i) => Some(*i as f64),
            SemanticValue::Float(f) => Some(*f),
            SemanticValue::Text(_) => None,
        }
    }

    fn to_unsigned(&self, target: &str) -> PollResult<u128> {
        self.to_unsigned_bounded(target, u16::MAX as u128)
    }

    fn to_unsigned_bounded(&self, target: &str, max: u128) -> PollResult<u128> {
        let raw = match self {
            SemanticValue::Unsigned(u) => *u,
            SemanticValue::Signed(i) if *i >= 0 => *i as u128,
            SemanticValue::Signed(i) => {
                return Err(PollError::encoding(format!(
                    "negative value {} for unsigned {}",
                    i, target
                )))
            }
            SemanticValue::Float(f) => {
                let rounded = check_finite(*f, target)?.round();
                if rounded < 0.0 || rounded > max as f64 {
                    return Err(range_error(*f, target));
                }
                rounded as u128
            }
            other => return Err(type_mismatch(target, other)),
        };
        if raw > max {
            return Err(PollError::encoding(format!(
                "value {} exceeds {} range",
                raw, target
            )));
        }
        Ok(raw)
    }

    fn to_signed(&self, target: &str) -> PollResult<i128> {
        self.to_signed_bounded(target, i16::MIN as i128, i16::MAX as i128)
    }

    fn to_signed_bounded(&self, target: &str, min: i128, max: i128) -> PollResult<i128> {
        let raw = match self {
            SemanticValue::Signed(i) => *i,
            SemanticValue::Unsigned(u) if *u <= max as u128 => *u as i128,
            SemanticValue::Unsigned(u) => {
                return Err(PollError::encoding(format!(
                    "value {} exceeds {} range",
                    u, target
                )))
            }
            SemanticValue::Float(f) => {
                let rounded = check_finite(*f, target)?.round();
                if rounded < min as f64 || rounded > max as f64 {
                    return Err(range_error(*f, target));
                }
                rounded as i128
            }
            other => return Err(type_mismatch(target, other)),
        };
        if raw < min || raw > max {
            return Err(PollError::encoding(format!(
                "value {} exceeds {} range",
                raw, target
            )));
        }
        Ok(raw)
    }
}

impl std::fmt::Display for SemanticValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticValue::Bool(b) => write!(f, "{}", b),
            SemanticValue::Unsigned(u) => write!(f, "{}", u),
            SemanticValue::Signed(i) => write!(f, "{}", i),
            SemanticValue::Float(v) => write!(f, "{}", v),
            SemanticValue::Text(t) => write!(f, "{}", t),
        }
    }
}

/// 10^exponent as f64.
fn scale_factor(exponent: i8) -> f64 {
    10f64.powi(exponent as i32)
}

/// Invert a decimal scale: round(value / 10^exponent) with a range check on
/// the resulting raw integer.
fn unscale(value: &SemanticValue, exponent: i8, min: f64, max: f64) -> PollResult<i64> {
    let semantic = value
        .as_f64()
        .ok_or_else(|| type_mismatch("scaled integer", value))?;
    let raw = (check_finite(semantic, "scaled integer")? / scale_factor(exponent)).round();
    if raw < min || raw > max {
        return Err(PollError::encoding(format!(
            "value {} out of range after scaling by 10^{}",
            semantic, exponent
        )));
    }
    Ok(raw as i64)
}

fn check_finite(value: f64, target: &str) -> PollResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PollError::encoding(format!(
            "non-finite value for {}",
            target
        )))
    }
}

fn range_error(value: f64, target: &str) -> PollError {
    PollError::encoding(format!("value {} exceeds {} range", value, target))
}

fn type_mismatch(target: &str, value: &SemanticValue) -> PollError {
    PollError::encoding(format!("cannot encode {:?} as {}", value, target))
}

fn to_array<const N: usize>(bytes: &[u8]) -> PollResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| PollError::malformed_payload(N, bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_order_images() {
        let msw = ValueType::U32
            .encode(&SemanticValue::Unsigned(0x0001_0002), WordOrder::MswFirst)
            .unwrap();
        let lsw = ValueType::U32
            .encode(&SemanticValue::Unsigned(0x0001_0002), WordOrder::LswFirst)
            .unwrap();
        assert_eq!(msw, vec![0x00, 0x01, 0x00, 0x02]);
        assert_eq!(lsw, vec![0x00, 0x02, 0x00, 0x01]);

        assert_eq!(
            ValueType::U32.decode(&msw, WordOrder::MswFirst).unwrap(),
            SemanticValue::Unsigned(0x0001_0002)
        );
        assert_eq!(
            ValueType::U32.decode(&lsw, WordOrder::LswFirst).unwrap(),
            SemanticValue::Unsigned(0x0001_0002)
        );
    }

    #[test]
    fn test_word_order_involution() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0x12, 0x34];
        let once = WordOrder::LswFirst.apply(&bytes);
        assert_eq!(once, vec![0x12, 0x34, 0xBE, 0xEF, 0xDE, 0xAD]);
        assert_eq!(WordOrder::LswFirst.apply(&once), bytes.to_vec());
    }

    #[test]
    fn test_integer_round_trips() {
        let cases: Vec<(ValueType, SemanticValue)> = vec![
            (ValueType::U16, SemanticValue::Unsigned(0xFFFF)),
            (ValueType::I16, SemanticValue::Signed(-1)),
            (ValueType::I16, SemanticValue::Signed(i16::MIN as i128)),
            (ValueType::U32, SemanticValue::Unsigned(u32::MAX as u128)),
            (ValueType::I32, SemanticValue::Signed(i32::MIN as i128)),
            (ValueType::U64, SemanticValue::Unsigned(u64::MAX as u128)),
            (ValueType::I64, SemanticValue::Signed(i64::MIN as i128)),
            (ValueType::U128, SemanticValue::Unsigned(u128::MAX)),
            (ValueType::I128, SemanticValue::Signed(i128::MIN)),
        ];

        for (ty, value) in cases {
            for order in [WordOrder::MswFirst, WordOrder::LswFirst] {
                let bytes = ty.encode(&value, order).unwrap();
                assert_eq!(bytes.len(), ty.width_bytes());
                assert_eq!(ty.decode(&bytes, order).unwrap(), value, "{:?}", ty);
            }
        }
    }

    #[test]
    fn test_float_round_trips() {
        let bytes = ValueType::F32
            .encode(&SemanticValue::Float(12.5), WordOrder::MswFirst)
            .unwrap();
        assert_eq!(
            ValueType::F32.decode(&bytes, WordOrder::MswFirst).unwrap(),
            SemanticValue::Float(12.5)
        );

        let bytes = ValueType::F64
            .encode(&SemanticValue::Float(-273.15), WordOrder::LswFirst)
            .unwrap();
        assert_eq!(
            ValueType::F64.decode(&bytes, WordOrder::LswFirst).unwrap(),
            SemanticValue::Float(-273.15)
        );
    }

    #[test]
    fn test_bool_codec() {
        let ty = ValueType::Bool;
        assert_eq!(
            ty.decode(&[0x00, 0x00], WordOrder::MswFirst).unwrap(),
            SemanticValue::Bool(false)
        );
        assert_eq!(
            ty.decode(&[0x00, 0x01], WordOrder::MswFirst).unwrap(),
            SemanticValue::Bool(true)
        );
        assert_eq!(
            ty.decode(&[0xFF, 0x00], WordOrder::MswFirst).unwrap(),
            SemanticValue::Bool(true)
        );
        assert_eq!(
            ty.encode(&SemanticValue::Bool(true), WordOrder::MswFirst)
                .unwrap(),
            vec![0x00, 0x01]
        );
    }

    #[test]
    fn test_text_codec() {
        let ty = ValueType::Text { words: 4 };
        let bytes = ty
            .encode(&SemanticValue::Text("ACME".to_string()), WordOrder::MswFirst)
            .unwrap();
        assert_eq!(bytes, vec![b'A', b'C', b'M', b'E', 0, 0, 0, 0]);
        assert_eq!(
            ty.decode(&bytes, WordOrder::MswFirst).unwrap(),
            SemanticValue::Text("ACME".to_string())
        );

        let err = ty.encode(
            &SemanticValue::Text("TOO LONG TEXT".to_string()),
            WordOrder::MswFirst,
        );
        assert!(matches!(err, Err(PollError::Encoding { .. })));
    }

    #[test]
    fn test_scaled_decode() {
        let ty = ValueType::ScaledU16 { exponent: -1 };
        let value = ty.decode(&[0x00, 0xCD], WordOrder::MswFirst).unwrap();
        assert_eq!(value, SemanticValue::Float(20.5));
    }

    #[test]
    fn test_scaled_encode_rounds() {
        let ty = ValueType::ScaledU16 { exponent: -1 };
        let bytes = ty
            .encode(&SemanticValue::Float(20.5), WordOrder::MswFirst)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0xCD]);

        let ty = ValueType::ScaledI16 { exponent: 2 };
        let bytes = ty
            .encode(&SemanticValue::Float(-1200.0), WordOrder::MswFirst)
            .unwrap();
        assert_eq!(i16::from_be_bytes([bytes[0], bytes[1]]), -12);
    }

    #[test]
    fn test_scaled_encode_overflow() {
        let ty = ValueType::ScaledU16 { exponent: -1 };
        let err = ty.encode(&SemanticValue::Float(7000.0), WordOrder::MswFirst);
        assert!(matches!(err, Err(PollError::Encoding { .. })));
    }

    #[test]
    fn test_encode_range_checks() {
        let err = ValueType::U16.encode(&SemanticValue::Unsigned(70000), WordOrder::MswFirst);
        assert!(matches!(err, Err(PollError::Encoding { .. })));

        let err = ValueType::I16.encode(&SemanticValue::Signed(40000), WordOrder::MswFirst);
        assert!(matches!(err, Err(PollError::Encoding { .. })));

        let err = ValueType::U32.encode(&SemanticValue::Signed(-1), WordOrder::MswFirst);
        assert!(matches!(err, Err(PollError::Encoding { .. })));

        let err = ValueType::F32.encode(&SemanticValue::Bool(true), WordOrder::MswFirst);
        assert!(matches!(err, Err(PollError::Encoding { .. })));
    }

    #[test]
    fn test_f32_narrowing_overflow() {
        let err = ValueType::F32.encode(&SemanticValue::Float(1e300), WordOrder::MswFirst);
        assert!(matches!(err, Err(PollError::Encoding { .. })));

        // The widest finite f32 still encodes.
        let bytes = ValueType::F32
            .encode(&SemanticValue::Float(f32::MAX as f64), WordOrder::MswFirst)
            .unwrap();
        assert_eq!(
            ValueType::F32.decode(&bytes, WordOrder::MswFirst).unwrap(),
            SemanticValue::Float(f32::MAX as f64)
        );

        // Infinity passed in deliberately is preserved, not rejected.
        let bytes = ValueType::F32
            .encode(&SemanticValue::Float(f64::INFINITY), WordOrder::MswFirst)
            .unwrap();
        assert_eq!(bytes, f32::INFINITY.to_be_bytes().to_vec());
    }

    #[test]
    fn test_decode_length_check() {
        let err = ValueType::U32.decode(&[0x00, 0x01], WordOrder::MswFirst);
        assert_eq!(err, Err(PollError::malformed_payload(4, 2)));
    }

    #[test]
    fn test_decode_idempotent() {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        let first = ValueType::U32.decode(&bytes, WordOrder::LswFirst).unwrap();
        let second = ValueType::U32.decode(&bytes, WordOrder::LswFirst).unwrap();
        assert_eq!(first, second);
    }
}
