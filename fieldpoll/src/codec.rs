use crate::error::{DecodeError, EncodingError};
use crate::link::RegisterSlice;
use crate::point::{BitField, PointSpec};
use crate::types::{PointValue, RawType, RegisterValues};

/// Converts between wire values and typed point values
///
/// The engine only counts registers. Everything about their layout is decided here,
/// once per point, so downstream consumers never see raw words.
pub trait ValueCodec: Send + Sync {
    /// Decode the value of `point` from the wire values it occupies
    fn decode(&self, point: &PointSpec, values: RegisterSlice<'_>)
        -> Result<PointValue, DecodeError>;

    /// Encode `value` into the wire values written for `point`
    ///
    /// `current` is the present raw value of the register, supplied for bit-field points
    /// which must preserve the bits outside the field.
    fn encode(
        &self,
        point: &PointSpec,
        value: &PointValue,
        current: Option<u16>,
    ) -> Result<RegisterValues, EncodingError>;
}

/// Standard layout of register-addressed devices
///
/// * registers are big-endian words, the high word comes first
/// * `byte_swap` swaps the two bytes of every register
/// * `word_swap` reverses the register order of 32 and 64-bit values
/// * strings honor `byte_swap` only and lose trailing NULs
/// * `scale` divides on decode and multiplies on encode
#[derive(Copy, Clone, Debug, Default)]
pub struct RegisterCodec;

impl ValueCodec for RegisterCodec {
    fn decode(
        &self,
        point: &PointSpec,
        values: RegisterSlice<'_>,
    ) -> Result<PointValue, DecodeError> {
        let required = point.quantity() as usize;
        if values.len() < required {
            return Err(DecodeError::InsufficientValues {
                required,
                available: values.len(),
            });
        }

        let words = match values {
            RegisterSlice::Bits(bits) => {
                if !point.class.is_bit() {
                    return Err(DecodeError::ClassMismatch(point.class));
                }
                return Ok(PointValue::Bool(bits[0]));
            }
            RegisterSlice::Words(words) => {
                if point.class.is_bit() {
                    return Err(DecodeError::ClassMismatch(point.class));
                }
                &words[..required]
            }
        };

        let words: Vec<u16> = words
            .iter()
            .map(|x| if point.byte_swap { x.swap_bytes() } else { *x })
            .collect();

        let value = match (point.raw_type, point.bits) {
            (RawType::String(_), _) => return Ok(decode_text(&words)),
            (RawType::Bool, _) => return Ok(PointValue::Bool(words[0] != 0)),
            (RawType::Uint16 | RawType::Int16, Some(field)) => {
                PointValue::Int(extract_bits(words[0], field) as i64)
            }
            (RawType::Uint16, None) => PointValue::Int(words[0] as i64),
            (RawType::Int16, None) => PointValue::Int(words[0] as i16 as i64),
            (RawType::Uint32, _) => PointValue::Int(join(&words, point.word_swap) as u32 as i64),
            (RawType::Int32, _) => {
                PointValue::Int(join(&words, point.word_swap) as u32 as i32 as i64)
            }
            (RawType::Float32, _) => {
                PointValue::Float(f32::from_bits(join(&words, point.word_swap) as u32) as f64)
            }
            (RawType::Uint64, _) => {
                let x = join(&words, point.word_swap);
                match i64::try_from(x) {
                    Ok(x) => PointValue::Int(x),
                    Err(_) => PointValue::Float(x as f64),
                }
            }
            (RawType::Int64, _) => PointValue::Int(join(&words, point.word_swap) as i64),
            (RawType::Float64, _) => {
                PointValue::Float(f64::from_bits(join(&words, point.word_swap)))
            }
        };

        Ok(apply_scale(value, point.scale))
    }

    fn encode(
        &self,
        point: &PointSpec,
        value: &PointValue,
        current: Option<u16>,
    ) -> Result<RegisterValues, EncodingError> {
        if point.class.is_bit() {
            return Ok(RegisterValues::Bits(vec![to_bool(point.raw_type, value)?]));
        }

        let raw_type = point.raw_type;

        if let Some(field) = point.bits {
            let current = current.ok_or(EncodingError::MissingCurrentValue)?;
            let current = if point.byte_swap {
                current.swap_bytes()
            } else {
                current
            };
            let x = to_integer(raw_type, unscale(value, point.scale)?)?;
            let max = (1i128 << field.length) - 1;
            if x < 0 || x > max {
                return Err(EncodingError::BitFieldOverflow {
                    value: x as i64,
                    length: field.length,
                });
            }
            let merged = merge_bits(current, x as u16, field);
            return Ok(RegisterValues::Words(swap_bytes(
                vec![merged],
                point.byte_swap,
            )));
        }

        let bits: u64 = match raw_type {
            RawType::Bool => to_bool(raw_type, value)? as u64,
            RawType::Uint16 => in_range(raw_type, value, point.scale, 0, u16::MAX as i128)? as u64,
            RawType::Int16 => {
                in_range(raw_type, value, point.scale, i16::MIN as i128, i16::MAX as i128)? as i16
                    as u16 as u64
            }
            RawType::Uint32 => in_range(raw_type, value, point.scale, 0, u32::MAX as i128)? as u64,
            RawType::Int32 => {
                in_range(raw_type, value, point.scale, i32::MIN as i128, i32::MAX as i128)? as i32
                    as u32 as u64
            }
            RawType::Uint64 => in_range(raw_type, value, point.scale, 0, u64::MAX as i128)? as u64,
            RawType::Int64 => {
                in_range(raw_type, value, point.scale, i64::MIN as i128, i64::MAX as i128)? as i64
                    as u64
            }
            RawType::Float32 => {
                let x = to_float(raw_type, unscale(value, point.scale)?)?;
                if x.is_finite() && x.abs() > f32::MAX as f64 {
                    return Err(EncodingError::OutOfRange {
                        raw_type,
                        value: x.to_string(),
                    });
                }
                (x as f32).to_bits() as u64
            }
            RawType::Float64 => to_float(raw_type, unscale(value, point.scale)?)?.to_bits(),
            RawType::String(registers) => {
                let words = encode_text(value, registers)?;
                return Ok(RegisterValues::Words(swap_bytes(words, point.byte_swap)));
            }
        };

        let words = split(bits, raw_type.registers(), point.word_swap);
        Ok(RegisterValues::Words(swap_bytes(words, point.byte_swap)))
    }
}

fn extract_bits(word: u16, field: BitField) -> u16 {
    let mask = field_mask(field);
    (word & mask) >> field.offset
}

fn merge_bits(word: u16, value: u16, field: BitField) -> u16 {
    let mask = field_mask(field);
    (word & !mask) | ((value << field.offset) & mask)
}

fn field_mask(field: BitField) -> u16 {
    let ones = ((1u32 << field.length) - 1) as u16;
    ones << field.offset
}

/// big-endian composition, high word first unless `word_swap`
fn join(words: &[u16], word_swap: bool) -> u64 {
    let fold = |acc: u64, x: &u16| (acc << 16) | *x as u64;
    if word_swap {
        words.iter().rev().fold(0, fold)
    } else {
        words.iter().fold(0, fold)
    }
}

fn split(bits: u64, registers: u16, word_swap: bool) -> Vec<u16> {
    let mut words: Vec<u16> = (0..registers)
        .rev()
        .map(|i| (bits >> (16 * i as u32)) as u16)
        .collect();
    if word_swap {
        words.reverse();
    }
    words
}

fn swap_bytes(words: Vec<u16>, byte_swap: bool) -> Vec<u16> {
    if byte_swap {
        words.into_iter().map(u16::swap_bytes).collect()
    } else {
        words
    }
}

fn decode_text(words: &[u16]) -> PointValue {
    let mut bytes: Vec<u8> = words.iter().flat_map(|x| x.to_be_bytes()).collect();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(x) => PointValue::Text(x),
        Err(err) => PointValue::Bytes(err.into_bytes()),
    }
}

fn encode_text(value: &PointValue, registers: u16) -> Result<Vec<u16>, EncodingError> {
    let bytes: &[u8] = match value {
        PointValue::Text(x) => x.as_bytes(),
        PointValue::Bytes(x) => x,
        other => {
            return Err(EncodingError::TypeMismatch {
                raw_type: RawType::String(registers),
                found: other.kind(),
            })
        }
    };

    let capacity = registers as usize * 2;
    if bytes.len() > capacity {
        return Err(EncodingError::StringTooLong {
            len: bytes.len(),
            registers,
        });
    }

    let mut padded = bytes.to_vec();
    padded.resize(capacity, 0);
    Ok(padded
        .chunks(2)
        .map(|x| u16::from_be_bytes([x[0], x[1]]))
        .collect())
}

fn apply_scale(value: PointValue, scale: Option<f64>) -> PointValue {
    match (scale, value) {
        (Some(scale), PointValue::Int(x)) => PointValue::Float(x as f64 / scale),
        (Some(scale), PointValue::Float(x)) => PointValue::Float(x / scale),
        (_, value) => value,
    }
}

/// Undo the decode divisor, text is parsed as a number first
fn unscale(value: &PointValue, scale: Option<f64>) -> Result<PointValue, EncodingError> {
    let value = match value {
        PointValue::Text(x) => parse_number(x)?,
        other => other.clone(),
    };
    Ok(match (scale, value) {
        (Some(scale), PointValue::Int(x)) => PointValue::Float(x as f64 * scale),
        (Some(scale), PointValue::Float(x)) => PointValue::Float(x * scale),
        (_, value) => value,
    })
}

fn parse_number(text: &str) -> Result<PointValue, EncodingError> {
    let text = text.trim();
    if let Ok(x) = text.parse::<i64>() {
        return Ok(PointValue::Int(x));
    }
    text.parse::<f64>()
        .map(PointValue::Float)
        .map_err(|_| EncodingError::NotANumber(text.to_string()))
}

fn to_bool(raw_type: RawType, value: &PointValue) -> Result<bool, EncodingError> {
    match value {
        PointValue::Bool(x) => Ok(*x),
        PointValue::Int(x) => Ok(*x != 0),
        PointValue::Float(x) => Ok(*x != 0.0),
        PointValue::Text(x) => match x.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(true),
            "false" | "off" | "0" => Ok(false),
            _ => Err(EncodingError::NotANumber(x.clone())),
        },
        PointValue::Bytes(_) => Err(EncodingError::TypeMismatch {
            raw_type,
            found: value.kind(),
        }),
    }
}

fn to_integer(raw_type: RawType, value: PointValue) -> Result<i128, EncodingError> {
    match value {
        PointValue::Bool(x) => Ok(x as i128),
        PointValue::Int(x) => Ok(x as i128),
        PointValue::Float(x) => {
            if !x.is_finite() {
                return Err(EncodingError::OutOfRange {
                    raw_type,
                    value: x.to_string(),
                });
            }
            Ok(x.round() as i128)
        }
        other => Err(EncodingError::TypeMismatch {
            raw_type,
            found: other.kind(),
        }),
    }
}

fn to_float(raw_type: RawType, value: PointValue) -> Result<f64, EncodingError> {
    match value {
        PointValue::Bool(x) => Ok(if x { 1.0 } else { 0.0 }),
        PointValue::Int(x) => Ok(x as f64),
        PointValue::Float(x) => Ok(x),
        other => Err(EncodingError::TypeMismatch {
            raw_type,
            found: other.kind(),
        }),
    }
}

fn in_range(
    raw_type: RawType,
    value: &PointValue,
    scale: Option<f64>,
    min: i128,
    max: i128,
) -> Result<i128, EncodingError> {
    let x = to_integer(raw_type, unscale(value, scale)?)?;
    if x < min || x > max {
        return Err(EncodingError::OutOfRange {
            raw_type,
            value: x.to_string(),
        });
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RegisterClass, UnitId};

    fn point(raw_type: RawType) -> PointSpec {
        PointSpec::new(
            "dev",
            "p",
            UnitId::new(1),
            RegisterClass::HoldingRegister,
            0,
            raw_type,
        )
    }

    fn decode(point: &PointSpec, words: &[u16]) -> PointValue {
        RegisterCodec
            .decode(point, RegisterSlice::Words(words))
            .unwrap()
    }

    fn encode(point: &PointSpec, value: PointValue) -> Result<RegisterValues, EncodingError> {
        RegisterCodec.encode(point, &value, None)
    }

    #[test]
    fn decodes_high_word_first() {
        assert_eq!(
            decode(&point(RawType::Uint32), &[0x0001, 0x0002]),
            PointValue::Int(0x0001_0002)
        );
        assert_eq!(
            decode(&point(RawType::Uint32).with_swaps(false, true), &[0x0001, 0x0002]),
            PointValue::Int(0x0002_0001)
        );
    }

    #[test]
    fn byte_swap_applies_inside_each_register() {
        assert_eq!(
            decode(&point(RawType::Uint16).with_swaps(true, false), &[0x1234]),
            PointValue::Int(0x3412)
        );
    }

    #[test]
    fn decodes_signed_and_float_types() {
        assert_eq!(decode(&point(RawType::Int16), &[0xFFFE]), PointValue::Int(-2));
        assert_eq!(
            decode(&point(RawType::Int32), &[0xFFFF, 0xFFFF]),
            PointValue::Int(-1)
        );
        assert_eq!(
            decode(&point(RawType::Float32), &[0x3FC0, 0x0000]),
            PointValue::Float(1.5)
        );
        assert_eq!(
            decode(&point(RawType::Int64), &[0xFFFF, 0xFFFF, 0xFFFF, 0xFFF6]),
            PointValue::Int(-10)
        );
        let bits = 2.25f64.to_bits();
        let words = split(bits, 4, false);
        assert_eq!(decode(&point(RawType::Float64), &words), PointValue::Float(2.25));
    }

    #[test]
    fn large_unsigned_64_bit_values_decode_as_float() {
        assert_eq!(
            decode(&point(RawType::Uint64), &[0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF]),
            PointValue::Float(u64::MAX as f64)
        );
    }

    #[test]
    fn scale_divides_on_decode_and_multiplies_on_encode() {
        let p = point(RawType::Uint16).with_scale(10.0);
        assert_eq!(decode(&p, &[235]), PointValue::Float(23.5));
        assert_eq!(
            encode(&p, PointValue::Float(23.5)),
            Ok(RegisterValues::Words(vec![235]))
        );
    }

    #[test]
    fn strings_trim_trailing_nuls() {
        let p = point(RawType::String(3));
        assert_eq!(
            decode(&p, &[0x4142, 0x4300, 0x0000]),
            PointValue::Text("ABC".to_string())
        );
        assert_eq!(
            decode(&p, &[0xFF41, 0x0000, 0x0000]),
            PointValue::Bytes(vec![0xFF, 0x41])
        );
    }

    #[test]
    fn strings_are_padded_and_bounded() {
        let p = point(RawType::String(2));
        assert_eq!(
            encode(&p, PointValue::Text("ABC".into())),
            Ok(RegisterValues::Words(vec![0x4142, 0x4300]))
        );
        assert_eq!(
            encode(&p, PointValue::Text("ABCDE".into())),
            Err(EncodingError::StringTooLong {
                len: 5,
                registers: 2
            })
        );
    }

    #[test]
    fn bit_fields_are_extracted() {
        let p = point(RawType::Uint16).with_bits(4, 3);
        assert_eq!(decode(&p, &[0b0000_0000_0101_1111]), PointValue::Int(0b101));
    }

    #[test]
    fn bit_field_encoding_preserves_other_bits() {
        let p = point(RawType::Uint16).with_bits(4, 3);
        assert_eq!(
            RegisterCodec.encode(&p, &PointValue::Int(0b010), Some(0xFFFF)),
            Ok(RegisterValues::Words(vec![0b1111_1111_1010_1111]))
        );
        assert_eq!(
            RegisterCodec.encode(&p, &PointValue::Int(8), Some(0)),
            Err(EncodingError::BitFieldOverflow {
                value: 8,
                length: 3
            })
        );
        assert_eq!(
            RegisterCodec.encode(&p, &PointValue::Int(1), None),
            Err(EncodingError::MissingCurrentValue)
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            encode(&point(RawType::Uint16), PointValue::Int(70000)),
            Err(EncodingError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode(&point(RawType::Int16), PointValue::Int(-40000)),
            Err(EncodingError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode(&point(RawType::Float32), PointValue::Float(1e300)),
            Err(EncodingError::OutOfRange { .. })
        ));
    }

    #[test]
    fn text_values_are_parsed_as_numbers() {
        assert_eq!(
            encode(&point(RawType::Int32), PointValue::Text(" -2 ".into())),
            Ok(RegisterValues::Words(vec![0xFFFF, 0xFFFE]))
        );
        assert_eq!(
            encode(&point(RawType::Int32), PointValue::Text("abc".into())),
            Err(EncodingError::NotANumber("abc".into()))
        );
    }

    #[test]
    fn bytes_cannot_be_encoded_as_numbers() {
        assert_eq!(
            encode(&point(RawType::Uint16), PointValue::Bytes(vec![1])),
            Err(EncodingError::TypeMismatch {
                raw_type: RawType::Uint16,
                found: "bytes"
            })
        );
    }

    #[test]
    fn word_swap_applies_to_encoding() {
        let p = point(RawType::Uint32).with_swaps(false, true);
        assert_eq!(
            encode(&p, PointValue::Int(0x0001_0002)),
            Ok(RegisterValues::Words(vec![0x0002, 0x0001]))
        );
    }

    #[test]
    fn coils_decode_and_encode_bools() {
        let coil = PointSpec::new(
            "dev",
            "c",
            UnitId::new(1),
            RegisterClass::Coil,
            0,
            RawType::Bool,
        );
        assert_eq!(
            RegisterCodec
                .decode(&coil, RegisterSlice::Bits(&[true]))
                .unwrap(),
            PointValue::Bool(true)
        );
        assert_eq!(
            RegisterCodec.encode(&coil, &PointValue::Int(1), None),
            Ok(RegisterValues::Bits(vec![true]))
        );
        assert_eq!(
            RegisterCodec.decode(&coil, RegisterSlice::Words(&[1])),
            Err(DecodeError::ClassMismatch(RegisterClass::Coil))
        );
    }

    #[test]
    fn short_slices_are_insufficient() {
        assert_eq!(
            RegisterCodec.decode(&point(RawType::Float64), RegisterSlice::Words(&[0, 0])),
            Err(DecodeError::InsufficientValues {
                required: 4,
                available: 2
            })
        );
    }
}
