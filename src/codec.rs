//! Tuya datapoint value codec.
//! Converts typed values to and from the payload layout of each datatype.
//!
//! Numeric encodings never reject out-of-range input: values are masked
//! modulo `2^(8 * width)`, which is what device firmware tolerates.

use crate::error::{DpError, Result};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

define_dp_type! {
    Raw = (0x00, "raw"),
    Bool = (0x01, "bool", "boolean"),
    Value = (0x02, "value", "number"),
    String = (0x03, "string", "str"),
    Enum = (0x04, "enum"),
    Bitmap = (0x05, "bitmap", "bitfield", "fault"),
}

/// Width of the `value` datatype. Fixed regardless of magnitude.
pub const VALUE_WIDTH: usize = 4;

/// Byte order for bitmap payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Optional overrides for a single encode/decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Explicit payload width in bytes; inferred when absent
    pub width: Option<usize>,
    /// Interpret decoded integers as two's complement
    pub signed: bool,
    /// Byte order of bitmap payloads (`value` is always big-endian)
    pub endian: Endian,
}

impl EncodeOptions {
    pub fn width(width: usize) -> Self {
        Self {
            width: Some(width),
            ..Default::default()
        }
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn little_endian(mut self) -> Self {
        self.endian = Endian::Little;
        self
    }
}

/// Byte-like caller input: raw bytes, a hex string or an array of numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteSource {
    Bytes(Vec<u8>),
    HexString(String),
    NumberArray(Vec<i64>),
}

impl ByteSource {
    /// Resolves the source into bytes. Array elements are masked to their low byte.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            ByteSource::Bytes(bytes) => Ok(bytes),
            ByteSource::HexString(s) => hex_to_bytes(&s),
            ByteSource::NumberArray(numbers) => Ok(numbers.into_iter().map(|n| n as u8).collect()),
        }
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Bytes(bytes)
    }
}

impl From<&[u8]> for ByteSource {
    fn from(bytes: &[u8]) -> Self {
        ByteSource::Bytes(bytes.to_vec())
    }
}

impl From<&str> for ByteSource {
    fn from(s: &str) -> Self {
        ByteSource::HexString(s.to_string())
    }
}

impl From<Vec<i64>> for ByteSource {
    fn from(numbers: Vec<i64>) -> Self {
        ByteSource::NumberArray(numbers)
    }
}

fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let compact: String = digits.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(compact)?)
}

/// Highest bit count a bitmap can carry: one record payload, fully set.
pub const MAX_BITMAP_BITS: usize = u16::MAX as usize * 8;

/// Arbitrary-width bitmap stored as big-endian magnitude bytes.
///
/// Multi-flag devices report bitmaps wider than a native register, so the
/// value is kept as bytes instead of being narrowed to an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Bitmap {
    // big-endian, no leading zero bytes
    bytes: Vec<u8>,
}

impl Bitmap {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self {
            bytes: bytes[start..].to_vec(),
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }

    /// Builds a bitmap with the given bit indices set (bit 0 is the least significant).
    ///
    /// Fails with [`DpError::Encode`] for an index at or above [`MAX_BITMAP_BITS`].
    pub fn from_flags<I: IntoIterator<Item = usize>>(flags: I) -> Result<Self> {
        let mut le: Vec<u8> = Vec::new();
        for bit in flags {
            if bit >= MAX_BITMAP_BITS {
                return Err(DpError::encode(format!("bit {}", bit), DpType::Bitmap));
            }
            let byte = bit / 8;
            if le.len() <= byte {
                le.resize(byte + 1, 0);
            }
            le[byte] |= 1 << (bit % 8);
        }
        le.reverse();
        Ok(Self::from_be_bytes(&le))
    }

    pub fn is_set(&self, bit: usize) -> bool {
        let byte = bit / 8;
        if byte >= self.bytes.len() {
            return false;
        }
        self.bytes[self.bytes.len() - 1 - byte] & (1 << (bit % 8)) != 0
    }

    /// Indices of all set bits, ascending.
    pub fn flags(&self) -> Vec<usize> {
        (0..self.bytes.len() * 8).filter(|bit| self.is_set(*bit)).collect()
    }

    /// Returns the value as an integer when it fits in 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.bytes.len() > 8 {
            return None;
        }
        Some(self.bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn as_be_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Smallest width in bytes that holds the value.
    pub fn min_width(&self) -> usize {
        self.bytes.len().max(1)
    }

    /// Big-endian bytes padded to `width`; high bytes are dropped when the
    /// value is wider than `width`.
    pub fn to_be_bytes(&self, width: usize) -> Vec<u8> {
        if self.bytes.len() >= width {
            return self.bytes[self.bytes.len() - width..].to_vec();
        }
        let mut out = vec![0u8; width - self.bytes.len()];
        out.extend_from_slice(&self.bytes);
        out
    }
}

impl From<u64> for Bitmap {
    fn from(value: u64) -> Self {
        Bitmap::from_u64(value)
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u64() {
            Some(v) => write!(f, "{:#x}", v),
            None => write!(f, "0x{}", hex::encode(&self.bytes)),
        }
    }
}

/// A decoded or to-be-encoded datapoint value.
#[derive(Debug, Clone, PartialEq)]
pub enum DpValue {
    Raw(Vec<u8>),
    Bool(bool),
    Value(i64),
    String(String),
    Enum(i64),
    Bitmap(Bitmap),
}

impl DpValue {
    pub fn dp_type(&self) -> DpType {
        match self {
            DpValue::Raw(_) => DpType::Raw,
            DpValue::Bool(_) => DpType::Bool,
            DpValue::Value(_) => DpType::Value,
            DpValue::String(_) => DpType::String,
            DpValue::Enum(_) => DpType::Enum,
            DpValue::Bitmap(_) => DpType::Bitmap,
        }
    }

    /// Builds a raw value from any byte-like input.
    pub fn raw<S: Into<ByteSource>>(source: S) -> Result<Self> {
        Ok(DpValue::Raw(source.into().into_bytes()?))
    }

    /// Integer view of numeric-like values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DpValue::Bool(b) => Some(i64::from(*b)),
            DpValue::Value(v) | DpValue::Enum(v) => Some(*v),
            DpValue::Bitmap(b) => b.to_u64().map(|v| v as i64),
            DpValue::Raw(_) | DpValue::String(_) => None,
        }
    }

    /// JSON rendering used for events and logs. Raw bytes become hex strings,
    /// bitmaps wider than 64 bits too.
    pub fn to_json(&self) -> JsonValue {
        match self {
            DpValue::Raw(bytes) => JsonValue::String(hex::encode(bytes)),
            DpValue::Bool(b) => JsonValue::Bool(*b),
            DpValue::Value(v) | DpValue::Enum(v) => JsonValue::from(*v),
            DpValue::String(s) => JsonValue::String(s.clone()),
            DpValue::Bitmap(b) => match b.to_u64() {
                Some(v) => JsonValue::from(v),
                None => JsonValue::String(hex::encode(b.as_be_bytes())),
            },
        }
    }

    /// Coerces a JSON value into the given datatype.
    ///
    /// Booleans accept numbers and `"on"`/`"off"` style strings, numeric types
    /// accept booleans and numeric strings, raw accepts hex strings and number
    /// arrays, bitmap accepts integers, hex strings and arrays of bit indices.
    pub fn from_json(value: &JsonValue, dp_type: DpType) -> Result<Self> {
        let fail = || DpError::encode(value, dp_type);
        match dp_type {
            DpType::Raw => match value {
                JsonValue::String(s) => DpValue::raw(s.as_str()),
                JsonValue::Array(items) => {
                    let numbers = items
                        .iter()
                        .map(|v| v.as_i64().ok_or_else(fail))
                        .collect::<Result<Vec<i64>>>()?;
                    DpValue::raw(numbers)
                }
                _ => Err(fail()),
            },
            DpType::Bool => match value {
                JsonValue::Bool(b) => Ok(DpValue::Bool(*b)),
                JsonValue::Number(_) => json_to_i64(value).map(|n| DpValue::Bool(n != 0)).ok_or_else(fail),
                JsonValue::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "on" | "1" | "yes" => Ok(DpValue::Bool(true)),
                    "false" | "off" | "0" | "no" => Ok(DpValue::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            DpType::Value | DpType::Enum => {
                let n = match value {
                    JsonValue::Bool(b) => Some(i64::from(*b)),
                    JsonValue::Number(_) => json_to_i64(value),
                    JsonValue::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(fail)?;
                Ok(if dp_type == DpType::Value {
                    DpValue::Value(n)
                } else {
                    DpValue::Enum(n)
                })
            }
            DpType::String => match value {
                JsonValue::String(s) => Ok(DpValue::String(s.clone())),
                _ => Err(fail()),
            },
            DpType::Bitmap => match value {
                JsonValue::Number(_) => json_to_i64(value)
                    .map(|n| DpValue::Bitmap(Bitmap::from_u64(n as u64)))
                    .ok_or_else(fail),
                JsonValue::String(s) => Ok(DpValue::Bitmap(Bitmap::from_be_bytes(&hex_to_bytes(s)?))),
                JsonValue::Array(items) => {
                    let flags = items
                        .iter()
                        .map(|v| v.as_u64().and_then(|n| usize::try_from(n).ok()).ok_or_else(fail))
                        .collect::<Result<Vec<usize>>>()?;
                    Ok(DpValue::Bitmap(Bitmap::from_flags(flags)?))
                }
                _ => Err(fail()),
            },
        }
    }
}

impl fmt::Display for DpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn json_to_i64(value: &JsonValue) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|u| u as i64))
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
}

/// Smallest unsigned width in bytes that holds `n`.
pub fn infer_width(n: u64) -> usize {
    match n {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        0x100_0000..=0xFFFF_FFFF => 4,
        _ => 8 - (n.leading_zeros() as usize / 8),
    }
}

fn infer_signed_width(n: i64) -> usize {
    if n >= 0 {
        return infer_width(n as u64);
    }
    (1..=8)
        .find(|w| *w == 8 || n >= -(1i64 << (8 * w - 1)))
        .unwrap_or(8)
}

/// Writes `n` as an unsigned integer of `width` bytes, masking modulo `2^(8 * width)`.
pub fn encode_uint(n: u64, width: usize, endian: Endian) -> Vec<u8> {
    let mut out = vec![0u8; width];
    let used = width.min(8);
    if used > 0 {
        let masked = if used == 8 { n } else { n & ((1u64 << (8 * used)) - 1) };
        BigEndian::write_uint(&mut out[width - used..], masked, used);
    }
    if endian == Endian::Little {
        out.reverse();
    }
    out
}

/// Writes a signed integer using the explicit width or the smallest one that holds it.
pub fn encode_int(n: i64, options: &EncodeOptions) -> Vec<u8> {
    let width = options.width.unwrap_or_else(|| infer_signed_width(n));
    encode_uint(n as u64, width, options.endian)
}

/// Encodes `value` as `dp_type`.
///
/// `value` payloads are always 4 bytes big-endian whatever `options` says;
/// `bool` and `enum` are always 1 byte. Numeric variants coerce into each
/// other, other mismatches fail with [`DpError::Encode`].
pub fn encode(value: &DpValue, dp_type: DpType, options: &EncodeOptions) -> Result<Vec<u8>> {
    let fail = || DpError::encode(value, dp_type);
    match dp_type {
        DpType::Raw => match value {
            DpValue::Raw(bytes) => Ok(bytes.clone()),
            DpValue::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(fail()),
        },
        DpType::Bool => {
            let n = value.as_i64().ok_or_else(fail)?;
            Ok(vec![u8::from(n != 0)])
        }
        DpType::Value => {
            let n = value.as_i64().ok_or_else(fail)?;
            Ok(encode_uint(n as u64, VALUE_WIDTH, Endian::Big))
        }
        DpType::String => match value {
            DpValue::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(fail()),
        },
        DpType::Enum => {
            let n = value.as_i64().ok_or_else(fail)?;
            Ok(vec![n as u8])
        }
        DpType::Bitmap => {
            let bitmap = match value {
                DpValue::Bitmap(b) => b.clone(),
                other => Bitmap::from_u64(other.as_i64().ok_or_else(fail)? as u64),
            };
            let width = options.width.unwrap_or_else(|| bitmap_width(&bitmap));
            let mut bytes = bitmap.to_be_bytes(width);
            if options.endian == Endian::Little {
                bytes.reverse();
            }
            Ok(bytes)
        }
    }
}

fn bitmap_width(bitmap: &Bitmap) -> usize {
    match bitmap.to_u64() {
        Some(v) => infer_width(v),
        None => bitmap.min_width(),
    }
}

/// Decodes a payload declared as `dp_type`.
pub fn decode(bytes: &[u8], dp_type: DpType, options: &EncodeOptions) -> Result<DpValue> {
    match dp_type {
        DpType::Raw => Ok(DpValue::Raw(bytes.to_vec())),
        DpType::Bool => match bytes.first() {
            Some(b) => Ok(DpValue::Bool(*b != 0)),
            None => Err(DpError::decode(0, dp_type)),
        },
        DpType::Value => read_int(bytes, dp_type, options.signed).map(DpValue::Value),
        DpType::String => {
            let s = String::from_utf8_lossy(bytes);
            Ok(DpValue::String(s.trim_end_matches('\0').to_string()))
        }
        DpType::Enum => read_int(bytes, dp_type, false).map(DpValue::Enum),
        DpType::Bitmap => {
            let mut be = bytes.to_vec();
            if options.endian == Endian::Little {
                be.reverse();
            }
            Ok(DpValue::Bitmap(Bitmap::from_be_bytes(&be)))
        }
    }
}

/// Decodes any byte-like input.
pub fn decode_source(source: ByteSource, dp_type: DpType, options: &EncodeOptions) -> Result<DpValue> {
    decode(&source.into_bytes()?, dp_type, options)
}

// Big-endian, 1 to 4 bytes. Some firmware sends short numeric payloads.
fn read_int(bytes: &[u8], dp_type: DpType, signed: bool) -> Result<i64> {
    if bytes.is_empty() || bytes.len() > VALUE_WIDTH {
        return Err(DpError::decode(bytes.len(), dp_type));
    }
    Ok(if signed {
        BigEndian::read_int(bytes, bytes.len())
    } else {
        BigEndian::read_uint(bytes, bytes.len()) as i64
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts() -> EncodeOptions {
        EncodeOptions::default()
    }

    #[test]
    fn value_is_always_four_bytes() {
        for v in [0i64, 1, 255, 65536, 4294967295] {
            let bytes = encode(&DpValue::Value(v), DpType::Value, &opts()).unwrap();
            assert_eq!(bytes.len(), 4, "value {}", v);
        }
        // width and endian overrides do not apply to `value`
        let forced = encode(&DpValue::Value(1), DpType::Value, &EncodeOptions::width(1).little_endian()).unwrap();
        assert_eq!(forced, vec![0, 0, 0, 1]);
    }

    #[test]
    fn value_is_big_endian_unsigned() {
        let bytes = encode(&DpValue::Value(0x01020304), DpType::Value, &opts()).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        let decoded = decode(&[0xFF, 0xFF, 0xFF, 0xFF], DpType::Value, &opts()).unwrap();
        assert_eq!(decoded, DpValue::Value(4294967295));
    }

    #[test]
    fn signed_option_sign_extends() {
        let bytes = encode(&DpValue::Value(-5), DpType::Value, &opts()).unwrap();
        assert_eq!(bytes, vec![0xFF, 0xFF, 0xFF, 0xFB]);
        let decoded = decode(&bytes, DpType::Value, &EncodeOptions::default().signed()).unwrap();
        assert_eq!(decoded, DpValue::Value(-5));
    }

    #[test]
    fn out_of_range_numbers_are_masked() {
        assert_eq!(encode_int(256, &EncodeOptions::width(1)), encode_int(0, &EncodeOptions::width(1)));
        assert_eq!(encode_uint(0x1_0000_0001, 4, Endian::Big), vec![0, 0, 0, 1]);
        let e = encode(&DpValue::Enum(256), DpType::Enum, &opts()).unwrap();
        assert_eq!(e, vec![0]);
        let b = encode(&DpValue::Value(0x1FF), DpType::Bitmap, &EncodeOptions::width(1)).unwrap();
        assert_eq!(b, vec![0xFF]);
    }

    #[test]
    fn width_inference_steps() {
        assert_eq!(infer_width(0), 1);
        assert_eq!(infer_width(0xFF), 1);
        assert_eq!(infer_width(0x100), 2);
        assert_eq!(infer_width(0x1_0000), 3);
        assert_eq!(infer_width(0xFFFF_FFFF), 4);
        assert_eq!(infer_width(0x1_0000_0000), 5);
        assert_eq!(encode_int(-1, &opts()), vec![0xFF]);
        assert_eq!(encode_int(-129, &opts()), vec![0xFF, 0x7F]);
    }

    #[test]
    fn bitmap_padding_and_endianness() {
        let bm = DpValue::Bitmap(Bitmap::from_flags([0, 9]).unwrap());
        assert_eq!(encode(&bm, DpType::Bitmap, &opts()).unwrap(), vec![0x02, 0x01]);
        assert_eq!(encode(&bm, DpType::Bitmap, &EncodeOptions::width(4)).unwrap(), vec![0, 0, 0x02, 0x01]);
        let le = EncodeOptions::width(4).little_endian();
        let bytes = encode(&bm, DpType::Bitmap, &le).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0, 0]);
        assert_eq!(decode(&bytes, DpType::Bitmap, &le).unwrap(), bm);
    }

    #[test]
    fn wide_bitmap_keeps_every_flag() {
        let mut payload = vec![0u8; 12];
        payload[0] = 0x80;
        payload[11] = 0x01;
        let decoded = decode(&payload, DpType::Bitmap, &opts()).unwrap();
        let DpValue::Bitmap(bm) = &decoded else {
            panic!("expected bitmap, got {:?}", decoded);
        };
        assert_eq!(bm.flags(), vec![0, 95]);
        assert_eq!(bm.to_u64(), None);
        assert_eq!(encode(&decoded, DpType::Bitmap, &opts()).unwrap(), payload);
    }

    #[test]
    fn byte_sources_resolve() {
        assert_eq!(ByteSource::from("0x0a FF").into_bytes().unwrap(), vec![0x0A, 0xFF]);
        assert_eq!(ByteSource::from(vec![1i64, 256, -1]).into_bytes().unwrap(), vec![1, 0, 0xFF]);
        assert!(matches!(ByteSource::from("abc").into_bytes(), Err(DpError::InvalidHex(_))));
        let raw = DpValue::raw("deadbeef").unwrap();
        assert_eq!(encode(&raw, DpType::Raw, &opts()).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn string_is_utf8_unpadded() {
        let s = DpValue::String("héllo".into());
        let bytes = encode(&s, DpType::String, &opts()).unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(decode(b"abc\0\0", DpType::String, &opts()).unwrap(), DpValue::String("abc".into()));
    }

    #[test]
    fn unencodable_input_fails_typed() {
        let err = encode(&DpValue::String("on".into()), DpType::Bool, &opts()).unwrap_err();
        assert!(matches!(err, DpError::Encode { .. }));
        let err = encode(&DpValue::Value(3), DpType::String, &opts()).unwrap_err();
        assert!(matches!(err, DpError::Encode { .. }));
        assert!(DpValue::from_json(&json!({"a": 1}), DpType::Value).is_err());
    }

    #[test]
    fn bitmap_flags_stay_within_one_payload() {
        let err = DpValue::from_json(&json!([u64::MAX]), DpType::Bitmap).unwrap_err();
        assert!(matches!(err, DpError::Encode { .. }));
        assert!(Bitmap::from_flags([3, MAX_BITMAP_BITS]).is_err());

        let widest = Bitmap::from_flags([MAX_BITMAP_BITS - 1]).unwrap();
        assert_eq!(widest.as_be_bytes().len(), u16::MAX as usize);
        assert!(widest.is_set(MAX_BITMAP_BITS - 1));
    }

    #[test]
    fn short_numeric_payloads_are_tolerated() {
        assert_eq!(decode(&[0x01, 0x2C], DpType::Value, &opts()).unwrap(), DpValue::Value(300));
        assert!(matches!(decode(&[], DpType::Value, &opts()), Err(DpError::Decode { .. })));
        assert!(matches!(decode(&[0; 5], DpType::Value, &opts()), Err(DpError::Decode { .. })));
    }

    #[test]
    fn json_coercions() {
        assert_eq!(DpValue::from_json(&json!("off"), DpType::Bool).unwrap(), DpValue::Bool(false));
        assert_eq!(DpValue::from_json(&json!(21.6), DpType::Value).unwrap(), DpValue::Value(22));
        assert_eq!(DpValue::from_json(&json!(true), DpType::Enum).unwrap(), DpValue::Enum(1));
        assert_eq!(
            DpValue::from_json(&json!([0, 3]), DpType::Bitmap).unwrap(),
            DpValue::Bitmap(Bitmap::from_u64(0b1001))
        );
        assert_eq!(DpValue::Raw(vec![0xAB]).to_json(), json!("ab"));
    }

    #[test]
    fn datatype_tags_are_fixed() {
        let tags: Vec<u8> = DpType::ALL.iter().map(|t| t.as_u8()).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!("boolean".parse::<DpType>().unwrap(), DpType::Bool);
        assert_eq!(DpType::from_u8(6), None);
    }
}
