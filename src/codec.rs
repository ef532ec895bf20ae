//! Sort-preserving element codecs.
//!
//! Every codec writes big-endian bytes chosen so that `memcmp` over two
//! encoded elements of the same column agrees with the natural order of the
//! values. The all-zero pattern is the missing value for every numeric type,
//! so a zeroed row buffer reads back as all-missing and missing sorts first.
//!
//! ```text
//! UINT(k)   (v + 1) mod 2^8k                    missing = 0x00..00
//! INT(k)    v XOR 2^(8k-1)                      missing = 0x00..00 (-2^(8k-1))
//! FLOAT(k)  negative: !bits, else bits ^ sign   missing = 0x00..00
//! ```

use half::f16;

use crate::error::{Error, Result};
use crate::types::{ElementType, Value};

/// Codec for one element of a column, fixed at column construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Uint(usize),
    Int(usize),
    Half,
    Single,
    Double,
    Char,
}

impl Codec {
    pub fn new(element_type: ElementType, element_size: usize) -> Result<Self> {
        match (element_type, element_size) {
            (ElementType::Uint, 1..=8) => Ok(Codec::Uint(element_size)),
            (ElementType::Int, 1..=8) => Ok(Codec::Int(element_size)),
            (ElementType::Float, 2) => Ok(Codec::Half),
            (ElementType::Float, 4) => Ok(Codec::Single),
            (ElementType::Float, 8) => Ok(Codec::Double),
            (ElementType::Char, 1) => Ok(Codec::Char),
            (t, s) => Err(Error::Schema(format!("unsupported element size {} for {} column", s, t))),
        }
    }

    pub fn element_size(&self) -> usize {
        match self {
            Codec::Uint(k) | Codec::Int(k) => *k,
            Codec::Half => 2,
            Codec::Single => 4,
            Codec::Double => 8,
            Codec::Char => 1,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Codec::Uint(_) => ElementType::Uint,
            Codec::Int(_) => ElementType::Int,
            Codec::Half | Codec::Single | Codec::Double => ElementType::Float,
            Codec::Char => ElementType::Char,
        }
    }

    /// Smallest non-missing value, `None` for CHAR
    pub fn min_value(&self) -> Option<Value> {
        match self {
            Codec::Uint(_) => Some(Value::Uint(0)),
            Codec::Int(k) => Some(Value::Int(int_min(*k))),
            Codec::Half | Codec::Single | Codec::Double => Some(Value::Float(f64::NEG_INFINITY)),
            Codec::Char => None,
        }
    }

    /// Largest non-missing value, `None` for CHAR
    pub fn max_value(&self) -> Option<Value> {
        match self {
            Codec::Uint(k) => Some(Value::Uint(uint_max(*k))),
            Codec::Int(k) => Some(Value::Int(int_max(*k))),
            Codec::Half | Codec::Single | Codec::Double => Some(Value::Float(f64::INFINITY)),
            Codec::Char => None,
        }
    }

    /// Pack one numeric element into `dest` (exactly `element_size` bytes).
    /// `Value::Missing` packs the missing sentinel.
    pub fn pack(&self, value: &Value, dest: &mut [u8], column: &str) -> Result<()> {
        debug_assert_eq!(dest.len(), self.element_size());
        if value.is_missing() {
            dest.fill(0);
            return Ok(());
        }
        match self {
            Codec::Uint(k) => {
                let v = self.check_uint(value, *k, column)?;
                pack_uint(v, dest);
            }
            Codec::Int(k) => {
                let v = self.check_int(value, *k, column)?;
                pack_int(v, dest);
            }
            Codec::Half | Codec::Single | Codec::Double => {
                let v = self.check_float(value, column)?;
                pack_float(v, dest);
            }
            Codec::Char => {
                return Err(Error::Schema(format!(
                    "column '{}': CHAR elements are copied, not packed",
                    column
                )));
            }
        }
        Ok(())
    }

    /// Unpack one numeric element; the all-zero pattern is `Value::Missing`
    pub fn unpack(&self, src: &[u8]) -> Value {
        match self {
            Codec::Uint(_) => unpack_uint(src).map_or(Value::Missing, Value::Uint),
            Codec::Int(_) => unpack_int(src).map_or(Value::Missing, Value::Int),
            Codec::Half | Codec::Single | Codec::Double => {
                unpack_float(src).map_or(Value::Missing, Value::Float)
            }
            Codec::Char => Value::Char(src.to_vec()),
        }
    }

    /// Quantise a value down to a multiple of `bin_width`; zero is exact
    pub fn truncate(&self, value: Value, bin_width: f64) -> Value {
        if bin_width == 0.0 {
            return value;
        }
        match value {
            // Widths below one are rejected by check_bin_width; keep exact
            Value::Uint(v) => match bin_width as u64 {
                0 => Value::Uint(v),
                w => Value::Uint(v - v % w),
            },
            Value::Int(v) => match bin_width as i64 {
                0 => Value::Int(v),
                w => Value::Int(v - v % w),
            },
            Value::Float(v) if v.is_finite() => Value::Float(v - v % bin_width),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.truncate(v, bin_width)).collect())
            }
            other => other,
        }
    }

    /// Bin widths are non-negative, integral for integer types and zero for CHAR
    pub fn check_bin_width(&self, bin_width: f64, column: &str) -> Result<()> {
        if !(bin_width >= 0.0) || !bin_width.is_finite() {
            return Err(Error::InvalidBinWidth(format!(
                "column '{}': bin width {} must be a non-negative number",
                column, bin_width
            )));
        }
        match self {
            Codec::Char if bin_width != 0.0 => Err(Error::InvalidBinWidth(format!(
                "column '{}': CHAR columns cannot be binned",
                column
            ))),
            Codec::Uint(_) | Codec::Int(_) if bin_width.fract() != 0.0 => {
                Err(Error::InvalidBinWidth(format!(
                    "column '{}': bin width {} must be an integer",
                    column, bin_width
                )))
            }
            _ => Ok(()),
        }
    }

    fn check_uint(&self, value: &Value, k: usize, column: &str) -> Result<u64> {
        let v = match value {
            Value::Uint(v) => *v,
            Value::Int(v) if *v >= 0 => *v as u64,
            Value::Int(v) => {
                return Err(Error::Overflow(format!("value {} out of range for column '{}'", v, column)));
            }
            other => return Err(type_mismatch(other, self, column)),
        };
        if v > uint_max(k) {
            return Err(Error::Overflow(format!("value {} out of range for column '{}'", v, column)));
        }
        Ok(v)
    }

    fn check_int(&self, value: &Value, k: usize, column: &str) -> Result<i64> {
        let v = match value {
            Value::Int(v) => *v,
            Value::Uint(v) => i64::try_from(*v).map_err(|_| {
                Error::Overflow(format!("value {} out of range for column '{}'", v, column))
            })?,
            other => return Err(type_mismatch(other, self, column)),
        };
        if v < int_min(k) || v > int_max(k) {
            return Err(Error::Overflow(format!("value {} out of range for column '{}'", v, column)));
        }
        Ok(v)
    }

    fn check_float(&self, value: &Value, column: &str) -> Result<f64> {
        let v = match value {
            Value::Float(v) => *v,
            Value::Uint(v) => *v as f64,
            Value::Int(v) => *v as f64,
            other => return Err(type_mismatch(other, self, column)),
        };
        if v.is_nan() {
            return Err(Error::OutOfRange(format!("NaN is not storable in column '{}'", column)));
        }
        let limit = match self {
            Codec::Half => f16::MAX.to_f64(),
            Codec::Single => f32::MAX as f64,
            _ => f64::MAX,
        };
        if v.is_finite() && v.abs() > limit {
            return Err(Error::Overflow(format!("value {} out of range for column '{}'", v, column)));
        }
        Ok(v)
    }
}

fn type_mismatch(value: &Value, codec: &Codec, column: &str) -> Error {
    Error::OutOfRange(format!(
        "column '{}' of type {} cannot hold {:?}",
        column,
        codec.element_type(),
        value
    ))
}

fn mask(k: usize) -> u64 {
    if k >= 8 { u64::MAX } else { (1u64 << (8 * k)) - 1 }
}

/// Largest storable UINT of `k` bytes; the top two bit patterns are reserved
pub fn uint_max(k: usize) -> u64 {
    mask(k) - 2
}

pub fn int_min(k: usize) -> i64 {
    -int_max(k)
}

pub fn int_max(k: usize) -> i64 {
    (mask(k) >> 1) as i64
}

fn write_be(raw: u64, dest: &mut [u8]) {
    let bytes = raw.to_be_bytes();
    dest.copy_from_slice(&bytes[8 - dest.len()..]);
}

fn read_be(src: &[u8]) -> u64 {
    src.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Pack an unsigned integer into `dest.len()` bytes with the +1 bias
pub fn pack_uint(v: u64, dest: &mut [u8]) {
    write_be(v.wrapping_add(1) & mask(dest.len()), dest);
}

/// `None` for the all-zero missing pattern
pub fn unpack_uint(src: &[u8]) -> Option<u64> {
    let raw = read_be(src);
    if raw == 0 { None } else { Some(raw - 1) }
}

pub fn pack_int(v: i64, dest: &mut [u8]) {
    let k = dest.len();
    let sign = 1u64 << (8 * k - 1);
    write_be(((v as u64) ^ sign) & mask(k), dest);
}

pub fn unpack_int(src: &[u8]) -> Option<i64> {
    let k = src.len();
    let raw = read_be(src);
    if raw == 0 {
        return None;
    }
    let x = raw ^ (1u64 << (8 * k - 1));
    let shift = 64 - 8 * k as u32;
    Some(((x << shift) as i64) >> shift)
}

/// Pack a float at the precision implied by `dest.len()` (2, 4 or 8)
pub fn pack_float(v: f64, dest: &mut [u8]) {
    match dest.len() {
        2 => {
            let bits = f16::from_f64(v).to_bits();
            let u = if bits & 0x8000 != 0 { !bits } else { bits ^ 0x8000 };
            dest.copy_from_slice(&u.to_be_bytes());
        }
        4 => {
            let bits = (v as f32).to_bits();
            let u = if bits & 0x8000_0000 != 0 { !bits } else { bits ^ 0x8000_0000 };
            dest.copy_from_slice(&u.to_be_bytes());
        }
        _ => {
            let bits = v.to_bits();
            let u = if bits & (1 << 63) != 0 { !bits } else { bits ^ (1 << 63) };
            dest.copy_from_slice(&u.to_be_bytes());
        }
    }
}

pub fn unpack_float(src: &[u8]) -> Option<f64> {
    if src.iter().all(|&b| b == 0) {
        return None;
    }
    let v = match src.len() {
        2 => {
            let u = read_be(src) as u16;
            let bits = if u & 0x8000 != 0 { u ^ 0x8000 } else { !u };
            f16::from_bits(bits).to_f64()
        }
        4 => {
            let u = read_be(src) as u32;
            let bits = if u & 0x8000_0000 != 0 { u ^ 0x8000_0000 } else { !u };
            f32::from_bits(bits) as f64
        }
        _ => {
            let u = read_be(src);
            let bits = if u & (1 << 63) != 0 { u ^ (1 << 63) } else { !u };
            f64::from_bits(bits)
        }
    };
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(codec: Codec, v: Value) -> Vec<u8> {
        let mut buf = vec![0u8; codec.element_size()];
        codec.pack(&v, &mut buf, "test").unwrap();
        buf
    }

    #[test]
    fn test_uint_round_trip_and_bounds() {
        for k in 1..=8 {
            let codec = Codec::Uint(k);
            for v in [0, 1, uint_max(k) / 2, uint_max(k)] {
                let buf = packed(codec, Value::Uint(v));
                assert_eq!(codec.unpack(&buf), Value::Uint(v), "k={} v={}", k, v);
            }
            let mut buf = vec![0u8; k];
            let err = codec.pack(&Value::Uint(uint_max(k) + 1), &mut buf, "n").unwrap_err();
            assert!(matches!(err, Error::Overflow(_)));
        }
    }

    #[test]
    fn test_uint_bias() {
        assert_eq!(packed(Codec::Uint(2), Value::Uint(0)), vec![0x00, 0x01]);
        assert_eq!(packed(Codec::Uint(2), Value::Uint(0x1234)), vec![0x12, 0x35]);
        assert_eq!(packed(Codec::Uint(1), Value::Missing), vec![0x00]);
    }

    #[test]
    fn test_int_round_trip_and_bounds() {
        for k in 1..=8 {
            let codec = Codec::Int(k);
            for v in [int_min(k), -1, 0, 1, int_max(k)] {
                let buf = packed(codec, Value::Int(v));
                assert_eq!(codec.unpack(&buf), Value::Int(v), "k={} v={}", k, v);
            }
            if k < 8 {
                let mut buf = vec![0u8; k];
                assert!(codec.pack(&Value::Int(int_max(k) + 1), &mut buf, "x").is_err());
                assert!(codec.pack(&Value::Int(int_min(k) - 1), &mut buf, "x").is_err());
            }
        }
        assert_eq!(int_min(1), -127);
        assert_eq!(int_max(1), 127);
        assert_eq!(int_min(8), i64::MIN + 1);
    }

    #[test]
    fn test_uint_sort_order() {
        for k in [1usize, 2, 4, 8] {
            let codec = Codec::Uint(k);
            let values = [0u64, 1, 2, 100, uint_max(k) - 1, uint_max(k)];
            let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| packed(codec, Value::Uint(*v))).collect();
            encoded.dedup();
            for (i, a) in encoded.iter().enumerate() {
                for b in &encoded[i + 1..] {
                    assert!(a < b, "k={}", k);
                }
            }
            assert!(packed(codec, Value::Missing) < encoded[0]);
        }
    }

    #[test]
    fn test_int_sort_order() {
        let codec = Codec::Int(2);
        let values = [-32767i64, -300, -3, -1, 0, 2, 7, 32767];
        let encoded: Vec<Vec<u8>> = values.iter().map(|v| packed(codec, Value::Int(*v))).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
        assert!(packed(codec, Value::Missing) < encoded[0]);
    }

    #[test]
    fn test_float_sort_order_all_widths() {
        let values = [f64::NEG_INFINITY, -1.5e4, -1.5, -0.0, 0.0, 0.25, 1.5, 6.0e4, f64::INFINITY];
        for codec in [Codec::Half, Codec::Single, Codec::Double] {
            let encoded: Vec<Vec<u8>> = values.iter().map(|v| packed(codec, Value::Float(*v))).collect();
            assert!(encoded.windows(2).all(|w| w[0] < w[1]), "{:?}", codec);
            let missing = packed(codec, Value::Missing);
            assert!(missing < encoded[0]);
            assert_eq!(codec.unpack(&missing), Value::Missing);
            for (v, e) in values.iter().zip(&encoded) {
                match codec.unpack(e) {
                    Value::Float(back) => assert_eq!(back.to_bits(), v.to_bits()),
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_float_domain() {
        let mut buf = [0u8; 2];
        assert!(matches!(
            Codec::Half.pack(&Value::Float(70000.0), &mut buf, "f"),
            Err(Error::Overflow(_))
        ));
        assert!(matches!(
            Codec::Double.pack(&Value::Float(f64::NAN), &mut [0u8; 8], "f"),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(Codec::Uint(2).truncate(Value::Uint(7), 2.0), Value::Uint(6));
        assert_eq!(Codec::Int(2).truncate(Value::Int(-7), 5.0), Value::Int(-5));
        assert_eq!(Codec::Double.truncate(Value::Float(2.75), 0.5), Value::Float(2.5));
        assert_eq!(Codec::Double.truncate(Value::Float(f64::INFINITY), 0.5), Value::Float(f64::INFINITY));
        assert_eq!(Codec::Uint(1).truncate(Value::Missing, 3.0), Value::Missing);
    }

    #[test]
    fn test_truncate_sub_unit_integer_width_is_exact() {
        assert_eq!(Codec::Uint(2).truncate(Value::Uint(7), 0.5), Value::Uint(7));
        assert_eq!(Codec::Int(2).truncate(Value::Int(-7), 0.25), Value::Int(-7));
    }

    #[test]
    fn test_bin_width_rules() {
        assert!(Codec::Uint(4).check_bin_width(2.0, "u").is_ok());
        assert!(matches!(Codec::Uint(4).check_bin_width(2.5, "u"), Err(Error::InvalidBinWidth(_))));
        assert!(matches!(Codec::Char.check_bin_width(1.0, "s"), Err(Error::InvalidBinWidth(_))));
        assert!(matches!(Codec::Double.check_bin_width(-1.0, "f"), Err(Error::InvalidBinWidth(_))));
        assert!(Codec::Double.check_bin_width(0.1, "f").is_ok());
    }

    #[test]
    fn test_codec_selection() {
        assert_eq!(Codec::new(ElementType::Float, 4).unwrap(), Codec::Single);
        assert!(Codec::new(ElementType::Float, 3).is_err());
        assert!(Codec::new(ElementType::Uint, 9).is_err());
        assert!(Codec::new(ElementType::Char, 2).is_err());
    }
}
