use std::cmp::Ordering;
use std::fmt;

/// Numeric view over `INT` and `FLOAT` payloads.
///
/// Integers are stored as minimal big-endian two's complement bytes and floats
/// as big-endian IEEE-754 doubles. Arithmetic works on `i64`/`f64`; integer
/// overflow is reported instead of wrapping.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f.abs() < f64::EPSILON,
        }
    }

    pub fn checked_add(self, other: Number) -> Option<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.checked_add(b).map(Number::Int),
            (a, b) => Some(Number::Float(a.as_f64() + b.as_f64())),
        }
    }

    pub fn checked_sub(self, other: Number) -> Option<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.checked_sub(b).map(Number::Int),
            (a, b) => Some(Number::Float(a.as_f64() - b.as_f64())),
        }
    }

    pub fn checked_mul(self, other: Number) -> Option<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.checked_mul(b).map(Number::Int),
            (a, b) => Some(Number::Float(a.as_f64() * b.as_f64())),
        }
    }

    /// Integer division truncates; `None` on a zero divisor or overflow.
    pub fn checked_div(self, other: Number) -> Option<Number> {
        if other.is_zero() {
            return None;
        }
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.checked_div(b).map(Number::Int),
            (a, b) => Some(Number::Float(a.as_f64() / b.as_f64())),
        }
    }

    pub fn checked_rem(self, other: Number) -> Option<Number> {
        if other.is_zero() {
            return None;
        }
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.checked_rem(b).map(Number::Int),
            (a, b) => Some(Number::Float(a.as_f64() % b.as_f64())),
        }
    }

    pub fn checked_neg(self) -> Option<Number> {
        match self {
            Number::Int(i) => i.checked_neg().map(Number::Int),
            Number::Float(f) => Some(Number::Float(-f)),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Encodes an integer as minimal big-endian two's complement bytes.
pub fn int_to_bytes(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let negative = value < 0;
    let pad = if negative { 0xff } else { 0x00 };
    let mut start = 0;

    while start < bytes.len() - 1
        && bytes[start] == pad
        && (bytes[start + 1] & 0x80 != 0) == negative
    {
        start += 1;
    }

    bytes[start..].to_vec()
}

/// Decodes two's complement big-endian bytes; `None` if the value exceeds `i64`.
pub fn bytes_to_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }

    let negative = bytes[0] & 0x80 != 0;
    let pad = if negative { 0xff } else { 0x00 };
    let significant = bytes
        .iter()
        .position(|b| *b != pad)
        .map(|i| if i > 0 && (bytes[i] & 0x80 != 0) != negative { i - 1 } else { i })
        .unwrap_or(bytes.len() - 1);
    let trimmed = &bytes[significant..];

    if trimmed.len() > 8 {
        return None;
    }

    let mut buf = [pad; 8];
    buf[8 - trimmed.len()..].copy_from_slice(trimmed);
    Some(i64::from_be_bytes(buf))
}

/// Converts an optionally signed decimal literal of any length into two's complement bytes.
pub fn decimal_to_bytes(text: &str) -> Option<Vec<u8>> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // big-endian magnitude accumulated one decimal digit at a time
    let mut magnitude: Vec<u8> = vec![0];
    for digit in digits.bytes() {
        let mut carry = (digit - b'0') as u32;
        for byte in magnitude.iter_mut().rev() {
            let v = *byte as u32 * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        while carry > 0 {
            magnitude.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    while magnitude.len() > 1 && magnitude[0] == 0 {
        magnitude.remove(0);
    }
    if magnitude[0] & 0x80 != 0 {
        magnitude.insert(0, 0);
    }

    if negative && magnitude.iter().any(|b| *b != 0) {
        // two's complement: invert and add one
        for byte in magnitude.iter_mut() {
            *byte = !*byte;
        }
        for byte in magnitude.iter_mut().rev() {
            let (v, overflow) = byte.overflowing_add(1);
            *byte = v;
            if !overflow {
                break;
            }
        }
        while magnitude.len() > 1 && magnitude[0] == 0xff && magnitude[1] & 0x80 != 0 {
            magnitude.remove(0);
        }
    }

    Some(magnitude)
}

pub fn float_to_bytes(value: f64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn bytes_to_float(bytes: &[u8]) -> Option<f64> {
    <[u8; 8]>::try_from(bytes).ok().map(f64::from_be_bytes)
}

/// Packs hex digits into bytes, zero-padding on the left to a whole byte.
pub fn hex_to_bytes(digits: &str) -> Vec<u8> {
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };

    padded
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect()
}

/// Packs binary digits into bytes, zero-padding on the left to a whole byte.
pub fn bin_to_bytes(digits: &str) -> Vec<u8> {
    let pad = (8 - digits.len() % 8) % 8;
    let padded = format!("{}{}", "0".repeat(pad), digits);

    padded
        .as_bytes()
        .chunks(8)
        .filter_map(|bits| std::str::from_utf8(bits).ok())
        .filter_map(|bits| u8::from_str_radix(bits, 2).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, vec![0x00])]
    #[case::one(1, vec![0x01])]
    #[case::byte_boundary(128, vec![0x00, 0x80])]
    #[case::minus_one(-1, vec![0xff])]
    #[case::minus_129(-129, vec![0xff, 0x7f])]
    #[case::max(i64::MAX, vec![0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff])]
    fn test_int_to_bytes(#[case] value: i64, #[case] expected: Vec<u8>) {
        assert_eq!(int_to_bytes(value), expected);
        assert_eq!(bytes_to_int(&expected), Some(value));
    }

    #[rstest]
    #[case::plain("42", Some(vec![42]))]
    #[case::leading_zero("007", Some(vec![7]))]
    #[case::negative("-129", Some(vec![0xff, 0x7f]))]
    #[case::wide("18446744073709551616", Some(vec![0x01, 0, 0, 0, 0, 0, 0, 0, 0]))]
    #[case::invalid("12a", None)]
    fn test_decimal_to_bytes(#[case] text: &str, #[case] expected: Option<Vec<u8>>) {
        assert_eq!(decimal_to_bytes(text), expected);
    }

    #[test]
    fn test_wide_int_does_not_fit() {
        let bytes = decimal_to_bytes("18446744073709551616").unwrap();
        assert_eq!(bytes_to_int(&bytes), None);
    }

    #[rstest]
    #[case::odd("abc", vec![0x0a, 0xbc])]
    #[case::even("ff00", vec![0xff, 0x00])]
    fn test_hex_to_bytes(#[case] digits: &str, #[case] expected: Vec<u8>) {
        assert_eq!(hex_to_bytes(digits), expected);
    }

    #[rstest]
    #[case::short("101", vec![0x05])]
    #[case::nine_bits("100000001", vec![0x01, 0x01])]
    fn test_bin_to_bytes(#[case] digits: &str, #[case] expected: Vec<u8>) {
        assert_eq!(bin_to_bytes(digits), expected);
    }

    #[rstest]
    #[case::int_float(Number::Int(1), Number::Float(1.0), true)]
    #[case::ints(Number::Int(1), Number::Int(2), false)]
    fn test_numeric_equality(#[case] a: Number, #[case] b: Number, #[case] expected: bool) {
        assert_eq!(a == b, expected);
    }

    #[test]
    fn test_checked_ops() {
        assert_eq!(Number::Int(i64::MAX).checked_add(Number::Int(1)), None);
        assert_eq!(Number::Int(7).checked_div(Number::Int(0)), None);
        assert_eq!(
            Number::Int(7).checked_div(Number::Int(2)),
            Some(Number::Int(3))
        );
        assert_eq!(
            Number::Int(1).checked_add(Number::Float(0.5)),
            Some(Number::Float(1.5))
        );
    }
}
