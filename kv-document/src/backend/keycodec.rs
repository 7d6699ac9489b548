//! Order-preserving byte encoding of key attribute values.
//!
//! Every encoded component is self-delimiting, so a hash key followed by a
//! range key sorts first by hash and then by range.

use crate::AttributeValue;
use crate::backend::BackendResult;
use crate::error::BackendError;

const TAG_NEGATIVE: u8 = 0x01;
const TAG_ZERO: u8 = 0x02;
const TAG_POSITIVE: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;

const EXPONENT_BIAS: i64 = 1 << 31;

/// Smallest key strictly greater than every key starting with `key`.
pub(crate) fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next_key = key.to_vec();
    for i in (0..next_key.len()).rev() {
        if next_key[i] < 0xff {
            next_key[i] += 1;
            next_key.truncate(i + 1);
            return next_key;
        }
    }
    next_key.push(0xff);
    next_key
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        buf.push(byte);
        if byte == 0x00 {
            buf.push(0xff);
        }
    }
    buf.extend_from_slice(&[0x00, 0x01]);
}

/// Splits a decimal into (negative, significant digits, exponent) with
/// `value = 0.d1d2d3... * 10^exponent`. `None` digits means zero.
fn normalize_number(n: &str) -> BackendResult<(bool, Vec<u8>, i64)> {
    let invalid = || BackendError::Validation(format!("invalid number {}", n));
    let n = n.trim();
    let (negative, body) = match n.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, n.strip_prefix('+').unwrap_or(n)),
    };
    let (mantissa, exponent) = match body.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i64>().map_err(|_| invalid())?),
        None => (body, 0),
    };
    let (integer, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if integer.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !integer.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let digits: Vec<u8> = integer.bytes().chain(fraction.bytes()).collect();
    let leading = digits.iter().take_while(|&&d| d == b'0').count();
    let significant: Vec<u8> = digits[leading..].to_vec();
    let trailing = significant.iter().rev().take_while(|&&d| d == b'0').count();
    let significant = significant[..significant.len() - trailing].to_vec();
    let exponent = integer.len() as i64 - leading as i64 + exponent;
    Ok((negative, significant, exponent))
}

fn encode_number(buf: &mut Vec<u8>, n: &str) -> BackendResult<()> {
    let (negative, digits, exponent) = normalize_number(n)?;
    if digits.is_empty() {
        buf.push(TAG_ZERO);
        return Ok(());
    }
    let biased = (exponent + EXPONENT_BIAS) as u32;
    if negative {
        buf.push(TAG_NEGATIVE);
        buf.extend_from_slice(&(!biased).to_be_bytes());
        buf.extend(digits.iter().map(|d| 0xff - d));
        buf.push(0xff);
    } else {
        buf.push(TAG_POSITIVE);
        buf.extend_from_slice(&biased.to_be_bytes());
        buf.extend_from_slice(&digits);
        buf.push(0x00);
    }
    Ok(())
}

pub(crate) fn encode_value(buf: &mut Vec<u8>, value: &AttributeValue) -> BackendResult<()> {
    match value {
        AttributeValue::S(s) => {
            buf.push(TAG_STRING);
            encode_bytes(buf, s.as_bytes());
        }
        AttributeValue::B(b) => {
            buf.push(TAG_BINARY);
            encode_bytes(buf, b);
        }
        AttributeValue::N(n) => encode_number(buf, n)?,
        other => {
            return Err(BackendError::Validation(format!(
                "{:?} cannot be used as a key",
                other
            )));
        }
    }
    Ok(())
}

/// Concatenated encoding of key components, in order.
pub(crate) fn encode_key<'a>(
    values: impl IntoIterator<Item = &'a AttributeValue>,
) -> BackendResult<Vec<u8>> {
    let mut buf = Vec::new();
    for value in values {
        encode_value(&mut buf, value)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: &str) -> Vec<u8> {
        encode_key([&AttributeValue::N(v.to_string())]).unwrap()
    }

    #[test]
    fn numbers_sort_numerically() {
        let ordered = [
            "-1000", "-12.5", "-12", "-1.25", "-1.2", "-0.001", "0", "0.001", "1.2", "1.25", "12",
            "12.5", "1000", "1e5",
        ];
        for pair in ordered.windows(2) {
            assert!(n(pair[0]) < n(pair[1]), "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(n("1.50"), n("1.5"));
        assert_eq!(n("0.0"), n("-0"));
        assert_eq!(n("100"), n("1e2"));
        // integers beyond f64 precision stay distinct
        assert!(n("9007199254740992") < n("9007199254740993"));
    }

    #[test]
    fn composite_keys_sort_by_hash_then_range() {
        let key = |h: &str, r: &str| {
            encode_key([&AttributeValue::S(h.to_string()), &AttributeValue::N(r.to_string())])
                .unwrap()
        };
        assert!(key("a", "10") < key("a", "9e1"));
        assert!(key("a", "99") < key("ab", "1"));
        assert!(key("a\0", "1") > key("a", "100"));
    }

    #[test]
    fn next_key_bounds_prefix() {
        assert_eq!(next_key(b"ab"), b"ac".to_vec());
        assert_eq!(next_key(&[0x01, 0xff]), vec![0x02]);
        let prefix = encode_key([&AttributeValue::S("a".to_string())]).unwrap();
        let within = key_with_suffix(&prefix);
        assert!(within < next_key(&prefix));
    }

    fn key_with_suffix(prefix: &[u8]) -> Vec<u8> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&[0xff, 0xff]);
        key
    }

    #[test]
    fn rejects_non_scalar_keys() {
        assert!(encode_key([&AttributeValue::Bool(true)]).is_err());
        assert!(encode_key([&AttributeValue::N("abc".into())]).is_err());
    }
}
