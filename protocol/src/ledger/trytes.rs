//! Tryte codec: the ledger's base-27 text encoding.
//!
//! The ledger encodes everything (hashes, addresses, values, attached
//! messages) as strings over the 27-character alphabet `9A-Z`. Two views of
//! a tryte are used here:
//!
//! - **Index** view, `9 = 0, A = 1, ..., Z = 26`, used by the message
//!   encoding. One character is two trytes, `code = first + 27 * second`.
//! - **Balanced** view, `9 = 0, A..M = 1..13, N..Z = -13..-1`, used by
//!   numeric fields. Numbers are little-endian balanced base 27.

use thiserror::Error;

use crate::config::MESSAGE_TRYTES_LENGTH;

/// The tryte alphabet in index order.
pub const TRYTE_ALPHABET: &[u8; 27] = b"9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Errors produced by the tryte codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryteError {
    #[error("invalid tryte {found:?} at position {position}")]
    InvalidCharacter { position: usize, found: char },

    #[error("tryte string has odd length {0}; messages use two trytes per character")]
    OddLength(usize),

    #[error("character {0:?} cannot be encoded in two trytes")]
    Unencodable(char),

    #[error("numeric tryte field does not fit in 64 bits")]
    Overflow,

    #[error("tryte field too short: expected at least {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Position of a tryte in [`TRYTE_ALPHABET`], or `None` for foreign bytes.
pub fn tryte_index(byte: u8) -> Option<u8> {
    match byte {
        b'9' => Some(0),
        b'A'..=b'Z' => Some(byte - b'A' + 1),
        _ => None,
    }
}

/// Balanced value of a tryte, in `-13..=13`.
pub fn tryte_value(byte: u8) -> Option<i8> {
    tryte_index(byte).map(|i| if i <= 13 { i as i8 } else { i as i8 - 27 })
}

/// Returns `true` for a non-empty string made only of trytes.
pub fn is_trytes(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| tryte_index(b).is_some())
}

/// Returns `true` if every tryte is `9`. Nodes answer unknown hashes with
/// an all-nines transaction.
pub fn is_null(s: &str) -> bool {
    s.bytes().all(|b| b == b'9')
}

fn check_trytes(s: &str) -> Result<(), TryteError> {
    match s.bytes().position(|b| tryte_index(b).is_none()) {
        Some(position) => Err(TryteError::InvalidCharacter {
            position,
            found: s[position..].chars().next().unwrap_or('?'),
        }),
        None => Ok(()),
    }
}

/// Decodes tryte pairs into characters.
pub fn trytes_to_ascii(trytes: &str) -> Result<String, TryteError> {
    check_trytes(trytes)?;
    if trytes.len() % 2 != 0 {
        return Err(TryteError::OddLength(trytes.len()));
    }

    let bytes = trytes.as_bytes();
    let mut out = String::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        // Both lookups succeed after check_trytes.
        let first = tryte_index(pair[0]).unwrap_or(0) as u32;
        let second = tryte_index(pair[1]).unwrap_or(0) as u32;
        // At most 26 + 26 * 27 = 728, always a valid scalar value.
        if let Some(c) = char::from_u32(first + second * 27) {
            out.push(c);
        }
    }
    Ok(out)
}

/// Encodes text as tryte pairs. Only code points below 729 are encodable;
/// in practice that means Latin-1.
pub fn ascii_to_trytes(text: &str) -> Result<String, TryteError> {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        let code = c as u32;
        if code >= 27 * 27 {
            return Err(TryteError::Unencodable(c));
        }
        out.push(TRYTE_ALPHABET[(code % 27) as usize] as char);
        out.push(TRYTE_ALPHABET[(code / 27) as usize] as char);
    }
    Ok(out)
}

/// Decodes the payment message attached to a transaction.
///
/// Only the first [`MESSAGE_TRYTES_LENGTH`] trytes of the fragment carry
/// text. `9`-padding decodes to NUL characters, which are trimmed together
/// with any surrounding whitespace.
pub fn decode_message(fragment: &str) -> Result<String, TryteError> {
    if fragment.len() < MESSAGE_TRYTES_LENGTH {
        return Err(TryteError::TooShort {
            expected: MESSAGE_TRYTES_LENGTH,
            actual: fragment.len(),
        });
    }
    let text = trytes_to_ascii(&fragment[..MESSAGE_TRYTES_LENGTH])?;
    Ok(text.trim_matches(|c: char| c <= ' ').to_string())
}

/// Decodes a little-endian balanced base-27 number.
pub fn trytes_to_i64(trytes: &str) -> Result<i64, TryteError> {
    check_trytes(trytes)?;

    let mut value: i128 = 0;
    for byte in trytes.bytes().rev() {
        let digit = tryte_value(byte).unwrap_or(0) as i128;
        value = value
            .checked_mul(27)
            .and_then(|v| v.checked_add(digit))
            .ok_or(TryteError::Overflow)?;
    }
    i64::try_from(value).map_err(|_| TryteError::Overflow)
}

/// Encodes a number as a little-endian balanced base-27 field of exactly
/// `len` trytes.
pub fn i64_to_trytes(value: i64, len: usize) -> Result<String, TryteError> {
    let mut remaining = value as i128;
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let mut digit = remaining % 27;
        if digit > 13 {
            digit -= 27;
        } else if digit < -13 {
            digit += 27;
        }
        remaining = (remaining - digit) / 27;
        let index = if digit < 0 { digit + 27 } else { digit };
        out.push(TRYTE_ALPHABET[index as usize] as char);
    }
    if remaining != 0 {
        return Err(TryteError::Overflow);
    }
    Ok(out)
}

/// A balanced ternary digit, `-1`, `0` or `1`.
pub type Trit = i8;

/// Expands trytes into trits, three per tryte, least significant first.
pub fn trytes_to_trits(trytes: &str) -> Result<Vec<Trit>, TryteError> {
    check_trytes(trytes)?;

    let mut out = Vec::with_capacity(trytes.len() * 3);
    for byte in trytes.bytes() {
        let mut value = tryte_value(byte).unwrap_or(0);
        for _ in 0..3 {
            let mut trit = value % 3;
            if trit > 1 {
                trit -= 3;
            } else if trit < -1 {
                trit += 3;
            }
            out.push(trit);
            value = (value - trit) / 3;
        }
    }
    Ok(out)
}

/// Packs trits back into trytes. A trailing partial group is dropped.
pub fn trits_to_trytes(trits: &[Trit]) -> String {
    trits
        .chunks_exact(3)
        .map(|t| {
            let value = t[0] + 3 * t[1] + 9 * t[2];
            let index = if value < 0 { value + 27 } else { value };
            TRYTE_ALPHABET[index as usize] as char
        })
        .collect()
}

/// Right-pads with `9` up to `len` trytes. Longer inputs are returned as-is.
pub fn pad_trytes(trytes: &str, len: usize) -> String {
    let mut out = String::with_capacity(len.max(trytes.len()));
    out.push_str(trytes);
    while out.len() < len {
        out.push('9');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_views_agree() {
        assert_eq!(tryte_index(b'9'), Some(0));
        assert_eq!(tryte_index(b'Z'), Some(26));
        assert_eq!(tryte_value(b'M'), Some(13));
        assert_eq!(tryte_value(b'N'), Some(-13));
        assert_eq!(tryte_value(b'Z'), Some(-1));
        assert_eq!(tryte_index(b'a'), None);
        for (i, b) in TRYTE_ALPHABET.iter().enumerate() {
            assert_eq!(tryte_index(*b), Some(i as u8));
        }
    }

    #[test]
    fn known_message_encoding() {
        // 'H' = 72 = 18 + 2 * 27 -> "RB"; 'i' = 105 = 24 + 3 * 27 -> "XC".
        assert_eq!(ascii_to_trytes("Hi").unwrap(), "RBXC");
        assert_eq!(trytes_to_ascii("RBXC").unwrap(), "Hi");
        // Space is 32 = 5 + 27 -> "EA".
        assert_eq!(ascii_to_trytes(" ").unwrap(), "EA");
    }

    #[test]
    fn decode_message_trims_padding() {
        let text = "2f1c9a0e-0000-4000-8000-000000000001 7b6d4c1a-0000-4000-8000-000000000002";
        let fragment = pad_trytes(&ascii_to_trytes(text).unwrap(), 2187);
        assert_eq!(decode_message(&fragment).unwrap(), text);
    }

    #[test]
    fn decode_message_rejects_short_fragment() {
        assert!(matches!(
            decode_message("RBXC"),
            Err(TryteError::TooShort { .. })
        ));
    }

    #[test]
    fn odd_and_invalid_inputs() {
        assert_eq!(trytes_to_ascii("ABC"), Err(TryteError::OddLength(3)));
        assert!(matches!(
            trytes_to_ascii("AB-D"),
            Err(TryteError::InvalidCharacter { position: 2, .. })
        ));
        assert!(matches!(
            ascii_to_trytes("€"),
            Err(TryteError::Unencodable('€'))
        ));
    }

    #[test]
    fn numeric_fields() {
        assert_eq!(trytes_to_i64("A99").unwrap(), 1);
        assert_eq!(trytes_to_i64("Z99").unwrap(), -1);
        assert_eq!(trytes_to_i64("9A9").unwrap(), 27);
        assert_eq!(trytes_to_i64(&"9".repeat(27)).unwrap(), 0);

        for value in [0, 1, -1, 13, 14, -14, 999, 1000, 1337, 2_779_530_283_277_761] {
            let encoded = i64_to_trytes(value, 27).unwrap();
            assert_eq!(encoded.len(), 27);
            assert_eq!(trytes_to_i64(&encoded).unwrap(), value, "value {value}");
        }
    }

    #[test]
    fn numeric_overflow_detected() {
        assert_eq!(i64_to_trytes(1_000, 2), Err(TryteError::Overflow));
        assert_eq!(trytes_to_i64(&"M".repeat(27)), Err(TryteError::Overflow));
    }

    #[test]
    fn trit_expansion() {
        assert_eq!(trytes_to_trits("9").unwrap(), vec![0, 0, 0]);
        assert_eq!(trytes_to_trits("A").unwrap(), vec![1, 0, 0]);
        assert_eq!(trytes_to_trits("M").unwrap(), vec![1, 1, 1]);
        assert_eq!(trytes_to_trits("N").unwrap(), vec![-1, -1, -1]);
        assert_eq!(trytes_to_trits("E").unwrap(), vec![-1, -1, 1]);
        assert!(trytes_to_trits("a").is_err());

        let all = std::str::from_utf8(TRYTE_ALPHABET).unwrap();
        assert_eq!(trits_to_trytes(&trytes_to_trits(all).unwrap()), all);
    }

    #[test]
    fn validity_helpers() {
        assert!(is_trytes("ABC9"));
        assert!(!is_trytes(""));
        assert!(!is_trytes("abc"));
        assert!(is_null("999"));
        assert!(!is_null("99A"));
        assert_eq!(pad_trytes("AB", 5), "AB999");
    }
}
