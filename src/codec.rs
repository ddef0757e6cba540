// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Binary encoding of partial aggregate states.
//!
//! Partial states travel between workers whenever the host spills,
//! checkpoints or redistributes an aggregation, so the layout is a stable
//! exchange format:
//!
//! ```plain
//! | total_len (i32) | fragment_count (i32) | value | separator | value | separator | ... |
//! ```
//!
//! where each string is a `u32` byte length followed by that many bytes
//! of UTF-8. All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::error::{DecodeError, Error, Result};
use crate::state::{Fragment, StringAggState};

/// Byte size of the two-integer header.
const HEADER_SIZE: usize = 2 * std::mem::size_of::<i32>();
/// Byte size of one string length prefix.
const PREFIX_SIZE: usize = std::mem::size_of::<u32>();

/// Serializes a partial state.
///
/// The output buffer is sized up front from the state's bookkeeping, and
/// the layout round-trips through [`decode`] exactly.
pub fn encode(state: &StringAggState) -> Result<Vec<u8>> {
    let total_len = i32::try_from(state.total_len())
        .map_err(|_| Error::state_too_large("total_len", state.total_len()))?;
    let fragment_count = i32::try_from(state.len())
        .map_err(|_| Error::state_too_large("fragment_count", state.len()))?;

    let mut buf =
        Vec::with_capacity(HEADER_SIZE + state.len() * 2 * PREFIX_SIZE + state.total_len());
    buf.put_i32_le(total_len);
    buf.put_i32_le(fragment_count);
    for fragment in state.fragments() {
        put_str(&mut buf, &fragment.value);
        put_str(&mut buf, &fragment.separator);
    }
    Ok(buf)
}

/// Deserializes a partial state, ready for further accumulate, merge and
/// output calls.
///
/// Truncated, negative-length, non-UTF-8 or otherwise malformed input is
/// rejected as a whole, and the header length sum is verified against the
/// decoded fragments.
pub fn decode(buf: &[u8]) -> Result<StringAggState> {
    let mut buf = buf;
    let total_len = get_i32(&mut buf, "total_len")?;
    let total_len = usize::try_from(total_len).map_err(|_| DecodeError::Negative {
        field: "total_len",
        value: total_len,
    })?;
    let fragment_count = get_i32(&mut buf, "fragment_count")?;
    let fragment_count = usize::try_from(fragment_count).map_err(|_| DecodeError::Negative {
        field: "fragment_count",
        value: fragment_count,
    })?;

    let mut state = StringAggState::with_row_capacity(fragment_count);
    for _ in 0..fragment_count {
        let value = get_str(&mut buf, "value")?;
        let separator = get_str(&mut buf, "separator")?;
        state.push(Fragment { value, separator });
    }

    if state.total_len() != total_len {
        return Err(DecodeError::LengthMismatch {
            header: total_len,
            actual: state.total_len(),
        }
        .into());
    }
    if !buf.is_empty() {
        return Err(DecodeError::TrailingBytes(buf.len()).into());
    }
    Ok(state)
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    // bounded by `total_len`, which was checked against `i32::MAX` before
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_i32(buf: &mut &[u8], field: &'static str) -> Result<i32> {
    if buf.remaining() < std::mem::size_of::<i32>() {
        return Err(DecodeError::UnexpectedEof {
            field,
            expected: std::mem::size_of::<i32>(),
            remaining: buf.remaining(),
        }
        .into());
    }
    Ok(buf.get_i32_le())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String> {
    if buf.remaining() < PREFIX_SIZE {
        return Err(DecodeError::UnexpectedEof {
            field,
            expected: PREFIX_SIZE,
            remaining: buf.remaining(),
        }
        .into());
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEof {
            field,
            expected: len,
            remaining: buf.remaining(),
        }
        .into());
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(bytes).map_err(|source| DecodeError::InvalidUtf8 { field, source }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_of(rows: &[(&str, &str)]) -> StringAggState {
        let mut state = StringAggState::new();
        for (value, separator) in rows {
            state.accumulate(Some(value), Some(separator));
        }
        state
    }

    #[test]
    fn encode_empty_state() {
        let bytes = encode(&StringAggState::new()).unwrap();
        assert_eq!(bytes, vec![0; HEADER_SIZE]);
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn encode_matches_layout() {
        let bytes = encode(&state_of(&[("a", "-"), ("bc", "")])).unwrap();
        #[rustfmt::skip]
        assert_eq!(
            bytes,
            vec![
                4, 0, 0, 0,             // total_len
                2, 0, 0, 0,             // fragment_count
                1, 0, 0, 0, b'a',
                1, 0, 0, 0, b'-',
                2, 0, 0, 0, b'b', b'c',
                0, 0, 0, 0,
            ]
        );
    }

    #[test]
    fn round_trip_reproduces_state_and_bytes() {
        let state = state_of(&[("a", "-"), ("日本", "、"), ("", ","), ("z", "")]);
        let bytes = encode(&state).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.output(), state.output());
        assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn decoded_state_accepts_further_rows() {
        let bytes = encode(&state_of(&[("a", "-")])).unwrap();
        let mut state = decode(&bytes).unwrap();
        state.accumulate(Some("b"), None);
        assert_eq!(state.output(), Some("a-b".to_string()));
    }

    #[test]
    fn reject_truncated_header() {
        assert!(matches!(
            decode(&[1, 2, 3]),
            Err(Error::Decode(DecodeError::UnexpectedEof {
                field: "total_len",
                ..
            }))
        ));
        assert!(matches!(
            decode(&[0, 0, 0, 0, 1, 0]),
            Err(Error::Decode(DecodeError::UnexpectedEof {
                field: "fragment_count",
                ..
            }))
        ));
    }

    #[test]
    fn reject_truncated_fragment() {
        let mut bytes = encode(&state_of(&[("abc", "-")])).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Decode(DecodeError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn reject_negative_header_fields() {
        let mut bytes = vec![];
        bytes.put_i32_le(-1);
        bytes.put_i32_le(0);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Decode(DecodeError::Negative {
                field: "total_len",
                value: -1,
            }))
        ));

        let mut bytes = vec![];
        bytes.put_i32_le(0);
        bytes.put_i32_le(-5);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Decode(DecodeError::Negative {
                field: "fragment_count",
                value: -5,
            }))
        ));
    }

    #[test]
    fn reject_length_sum_mismatch() {
        let mut bytes = encode(&state_of(&[("ab", "-")])).unwrap();
        // corrupt the header sum: 3 -> 7
        bytes[0] = 7;
        assert!(matches!(
            decode(&bytes),
            Err(Error::Decode(DecodeError::LengthMismatch {
                header: 7,
                actual: 3,
            }))
        ));
    }

    #[test]
    fn reject_trailing_bytes() {
        let mut bytes = encode(&state_of(&[("a", "-")])).unwrap();
        bytes.push(0xde);
        bytes.push(0xad);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Decode(DecodeError::TrailingBytes(2)))
        ));
    }

    #[test]
    fn reject_invalid_utf8() {
        let mut bytes = vec![];
        bytes.put_i32_le(1);
        bytes.put_i32_le(1);
        bytes.put_u32_le(1);
        bytes.put_u8(0xff);
        bytes.put_u32_le(0);
        assert!(matches!(
            decode(&bytes),
            Err(Error::Decode(DecodeError::InvalidUtf8 {
                field: "value",
                ..
            }))
        ));
    }
}
